// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Compact-float operation dispatch.
//!
//! Every [`Dispatcher`] method works in two phases. It first validates its
//! operands on the calling thread and fails synchronously with a
//! [`TensorError`] when a size, stride, dtype or aliasing rule is broken;
//! nothing is enqueued in that case. It then builds exactly one
//! [`DeviceOp`] (two for the copy-then-apply unary functions), submits it to
//! the dispatcher's queue and returns the completion [`Event`]. Composite
//! operations such as `conv2d` check every stage up front and return the
//! last stage's event.
//!
//! Outputs are pre-allocated by the caller. Calls on one dispatcher execute
//! in submission order.

mod conv;
mod convert;
mod init;
mod math;
mod memory;
mod validate;

use crate::kernel::{DeviceOp, KernelBackend, ReferenceBackend};
use device::{Context, Event, Queue};
use std::sync::Arc;

#[cfg(doc)]
use crate::TensorError;

/// Issues validated kernels on one queue.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    queue: Queue,
    backend: Arc<dyn KernelBackend>,
}

impl Dispatcher {
    pub fn new(queue: Queue, backend: Arc<dyn KernelBackend>) -> Self {
        Self { queue, backend }
    }

    /// A dispatcher on the context's default queue backed by a
    /// [`ReferenceBackend`] seeded with `seed`.
    pub fn reference(ctx: &Context, seed: u64) -> Self {
        Self::new(
            ctx.default_queue().clone(),
            Arc::new(ReferenceBackend::seeded(seed)),
        )
    }

    /// The same backend issuing on another queue.
    pub fn on_queue(&self, queue: Queue) -> Self {
        Self::new(queue, Arc::clone(&self.backend))
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn backend(&self) -> &dyn KernelBackend {
        self.backend.as_ref()
    }

    /// Blocks until every kernel issued so far has finished.
    pub fn finish(&self) -> Result<(), device::DeviceError> {
        self.queue.finish()
    }

    fn enqueue(&self, op: DeviceOp) -> Event {
        let kernel = op.name();
        tracing::debug!(
            kernel,
            queue = self.queue.id(),
            backend = self.backend.name(),
            "enqueue kernel"
        );
        let backend = Arc::clone(&self.backend);
        self.queue.submit(kernel, move || backend.launch(&op))
    }
}
