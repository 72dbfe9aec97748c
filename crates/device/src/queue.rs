// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! In-order command queues.
//!
//! A [`Queue`] owns one worker thread fed by a channel. Commands run in
//! submission order and each completes its [`Event`] when done. Host code
//! never blocks on submission; it blocks only when it waits on an event or
//! calls [`Queue::finish`].
//!
//! The first failure of any command is also kept on the queue until the
//! next `finish`, so callers that drop the events of intermediate commands
//! still see it.

use crate::{DeviceError, Event};
use crossbeam::channel::{self, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

type Work = Box<dyn FnOnce() -> Result<(), DeviceError> + Send + 'static>;

enum Command {
    Execute { work: Work, event: Event },
    Shutdown,
}

struct QueueInner {
    id: usize,
    profiling: bool,
    sender: Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
    submitted: AtomicU64,
    first_error: Arc<Mutex<Option<DeviceError>>>,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
        let handle = match self.worker.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        tracing::debug!(queue = self.id, "command queue shut down");
    }
}

/// An in-order command queue bound to a [`Context`](crate::Context).
///
/// Cloning yields another handle to the same queue. The worker exits once
/// the last handle is dropped, after draining every command already
/// submitted.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    pub(crate) fn spawn(id: usize, profiling: bool) -> Result<Self, DeviceError> {
        let (sender, receiver) = channel::unbounded();
        let first_error = Arc::new(Mutex::new(None));
        let worker_error = Arc::clone(&first_error);
        let handle = thread::Builder::new()
            .name(format!("device-queue-{id}"))
            .spawn(move || worker(id, receiver, worker_error))
            .map_err(|e| DeviceError::Worker(e.to_string()))?;
        tracing::debug!(queue = id, profiling, "command queue started");

        Ok(Self {
            inner: Arc::new(QueueInner {
                id,
                profiling,
                sender,
                worker: Mutex::new(Some(handle)),
                submitted: AtomicU64::new(0),
                first_error,
            }),
        })
    }

    /// Enqueues `work` and returns its completion event.
    ///
    /// A panic inside `work` is caught and reported as a
    /// [`DeviceError::Kernel`] on the event.
    pub fn submit<F>(&self, label: &'static str, work: F) -> Event
    where
        F: FnOnce() -> Result<(), DeviceError> + Send + 'static,
    {
        let event = Event::pending(label, self.inner.profiling);
        let command = Command::Execute {
            work: Box::new(work),
            event: event.clone(),
        };
        if self.inner.sender.send(command).is_err() {
            event.complete(Err(DeviceError::QueueClosed(self.inner.id)), Default::default());
            return event;
        }
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        event
    }

    /// Blocks until every previously submitted command has run.
    ///
    /// Returns the first command failure since the last `finish` and
    /// clears it.
    pub fn finish(&self) -> Result<(), DeviceError> {
        self.submit("finish", || Ok(())).wait()?;
        match self.inner.first_error.lock() {
            Ok(mut slot) => slot.take().map_or(Ok(()), Err),
            Err(_) => Err(DeviceError::LockPoisoned),
        }
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    /// Whether events from this queue record execution time.
    pub fn is_profiling(&self) -> bool {
        self.inner.profiling
    }

    /// Commands accepted so far.
    pub fn submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("id", &self.inner.id)
            .field("profiling", &self.inner.profiling)
            .field("submitted", &self.submitted())
            .finish()
    }
}

fn worker(id: usize, receiver: Receiver<Command>, first_error: Arc<Mutex<Option<DeviceError>>>) {
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Execute { work, event } => {
                let started = Instant::now();
                let result = panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|_| {
                    Err(DeviceError::Kernel {
                        kernel: event.label(),
                        detail: "kernel panicked".into(),
                    })
                });
                let elapsed = started.elapsed();
                if let Err(e) = &result {
                    tracing::warn!(queue = id, command = event.label(), error = %e, "command failed");
                    if let Ok(mut slot) = first_error.lock() {
                        slot.get_or_insert_with(|| e.clone());
                    }
                } else {
                    tracing::trace!(queue = id, command = event.label(), ?elapsed, "command done");
                }
                event.complete(result, elapsed);
            }
            Command::Shutdown => break,
        }
    }
}
