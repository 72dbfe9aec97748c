// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Completion events for enqueued commands.
//!
//! Every command submitted to a [`Queue`](crate::Queue) returns an
//! [`Event`]. Waiting on the event blocks until the command has run and
//! yields the command's result. Device failures surface here, not at
//! submission time.

use crate::DeviceError;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Debug)]
enum EventState {
    Pending,
    Complete {
        result: Result<(), DeviceError>,
        elapsed: Duration,
    },
}

#[derive(Debug)]
struct EventInner {
    label: &'static str,
    profiling: bool,
    state: Mutex<EventState>,
    ready: Condvar,
}

/// Completion handle for one enqueued command.
///
/// Cloning an event yields another handle to the same completion.
#[derive(Debug, Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    pub(crate) fn pending(label: &'static str, profiling: bool) -> Self {
        Self {
            inner: Arc::new(EventInner {
                label,
                profiling,
                state: Mutex::new(EventState::Pending),
                ready: Condvar::new(),
            }),
        }
    }

    /// An event that is already complete, for operations with no device work.
    pub fn completed() -> Self {
        Self::finished("noop", Ok(()))
    }

    /// An event that is already complete with `result`.
    pub(crate) fn finished(label: &'static str, result: Result<(), DeviceError>) -> Self {
        let event = Self::pending(label, false);
        event.complete(result, Duration::ZERO);
        event
    }

    pub(crate) fn complete(&self, result: Result<(), DeviceError>, elapsed: Duration) {
        let mut state = match self.inner.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        *state = EventState::Complete { result, elapsed };
        self.inner.ready.notify_all();
    }

    /// Name of the command this event tracks.
    pub fn label(&self) -> &'static str {
        self.inner.label
    }

    pub fn is_complete(&self) -> bool {
        self.inner
            .state
            .lock()
            .map(|s| matches!(*s, EventState::Complete { .. }))
            .unwrap_or(false)
    }

    /// Blocks until the command has run and returns its result.
    pub fn wait(&self) -> Result<(), DeviceError> {
        self.wait_with(|result, _| result.clone())
    }

    /// Device-side execution time of the command.
    ///
    /// Waits for completion first. Fails with
    /// [`DeviceError::ProfilingUnavailable`] when the queue was created
    /// without profiling, or with the command's own error if it failed.
    pub fn duration(&self) -> Result<Duration, DeviceError> {
        if !self.inner.profiling {
            return Err(DeviceError::ProfilingUnavailable);
        }
        self.wait_with(|result, elapsed| result.clone().map(|_| *elapsed))
    }

    /// [`duration`](Self::duration) in milliseconds.
    pub fn duration_ms(&self) -> Result<f64, DeviceError> {
        self.duration().map(|d| d.as_secs_f64() * 1000.0)
    }

    /// Waits on every event and returns the first failure.
    pub fn wait_all(events: &[Event]) -> Result<(), DeviceError> {
        let mut first_err = None;
        for event in events {
            if let Err(e) = event.wait() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn wait_with<T>(
        &self,
        f: impl FnOnce(&Result<(), DeviceError>, &Duration) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| DeviceError::LockPoisoned)?;
        loop {
            match &*state {
                EventState::Complete { result, elapsed } => return f(result, elapsed),
                EventState::Pending => {
                    state = self
                        .inner
                        .ready
                        .wait(state)
                        .map_err(|_| DeviceError::LockPoisoned)?;
                }
            }
        }
    }
}
