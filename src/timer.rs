//! Repeating timers that drive window rotation
//!
//! [`ThreadTimer`] ticks on a dedicated sidecar thread so rotation never runs
//! on an instrumented thread. [`ManualTimer`] fires only when told to, which
//! makes rotation deterministic in tests.

use crate::error::{Result, SurveyError};
use crossbeam::channel::{self, Sender};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Work run on every tick
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// A timer that invokes a callback every `interval` until stopped
pub trait RepeatingTimer: Send {
    /// Arm the timer; starting an armed timer is an error
    fn start(&mut self, interval: Duration, callback: TimerCallback) -> Result<()>;

    /// Disarm the timer; stopping a stopped timer does nothing
    fn stop(&mut self);
}

/// Timer backed by a sidecar thread and `crossbeam::channel::tick`
#[derive(Default)]
pub struct ThreadTimer {
    /// Dropping the sender wakes the sidecar and ends its loop
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl RepeatingTimer for ThreadTimer {
    fn start(&mut self, interval: Duration, callback: TimerCallback) -> Result<()> {
        if interval.is_zero() {
            return Err(SurveyError::InvalidArgument(
                "timer interval must be greater than zero".to_string(),
            ));
        }
        if self.handle.is_some() {
            return Err(SurveyError::InvalidArgument(
                "timer is already running".to_string(),
            ));
        }

        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);
        let ticker = channel::tick(interval);
        let handle = thread::Builder::new()
            .name("chokepoint-timer".to_string())
            .spawn(move || loop {
                channel::select! {
                    recv(ticker) -> _ => callback(),
                    recv(shutdown_rx) -> _ => break,
                }
            })
            .map_err(|e| SurveyError::InvalidArgument(format!("cannot spawn timer thread: {}", e)))?;

        tracing::debug!(interval_ms = interval.as_millis() as u64, "timer started");
        self.shutdown = Some(shutdown_tx);
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            // A callback that stops its own timer cannot wait for itself
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            tracing::debug!("timer stopped");
        }
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for ThreadTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadTimer")
            .field("running", &self.is_running())
            .finish()
    }
}

type Armed = Option<(Duration, TimerCallback)>;

/// Timer fired by hand
///
/// Clones share state: keep one clone to call [`fire`](Self::fire) after the
/// other has been handed to a surveyor.
#[derive(Clone, Default)]
pub struct ManualTimer {
    armed: Arc<Mutex<Armed>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the callback once; returns false when the timer is not armed
    pub fn fire(&self) -> bool {
        // Clone out of the lock so the callback may stop the timer
        let callback = match self.armed.lock() {
            Ok(armed) => armed.as_ref().map(|(_, callback)| Arc::clone(callback)),
            Err(poisoned) => poisoned
                .into_inner()
                .as_ref()
                .map(|(_, callback)| Arc::clone(callback)),
        };
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.interval().is_some()
    }

    pub fn interval(&self) -> Option<Duration> {
        match self.armed.lock() {
            Ok(armed) => armed.as_ref().map(|(interval, _)| *interval),
            Err(poisoned) => poisoned.into_inner().as_ref().map(|(interval, _)| *interval),
        }
    }

    fn set(&self, value: Armed) -> Armed {
        match self.armed.lock() {
            Ok(mut armed) => std::mem::replace(&mut *armed, value),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), value),
        }
    }
}

impl RepeatingTimer for ManualTimer {
    fn start(&mut self, interval: Duration, callback: TimerCallback) -> Result<()> {
        if interval.is_zero() {
            return Err(SurveyError::InvalidArgument(
                "timer interval must be greater than zero".to_string(),
            ));
        }
        if self.is_armed() {
            return Err(SurveyError::InvalidArgument(
                "timer is already running".to_string(),
            ));
        }
        self.set(Some((interval, callback)));
        Ok(())
    }

    fn stop(&mut self) {
        self.set(None);
    }
}

impl fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualTimer")
            .field("interval", &self.interval())
            .finish()
    }
}
