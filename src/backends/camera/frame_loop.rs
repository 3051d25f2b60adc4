// SPDX-License-Identifier: GPL-3.0-only

//! Producer thread lifecycle
//!
//! Software cameras fill their buffer pools from a dedicated thread. This
//! module owns that thread: start it, ask it to stop, join it, and make sure
//! it never outlives the pool it writes into.

use crate::constants::timing::PRODUCER_POLL_SLICE;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Action returned by the producer callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Run another iteration
    Continue,
    /// Leave the loop
    Stop,
}

/// Controller for a producer loop running in a separate thread
///
/// ```ignore
/// let mut producer = CaptureLoopController::start("sim-0", move |stop| {
///     if !sleep_unless_stopped(stop, frame_interval) {
///         return LoopAction::Stop;
///     }
///     fill_next_buffer();
///     LoopAction::Continue
/// });
///
/// producer.stop();
/// ```
pub struct CaptureLoopController {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl CaptureLoopController {
    /// Spawn the loop.
    ///
    /// `loop_fn` runs until it returns [`LoopAction::Stop`] or the controller
    /// is stopped. It receives the stop flag so long waits inside an
    /// iteration can bail out early.
    pub fn start<F>(name: &str, mut loop_fn: F) -> Self
    where
        F: FnMut(&AtomicBool) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        info!(name = %name, "Starting producer loop");

        let thread_handle = thread::spawn(move || {
            debug!(name = %thread_name, "Producer thread started");

            while !thread_stop.load(Ordering::SeqCst) {
                if loop_fn(&thread_stop) == LoopAction::Stop {
                    debug!(name = %thread_name, "Producer requested stop");
                    break;
                }
            }

            debug!(name = %thread_name, "Producer thread exiting");
        });

        Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop without waiting for it
    pub fn request_stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Signal the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Producer thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Producer thread joined");
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}

/// Sleep for `duration` in short slices.
///
/// Returns `false` as soon as `stop` is raised.
pub fn sleep_unless_stopped(stop: &AtomicBool, duration: Duration) -> bool {
    let until = Instant::now() + duration;
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let left = until.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return true;
        }
        thread::sleep(left.min(PRODUCER_POLL_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_loop_stops_itself() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = CaptureLoopController::start("test-loop", move |_| {
            if counter_clone.fetch_add(1, Ordering::SeqCst) >= 10 {
                LoopAction::Stop
            } else {
                LoopAction::Continue
            }
        });

        controller.join();
        assert_eq!(counter.load(Ordering::SeqCst), 11);
        assert!(!controller.is_running());
    }

    #[test]
    fn test_stop_interrupts_long_sleep() {
        let mut controller = CaptureLoopController::start("test-sleep", |stop| {
            if sleep_unless_stopped(stop, Duration::from_secs(30)) {
                LoopAction::Continue
            } else {
                LoopAction::Stop
            }
        });
        assert!(controller.is_running());

        let started = Instant::now();
        controller.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_sleep_completes_without_stop() {
        let stop = AtomicBool::new(false);
        assert!(sleep_unless_stopped(&stop, Duration::from_millis(15)));
        stop.store(true, Ordering::SeqCst);
        assert!(!sleep_unless_stopped(&stop, Duration::from_secs(5)));
    }
}
