use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::HciError;
use crate::hci::HciBus;

/// How long one dispatch pass may block waiting for bus traffic. Also bounds
/// how long shutdown waits for the thread to notice the stop flag.
const DISPATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Background notification dispatcher, one per adapter controller.
///
/// This thread is the only execution context that pumps bus notifications
/// and thus the only one that runs scan-observation callbacks; callers must
/// never assume callback execution on their own thread. It runs for the
/// controller's entire lifetime and is joined at teardown.
pub(crate) struct EventLoopThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EventLoopThread {
    pub fn spawn(name: &str, bus: Arc<dyn HciBus>) -> Result<EventLoopThread, HciError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(format!("hci-events-{name}"))
            .spawn(move || {
                while !stop_flag.load(Ordering::Acquire) {
                    if let Err(err) = bus.pump_events(DISPATCH_INTERVAL) {
                        log::warn!("event dispatch failed: {err}");
                        // Do not spin on a dead bus.
                        thread::sleep(DISPATCH_INTERVAL);
                    }
                }
            })
            .map_err(|err| HciError::Io(err.to_string()))?;

        Ok(EventLoopThread {
            stop,
            handle: Some(handle),
        })
    }

    /// Signals the loop to exit and joins it. Join failures are logged only;
    /// shutdown must never fail.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("event dispatch thread panicked before shutdown");
            }
        }
    }
}

impl Drop for EventLoopThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
