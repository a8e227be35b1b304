use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::HciError;
use crate::hci::{DeviceMap, DeviceObservation, HciBus, SubscriptionId};

/// Wait point for in-flight LE scans.
///
/// A scan blocks here until its timeout elapses or a concurrent power-off
/// broadcasts. The generation counter makes the broadcast the only event
/// that can end a wait early; a spurious condvar wakeup re-enters the wait
/// with the remaining budget.
pub(crate) struct ScanGate {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl ScanGate {
    pub fn new() -> ScanGate {
        ScanGate {
            generation: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// Wakes every thread currently blocked in [`ScanGate::wait`].
    pub fn interrupt_all(&self) {
        let mut generation = self
            .generation
            .lock()
            .expect("Mutex should not be poisoned.");
        *generation += 1;
        self.cond.notify_all();
    }

    /// Blocks for up to `timeout`, or until interrupted.
    pub fn wait(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut generation = self
            .generation
            .lock()
            .expect("Mutex should not be poisoned.");
        let entered_at = *generation;
        while *generation == entered_at {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            let (guard, result) = self
                .cond
                .wait_timeout(generation, remaining)
                .expect("Mutex should not be poisoned.");
            generation = guard;
            if result.timed_out() {
                break;
            }
        }
    }
}

/// One low-energy scan in progress.
///
/// Created before discovery starts so that no observation window is lost:
/// the session first seeds its accumulator from the snapshot of already
/// registered device objects, then subscribes to live appearances. Live
/// observations cross over from the dispatch thread through a channel that
/// is drained only after the wait ends, so the accumulator itself is never
/// touched by two threads.
pub(crate) struct ScanSession {
    bus: Arc<dyn HciBus>,
    gate: Arc<ScanGate>,
    devices: DeviceMap,
    observations: Receiver<DeviceObservation>,
    subscription: Option<SubscriptionId>,
}

impl ScanSession {
    /// Seeds the accumulator and subscribes to live device appearances.
    pub fn begin(bus: Arc<dyn HciBus>, gate: Arc<ScanGate>) -> Result<ScanSession, HciError> {
        let mut devices = DeviceMap::new();
        for observation in bus.known_devices()? {
            record(&mut devices, observation);
        }

        let (tx, rx) = mpsc::channel();
        let subscription = bus.subscribe_device_added(tx)?;
        Ok(ScanSession {
            bus,
            gate,
            devices,
            observations: rx,
            subscription: Some(subscription),
        })
    }

    /// Waits out the scan window, then keeps only the devices that are still
    /// observable: an address enters the result iff its signal strength is
    /// nonzero at this instant, no matter how it was discovered.
    pub fn complete(mut self, timeout: Duration) -> Result<DeviceMap, HciError> {
        self.gate.wait(timeout);

        while let Ok(observation) = self.observations.try_recv() {
            record(&mut self.devices, observation);
        }
        if let Some(id) = self.subscription.take() {
            self.bus.unsubscribe(id);
        }

        let mut found = DeviceMap::new();
        for (address, name) in &self.devices {
            let rssi = self.bus.device_rssi(address)?;
            if rssi != 0 {
                log::debug!("found BLE device {name} by address {address} ({rssi})");
                found.insert(*address, name.clone());
            }
        }
        Ok(found)
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.bus.unsubscribe(id);
        }
    }
}

/// First-seen name wins; later sightings of an address are ignored.
fn record(devices: &mut DeviceMap, observation: DeviceObservation) {
    devices
        .entry(observation.address)
        .or_insert(observation.name);
}
