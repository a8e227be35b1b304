use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::address::MacAddress;
use crate::error::HciError;
use crate::hci::connection::HciConnection;
use crate::hci::event_loop::EventLoopThread;
use crate::hci::scan::{ScanGate, ScanSession};
use crate::hci::{ClassicInquiry, DeviceMap, HciBus, HciInfo, Transport};

const CHANGE_POWER_ATTEMPTS: usize = 5;
const CHANGE_POWER_DELAY: Duration = Duration::from_millis(200);

/// Controller for one named Bluetooth adapter.
///
/// Owns the adapter's power and discovery state plus the background dispatch
/// thread. Two independent locks serialize operations: `status` guards power
/// transitions, `discovery` guards discovery start/stop and the filter.
/// Neither lock is ever held while acquiring the other, so a slow power
/// confirmation never blocks an unrelated discovery stop.
pub struct HciInterface {
    name: String,
    bus: Arc<dyn HciBus>,
    inquiry: Box<dyn ClassicInquiry>,
    status: Mutex<()>,
    power_cond: Condvar,
    discovery: Mutex<()>,
    scan_gate: Arc<ScanGate>,
    event_loop: EventLoopThread,
}

impl HciInterface {
    /// Creates the controller and starts its dispatch thread.
    pub fn new(
        name: impl Into<String>,
        bus: Arc<dyn HciBus>,
        inquiry: Box<dyn ClassicInquiry>,
    ) -> Result<HciInterface, HciError> {
        let name = name.into();
        let event_loop = EventLoopThread::spawn(&name, Arc::clone(&bus))?;
        Ok(HciInterface {
            name,
            bus,
            inquiry,
            status: Mutex::new(()),
            power_cond: Condvar::new(),
            discovery: Mutex::new(()),
            scan_gate: Arc::new(ScanGate::new()),
            event_loop,
        })
    }

    /// Name of the controlled adapter, e.g. `hci0`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Powers the adapter on. No-op if it is already powered; otherwise the
    /// LE discovery filter is re-asserted, power is requested and the change
    /// is confirmed by polling.
    pub fn power_on(&self) -> Result<(), HciError> {
        log::debug!("bringing up {}", self.name);

        let status = self.status.lock().expect("Mutex should not be poisoned.");
        if self.bus.powered()? {
            return Ok(());
        }

        // Filter goes straight through the bus: taking the discovery lock
        // here would nest it under the status lock.
        self.bus.set_discovery_filter(Transport::Le)?;
        self.bus.set_powered(true)?;
        self.wait_until_powered_change(status, true)
    }

    /// Powers the adapter off, first waking any scan blocked on it so the
    /// scan is not left hanging on a now-unpowered adapter. No-op if the
    /// adapter is already off.
    pub fn power_off(&self) -> Result<(), HciError> {
        log::debug!("switching down {}", self.name);

        let status = self.status.lock().expect("Mutex should not be poisoned.");
        self.scan_gate.interrupt_all();

        if !self.bus.powered()? {
            return Ok(());
        }
        self.bus.set_powered(false)?;
        self.wait_until_powered_change(status, false)
    }

    /// Power-cycles the adapter. Not atomic: a concurrent observer may see
    /// the intermediate off state.
    pub fn reset(&self) -> Result<(), HciError> {
        self.power_off()?;
        self.power_on()
    }

    /// Starts discovery for the given transport. No-op if discovery is
    /// already active; otherwise the filter is applied and a start request
    /// is issued without waiting for any completion beyond the call itself.
    pub fn start_discovery(&self, transport: Transport) -> Result<(), HciError> {
        let _discovery = self.discovery.lock().expect("Mutex should not be poisoned.");
        if self.bus.discovering()? {
            return Ok(());
        }
        self.bus.set_discovery_filter(transport)?;
        self.bus.start_discovery()
    }

    /// Stops discovery. No-op if discovery is not active.
    pub fn stop_discovery(&self) -> Result<(), HciError> {
        let _discovery = self.discovery.lock().expect("Mutex should not be poisoned.");
        if !self.bus.discovering()? {
            return Ok(());
        }
        self.bus.stop_discovery()
    }

    /// Whether the device with the given address is reachable via classic
    /// inquiry.
    pub fn detect(&self, address: &MacAddress) -> Result<bool, HciError> {
        self.inquiry.detect(address)
    }

    /// Classic inquiry inventory of nearby devices.
    pub fn scan(&self) -> Result<DeviceMap, HciError> {
        self.inquiry.scan()
    }

    /// Metadata of this adapter.
    pub fn info(&self) -> Result<HciInfo, HciError> {
        self.inquiry.info()
    }

    /// Scans for low-energy devices for up to `timeout`.
    ///
    /// Devices already known to the registry seed the result; devices
    /// appearing during the window are merged in as they are announced. A
    /// device makes the final map only if its signal strength is nonzero
    /// once the window closes, so a device seen earlier but unobservable by
    /// then is dropped. The wait ends early only if a concurrent
    /// [`power_off`](Self::power_off) broadcasts.
    ///
    /// Discovery stays active after the call; it stops at the next power-off
    /// or at controller teardown.
    pub fn lescan(&self, timeout: Duration) -> Result<DeviceMap, HciError> {
        log::info!(
            "starting BLE scan on {} for {} seconds",
            self.name,
            timeout.as_secs()
        );

        let session = ScanSession::begin(Arc::clone(&self.bus), Arc::clone(&self.scan_gate))?;
        self.start_discovery(Transport::Le)?;
        let found = session.complete(timeout)?;

        log::info!("BLE scan has finished, found {} device(s)", found.len());
        Ok(found)
    }

    /// Ensures the device is connected and returns a handle for it.
    ///
    /// If the device is not yet connected a synchronous connect request is
    /// issued with `timeout` as its deadline. A handle is returned either
    /// way, also when the device was already connected.
    pub fn connect(
        &self,
        address: &MacAddress,
        timeout: Duration,
    ) -> Result<HciConnection, HciError> {
        log::debug!("connecting to device {address}");

        if !self.bus.device_connected(address)? {
            self.bus.connect_device(address, timeout)?;
        }
        Ok(HciConnection::new(self.name.clone(), *address, timeout))
    }

    /// Polls for the adapter to report the expected power state, up to
    /// `CHANGE_POWER_ATTEMPTS` checks spaced `CHANGE_POWER_DELAY` apart.
    fn wait_until_powered_change(
        &self,
        mut status: MutexGuard<'_, ()>,
        powered: bool,
    ) -> Result<(), HciError> {
        for _ in 0..CHANGE_POWER_ATTEMPTS {
            if self.bus.powered()? == powered {
                return Ok(());
            }
            let (guard, _) = self
                .power_cond
                .wait_timeout(status, CHANGE_POWER_DELAY)
                .expect("Mutex should not be poisoned.");
            status = guard;
        }
        Err(HciError::Timeout(self.name.clone()))
    }
}

impl Drop for HciInterface {
    fn drop(&mut self) {
        if let Err(err) = self.stop_discovery() {
            log::warn!("failed to stop discovery on {}: {err}", self.name);
        }
        self.event_loop.shutdown();
    }
}
