//! Adapter control: power, discovery, LE scanning and connections.
//!
//! The concrete D-Bus plumbing lives behind two capability seams so the
//! controller logic stays testable:
//!
//! - [`HciBus`] is the modern, notification-capable variant backed by the
//!   BlueZ object tree (see [`bluez::DBusHciBus`]).
//! - [`ClassicInquiry`] is the legacy synchronous variant used for classic
//!   (non-LE) inquiry and adapter metadata; its implementation is supplied
//!   by the embedding application.

pub mod bluez;
pub mod connection;
pub mod event_loop;
pub mod interface;
pub mod registry;
pub mod scan;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::sync::mpsc::Sender;
use std::time::Duration;

use crate::address::MacAddress;
use crate::error::HciError;

/// Discovery transport selector, applied before each discovery start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Bredr,
    Le,
    Auto,
}

impl Transport {
    /// Wire value for the `"Transport"` discovery filter key.
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Bredr => "bredr",
            Transport::Le => "le",
            Transport::Auto => "auto",
        }
    }
}

/// One sighting of a remote device, from a registry snapshot or a live
/// object-appeared notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceObservation {
    pub address: MacAddress,
    pub name: String,
}

/// Address to display name; ordered so results are deterministic.
pub type DeviceMap = BTreeMap<MacAddress, String>;

/// Adapter metadata reported by the classic inquiry collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HciInfo {
    pub name: String,
    pub address: MacAddress,
}

/// Handle for a live device-appeared subscription on a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) usize);

/// Access to one adapter's slice of the Bluetooth service.
///
/// Implementations are shared between caller threads and the dispatch
/// thread; observation callbacks registered via
/// [`subscribe_device_added`](HciBus::subscribe_device_added) run only while
/// [`pump_events`](HciBus::pump_events) executes.
pub trait HciBus: Send + Sync {
    fn powered(&self) -> Result<bool, HciError>;
    fn set_powered(&self, powered: bool) -> Result<(), HciError>;
    fn discovering(&self) -> Result<bool, HciError>;
    fn set_discovery_filter(&self, transport: Transport) -> Result<(), HciError>;
    fn start_discovery(&self) -> Result<(), HciError>;
    fn stop_discovery(&self) -> Result<(), HciError>;

    /// Snapshot of every device object currently registered under this
    /// adapter. Best-effort: malformed entries are logged and skipped.
    fn known_devices(&self) -> Result<Vec<DeviceObservation>, HciError>;

    /// Registers a live feed of newly appearing device objects, scoped to
    /// the whole device registry. Observations are posted to `observations`
    /// from the dispatch thread.
    fn subscribe_device_added(
        &self,
        observations: Sender<DeviceObservation>,
    ) -> Result<SubscriptionId, HciError>;

    /// Drops a subscription. Best-effort; failures are logged.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Live signal strength of a device, 0 when currently unobservable.
    fn device_rssi(&self, address: &MacAddress) -> Result<i16, HciError>;

    fn device_connected(&self, address: &MacAddress) -> Result<bool, HciError>;

    /// Issues a synchronous connect request bounded by `timeout`.
    fn connect_device(&self, address: &MacAddress, timeout: Duration) -> Result<(), HciError>;

    /// Dispatches pending notifications for up to `timeout`. Returns whether
    /// anything was handled. Called only from the dispatch thread.
    fn pump_events(&self, timeout: Duration) -> Result<bool, HciError>;
}

/// Legacy synchronous inquiry collaborator for classic (non-LE) operations.
///
/// The concrete provider is external to this crate; each call is expected to
/// complete within a short implementation-chosen timeout.
pub trait ClassicInquiry: Send + Sync {
    /// Whether the device with the given address is reachable.
    fn detect(&self, address: &MacAddress) -> Result<bool, HciError>;

    /// Classic inquiry inventory of nearby devices.
    fn scan(&self) -> Result<DeviceMap, HciError>;

    /// Metadata of the adapter itself.
    fn info(&self) -> Result<HciInfo, HciError>;
}
