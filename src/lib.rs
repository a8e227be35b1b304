//! bluez-hci: control of a named Bluetooth adapter over the BlueZ system
//! D-Bus service.
//!
//! The crate covers power-state transitions with confirmation polling,
//! discovery start/stop with a transport filter, low-energy scanning that
//! merges a device snapshot with live object-appeared notifications and
//! gates the result on live signal strength, and bounded-timeout connection
//! establishment. Each adapter controller runs one background dispatch
//! thread for asynchronous notifications; a registry hands out exactly one
//! controller per adapter name.
//!
//! Classic (non-LE) inquiry is delegated to a [`ClassicInquiry`]
//! collaborator supplied by the embedding application. Pairing, GATT
//! negotiation and device-history persistence are out of scope.

pub mod address;
pub mod error;
pub mod hci;

pub use address::MacAddress;
pub use error::HciError;
pub use hci::bluez::DBusHciBus;
pub use hci::connection::HciConnection;
pub use hci::interface::HciInterface;
pub use hci::registry::HciInterfaceManager;
pub use hci::{
    ClassicInquiry, DeviceMap, DeviceObservation, HciBus, HciInfo, SubscriptionId, Transport,
};
