//! BlueZ system-bus implementation of the [`HciBus`] seam.

pub mod adapter;
pub mod device;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dbus::arg::{self, prop_cast};
use dbus::blocking::stdintf::org_freedesktop_dbus::ObjectManager;
use dbus::blocking::SyncConnection;
use dbus::channel::Token;
use dbus::message::MatchRule;

use adapter::OrgBluezAdapter1;
use device::OrgBluezDevice1;

use crate::address::MacAddress;
use crate::error::HciError;
use crate::hci::interface::HciInterface;
use crate::hci::registry::HciInterfaceManager;
use crate::hci::{ClassicInquiry, DeviceObservation, HciBus, SubscriptionId, Transport};

pub const BLUEZ_DBUS: &str = "org.bluez";

pub const DEVICE_INTERFACE: &str = "org.bluez.Device1";
pub const OBJECT_MANAGER_INTERFACE: &str = "org.freedesktop.DBus.ObjectManager";

const DBUS_TIMEOUT: Duration = Duration::new(60, 0);

/// Canonical bus path of an adapter, e.g. `/org/bluez/hci0`.
pub fn adapter_path(name: &str) -> String {
    format!("/org/bluez/{name}")
}

/// Canonical bus path of a device under an adapter, e.g.
/// `/org/bluez/hci0/dev_FF_FF_FF_FF_FF_FF`.
pub fn device_path(name: &str, address: &MacAddress) -> String {
    format!("/org/bluez/{name}/dev_{}", address.to_delimited('_'))
}

/// `org.freedesktop.DBus.ObjectManager.InterfacesAdded` signal payload.
#[derive(Debug)]
struct InterfacesAdded {
    object: dbus::Path<'static>,
    interfaces: HashMap<String, arg::PropMap>,
}

impl arg::ReadAll for InterfacesAdded {
    fn read(i: &mut arg::Iter) -> Result<Self, arg::TypeMismatchError> {
        Ok(InterfacesAdded {
            object: i.read()?,
            interfaces: i.read()?,
        })
    }
}

impl dbus::message::SignalArgs for InterfacesAdded {
    const NAME: &'static str = "InterfacesAdded";
    const INTERFACE: &'static str = OBJECT_MANAGER_INTERFACE;
}

/// One adapter's slice of the BlueZ service on the system bus.
///
/// The connection is shared with the controller's dispatch thread, which
/// pumps it via [`pump_events`](HciBus::pump_events); subscription callbacks
/// therefore run on that thread only.
pub struct DBusHciBus {
    name: String,
    adapter_path: String,
    connection: Arc<SyncConnection>,
    subscriptions: Mutex<HashMap<usize, Token>>,
    next_subscription: AtomicUsize,
}

impl DBusHciBus {
    pub fn new(name: &str) -> Result<DBusHciBus, HciError> {
        let connection = SyncConnection::new_system()?;
        Ok(DBusHciBus {
            name: name.to_string(),
            adapter_path: adapter_path(name),
            connection: Arc::new(connection),
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicUsize::new(0),
        })
    }

    fn adapter(&self) -> dbus::blocking::Proxy<'_, &SyncConnection> {
        self.connection
            .with_proxy(BLUEZ_DBUS, self.adapter_path.clone(), DBUS_TIMEOUT)
    }

    fn device(
        &self,
        address: &MacAddress,
        timeout: Duration,
    ) -> dbus::blocking::Proxy<'_, &SyncConnection> {
        self.connection
            .with_proxy(BLUEZ_DBUS, device_path(&self.name, address), timeout)
    }
}

/// Extracts an observation from `org.bluez.Device1` properties. The display
/// name falls back to `"unknown"` when the device exposes none.
fn observation_from_props(props: &arg::PropMap) -> Result<DeviceObservation, HciError> {
    let address = prop_cast::<String>(props, "Address")
        .ok_or_else(|| HciError::Parse("<missing Address property>".to_string()))?;
    let address = MacAddress::parse(address, ':')?;
    let name = prop_cast::<String>(props, "Name")
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());
    Ok(DeviceObservation { address, name })
}

impl HciBus for DBusHciBus {
    fn powered(&self) -> Result<bool, HciError> {
        Ok(self.adapter().powered()?)
    }

    fn set_powered(&self, powered: bool) -> Result<(), HciError> {
        Ok(self.adapter().set_powered(powered)?)
    }

    fn discovering(&self) -> Result<bool, HciError> {
        Ok(self.adapter().discovering()?)
    }

    fn set_discovery_filter(&self, transport: Transport) -> Result<(), HciError> {
        let mut filter = arg::PropMap::new();
        filter.insert(
            "Transport".to_string(),
            arg::Variant(Box::new(transport.as_str().to_string())),
        );
        Ok(self.adapter().set_discovery_filter(filter)?)
    }

    fn start_discovery(&self) -> Result<(), HciError> {
        Ok(self.adapter().start_discovery()?)
    }

    fn stop_discovery(&self) -> Result<(), HciError> {
        Ok(self.adapter().stop_discovery()?)
    }

    fn known_devices(&self) -> Result<Vec<DeviceObservation>, HciError> {
        let objects = self
            .connection
            .with_proxy(BLUEZ_DBUS, "/", DBUS_TIMEOUT)
            .get_managed_objects()?;

        // Example path: /org/bluez/hci0/dev_FF_FF_FF_FF_FF_FF
        let prefix = format!("{}/", self.adapter_path);
        let mut seen = Vec::new();
        for (path, interfaces) in objects {
            if !path.starts_with(&prefix) {
                continue;
            }
            let Some(props) = interfaces.get(DEVICE_INTERFACE) else {
                continue;
            };
            match observation_from_props(props) {
                Ok(observation) => seen.push(observation),
                Err(err) => log::warn!("skipping device object {path}: {err}"),
            }
        }
        Ok(seen)
    }

    fn subscribe_device_added(
        &self,
        observations: Sender<DeviceObservation>,
    ) -> Result<SubscriptionId, HciError> {
        let rule = MatchRule::new_signal(OBJECT_MANAGER_INTERFACE, "InterfacesAdded");
        let token = self.connection.add_match(
            rule,
            move |added: InterfacesAdded, _conn: &SyncConnection, _msg: &dbus::Message| {
                if let Some(props) = added.interfaces.get(DEVICE_INTERFACE) {
                    match observation_from_props(props) {
                        Ok(observation) => {
                            let _ = observations.send(observation);
                        }
                        Err(err) => {
                            log::warn!("ignoring device object {}: {err}", added.object)
                        }
                    }
                }
                true
            },
        )?;

        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscriptions
            .lock()
            .expect("Mutex should not be poisoned.")
            .insert(id, token);
        Ok(SubscriptionId(id))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let token = self
            .subscriptions
            .lock()
            .expect("Mutex should not be poisoned.")
            .remove(&id.0);
        if let Some(token) = token {
            if let Err(err) = self.connection.remove_match(token) {
                log::warn!("failed to remove device subscription: {err}");
            }
        }
    }

    fn device_rssi(&self, address: &MacAddress) -> Result<i16, HciError> {
        // BlueZ drops the RSSI property entirely once a device is out of
        // range; treat that as "not currently observable".
        Ok(self.device(address, DBUS_TIMEOUT).rssi().unwrap_or(0))
    }

    fn device_connected(&self, address: &MacAddress) -> Result<bool, HciError> {
        Ok(self.device(address, DBUS_TIMEOUT).connected()?)
    }

    fn connect_device(&self, address: &MacAddress, timeout: Duration) -> Result<(), HciError> {
        // The proxy timeout doubles as the connect deadline.
        Ok(self.device(address, timeout).connect()?)
    }

    fn pump_events(&self, timeout: Duration) -> Result<bool, HciError> {
        Ok(self.connection.process(timeout)?)
    }
}

impl HciInterfaceManager {
    /// Registry wired against the system bus. `inquiry` supplies the
    /// classic-inquiry collaborator for each adapter name.
    pub fn system<F>(inquiry: F) -> HciInterfaceManager
    where
        F: Fn(&str) -> Box<dyn ClassicInquiry> + Send + Sync + 'static,
    {
        HciInterfaceManager::new(move |name| {
            let bus = Arc::new(DBusHciBus::new(name)?);
            HciInterface::new(name, bus, inquiry(name))
        })
    }
}
