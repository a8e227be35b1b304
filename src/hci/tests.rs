//! Behavioral tests for the adapter controller, driven through in-memory
//! implementations of the `HciBus` and `ClassicInquiry` seams.

use std::cmp;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::address::MacAddress;
use crate::error::HciError;
use crate::hci::interface::HciInterface;
use crate::hci::registry::HciInterfaceManager;
use crate::hci::{
    ClassicInquiry, DeviceMap, DeviceObservation, HciBus, HciInfo, SubscriptionId, Transport,
};

#[derive(Default)]
struct FakeBus {
    powered: Mutex<bool>,
    /// Whether a set-power request actually flips the reported state.
    confirm_power: bool,
    discovering: Mutex<bool>,

    powered_reads: AtomicUsize,
    power_requests: Mutex<Vec<bool>>,
    filter_requests: Mutex<Vec<Transport>>,
    start_requests: AtomicUsize,
    stop_requests: AtomicUsize,

    snapshot: Mutex<Vec<DeviceObservation>>,
    rssi: Mutex<HashMap<MacAddress, i16>>,
    connected: Mutex<HashSet<MacAddress>>,
    connect_requests: Mutex<Vec<MacAddress>>,

    /// Observations the dispatch thread announces once a subscriber exists.
    pending: Mutex<Vec<DeviceObservation>>,
    subscribers: Mutex<HashMap<usize, Sender<DeviceObservation>>>,
    next_subscription: AtomicUsize,
}

impl FakeBus {
    fn new() -> FakeBus {
        FakeBus {
            confirm_power: true,
            ..FakeBus::default()
        }
    }

    fn with_powered(self, powered: bool) -> FakeBus {
        *self.powered.lock().unwrap() = powered;
        self
    }

    fn with_confirm_power(mut self, confirm: bool) -> FakeBus {
        self.confirm_power = confirm;
        self
    }

    fn with_device(self, address: MacAddress, name: &str, rssi: i16) -> FakeBus {
        self.snapshot.lock().unwrap().push(DeviceObservation {
            address,
            name: name.to_string(),
        });
        if rssi != 0 {
            self.rssi.lock().unwrap().insert(address, rssi);
        }
        self
    }

    fn with_pending(self, address: MacAddress, name: &str, rssi: i16) -> FakeBus {
        self.pending.lock().unwrap().push(DeviceObservation {
            address,
            name: name.to_string(),
        });
        if rssi != 0 {
            self.rssi.lock().unwrap().insert(address, rssi);
        }
        self
    }

    fn with_connected(self, address: MacAddress) -> FakeBus {
        self.connected.lock().unwrap().insert(address);
        self
    }
}

impl HciBus for FakeBus {
    fn powered(&self) -> Result<bool, HciError> {
        self.powered_reads.fetch_add(1, Ordering::SeqCst);
        Ok(*self.powered.lock().unwrap())
    }

    fn set_powered(&self, powered: bool) -> Result<(), HciError> {
        self.power_requests.lock().unwrap().push(powered);
        if self.confirm_power {
            *self.powered.lock().unwrap() = powered;
        }
        Ok(())
    }

    fn discovering(&self) -> Result<bool, HciError> {
        Ok(*self.discovering.lock().unwrap())
    }

    fn set_discovery_filter(&self, transport: Transport) -> Result<(), HciError> {
        self.filter_requests.lock().unwrap().push(transport);
        Ok(())
    }

    fn start_discovery(&self) -> Result<(), HciError> {
        self.start_requests.fetch_add(1, Ordering::SeqCst);
        *self.discovering.lock().unwrap() = true;
        Ok(())
    }

    fn stop_discovery(&self) -> Result<(), HciError> {
        self.stop_requests.fetch_add(1, Ordering::SeqCst);
        *self.discovering.lock().unwrap() = false;
        Ok(())
    }

    fn known_devices(&self) -> Result<Vec<DeviceObservation>, HciError> {
        Ok(self.snapshot.lock().unwrap().clone())
    }

    fn subscribe_device_added(
        &self,
        observations: Sender<DeviceObservation>,
    ) -> Result<SubscriptionId, HciError> {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().unwrap().insert(id, observations);
        Ok(SubscriptionId(id))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().unwrap().remove(&id.0);
    }

    fn device_rssi(&self, address: &MacAddress) -> Result<i16, HciError> {
        Ok(self.rssi.lock().unwrap().get(address).copied().unwrap_or(0))
    }

    fn device_connected(&self, address: &MacAddress) -> Result<bool, HciError> {
        Ok(self.connected.lock().unwrap().contains(address))
    }

    fn connect_device(&self, address: &MacAddress, _timeout: Duration) -> Result<(), HciError> {
        self.connect_requests.lock().unwrap().push(*address);
        self.connected.lock().unwrap().insert(*address);
        Ok(())
    }

    fn pump_events(&self, timeout: Duration) -> Result<bool, HciError> {
        thread::sleep(cmp::min(timeout, Duration::from_millis(10)));
        let subscribers = self.subscribers.lock().unwrap();
        if subscribers.is_empty() {
            return Ok(false);
        }
        let announced: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
        for observation in announced {
            for tx in subscribers.values() {
                let _ = tx.send(observation.clone());
            }
        }
        Ok(true)
    }
}

struct FakeInquiry;

impl ClassicInquiry for FakeInquiry {
    fn detect(&self, address: &MacAddress) -> Result<bool, HciError> {
        Ok(address.octets()[5] == 0x01)
    }

    fn scan(&self) -> Result<DeviceMap, HciError> {
        let mut devices = DeviceMap::new();
        devices.insert(addr(0x01), "inquiry".to_string());
        Ok(devices)
    }

    fn info(&self) -> Result<HciInfo, HciError> {
        Ok(HciInfo {
            name: "hci0".to_string(),
            address: addr(0xA0),
        })
    }
}

fn addr(last: u8) -> MacAddress {
    MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, last])
}

fn interface(bus: &Arc<FakeBus>) -> HciInterface {
    HciInterface::new(
        "hci0",
        Arc::clone(bus) as Arc<dyn HciBus>,
        Box::new(FakeInquiry),
    )
    .unwrap()
}

#[test]
fn power_on_is_noop_when_already_powered() {
    let bus = Arc::new(FakeBus::new().with_powered(true));
    let hci = interface(&bus);

    hci.power_on().unwrap();

    assert!(bus.power_requests.lock().unwrap().is_empty());
    assert!(bus.filter_requests.lock().unwrap().is_empty());
}

#[test]
fn power_on_requests_power_once_and_confirms() {
    let bus = Arc::new(FakeBus::new());
    let hci = interface(&bus);

    hci.power_on().unwrap();

    assert_eq!(*bus.power_requests.lock().unwrap(), vec![true]);
    assert_eq!(*bus.filter_requests.lock().unwrap(), vec![Transport::Le]);
    // One read before the request, one confirming poll.
    assert_eq!(bus.powered_reads.load(Ordering::SeqCst), 2);
}

#[test]
fn power_on_times_out_after_bounded_polling() {
    let bus = Arc::new(FakeBus::new().with_confirm_power(false));
    let hci = interface(&bus);

    let before = Instant::now();
    let err = hci.power_on().unwrap_err();

    assert!(matches!(err, HciError::Timeout(ref name) if name == "hci0"));
    assert_eq!(err.to_string(), "failed to change power of interface hci0");
    // Initial check plus five confirmation polls.
    assert_eq!(bus.powered_reads.load(Ordering::SeqCst), 6);
    assert!(before.elapsed() >= Duration::from_millis(900));
    // Exactly one state-changing request despite the polling.
    assert_eq!(*bus.power_requests.lock().unwrap(), vec![true]);
}

#[test]
fn power_off_is_noop_when_already_off() {
    let bus = Arc::new(FakeBus::new());
    let hci = interface(&bus);

    hci.power_off().unwrap();

    assert!(bus.power_requests.lock().unwrap().is_empty());
}

#[test]
fn reset_powers_off_then_on() {
    let bus = Arc::new(FakeBus::new().with_powered(true));
    let hci = interface(&bus);

    hci.reset().unwrap();

    assert_eq!(*bus.power_requests.lock().unwrap(), vec![false, true]);
}

#[test]
fn discovery_start_and_stop_are_idempotent() {
    let bus = Arc::new(FakeBus::new());
    let hci = interface(&bus);

    hci.start_discovery(Transport::Le).unwrap();
    hci.start_discovery(Transport::Le).unwrap();
    assert_eq!(bus.start_requests.load(Ordering::SeqCst), 1);
    assert_eq!(*bus.filter_requests.lock().unwrap(), vec![Transport::Le]);

    hci.stop_discovery().unwrap();
    hci.stop_discovery().unwrap();
    assert_eq!(bus.stop_requests.load(Ordering::SeqCst), 1);
}

#[test]
fn lescan_keeps_only_devices_with_live_signal() {
    let bus = Arc::new(
        FakeBus::new()
            .with_powered(true)
            .with_device(addr(0x01), "foo", -60)
            .with_device(addr(0x02), "bar", 0),
    );
    let hci = interface(&bus);

    let found = hci.lescan(Duration::from_millis(50)).unwrap();

    let mut expected = DeviceMap::new();
    expected.insert(addr(0x01), "foo".to_string());
    assert_eq!(found, expected);
}

#[test]
fn lescan_merges_live_notifications_and_keeps_first_seen_name() {
    let bus = Arc::new(
        FakeBus::new()
            .with_powered(true)
            .with_device(addr(0x01), "foo", -55)
            // Appears only through a live notification.
            .with_pending(addr(0x03), "baz", -40)
            // Second sighting of a known device must not rename it.
            .with_pending(addr(0x01), "renamed", 0),
    );
    let hci = interface(&bus);

    let found = hci.lescan(Duration::from_millis(300)).unwrap();

    let mut expected = DeviceMap::new();
    expected.insert(addr(0x01), "foo".to_string());
    expected.insert(addr(0x03), "baz".to_string());
    assert_eq!(found, expected);
    assert!(bus.subscribers.lock().unwrap().is_empty());
}

#[test]
fn lescan_leaves_discovery_running() {
    let bus = Arc::new(FakeBus::new().with_powered(true));
    let hci = interface(&bus);

    hci.lescan(Duration::from_millis(50)).unwrap();

    assert!(*bus.discovering.lock().unwrap());
    assert_eq!(bus.stop_requests.load(Ordering::SeqCst), 0);
}

#[test]
fn power_off_wakes_a_blocked_lescan() {
    let bus = Arc::new(FakeBus::new().with_powered(true));
    let hci = Arc::new(interface(&bus));

    let switcher = Arc::clone(&hci);
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        switcher.power_off().unwrap();
    });

    let before = Instant::now();
    let found = hci.lescan(Duration::from_secs(30)).unwrap();

    assert!(before.elapsed() < Duration::from_secs(10));
    assert!(found.is_empty());
    handle.join().unwrap();
}

#[test]
fn connect_issues_request_when_disconnected() {
    let bus = Arc::new(FakeBus::new().with_powered(true));
    let hci = interface(&bus);

    let timeout = Duration::from_secs(5);
    let connection = hci.connect(&addr(0x04), timeout).unwrap();

    assert_eq!(*bus.connect_requests.lock().unwrap(), vec![addr(0x04)]);
    assert_eq!(connection.adapter(), "hci0");
    assert_eq!(connection.address(), addr(0x04));
    assert_eq!(connection.timeout(), timeout);
}

#[test]
fn connect_skips_request_but_returns_handle_when_already_connected() {
    let bus = Arc::new(
        FakeBus::new()
            .with_powered(true)
            .with_connected(addr(0x04)),
    );
    let hci = interface(&bus);

    let connection = hci.connect(&addr(0x04), Duration::from_secs(5)).unwrap();

    assert!(bus.connect_requests.lock().unwrap().is_empty());
    assert_eq!(connection.address(), addr(0x04));
}

#[test]
fn classic_operations_delegate_to_the_inquiry_collaborator() {
    let bus = Arc::new(FakeBus::new());
    let hci = interface(&bus);

    assert!(hci.detect(&addr(0x01)).unwrap());
    assert!(!hci.detect(&addr(0x02)).unwrap());
    assert_eq!(hci.scan().unwrap()[&addr(0x01)], "inquiry");
    assert_eq!(hci.info().unwrap().name, "hci0");
}

#[test]
fn registry_returns_the_same_controller_for_a_name() {
    let constructions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&constructions);
    let manager = HciInterfaceManager::new(move |name| {
        counter.fetch_add(1, Ordering::SeqCst);
        HciInterface::new(
            name,
            Arc::new(FakeBus::new()) as Arc<dyn HciBus>,
            Box::new(FakeInquiry),
        )
    });

    let first = manager.lookup("hci0").unwrap();
    let second = manager.lookup("hci0").unwrap();
    let other = manager.lookup("hci1").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(constructions.load(Ordering::SeqCst), 2);
}
