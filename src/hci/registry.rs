use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::HciError;
use crate::hci::interface::HciInterface;

/// Memoized name → controller registry.
///
/// Construction is delegated to a closure so the bus and inquiry
/// collaborators can be wired per deployment (system D-Bus in production,
/// fakes in tests). The map is lock-guarded so concurrent first-time lookups
/// of the same name cannot construct two controllers. Entries live until the
/// registry is dropped; there is no eviction.
pub struct HciInterfaceManager {
    construct: Box<dyn Fn(&str) -> Result<HciInterface, HciError> + Send + Sync>,
    interfaces: Mutex<HashMap<String, Arc<HciInterface>>>,
}

impl HciInterfaceManager {
    pub fn new<F>(construct: F) -> HciInterfaceManager
    where
        F: Fn(&str) -> Result<HciInterface, HciError> + Send + Sync + 'static,
    {
        HciInterfaceManager {
            construct: Box::new(construct),
            interfaces: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the controller for `name`, constructing and registering it on
    /// first lookup.
    pub fn lookup(&self, name: &str) -> Result<Arc<HciInterface>, HciError> {
        let mut interfaces = self
            .interfaces
            .lock()
            .expect("Mutex should not be poisoned.");
        if let Some(hci) = interfaces.get(name) {
            return Ok(Arc::clone(hci));
        }

        let hci = Arc::new((self.construct)(name)?);
        interfaces.insert(name.to_string(), Arc::clone(&hci));
        Ok(hci)
    }
}
