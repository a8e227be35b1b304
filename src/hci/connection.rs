use std::time::Duration;

use crate::address::MacAddress;

/// Handle to an established device connection.
///
/// Returned by [`HciInterface::connect`](crate::HciInterface::connect) and
/// exclusively owned by the caller from then on. It is bound to the adapter
/// name, the remote device and the timeout budget the connect call was made
/// with; the read/write/attribute machinery behind it lives outside this
/// crate.
#[derive(Debug, Clone)]
pub struct HciConnection {
    adapter: String,
    address: MacAddress,
    timeout: Duration,
}

impl HciConnection {
    pub(crate) fn new(adapter: String, address: MacAddress, timeout: Duration) -> HciConnection {
        HciConnection {
            adapter,
            address,
            timeout,
        }
    }

    /// Name of the adapter this connection runs over.
    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    /// Address of the remote device.
    pub fn address(&self) -> MacAddress {
        self.address
    }

    /// Timeout budget the connection was established with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
