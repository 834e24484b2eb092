//! Provider contract for resolving node addresses from DHCP state.

use std::error::Error;

pub trait AddressLookup {
    type Error: Error + Send + Sync + 'static;

    /// Return the IP address leased to `mac_addr`.
    fn ip_for_mac(&self, mac_addr: &str) -> Result<String, Self::Error>;
}
