//! Provider contract for the network fabric (node/network attachment).
//!
//! Attach and detach are asynchronous on the fabric side: a successful return
//! only means the request was accepted.

use std::error::Error;

pub trait FabricClient {
    type Error: Error + Send + Sync + 'static;

    /// Connect `nic` of `node` to `network`.
    fn attach_node(&self, node: &str, network: &str, nic: &str) -> Result<(), Self::Error>;

    /// Disconnect `nic` of `node` from `network`.
    fn detach_node(&self, node: &str, network: &str, nic: &str) -> Result<(), Self::Error>;

    /// Return the MAC address of the node's boot interface (colon separated).
    fn node_mac_addr(&self, node: &str) -> Result<String, Self::Error>;

    /// Confirm that the acting user can see `project` on the fabric.
    fn validate_project(&self, project: &str) -> Result<(), Self::Error>;
}
