//! Provider contract for the block-export (iSCSI target) service process.
//!
//! The service is only observable through its free-text status output, so the
//! contract hands that text back verbatim and leaves interpretation to callers.

use std::error::Error;

pub trait ServiceControl {
    type Error: Error + Send + Sync + 'static;

    /// Restart the service so it re-reads its configuration.
    fn restart(&self) -> Result<(), Self::Error>;

    /// Stop the service.
    fn stop(&self) -> Result<(), Self::Error>;

    /// Raw status text as printed by the service manager.
    fn status(&self) -> Result<String, Self::Error>;
}
