//! Provider contract for the copy-on-write block storage backend.

use std::collections::BTreeMap;
use std::error::Error;

/// Abstraction over clone/snapshot/flatten and kernel device mapping primitives.
///
/// Volume and snapshot names are opaque to the backend; BMI derives them from
/// image ids before calling in.
pub trait StorageBackend {
    type Error: Error + Send + Sync + 'static;

    /// Clone `parent@snapshot` into a new volume named `child`.
    fn clone_volume(&self, parent: &str, snapshot: &str, child: &str) -> Result<(), Self::Error>;

    fn create_snapshot(&self, volume: &str, snapshot: &str) -> Result<(), Self::Error>;

    fn protect_snapshot(&self, volume: &str, snapshot: &str) -> Result<(), Self::Error>;

    fn unprotect_snapshot(&self, volume: &str, snapshot: &str) -> Result<(), Self::Error>;

    fn remove_snapshot(&self, volume: &str, snapshot: &str) -> Result<(), Self::Error>;

    /// Copy all parent data into `volume` so it no longer depends on its parent snapshot.
    fn flatten(&self, volume: &str) -> Result<(), Self::Error>;

    fn remove_volume(&self, volume: &str) -> Result<(), Self::Error>;

    /// Map `volume` to a local block device and return the device identifier.
    fn map(&self, volume: &str) -> Result<String, Self::Error>;

    /// Release a previously mapped device.
    fn unmap(&self, device: &str) -> Result<(), Self::Error>;

    /// Currently mapped devices keyed by volume name.
    fn showmapped(&self) -> Result<BTreeMap<String, String>, Self::Error>;
}
