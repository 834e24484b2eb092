#![forbid(unsafe_code)]

//! Collaborator contracts shared across BMI.
//!
//! The orchestration layer in `bmi-core` only talks to the outside world through
//! these traits. Concrete integrations live in `bmi-rbd`, `bmi-iet`, `bmi-hil`
//! and the catalog/lease helpers in `bmi-core`, so workflows stay testable with fakes.

pub mod dhcp;
pub mod export;
pub mod fabric;
pub mod repository;
pub mod storage;

pub use dhcp::AddressLookup;
pub use export::ServiceControl;
pub use fabric::FabricClient;
pub use repository::{Image, ImageFilter, ImageId, ImageRepository, NewImage, Project, ProjectId};
pub use storage::StorageBackend;
