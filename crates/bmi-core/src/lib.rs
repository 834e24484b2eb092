#![forbid(unsafe_code)]

//! Core building blocks shared by BMI binaries.
//!
//! Configuration, the export manager, provisioning sagas and command routing
//! live here so the daemon and CLI only wire concrete collaborators together.

pub mod boot;
pub mod catalog;
pub mod config;
pub mod dhcp;
pub mod dispatch;
pub mod error;
pub mod exec;
pub mod export;
pub mod logging;
pub mod naming;
pub mod orchestrator;
pub(crate) mod persist;
pub mod saga;

#[cfg(test)]
mod testing;

pub use boot::BootWriter;
pub use catalog::FileCatalog;
pub use config::{BmiConfig, ConfigFormat};
pub use dhcp::DnsmasqLeases;
pub use dispatch::{command_names, CommandRequest, CommandResponse, CommandRouter, Credentials};
pub use error::{BmiError, BmiResult, ErrorKind};
pub use exec::{CommandOutput, CommandRunner};
pub use export::{ExportLedger, ExportManager, SharedService, SharedStorage};
pub use naming::{VolumeNaming, DEFAULT_SNAPSHOT};
pub use orchestrator::{FabricFactory, Orchestrator, Services, Session, SharedFabric};
pub use saga::Saga;
