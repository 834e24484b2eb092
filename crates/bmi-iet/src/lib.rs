#![forbid(unsafe_code)]

//! Export service control for the iSCSI Enterprise Target.
//!
//! The target daemon is driven through the host service manager, optionally
//! escalated with `sudo -S`.

mod system;

pub use system::SystemIetService;
