#![forbid(unsafe_code)]

//! Ceph RBD storage integration.
//!
//! `system` implements `StorageBackend` using the host `rbd` CLI. `parse`
//! isolates `rbd showmapped` output handling so it can be tested on its own.

mod parse;
mod system;

pub use parse::{parse_showmapped, MappedImage};
pub use system::{SystemRbdBackend, DEFAULT_RBD_PATHS};
