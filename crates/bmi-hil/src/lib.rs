#![forbid(unsafe_code)]

//! Network fabric integration over the HIL REST API.

mod client;

pub use client::{session_factory, HilClient, NodeInfo, NodeNic};
