//! certsync core - shared record and task types
//!
//! This crate holds the records the engine reads and writes (accounts, access keys,
//! domain configurations, load balancer targets, certificates) and the task parameter
//! format a scheduler hands to the `certsync` binary.
//!
//! All engine functionality (ACME, DNS hooks, load balancer sync, storage) lives in
//! the `certsync` crate.

mod model;
mod task;

pub use model::*;
pub use task::*;
