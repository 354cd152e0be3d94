//! Helpers for Rancher Manager end-to-end test suites.
//!
//! - **[`core`]**: Pure logic. Release parameter resolution, the provisioning
//!   cluster model and its in-memory pool mutations.
//! - **[`io`]**: Side effects. `helm`/`kubectl` adapters, process execution,
//!   configuration files.
//!
//! [`deploy`] and [`mutate`] combine the two to install Rancher Manager and
//! to edit machine pools of a live cluster.

pub mod core;
pub mod deploy;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod mutate;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
