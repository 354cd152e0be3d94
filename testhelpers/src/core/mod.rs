//! Deterministic, pure logic shared by the helpers.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod cluster;
pub mod node;
pub mod readiness;
pub mod release;
pub mod role;
