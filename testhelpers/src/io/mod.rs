//! Side-effecting collaborators: external CLIs and configuration files.

pub mod config;
pub mod helm;
pub mod kubectl;
pub mod process;
