//! CLI-specific functionality for lxcapi
//!
//! Argument parsing, service configuration and configuration discovery.

pub mod args;
pub mod config;

pub use args::{Args, Commands, ExecutionMode, ServeOptions};
pub use config::{ConfigDiscovery, LockConfig, LockPolicyKind, ServiceConfig};
