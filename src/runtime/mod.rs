//! # Container Runtime Abstraction Layer
//!
//! The orchestrator never touches namespaces, cgroups or root filesystems
//! itself. Every isolation primitive is reached through the
//! [`ContainerRuntime`] capability, which has one implementation per backend:
//!
//! - **[`LxcRuntime`]**: drives the `lxc-*` tools against an `lxcpath`
//! - **[`DockerRuntime`]**: drives a Docker/Podman daemon via bollard
//!   (requires the `docker` feature)
//! - **[`MemoryRuntime`]**: in-process simulation for development and tests
//!
//! ## Example
//!
//! ```rust,no_run
//! use lxcapi::runtime::{ContainerRuntime, LxcRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = LxcRuntime::new("/var/lib/lxc", 10);
//!     runtime.health_check().await?;
//!
//!     for name in runtime.list_names().await? {
//!         println!("{}", name);
//!     }
//!     Ok(())
//! }
//! ```

use crate::container::TemplateSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// LXC command-line backend.
pub mod lxc;

/// In-memory simulated backend.
pub mod memory;

/// Docker/Podman backend (requires `docker` feature).
#[cfg(feature = "docker")]
pub mod docker;

pub use lxc::{LxcRuntime, LxcTemplate};
pub use memory::MemoryRuntime;

#[cfg(feature = "docker")]
pub use docker::{DockerRuntime, DockerTemplate};

/// Errors raised by a runtime backend.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// An external tool exited unsuccessfully
    #[error("'{command}' exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The runtime has no container by that name
    #[error("No such container: {0}")]
    NotFound(String),

    /// The runtime already has a container by that name
    #[error("Container already exists: {0}")]
    AlreadyExists(String),

    /// The runtime refused because the container is running
    #[error("Container is running: {0}")]
    Running(String),

    /// The template could not be decoded for this backend
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// The backend cannot be reached or is missing tools
    #[error("Runtime unavailable: {0}")]
    Unavailable(String),

    /// Docker/Podman API error
    #[cfg(feature = "docker")]
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Capability set over the real isolation primitives.
///
/// Every call may block for seconds (creation can download a root
/// filesystem); implementations must not assume they are cancelled when a
/// caller goes away.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container from a template; the container is left stopped.
    async fn create(&self, name: &str, template: &TemplateSpec) -> Result<(), RuntimeError>;

    /// Start a created container.
    async fn start(&self, name: &str) -> Result<(), RuntimeError>;

    /// Stop a running container.
    async fn stop(&self, name: &str) -> Result<(), RuntimeError>;

    /// Destroy a stopped container and its storage.
    async fn destroy(&self, name: &str) -> Result<(), RuntimeError>;

    /// Names of every container the runtime knows about.
    async fn list_names(&self) -> Result<Vec<String>, RuntimeError>;

    /// Runtime version string.
    async fn version(&self) -> Result<String, RuntimeError>;

    /// Reject a template this backend cannot use, without touching the host.
    ///
    /// Called before any lock is taken or entry recorded.
    fn validate_template(&self, _template: &TemplateSpec) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// Check that the backend is usable. Called once at startup.
    async fn health_check(&self) -> Result<(), RuntimeError> {
        self.version().await.map(|_| ())
    }

    /// Backend name for logging and version reports.
    fn runtime_type(&self) -> &'static str;
}

/// Runtime backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeBackend {
    /// `lxc-*` command-line tools
    #[default]
    Lxc,
    /// Docker or Podman daemon
    Docker,
    /// In-process simulation
    Memory,
}

impl fmt::Display for RuntimeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lxc => write!(f, "lxc"),
            Self::Docker => write!(f, "docker"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for RuntimeBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lxc" => Ok(Self::Lxc),
            "docker" | "podman" => Ok(Self::Docker),
            "memory" => Ok(Self::Memory),
            other => Err(format!(
                "unknown runtime '{}', expected one of: lxc, docker, memory",
                other
            )),
        }
    }
}
