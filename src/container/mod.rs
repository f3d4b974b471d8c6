//! Container lifecycle orchestration.
//!
//! This module owns the container data model and the two components that
//! coordinate every lifecycle action:
//!
//! - [`registry`]: index of known containers, their last observed state and
//!   the per-name locks that serialize lifecycle operations
//! - [`orchestrator`]: validates requests, holds the per-name lock around each
//!   runtime call and records the resulting transitions
//!
//! ## State machine
//!
//! ```text
//! Unknown ─┐
//!          ↓
//! Creating → Stopped ⇄ Running
//!              ↓         ↓ (force)
//!          Destroying ←──┘
//!              ↓
//!          Destroyed (evicted)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lxcapi::container::{ContainerRegistry, LifecycleOrchestrator, LockPolicy, TemplateSpec};
//! use lxcapi::runtime::MemoryRuntime;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Arc::new(ContainerRegistry::new(LockPolicy::default()));
//!     let orchestrator = LifecycleOrchestrator::new(Arc::new(MemoryRuntime::new()), registry);
//!
//!     let container = orchestrator
//!         .create_container("web1", TemplateSpec::default(), true)
//!         .await?;
//!     println!("{} is {}", container.name, container.state);
//!
//!     orchestrator.destroy_container("web1", true).await?;
//!     Ok(())
//! }
//! ```

mod orchestrator;
mod registry;

pub use orchestrator::{LifecycleOrchestrator, ReconcileReport, VersionInfo};
pub use registry::{
    ContainerRegistry, LockPolicy, RegistryError, RegistrySnapshot, ScopedLock,
};

use crate::runtime::RuntimeError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid container name pattern"));

/// Check that a container name is non-empty and restricted to `[A-Za-z0-9_-]`.
///
/// # Errors
///
/// Returns [`OrchestratorError::InvalidArgument`] describing the violation.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(OrchestratorError::InvalidArgument(
            "container name is required".to_string(),
        ));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(OrchestratorError::InvalidArgument(format!(
            "invalid container name '{}': only alphanumerics, '-' and '_' are allowed",
            name
        )));
    }
    Ok(())
}

/// Lifecycle state of a managed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Reported by the runtime but never observed through a transition
    Unknown,
    /// Runtime create in progress
    Creating,
    /// Created and not running
    Stopped,
    /// Running
    Running,
    /// Runtime destroy in progress
    Destroying,
    /// Gone from the runtime; the entry is about to be evicted
    Destroyed,
}

impl ContainerState {
    /// Whether a runtime call is currently in flight for this state.
    pub fn is_transitional(self) -> bool {
        matches!(self, Self::Creating | Self::Destroying)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Creating => "creating",
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Opaque template configuration handed to the runtime at creation.
///
/// The orchestrator never looks inside; each runtime backend decodes the
/// fields it understands with [`TemplateSpec::decode`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateSpec(pub serde_json::Value);

impl TemplateSpec {
    /// Wrap a JSON value.
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Whether no template was supplied.
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Decode the template into a backend-specific options type.
    ///
    /// A missing template decodes as an empty object so option types with
    /// defaults need no special casing.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        match &self.0 {
            serde_json::Value::Null => serde_json::from_value(serde_json::json!({})),
            value => serde_json::from_value(value.clone()),
        }
    }

    /// Access the raw JSON value.
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl From<serde_json::Value> for TemplateSpec {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// A managed container as recorded by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub state: ContainerState,
    /// Template used at creation; `None` for containers discovered by reconciliation
    pub template: Option<TemplateSpec>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Container {
    pub(crate) fn new(
        name: impl Into<String>,
        state: ContainerState,
        template: Option<TemplateSpec>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            state,
            template,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }
}

/// Lifecycle operation names used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Version,
    Create,
    Start,
    Stop,
    Destroy,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::List => "list",
            Self::Version => "version",
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Destroy => "destroy",
        };
        f.write_str(s)
    }
}

/// Flat classification of [`OrchestratorError`] for callers deciding on retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    Conflict,
    Busy,
    InvalidState,
    RuntimeFailure,
}

/// Lifecycle orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Bad or missing name, malformed request
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No such container
    #[error("Container not found: {0}")]
    NotFound(String),

    /// Create collided with an existing container
    #[error("Container already exists: {0}")]
    AlreadyExists(String),

    /// Operation not allowed in the container's current state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Another lifecycle operation holds the container's lock
    #[error("Container {name} is busy: {reason}")]
    Busy { name: String, reason: String },

    /// Registry refused a mutation for the current state
    #[error("Container {name} is in state {state}")]
    InvalidState { name: String, state: ContainerState },

    /// The underlying runtime call failed
    #[error("{message}: {source}")]
    RuntimeFailure {
        operation: Operation,
        name: String,
        message: String,
        #[source]
        source: RuntimeError,
    },
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Busy { .. } => ErrorKind::Busy,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::RuntimeFailure { .. } => ErrorKind::RuntimeFailure,
        }
    }

    pub(crate) fn runtime(
        operation: Operation,
        name: impl Into<String>,
        message: impl Into<String>,
        source: RuntimeError,
    ) -> Self {
        Self::RuntimeFailure {
            operation,
            name: name.into(),
            message: message.into(),
            source,
        }
    }
}

impl From<RegistryError> for OrchestratorError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Busy { name, waited } => Self::Busy {
                reason: match waited {
                    Some(waited) => format!("lock not acquired within {:?}", waited),
                    None => "another operation is in progress".to_string(),
                },
                name,
            },
            RegistryError::InvalidState { name, state } => Self::InvalidState { name, state },
            RegistryError::NotFound(name) => Self::NotFound(name),
        }
    }
}

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
