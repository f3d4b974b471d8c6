//! # lxcapi
//!
//! An HTTP service managing the lifecycle of system containers. Remote
//! clients list, create, start, stop and destroy containers by name; the
//! actual isolation work is delegated to a container runtime (LXC by
//! default).
//!
//! ## Architecture Overview
//!
//! - **[`api`]**: axum router translating HTTP requests into lifecycle calls
//! - **[`container`]**: registry of known containers with per-name locks, and
//!   the orchestrator that serializes every lifecycle operation on a name
//! - **[`runtime`]**: the [`ContainerRuntime`] capability and its LXC, Docker
//!   and in-memory backends
//! - **[`cli`]**: command line parsing and configuration discovery
//!
//! Operations on the same name are strictly serialized; operations on
//! different names run concurrently. A lifecycle operation that has started
//! runs to completion even if the requesting client disconnects.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lxcapi::{ContainerRegistry, LifecycleOrchestrator, LxcRuntime};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = Arc::new(LxcRuntime::new("/var/lib/lxc", 10));
//!     let registry = Arc::new(ContainerRegistry::default());
//!     let orchestrator = LifecycleOrchestrator::new(runtime, registry);
//!
//!     orchestrator.reconcile().await?;
//!     lxcapi::api::serve("127.0.0.1:8090".parse()?, orchestrator).await
//! }
//! ```

/// HTTP gateway.
pub mod api;

/// Command line parsing and configuration.
pub mod cli;

/// Container registry and lifecycle orchestration.
pub mod container;

/// Environment constants and path utilities.
pub mod env;

/// Runtime backends.
pub mod runtime;

pub use cli::ServiceConfig;
pub use container::{
    Container, ContainerRegistry, ContainerState, LifecycleOrchestrator, LockPolicy,
    OrchestratorError, TemplateSpec,
};
pub use runtime::{ContainerRuntime, LxcRuntime, MemoryRuntime, RuntimeBackend, RuntimeError};
