//! Container lifecycle orchestration.
//!
//! Every per-name operation runs under that name's registry lock and on its
//! own spawned task, so a caller that goes away mid-operation never leaves a
//! runtime call half-recorded.

use super::{
    Container, ContainerRegistry, ContainerState, Operation, OrchestratorError, Result,
    TemplateSpec, validate_name,
};
use crate::runtime::{ContainerRuntime, RuntimeError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// Runtime version report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Version string reported by the runtime
    pub version: String,
    /// Backend that produced it
    pub runtime: String,
}

/// Outcome of a registry/runtime reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Runtime containers the registry did not know about
    pub added: Vec<String>,
    /// Registry entries the runtime no longer has
    pub vanished: Vec<String>,
    /// Candidates skipped because an operation held their lock
    pub skipped: Vec<String>,
    /// Whether the registry now reflects the runtime listing
    pub applied: bool,
}

/// Coordinates lifecycle operations between the registry and the runtime.
#[derive(Clone)]
pub struct LifecycleOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<ContainerRegistry>,
}

impl LifecycleOrchestrator {
    /// Create an orchestrator over a runtime and a registry.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, registry: Arc<ContainerRegistry>) -> Self {
        Self { runtime, registry }
    }

    /// Registry backing this orchestrator.
    pub fn registry(&self) -> &Arc<ContainerRegistry> {
        &self.registry
    }

    /// Runtime backing this orchestrator.
    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// List known containers after reconciling the registry with the runtime.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeFailure` if the runtime cannot enumerate containers.
    pub async fn list_containers(&self) -> Result<Vec<Container>> {
        let (_, runtime_names) = self.reconcile_inner().await?;
        let mut containers: Vec<Container> = self
            .registry
            .snapshot()
            .await
            .containers
            .into_iter()
            .filter(|c| c.state != ContainerState::Destroyed)
            .collect();

        // Names reconciliation could not record (lock held, registry changed
        // underneath) still show up, as Unknown
        let known: HashSet<String> = containers.iter().map(|c| c.name.clone()).collect();
        let unrecorded: Vec<String> = runtime_names
            .into_iter()
            .filter(|n| !known.contains(n))
            .collect();
        if !unrecorded.is_empty() {
            for name in unrecorded {
                containers.push(Container::new(name, ContainerState::Unknown, None));
            }
            containers.sort_by(|a, b| a.name.cmp(&b.name));
        }

        Ok(containers)
    }

    /// Look up a single container.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad name or `NotFound` if unknown.
    pub async fn get_container(&self, name: &str) -> Result<Container> {
        validate_name(name)?;
        self.registry
            .lookup(name)
            .await
            .filter(|c| c.state != ContainerState::Destroyed)
            .ok_or_else(|| OrchestratorError::NotFound(name.to_string()))
    }

    /// Runtime version, straight from the backend.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeFailure` if the runtime cannot report its version.
    pub async fn get_version(&self) -> Result<VersionInfo> {
        let version = self.runtime.version().await.map_err(|e| {
            let err = OrchestratorError::runtime(
                Operation::Version,
                "",
                "failed to query runtime version",
                e,
            );
            error!(operation = %Operation::Version, error = %err, "Runtime failure");
            err
        })?;

        Ok(VersionInfo {
            version,
            runtime: self.runtime.runtime_type().to_string(),
        })
    }

    /// Create a container and optionally start it.
    ///
    /// A failed create leaves no registry entry. A failed start after a
    /// successful create leaves the container `Stopped` and reports a
    /// `RuntimeFailure` for the start operation.
    ///
    /// # Errors
    ///
    /// `InvalidArgument`, `AlreadyExists`, `Busy` or `RuntimeFailure`.
    pub async fn create_container(
        &self,
        name: &str,
        template: TemplateSpec,
        start_after_create: bool,
    ) -> Result<Container> {
        validate_name(name)?;
        self.runtime
            .validate_template(&template)
            .map_err(|e| Self::template_rejected(name, e))?;
        let this = self.clone();
        let owned = name.to_string();
        self.run_detached(Operation::Create, name, async move {
            this.create_locked(&owned, template, start_after_create).await
        })
        .await
    }

    /// Destroy a container, stopping it first when `force` is set.
    ///
    /// # Errors
    ///
    /// `InvalidArgument`, `NotFound`, `Conflict` (running without `force`),
    /// `Busy` or `RuntimeFailure`.
    pub async fn destroy_container(&self, name: &str, force: bool) -> Result<()> {
        validate_name(name)?;
        let this = self.clone();
        let owned = name.to_string();
        self.run_detached(Operation::Destroy, name, async move {
            this.destroy_locked(&owned, force).await
        })
        .await
    }

    /// Start a stopped container.
    ///
    /// # Errors
    ///
    /// `InvalidArgument`, `NotFound`, `Conflict` (already running),
    /// `InvalidState`, `Busy` or `RuntimeFailure`.
    pub async fn start_container(&self, name: &str) -> Result<Container> {
        validate_name(name)?;
        let this = self.clone();
        let owned = name.to_string();
        self.run_detached(Operation::Start, name, async move {
            this.transition_locked(&owned, Operation::Start).await
        })
        .await
    }

    /// Stop a running container.
    ///
    /// # Errors
    ///
    /// `InvalidArgument`, `NotFound`, `Conflict` (not running),
    /// `InvalidState`, `Busy` or `RuntimeFailure`.
    pub async fn stop_container(&self, name: &str) -> Result<Container> {
        validate_name(name)?;
        let this = self.clone();
        let owned = name.to_string();
        self.run_detached(Operation::Stop, name, async move {
            this.transition_locked(&owned, Operation::Stop).await
        })
        .await
    }

    /// Reconcile the registry with the runtime's container list.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeFailure` if the runtime cannot enumerate containers.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.reconcile_inner().await.map(|(report, _)| report)
    }

    /// Run `fut` on its own task and wait for it.
    ///
    /// Dropping the returned future does not cancel the task: the runtime
    /// call and its registry update always complete.
    async fn run_detached<T, F>(&self, operation: Operation, name: &str, fut: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let span = info_span!("lifecycle", %operation, name, op_id = %Uuid::new_v4());
        let handle = tokio::spawn(fut.instrument(span));

        match handle.await {
            Ok(result) => result,
            Err(join_error) => {
                error!(%operation, name, error = %join_error, "Lifecycle task aborted");
                Err(OrchestratorError::runtime(
                    operation,
                    name,
                    "lifecycle task aborted",
                    RuntimeError::Other(join_error.to_string()),
                ))
            }
        }
    }

    async fn lock(&self, operation: Operation, name: &str) -> Result<super::ScopedLock> {
        self.registry.acquire_lock(name).await.map_err(|e| {
            let err = OrchestratorError::from(e);
            warn!(%operation, name, error = %err, "Container busy");
            err
        })
    }

    fn runtime_failure(
        operation: Operation,
        name: &str,
        message: &str,
        source: RuntimeError,
    ) -> OrchestratorError {
        let err = OrchestratorError::runtime(operation, name, message, source);
        error!(%operation, name, error = %err, "Runtime failure");
        err
    }

    /// A template the runtime cannot use is a client error, not a runtime failure.
    fn template_rejected(name: &str, err: RuntimeError) -> OrchestratorError {
        warn!(operation = %Operation::Create, name, error = %err, "Template rejected");
        OrchestratorError::InvalidArgument(err.to_string())
    }

    async fn create_locked(
        &self,
        name: &str,
        template: TemplateSpec,
        start_after_create: bool,
    ) -> Result<Container> {
        let _lock = self.lock(Operation::Create, name).await?;

        if let Some(existing) = self.registry.lookup(name).await {
            if existing.state != ContainerState::Destroyed {
                return Err(OrchestratorError::AlreadyExists(name.to_string()));
            }
        }

        self.registry.register(name, template.clone()).await;
        debug!("Creating container {}", name);

        if let Err(e) = self.runtime.create(name, &template).await {
            self.registry
                .upsert_state(name, ContainerState::Destroyed)
                .await;
            self.registry.remove(name).await?;
            return Err(match e {
                RuntimeError::InvalidTemplate(_) => Self::template_rejected(name, e),
                e => Self::runtime_failure(
                    Operation::Create,
                    name,
                    "failed to create container",
                    e,
                ),
            });
        }

        let mut container = self
            .registry
            .upsert_state(name, ContainerState::Stopped)
            .await;
        info!("Created container {}", name);

        if start_after_create {
            if let Err(e) = self.runtime.start(name).await {
                return Err(Self::runtime_failure(
                    Operation::Start,
                    name,
                    "container created but failed to start",
                    e,
                ));
            }
            container = self
                .registry
                .upsert_state(name, ContainerState::Running)
                .await;
            info!("Started container {}", name);
        }

        Ok(container)
    }

    async fn destroy_locked(&self, name: &str, force: bool) -> Result<()> {
        let _lock = self.lock(Operation::Destroy, name).await?;

        let existing = self
            .registry
            .lookup(name)
            .await
            .filter(|c| c.state != ContainerState::Destroyed)
            .ok_or_else(|| OrchestratorError::NotFound(name.to_string()))?;

        let mut prior = existing.state;
        match prior {
            ContainerState::Running if !force => {
                return Err(OrchestratorError::Conflict(format!(
                    "container {} is running; stop it first or destroy with force",
                    name
                )));
            }
            ContainerState::Running => {
                self.runtime.stop(name).await.map_err(|e| {
                    Self::runtime_failure(
                        Operation::Stop,
                        name,
                        "failed to stop container before destroy",
                        e,
                    )
                })?;
                prior = self
                    .registry
                    .upsert_state(name, ContainerState::Stopped)
                    .await
                    .state;
            }
            ContainerState::Unknown if force => {
                // Actual runtime state was never observed; a stop failure here
                // usually means it is already stopped
                if let Err(e) = self.runtime.stop(name).await {
                    debug!("Best-effort stop of {} failed: {}", name, e);
                }
            }
            _ => {}
        }

        self.registry
            .upsert_state(name, ContainerState::Destroying)
            .await;

        if let Err(e) = self.runtime.destroy(name).await {
            self.registry.upsert_state(name, prior).await;
            return Err(Self::runtime_failure(
                Operation::Destroy,
                name,
                "failed to destroy container",
                e,
            ));
        }

        self.registry
            .upsert_state(name, ContainerState::Destroyed)
            .await;
        self.registry.remove(name).await?;
        info!("Destroyed container {}", name);
        Ok(())
    }

    async fn transition_locked(&self, name: &str, operation: Operation) -> Result<Container> {
        let _lock = self.lock(operation, name).await?;

        let existing = self
            .registry
            .lookup(name)
            .await
            .filter(|c| c.state != ContainerState::Destroyed)
            .ok_or_else(|| OrchestratorError::NotFound(name.to_string()))?;

        if existing.state.is_transitional() {
            return Err(OrchestratorError::InvalidState {
                name: name.to_string(),
                state: existing.state,
            });
        }

        let (target, result) = match operation {
            Operation::Start => {
                if existing.state == ContainerState::Running {
                    return Err(OrchestratorError::Conflict(format!(
                        "container {} is already running",
                        name
                    )));
                }
                (ContainerState::Running, self.runtime.start(name).await)
            }
            Operation::Stop => {
                if existing.state == ContainerState::Stopped {
                    return Err(OrchestratorError::Conflict(format!(
                        "container {} is not running",
                        name
                    )));
                }
                (ContainerState::Stopped, self.runtime.stop(name).await)
            }
            other => {
                return Err(OrchestratorError::InvalidArgument(format!(
                    "{} is not a state transition",
                    other
                )));
            }
        };

        if let Err(e) = result {
            return Err(Self::runtime_failure(
                operation,
                name,
                &format!("failed to {} container", operation),
                e,
            ));
        }

        let container = self.registry.upsert_state(name, target).await;
        info!("Container {} is now {}", name, target);
        Ok(container)
    }

    async fn reconcile_inner(&self) -> Result<(ReconcileReport, Vec<String>)> {
        let snapshot = self.registry.snapshot().await;

        let runtime_names = self.runtime.list_names().await.map_err(|e| {
            Self::runtime_failure(Operation::List, "", "failed to list containers", e)
        })?;
        let mut report = ReconcileReport::default();
        let mut locks = Vec::new();

        let candidates: Vec<(String, bool)> = {
            let runtime_set: HashSet<&str> = runtime_names.iter().map(String::as_str).collect();
            let added = runtime_names
                .iter()
                .filter(|name| !snapshot.contains(name))
                .map(|name| (name.clone(), true));
            let vanished = snapshot
                .containers
                .iter()
                .filter(|c| !c.state.is_transitional() && c.state != ContainerState::Destroyed)
                .filter(|c| !runtime_set.contains(c.name.as_str()))
                .map(|c| (c.name.clone(), false));
            added.chain(vanished).collect()
        };

        for (name, is_added) in candidates {
            match self.registry.try_acquire_lock(&name) {
                Some(lock) => {
                    locks.push(lock);
                    if is_added {
                        report.added.push(name);
                    } else {
                        report.vanished.push(name);
                    }
                }
                None => report.skipped.push(name),
            }
        }

        if report.added.is_empty() && report.vanished.is_empty() {
            report.applied = report.skipped.is_empty();
            return Ok((report, runtime_names));
        }

        report.applied = self
            .registry
            .apply_reconciliation(snapshot.generation, &report.added, &report.vanished)
            .await;
        drop(locks);

        if report.applied {
            info!(
                added = report.added.len(),
                vanished = report.vanished.len(),
                "Reconciled registry with runtime"
            );
        } else {
            debug!("Reconciliation deferred: registry changed concurrently");
        }

        Ok((report, runtime_names))
    }
}
