//! Container registry and per-name locking.
//!
//! The registry is the only shared mutable state in the service. Entry data
//! sits behind a single `RwLock` so global readers always see a consistent
//! snapshot, while lifecycle operations serialize on per-name mutexes kept in
//! a `DashMap` lock table.

use super::{Container, ContainerState, TemplateSpec};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// How [`ContainerRegistry::acquire_lock`] behaves under contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPolicy {
    /// Wait for the holder to finish, up to `timeout`
    Wait { timeout: Duration },
    /// Give up immediately if the name is locked
    FailFast,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::Wait {
            timeout: Duration::from_millis(crate::env::lock::DEFAULT_LOCK_TIMEOUT_MS),
        }
    }
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Lock contention outlasted the configured policy
    #[error("Container {name} is busy")]
    Busy {
        name: String,
        /// How long the caller waited; `None` under the fail-fast policy
        waited: Option<Duration>,
    },

    /// Mutation not permitted in the entry's current state
    #[error("Container {name} is in state {state}")]
    InvalidState { name: String, state: ContainerState },

    /// No entry for the name
    #[error("Container not found: {0}")]
    NotFound(String),
}

/// Consistent point-in-time view of the registry.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    /// Mutation counter at the time of the read
    pub generation: u64,
    /// Entries sorted by name
    pub containers: Vec<Container>,
}

impl RegistrySnapshot {
    pub fn contains(&self, name: &str) -> bool {
        self.containers.iter().any(|c| c.name == name)
    }
}

/// Exclusive hold on one container name.
///
/// Dropping the lock releases it; the lock-table slot is pruned once no
/// holder or waiter references it any more.
pub struct ScopedLock {
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockTable>,
}

impl ScopedLock {
    /// Name this lock guards.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ScopedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedLock").field("name", &self.name).finish()
    }
}

impl Drop for ScopedLock {
    fn drop(&mut self) {
        // Release before pruning so the slot's refcount reflects other users only
        drop(self.guard.take());
        prune_slot(&self.locks, &self.name);
    }
}

fn prune_slot(locks: &LockTable, name: &str) {
    locks.remove_if(name, |_, mutex| Arc::strong_count(mutex) == 1);
}

#[derive(Default)]
struct Entries {
    containers: HashMap<String, Container>,
    generation: u64,
}

impl Entries {
    fn bump(&mut self) {
        self.generation += 1;
    }
}

/// Index of known containers and their last observed states.
pub struct ContainerRegistry {
    entries: RwLock<Entries>,
    locks: Arc<LockTable>,
    policy: LockPolicy,
}

impl ContainerRegistry {
    /// Create an empty registry using the given lock policy.
    pub fn new(policy: LockPolicy) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            locks: Arc::new(DashMap::new()),
            policy,
        }
    }

    /// Configured lock policy.
    pub fn policy(&self) -> LockPolicy {
        self.policy
    }

    /// Look up a container by name.
    pub async fn lookup(&self, name: &str) -> Option<Container> {
        self.entries.read().await.containers.get(name).cloned()
    }

    /// Insert a fresh entry in the `Creating` state.
    pub async fn register(&self, name: &str, template: TemplateSpec) -> Container {
        let container = Container::new(name, ContainerState::Creating, Some(template));
        let mut entries = self.entries.write().await;
        entries
            .containers
            .insert(name.to_string(), container.clone());
        entries.bump();
        debug!("Registered container {}", name);
        container
    }

    /// Record a state for a container, inserting a template-less entry if absent.
    ///
    /// Repeating the current state is a no-op.
    pub async fn upsert_state(&self, name: &str, state: ContainerState) -> Container {
        let mut entries = self.entries.write().await;

        if let Some(container) = entries.containers.get_mut(name) {
            if container.state == state {
                return container.clone();
            }
            debug!("Container {}: {} -> {}", name, container.state, state);
            container.state = state;
            container.updated_at = Utc::now();
            let updated = container.clone();
            entries.bump();
            return updated;
        }

        let container = Container::new(name, state, None);
        entries
            .containers
            .insert(name.to_string(), container.clone());
        entries.bump();
        container
    }

    /// Evict a destroyed container.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidState`] unless the entry is `Destroyed`,
    /// or [`RegistryError::NotFound`] if there is no entry.
    pub async fn remove(&self, name: &str) -> Result<Container, RegistryError> {
        let mut entries = self.entries.write().await;

        match entries.containers.get(name) {
            None => return Err(RegistryError::NotFound(name.to_string())),
            Some(container) if container.state != ContainerState::Destroyed => {
                return Err(RegistryError::InvalidState {
                    name: name.to_string(),
                    state: container.state,
                });
            }
            Some(_) => {}
        }

        let removed = entries
            .containers
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        entries.bump();
        debug!("Evicted container {}", name);
        Ok(removed)
    }

    /// Read every entry under a single read lock.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let entries = self.entries.read().await;
        let mut containers: Vec<Container> = entries.containers.values().cloned().collect();
        containers.sort_by(|a, b| a.name.cmp(&b.name));

        RegistrySnapshot {
            generation: entries.generation,
            containers,
        }
    }

    /// Acquire the exclusive lifecycle lock for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Busy`] if the lock cannot be obtained under
    /// the configured [`LockPolicy`].
    pub async fn acquire_lock(&self, name: &str) -> Result<ScopedLock, RegistryError> {
        let mutex = self.lock_slot(name);

        let guard = match self.policy {
            LockPolicy::FailFast => Arc::clone(&mutex).try_lock_owned().ok(),
            LockPolicy::Wait { timeout } => {
                tokio::time::timeout(timeout, Arc::clone(&mutex).lock_owned())
                    .await
                    .ok()
            }
        };

        drop(mutex);

        match guard {
            Some(guard) => Ok(ScopedLock {
                name: name.to_string(),
                guard: Some(guard),
                locks: Arc::clone(&self.locks),
            }),
            None => {
                prune_slot(&self.locks, name);
                Err(RegistryError::Busy {
                    name: name.to_string(),
                    waited: match self.policy {
                        LockPolicy::Wait { timeout } => Some(timeout),
                        LockPolicy::FailFast => None,
                    },
                })
            }
        }
    }

    /// Acquire the lock for `name` only if nobody holds it right now.
    pub fn try_acquire_lock(&self, name: &str) -> Option<ScopedLock> {
        let mutex = self.lock_slot(name);
        let guard = Arc::clone(&mutex).try_lock_owned().ok();
        drop(mutex);

        match guard {
            Some(guard) => Some(ScopedLock {
                name: name.to_string(),
                guard: Some(guard),
                locks: Arc::clone(&self.locks),
            }),
            None => {
                prune_slot(&self.locks, name);
                None
            }
        }
    }

    fn lock_slot(&self, name: &str) -> Arc<Mutex<()>> {
        let slot = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Arc::clone(slot.value())
    }

    /// Number of names with a live lock-table slot.
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    /// Apply a reconciliation computed against the snapshot at `generation`.
    ///
    /// Names in `added` become `Unknown` entries; stable entries named in
    /// `vanished` are flagged `Destroyed` and evicted. Nothing is applied if
    /// the registry changed since `generation`. Returns whether it applied.
    pub async fn apply_reconciliation(
        &self,
        generation: u64,
        added: &[String],
        vanished: &[String],
    ) -> bool {
        let mut entries = self.entries.write().await;
        if entries.generation != generation {
            debug!(
                "Skipping reconciliation: registry moved from generation {} to {}",
                generation, entries.generation
            );
            return false;
        }

        let mut changed = false;

        for name in added {
            if !entries.containers.contains_key(name) {
                entries.containers.insert(
                    name.clone(),
                    Container::new(name, ContainerState::Unknown, None),
                );
                changed = true;
            }
        }

        for name in vanished {
            let stable = entries
                .containers
                .get(name)
                .is_some_and(|c| !c.state.is_transitional());
            if stable {
                if let Some(mut container) = entries.containers.remove(name) {
                    container.state = ContainerState::Destroyed;
                    debug!("Container {} vanished from runtime, evicted", container.name);
                    changed = true;
                }
            }
        }

        if changed {
            entries.bump();
        }
        true
    }
}

impl Default for ContainerRegistry {
    fn default() -> Self {
        Self::new(LockPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail_fast() -> ContainerRegistry {
        ContainerRegistry::new(LockPolicy::FailFast)
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = ContainerRegistry::default();
        assert!(registry.lookup("web1").await.is_none());

        let template = TemplateSpec::new(serde_json::json!({"Distro": "alpine"}));
        let container = registry.register("web1", template.clone()).await;
        assert_eq!(container.state, ContainerState::Creating);

        let found = registry.lookup("web1").await.unwrap();
        assert_eq!(found.template, Some(template));
    }

    #[tokio::test]
    async fn test_upsert_state_is_idempotent() {
        let registry = ContainerRegistry::default();
        registry.upsert_state("web1", ContainerState::Stopped).await;
        let before = registry.snapshot().await;

        let container = registry.upsert_state("web1", ContainerState::Stopped).await;
        let after = registry.snapshot().await;

        assert_eq!(container.state, ContainerState::Stopped);
        assert_eq!(before.generation, after.generation);
        assert_eq!(before.containers, after.containers);
    }

    #[tokio::test]
    async fn test_remove_requires_destroyed() {
        let registry = ContainerRegistry::default();
        registry.upsert_state("web1", ContainerState::Running).await;

        let err = registry.remove("web1").await.unwrap_err();
        assert_eq!(
            err,
            RegistryError::InvalidState {
                name: "web1".to_string(),
                state: ContainerState::Running,
            }
        );

        registry.upsert_state("web1", ContainerState::Destroyed).await;
        let removed = registry.remove("web1").await.unwrap();
        assert_eq!(removed.state, ContainerState::Destroyed);
        assert!(registry.lookup("web1").await.is_none());

        assert_eq!(
            registry.remove("web1").await.unwrap_err(),
            RegistryError::NotFound("web1".to_string())
        );
    }

    #[tokio::test]
    async fn test_fail_fast_lock_contention() {
        let registry = fail_fast();
        assert_eq!(registry.policy(), LockPolicy::FailFast);
        let held = registry.acquire_lock("web1").await.unwrap();
        assert_eq!(held.name(), "web1");

        let err = registry.acquire_lock("web1").await.unwrap_err();
        assert!(matches!(err, RegistryError::Busy { waited: None, .. }));

        // Other names are independent
        let other = registry.acquire_lock("web2").await;
        assert!(other.is_ok());

        drop(held);
        assert!(registry.acquire_lock("web1").await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_lock_times_out() {
        let registry = ContainerRegistry::new(LockPolicy::Wait {
            timeout: Duration::from_millis(50),
        });
        let _held = registry.acquire_lock("web1").await.unwrap();

        let err = registry.acquire_lock("web1").await.unwrap_err();
        assert_eq!(
            err,
            RegistryError::Busy {
                name: "web1".to_string(),
                waited: Some(Duration::from_millis(50)),
            }
        );
    }

    #[tokio::test]
    async fn test_wait_lock_acquired_after_release() {
        let registry = Arc::new(ContainerRegistry::new(LockPolicy::Wait {
            timeout: Duration::from_secs(5),
        }));
        let held = registry.acquire_lock("web1").await.unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.acquire_lock("web1").await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_lock_slots_are_pruned() {
        let registry = fail_fast();
        {
            let _a = registry.acquire_lock("a").await.unwrap();
            let _b = registry.acquire_lock("b").await.unwrap();
            assert!(registry.acquire_lock("a").await.is_err());
            assert_eq!(registry.active_locks(), 2);
        }
        assert_eq!(registry.active_locks(), 0);

        assert!(registry.try_acquire_lock("c").is_some());
        assert_eq!(registry.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_reconciliation_applies_on_unchanged_generation() {
        let registry = ContainerRegistry::default();
        registry.upsert_state("gone", ContainerState::Stopped).await;
        registry.upsert_state("busy", ContainerState::Creating).await;

        let snapshot = registry.snapshot().await;
        let applied = registry
            .apply_reconciliation(
                snapshot.generation,
                &["external".to_string()],
                &["gone".to_string(), "busy".to_string()],
            )
            .await;
        assert!(applied);

        let external = registry.lookup("external").await.unwrap();
        assert_eq!(external.state, ContainerState::Unknown);
        assert!(external.template.is_none());
        assert!(registry.lookup("gone").await.is_none());
        // Transitional entries are left to the operation that owns them
        assert_eq!(
            registry.lookup("busy").await.unwrap().state,
            ContainerState::Creating
        );
    }

    #[tokio::test]
    async fn test_reconciliation_skipped_on_concurrent_change() {
        let registry = ContainerRegistry::default();
        let snapshot = registry.snapshot().await;

        registry.upsert_state("web1", ContainerState::Stopped).await;

        let applied = registry
            .apply_reconciliation(snapshot.generation, &["external".to_string()], &[])
            .await;
        assert!(!applied);
        assert!(registry.lookup("external").await.is_none());
    }
}
