//! Shared helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use lxcapi::container::{ContainerRegistry, LifecycleOrchestrator, LockPolicy, TemplateSpec};
use lxcapi::runtime::{ContainerRuntime, RuntimeError};
use std::collections::{BTreeMap, HashMap};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Runtime operations the fake records and can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Create,
    Start,
    Stop,
    Destroy,
    List,
    Version,
}

/// Template fields the fake understands; anything else is ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FakeTemplate {
    #[serde(rename = "Distro")]
    _distro: Option<String>,
}

fn decode_template(template: &TemplateSpec) -> Result<FakeTemplate, RuntimeError> {
    template
        .decode()
        .map_err(|e| RuntimeError::InvalidTemplate(e.to_string()))
}

/// Scriptable runtime for orchestrator tests.
///
/// Keeps a name -> running map, records every call, and detects overlapping
/// calls on the same name.
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<BTreeMap<String, bool>>,
    failures: Mutex<HashMap<Call, String>>,
    calls: Mutex<Vec<(Call, String)>>,
    active: Mutex<HashMap<String, usize>>,
    overlaps: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    delay: Option<Duration>,
    defer_template_check: AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every mutating call sleeps for `delay` while marked in flight.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Make every subsequent `call` fail with `message`.
    pub fn fail(&self, call: Call, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(call, message.to_string());
    }

    /// Accept every template up front and reject bad ones only in `create`.
    pub fn defer_template_check(&self) {
        self.defer_template_check.store(true, Ordering::SeqCst);
    }

    pub fn clear_failure(&self, call: Call) {
        self.failures.lock().unwrap().remove(&call);
    }

    /// Put a container into the runtime behind the orchestrator's back.
    pub fn seed(&self, name: &str, running: bool) {
        self.containers
            .lock()
            .unwrap()
            .insert(name.to_string(), running);
    }

    /// Remove a container behind the orchestrator's back.
    pub fn vanish(&self, name: &str) {
        self.containers.lock().unwrap().remove(name);
    }

    pub fn exists(&self, name: &str) -> bool {
        self.containers.lock().unwrap().contains_key(name)
    }

    pub fn is_running(&self, name: &str) -> Option<bool> {
        self.containers.lock().unwrap().get(name).copied()
    }

    pub fn calls(&self) -> Vec<(Call, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls of `kind` against `name`.
    pub fn count(&self, kind: Call, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, n)| *c == kind && n == name)
            .count()
    }

    /// Number of times two calls ran against the same name at once.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous mutating calls across all names.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn failure(&self, call: Call, name: &str) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push((call, name.to_string()));
        match self.failures.lock().unwrap().get(&call) {
            Some(message) => Err(RuntimeError::Other(message.clone())),
            None => Ok(()),
        }
    }

    async fn enter(&self, name: &str) {
        {
            let mut active = self.active.lock().unwrap();
            let count = active.entry(name.to_string()).or_insert(0);
            *count += 1;
            if *count > 1 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn leave(&self, name: &str) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let mut active = self.active.lock().unwrap();
        if let Some(count) = active.get_mut(name) {
            *count -= 1;
        }
    }

    async fn mutate<F>(&self, call: Call, name: &str, apply: F) -> Result<(), RuntimeError>
    where
        F: FnOnce(&mut BTreeMap<String, bool>) -> Result<(), RuntimeError>,
    {
        self.enter(name).await;
        let result = self
            .failure(call, name)
            .and_then(|()| apply(&mut self.containers.lock().unwrap()));
        self.leave(name);
        result
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn validate_template(&self, template: &TemplateSpec) -> Result<(), RuntimeError> {
        if self.defer_template_check.load(Ordering::SeqCst) {
            return Ok(());
        }
        decode_template(template).map(|_| ())
    }

    async fn create(&self, name: &str, template: &TemplateSpec) -> Result<(), RuntimeError> {
        self.mutate(Call::Create, name, |containers| {
            decode_template(template)?;
            if containers.contains_key(name) {
                return Err(RuntimeError::AlreadyExists(name.to_string()));
            }
            containers.insert(name.to_string(), false);
            Ok(())
        })
        .await
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.mutate(Call::Start, name, |containers| {
            match containers.get_mut(name) {
                Some(running) => {
                    *running = true;
                    Ok(())
                }
                None => Err(RuntimeError::NotFound(name.to_string())),
            }
        })
        .await
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        self.mutate(Call::Stop, name, |containers| {
            match containers.get_mut(name) {
                Some(running) => {
                    *running = false;
                    Ok(())
                }
                None => Err(RuntimeError::NotFound(name.to_string())),
            }
        })
        .await
    }

    async fn destroy(&self, name: &str) -> Result<(), RuntimeError> {
        self.mutate(Call::Destroy, name, |containers| {
            match containers.get(name) {
                Some(true) => Err(RuntimeError::Running(name.to_string())),
                Some(false) => {
                    containers.remove(name);
                    Ok(())
                }
                None => Err(RuntimeError::NotFound(name.to_string())),
            }
        })
        .await
    }

    async fn list_names(&self) -> Result<Vec<String>, RuntimeError> {
        self.failure(Call::List, "")?;
        Ok(self.containers.lock().unwrap().keys().cloned().collect())
    }

    async fn version(&self) -> Result<String, RuntimeError> {
        self.failure(Call::Version, "")?;
        Ok("6.0.0-fake".to_string())
    }

    fn runtime_type(&self) -> &'static str {
        "fake"
    }
}

/// Orchestrator over `runtime` with a fresh registry.
pub fn orchestrator(runtime: Arc<FakeRuntime>, policy: LockPolicy) -> LifecycleOrchestrator {
    LifecycleOrchestrator::new(runtime, Arc::new(ContainerRegistry::new(policy)))
}

/// Wait policy with a generous timeout.
pub fn wait_policy() -> LockPolicy {
    LockPolicy::Wait {
        timeout: Duration::from_secs(5),
    }
}
