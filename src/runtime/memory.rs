//! In-memory runtime backend.
//!
//! Simulates container lifecycle rules without touching the host, so the
//! service can run on machines without LXC or Docker.

use super::{ContainerRuntime, RuntimeError};
use crate::container::TemplateSpec;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// Simulated runtime keeping container state in a map.
#[derive(Debug, Default)]
pub struct MemoryRuntime {
    /// name -> running
    containers: Mutex<BTreeMap<String, bool>>,
    latency: Option<Duration>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every mutating call by `latency`, mimicking slow runtimes.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            containers: Mutex::new(BTreeMap::new()),
            latency: Some(latency),
        }
    }

    /// Whether the simulated container is running.
    pub async fn is_running(&self, name: &str) -> Option<bool> {
        self.containers.lock().await.get(name).copied()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn create(&self, name: &str, _template: &TemplateSpec) -> Result<(), RuntimeError> {
        self.simulate_latency().await;
        let mut containers = self.containers.lock().await;
        if containers.contains_key(name) {
            return Err(RuntimeError::AlreadyExists(name.to_string()));
        }
        containers.insert(name.to_string(), false);
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.simulate_latency().await;
        match self.containers.lock().await.get_mut(name) {
            Some(running) if *running => Err(RuntimeError::Running(name.to_string())),
            Some(running) => {
                *running = true;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(name.to_string())),
        }
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        self.simulate_latency().await;
        match self.containers.lock().await.get_mut(name) {
            Some(running) if *running => {
                *running = false;
                Ok(())
            }
            Some(_) => Err(RuntimeError::Other(format!("Container {} is not running", name))),
            None => Err(RuntimeError::NotFound(name.to_string())),
        }
    }

    async fn destroy(&self, name: &str) -> Result<(), RuntimeError> {
        self.simulate_latency().await;
        let mut containers = self.containers.lock().await;
        match containers.get(name) {
            Some(true) => Err(RuntimeError::Running(name.to_string())),
            Some(false) => {
                containers.remove(name);
                Ok(())
            }
            None => Err(RuntimeError::NotFound(name.to_string())),
        }
    }

    async fn list_names(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(self.containers.lock().await.keys().cloned().collect())
    }

    async fn version(&self) -> Result<String, RuntimeError> {
        Ok(env!("CARGO_PKG_VERSION").to_string())
    }

    fn runtime_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_lifecycle_rules() {
        let runtime = MemoryRuntime::new();
        let template = TemplateSpec::default();

        runtime.create("web1", &template).await.unwrap();
        assert!(matches!(
            runtime.create("web1", &template).await,
            Err(RuntimeError::AlreadyExists(_))
        ));

        runtime.start("web1").await.unwrap();
        assert_eq!(runtime.is_running("web1").await, Some(true));
        assert!(matches!(
            runtime.destroy("web1").await,
            Err(RuntimeError::Running(_))
        ));

        runtime.stop("web1").await.unwrap();
        runtime.destroy("web1").await.unwrap();
        assert!(runtime.list_names().await.unwrap().is_empty());
        assert!(matches!(
            runtime.start("web1").await,
            Err(RuntimeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_list_is_sorted() {
        let runtime = MemoryRuntime::new();
        for name in ["c", "a", "b"] {
            runtime.create(name, &TemplateSpec::default()).await.unwrap();
        }
        assert_eq!(runtime.list_names().await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(runtime.runtime_type(), "memory");
    }
}
