//! Docker/Podman runtime backend.
//!
//! Wraps the bollard Docker API with automatic connection fallback. Only
//! containers carrying the managed label are reported by
//! [`ContainerRuntime::list_names`].

use super::{ContainerRuntime, RuntimeError};
use crate::container::TemplateSpec;
use crate::env;
use async_trait::async_trait;
use bollard::Docker;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Template options understood by the Docker backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerTemplate {
    /// Image reference (required)
    pub image: Option<String>,
    /// Command override
    pub cmd: Option<Vec<String>>,
    /// Environment in `KEY=value` form
    pub env: Vec<String>,
}

impl DockerTemplate {
    /// Decode the Docker options out of an opaque template; `image` is required.
    pub fn from_spec(template: &TemplateSpec) -> Result<Self, RuntimeError> {
        let options: Self = template
            .decode()
            .map_err(|e| RuntimeError::InvalidTemplate(e.to_string()))?;
        if options.image.as_deref().is_none_or(str::is_empty) {
            return Err(RuntimeError::InvalidTemplate("image is required".to_string()));
        }
        Ok(options)
    }
}

/// Runtime backed by a Docker or Podman daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Arc<Docker>,
    stop_timeout_secs: i64,
}

impl DockerRuntime {
    /// Connect to Docker, falling back to the Podman sockets.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Unavailable`] if no daemon can be reached.
    pub async fn connect(stop_timeout_secs: u64) -> Result<Self, RuntimeError> {
        let docker = Self::connect_docker()?;
        let runtime = Self {
            docker: Arc::new(docker),
            stop_timeout_secs: i64::try_from(stop_timeout_secs).unwrap_or(i64::MAX),
        };
        runtime.ping().await?;
        Ok(runtime)
    }

    /// Tries, in order: local defaults (socket or `DOCKER_HOST`), the rootless
    /// Podman socket, the system Podman socket.
    fn connect_docker() -> Result<Docker, RuntimeError> {
        debug!("Attempting to connect to container daemon...");

        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                info!("Connected to container daemon via local defaults");
                return Ok(docker);
            }
            Err(e) => debug!("Local defaults failed: {}", e),
        }

        #[cfg(unix)]
        {
            if let Ok(home) = std::env::var("HOME") {
                let podman_socket = format!("unix://{}/run/podman/podman.sock", home);
                debug!("Trying Podman socket: {}", podman_socket);

                match Docker::connect_with_socket(&podman_socket, 120, bollard::API_DEFAULT_VERSION)
                {
                    Ok(docker) => {
                        info!("Connected to Podman via rootless socket");
                        return Ok(docker);
                    }
                    Err(e) => debug!("Podman rootless socket failed: {}", e),
                }
            }

            let system_socket = "unix:///run/podman/podman.sock";
            match Docker::connect_with_socket(system_socket, 120, bollard::API_DEFAULT_VERSION) {
                Ok(docker) => {
                    info!("Connected to Podman via system socket");
                    return Ok(docker);
                }
                Err(e) => debug!("Podman system socket failed: {}", e),
            }
        }

        Err(RuntimeError::Unavailable(
            "failed to connect to Docker or Podman; ensure the daemon is installed and running"
                .to_string(),
        ))
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("ping failed: {}", e)))?;
        Ok(())
    }

    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => {
                debug!("Image {} already exists locally", image);
                return Ok(());
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(RuntimeError::Docker(e)),
        }

        info!("Pulling image: {}", image);
        let mut stream = self.docker.create_image(
            Some(bollard::image::CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(status) = info.status {
                debug!("Pull status: {}", status);
            }
        }

        Ok(())
    }
}

/// Map daemon 404/409 responses onto the matching runtime errors.
fn classify(name: &str, err: bollard::errors::Error) -> RuntimeError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(name.to_string()),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409, ..
        } => RuntimeError::AlreadyExists(name.to_string()),
        e => RuntimeError::Docker(e),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn validate_template(&self, template: &TemplateSpec) -> Result<(), RuntimeError> {
        DockerTemplate::from_spec(template).map(|_| ())
    }

    async fn create(&self, name: &str, template: &TemplateSpec) -> Result<(), RuntimeError> {
        let options = DockerTemplate::from_spec(template)?;
        let image = options
            .image
            .ok_or_else(|| RuntimeError::InvalidTemplate("image is required".to_string()))?;

        self.ensure_image(&image).await?;

        let mut labels = HashMap::new();
        labels.insert(env::MANAGED_LABEL.to_string(), "true".to_string());

        let config = bollard::container::Config {
            image: Some(image),
            cmd: options.cmd,
            env: if options.env.is_empty() {
                None
            } else {
                Some(options.env)
            },
            labels: Some(labels),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(
                Some(bollard::container::CreateContainerOptions {
                    name,
                    ..Default::default()
                }),
                config,
            )
            .await
            .map_err(|e| classify(name, e))?;

        info!("Created container: {} ({})", name, response.id);
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(
                name,
                None::<bollard::container::StartContainerOptions<String>>,
            )
            .await
            .map_err(|e| classify(name, e))
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .stop_container(
                name,
                Some(bollard::container::StopContainerOptions {
                    t: self.stop_timeout_secs,
                }),
            )
            .await
            .map_err(|e| classify(name, e))
    }

    async fn destroy(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                name,
                Some(bollard::container::RemoveContainerOptions {
                    force: false,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 409, ..
                } => RuntimeError::Running(name.to_string()),
                e => classify(name, e),
            })
    }

    async fn list_names(&self) -> Result<Vec<String>, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}=true", env::MANAGED_LABEL)],
        );

        let containers = self
            .docker
            .list_containers(Some(bollard::container::ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        let mut names: Vec<String> = containers
            .into_iter()
            .filter_map(|c| c.names.and_then(|names| names.into_iter().next()))
            .map(|name| name.trim_start_matches('/').to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn version(&self) -> Result<String, RuntimeError> {
        let version = self.docker.version().await?;
        Ok(version.version.unwrap_or_else(|| "unknown".to_string()))
    }

    async fn health_check(&self) -> Result<(), RuntimeError> {
        self.ping().await
    }

    fn runtime_type(&self) -> &'static str {
        "docker"
    }
}
