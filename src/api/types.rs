//! Request and response bodies.

use crate::container::TemplateSpec;
use serde::{Deserialize, Serialize};

/// Body of `POST /create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateRequest {
    #[serde(default)]
    pub name: String,
    /// Start the container once created
    #[serde(default)]
    pub started: bool,
    /// Opaque template handed to the runtime
    #[serde(default)]
    pub template: TemplateSpec,
}

/// Body of `DELETE /destroy/{name}`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DestroyOptions {
    /// Stop the container first if it is running
    #[serde(default)]
    pub force: bool,
}

/// Generic status reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

impl StatusResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
        }
    }
}

/// Body of `GET /containers`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainersResponse {
    pub containers: Vec<String>,
}
