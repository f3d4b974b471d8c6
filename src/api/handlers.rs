//! Route handlers.
//!
//! Bodies are taken as raw bytes and decoded here so a malformed body is
//! always reported as a 400 with the uniform error envelope.

use super::AppState;
use super::error::{ApiError, Result};
use super::types::{ContainersResponse, CreateRequest, DestroyOptions, StatusResponse};
use crate::container::{Container, VersionInfo};
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{Method, Uri};
use serde::de::DeserializeOwned;

/// Decode a JSON body. An empty body yields `T::default()` when `allow_empty`.
fn decode_body<T: DeserializeOwned + Default>(body: &Bytes, allow_empty: bool) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return if allow_empty {
            Ok(T::default())
        } else {
            Err(ApiError::BadRequest("request body is required".to_string()))
        };
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// `GET /containers`
pub async fn list_containers(State(state): State<AppState>) -> Result<Json<ContainersResponse>> {
    let containers = state.orchestrator.list_containers().await?;
    Ok(Json(ContainersResponse {
        containers: containers.into_iter().map(|c| c.name).collect(),
    }))
}

/// `GET /containers/{name}`
pub async fn inspect_container(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Container>> {
    Ok(Json(state.orchestrator.get_container(&name).await?))
}

/// `GET /version`
pub async fn get_version(State(state): State<AppState>) -> Result<Json<VersionInfo>> {
    Ok(Json(state.orchestrator.get_version().await?))
}

/// `POST /create`
pub async fn create_container(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<StatusResponse>> {
    let request: CreateRequest = decode_body(&body, false)?;
    state
        .orchestrator
        .create_container(&request.name, request.template, request.started)
        .await?;
    Ok(Json(StatusResponse::success("container created")))
}

/// `DELETE /destroy/{name}`
pub async fn destroy_container(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<StatusResponse>> {
    let options: DestroyOptions = decode_body(&body, true)?;
    state
        .orchestrator
        .destroy_container(&name, options.force)
        .await?;
    Ok(Json(StatusResponse::success("container destroyed")))
}

/// `DELETE /destroy` without a name.
pub async fn destroy_without_name() -> ApiError {
    ApiError::Orchestrator(crate::container::OrchestratorError::InvalidArgument(
        "container name is required".to_string(),
    ))
}

/// Any unmatched route.
pub async fn route_not_found(method: Method, uri: Uri) -> ApiError {
    ApiError::RouteNotFound(format!("{} {}", method, uri.path()))
}

/// `POST /start/{name}`
pub async fn start_container(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<StatusResponse>> {
    state.orchestrator.start_container(&name).await?;
    Ok(Json(StatusResponse::success("container started")))
}

/// `POST /stop/{name}`
pub async fn stop_container(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<StatusResponse>> {
    state.orchestrator.stop_container(&name).await?;
    Ok(Json(StatusResponse::success("container stopped")))
}

/// `GET /health`
pub async fn health() -> &'static str {
    "ok"
}
