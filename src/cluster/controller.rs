//! Workload Controller - lifecycle of one ReplicaSet on the cluster
//!
//! The controller is responsible for:
//! - Creating a ReplicaSet from a deployment request
//! - Reading a ReplicaSet and its scale subresource
//! - Scaling via read-modify-write of the scale subresource
//! - Deleting via drain (scale to zero) then delete
//!
//! Every operation is a fixed sequence of calls with no retries; the caller
//! owns retry policy.
//!
//! Scaling is only as safe as the server's concurrency control. The scale
//! document is PUT back with the `resourceVersion` it was read with, so a
//! concurrent writer between our read and our write surfaces as
//! [`ControllerError::Conflict`]. Servers that omit `resourceVersion` give
//! last-writer-wins semantics instead.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::Method;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::builder::{build_replica_set, DeploymentRequest, SpecError};
use super::client::{ApiPaths, ClusterApi, Outcome, TransportError};
use super::resources::{ReplicaSet, Scale};

/// Errors surfaced by controller operations
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("{0} not found")]
    NotFound(String),

    /// Non-success answer; `body` is the response body as received
    #[error("Cluster answered {status}: {}", String::from_utf8_lossy(body).trim())]
    RemoteFailure { status: u16, body: Bytes },

    #[error("{0} was modified concurrently; re-read and retry")]
    Conflict(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    InvalidRequest(#[from] SpecError),

    #[error("Failed to decode cluster response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ControllerError {
    fn remote(status: u16, body: &Bytes) -> Self {
        ControllerError::RemoteFailure {
            status,
            body: body.clone(),
        }
    }

    /// The named resource does not exist on the cluster
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::NotFound(_))
    }
}

/// Manages ReplicaSets through the cluster API
pub struct WorkloadController<C> {
    client: Arc<C>,
    paths: ApiPaths,
}

impl<C> Clone for WorkloadController<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            paths: self.paths.clone(),
        }
    }
}

impl<C: ClusterApi> WorkloadController<C> {
    pub fn new(client: Arc<C>, paths: ApiPaths) -> Self {
        Self { client, paths }
    }

    pub fn paths(&self) -> &ApiPaths {
        &self.paths
    }

    /// Create a ReplicaSet. Only `201 Created` counts as success.
    pub async fn create(&self, request: &DeploymentRequest) -> Result<ReplicaSet, ControllerError> {
        let replica_set = build_replica_set(request, self.paths.api_version())?;
        let body = serde_json::to_vec(&replica_set).map_err(ControllerError::Encode)?;
        let path = self.paths.collection();

        info!(
            "Creating ReplicaSet {} with {} replicas",
            request.name, request.replicas
        );

        match self
            .client
            .execute(Method::POST, &path, &[], Some(body))
            .await?
        {
            Outcome::Success {
                status: 201,
                payload,
            } => {
                // Any 201 is a success, even with an unreadable body
                if payload.is_empty() {
                    return Ok(replica_set);
                }
                match decode(&payload) {
                    Ok(created) => Ok(created),
                    Err(e) => {
                        warn!(
                            "ReplicaSet {} created but the response was unreadable: {}",
                            request.name, e
                        );
                        Ok(replica_set)
                    }
                }
            }
            Outcome::Success { status, payload } | Outcome::Failure {
                status,
                body: payload,
            } => {
                warn!("Creating ReplicaSet {} failed with {}", request.name, status);
                Err(ControllerError::remote(status, &payload))
            }
            Outcome::NotFound => Err(ControllerError::NotFound(path)),
        }
    }

    /// Fetch a ReplicaSet
    pub async fn get(&self, name: &str) -> Result<ReplicaSet, ControllerError> {
        let outcome = self
            .client
            .execute(Method::GET, &self.paths.item(name), &[], None)
            .await?;
        expect_document(outcome, || format!("replicaset '{}'", name))
    }

    /// Fetch the current scale subresource
    pub async fn get_scale(&self, name: &str) -> Result<Scale, ControllerError> {
        let outcome = self
            .client
            .execute(Method::GET, &self.paths.scale(name), &[], None)
            .await?;
        expect_document(outcome, || format!("scale of replicaset '{}'", name))
    }

    /// Set the desired replica count.
    ///
    /// Reads the scale subresource, changes `spec.replicas` and PUTs the
    /// whole document back. A failed read fails the whole operation.
    pub async fn scale(&self, name: &str, replicas: i64) -> Result<Scale, ControllerError> {
        if replicas < 0 {
            return Err(SpecError::InvalidRequest(format!(
                "replicas must not be negative, got {}",
                replicas
            ))
            .into());
        }

        let mut scale = self.get_scale(name).await?;
        debug!(
            "Scaling ReplicaSet {} from {} to {} replicas",
            name, scale.spec.replicas, replicas
        );

        scale.spec.replicas = replicas;
        let body = serde_json::to_vec(&scale).map_err(ControllerError::Encode)?;

        let outcome = self
            .client
            .execute(Method::PUT, &self.paths.scale(name), &[], Some(body))
            .await?;

        match outcome {
            Outcome::Success { payload, .. } => {
                info!("Scaled ReplicaSet {} to {} replicas", name, replicas);
                if payload.is_empty() {
                    return Ok(scale);
                }
                decode(&payload)
            }
            Outcome::NotFound => Err(ControllerError::NotFound(format!(
                "scale of replicaset '{}'",
                name
            ))),
            Outcome::Failure { status: 409, .. } => {
                warn!("Scale of ReplicaSet {} lost a concurrent update", name);
                Err(ControllerError::Conflict(format!("replicaset '{}'", name)))
            }
            Outcome::Failure { status, body } => Err(ControllerError::remote(status, &body)),
        }
    }

    /// Drain to zero replicas, then delete.
    ///
    /// If the drain fails no DELETE is sent. A ReplicaSet that disappears
    /// between the drain and the delete is reported as `NotFound`: this
    /// call did not confirm the deletion itself.
    pub async fn delete(&self, name: &str) -> Result<(), ControllerError> {
        if let Err(e) = self.scale(name, 0).await {
            warn!("Not deleting ReplicaSet {}: drain failed: {}", name, e);
            return Err(e);
        }

        match self
            .client
            .execute(Method::DELETE, &self.paths.item(name), &[], None)
            .await?
        {
            Outcome::Success { .. } => {
                info!("Deleted ReplicaSet {}", name);
                Ok(())
            }
            Outcome::NotFound => Err(ControllerError::NotFound(format!(
                "replicaset '{}'",
                name
            ))),
            Outcome::Failure { status, body } => Err(ControllerError::remote(status, &body)),
        }
    }
}

fn decode<T: DeserializeOwned>(payload: &Bytes) -> Result<T, ControllerError> {
    serde_json::from_slice(payload).map_err(ControllerError::Decode)
}

fn expect_document<T: DeserializeOwned>(
    outcome: Outcome<Bytes>,
    what: impl FnOnce() -> String,
) -> Result<T, ControllerError> {
    match outcome {
        Outcome::Success { payload, .. } => decode(&payload),
        Outcome::NotFound => Err(ControllerError::NotFound(what())),
        Outcome::Failure { status, body } => Err(ControllerError::remote(status, &body)),
    }
}
