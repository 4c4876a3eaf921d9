//! # Workload management
//!
//! Lifecycle of one ReplicaSet on a Kubernetes-style API server, plus log
//! following for its pods.
//!
//! ## Architecture
//!
//! ```text
//!  caller ──► WorkloadController ──► build_replica_set (pure)
//!    │               │
//!    │               ▼
//!    │          ClusterApi ──► ClusterClient (reqwest) ──► API server
//!    │               ▲
//!    └─────► LogStreamer (background task, cancellable)
//! ```
//!
//! The controller and the streamer share nothing but the client.

pub mod builder;
pub mod client;
pub mod controller;
pub mod logs;
pub mod resources;

#[cfg(test)]
pub mod mock;

pub use builder::{build_replica_set, validate_name, DeploymentRequest, SpecError};
pub use client::{
    ApiPaths, ByteStream, ClusterApi, ClusterClient, Outcome, TransportError,
};
pub use controller::{ControllerError, WorkloadController};
pub use logs::{LogStream, LogStreamConfig, LogStreamStats, LogStreamer, LOG_RETRY_INTERVAL};
pub use resources::{
    Container, EnvVar, ObjectMeta, PodSpec, PodTemplate, ReplicaSet, ReplicaSetSpec,
    ReplicaSetStatus, ResourceRequirements, Scale, ScaleSpec, Volume, VolumeMount,
};
