//! Deployment request → ReplicaSet document
//!
//! Every pod gets two init containers that run before the workload itself:
//! `install` downloads the binary into a shared scratch volume and
//! `configure` marks it executable. The main container then runs that
//! binary from the same volume. No I/O happens here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use thiserror::Error;

use super::resources::{
    Container, EnvVar, LabelSelector, ObjectMeta, PodSpec, PodTemplate, ReplicaSet,
    ReplicaSetSpec, ResourceList, ResourceRequirements, Volume, VolumeMount,
};

/// Image used for the init containers and the workload container
pub const BASE_IMAGE: &str = "gcr.io/hightowerlabs/alpine";

/// Mount point of the shared binary volume in every container
pub const INSTALL_DIR: &str = "/opt/bin";

/// Name of the shared binary volume
pub const BIN_VOLUME: &str = "bin";

/// Annotation carrying the init containers for orchestrators that predate
/// the first-class `initContainers` field
pub const INIT_CONTAINERS_ANNOTATION: &str = "pod.alpha.kubernetes.io/init-containers";

/// Label every pod carries so the ReplicaSet can select it
pub const RUN_LABEL: &str = "run";

pub const KIND: &str = "ReplicaSet";

/// Errors raised while building a workload document
#[derive(Error, Debug)]
pub enum SpecError {
    #[error("Invalid deployment request: {0}")]
    InvalidRequest(String),

    #[error("Failed to encode init containers: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What the caller wants running
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub name: String,
    pub replicas: i64,
    #[serde(default)]
    pub args: Vec<String>,
    pub binary_url: String,

    /// Empty strings mean "not set"
    #[serde(default)]
    pub cpu_limit: String,
    #[serde(default)]
    pub memory_limit: String,
    #[serde(default)]
    pub cpu_request: String,
    #[serde(default)]
    pub memory_request: String,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl DeploymentRequest {
    /// One replica of the binary at `binary_url`
    pub fn new(name: impl Into<String>, binary_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replicas: 1,
            binary_url: binary_url.into(),
            ..Default::default()
        }
    }

    pub fn with_replicas(mut self, replicas: i64) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_limits(mut self, cpu: impl Into<String>, memory: impl Into<String>) -> Self {
        self.cpu_limit = cpu.into();
        self.memory_limit = memory.into();
        self
    }

    pub fn with_requests(mut self, cpu: impl Into<String>, memory: impl Into<String>) -> Self {
        self.cpu_request = cpu.into();
        self.memory_request = memory.into();
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Path of the fetched binary inside every container
    pub fn binary_path(&self) -> String {
        format!("{}/{}", INSTALL_DIR, self.name)
    }

    /// Reject requests that can't be turned into a valid document
    pub fn validate(&self) -> Result<(), SpecError> {
        validate_name(&self.name)?;
        if self.binary_url.trim().is_empty() {
            return Err(SpecError::InvalidRequest(format!(
                "'{}' has no binary URL",
                self.name
            )));
        }
        if self.replicas < 0 {
            return Err(SpecError::InvalidRequest(format!(
                "replica count must not be negative, got {}",
                self.replicas
            )));
        }
        Ok(())
    }
}

/// Check that `name` is usable as a resource name and a path segment.
///
/// Names must be DNS-1123 labels: at most 63 lowercase alphanumerics or
/// '-', starting and ending with an alphanumeric.
pub fn validate_name(name: &str) -> Result<(), SpecError> {
    let invalid = |reason: &str| {
        Err(SpecError::InvalidRequest(format!(
            "name '{}' {}",
            name, reason
        )))
    };

    if name.is_empty() {
        return invalid("is empty");
    }
    if name.len() > 63 {
        return invalid("is longer than 63 characters");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return invalid("may only contain lowercase letters, digits and '-'");
    }
    if name.starts_with('-') || name.ends_with('-') {
        return invalid("must start and end with a letter or digit");
    }
    Ok(())
}

// ============================================================================
// Pure document construction
// ============================================================================

/// Build the ReplicaSet document for a deployment request.
///
/// The caller's maps are only read; labels and annotations are merged into
/// maps owned by the returned document.
pub fn build_replica_set(
    request: &DeploymentRequest,
    api_version: &str,
) -> Result<ReplicaSet, SpecError> {
    request.validate()?;

    let mount = bin_mount();
    let binary_path = request.binary_path();

    // The annotation holds the serialized init containers, so they have to
    // be final before the annotation map is.
    let init_containers = init_containers(request, &mount);
    let encoded = encode_annotation(&init_containers)?;

    let mut annotations = request.annotations.clone();
    annotations.insert(INIT_CONTAINERS_ANNOTATION.to_string(), encoded);

    let mut labels = request.labels.clone();
    labels.insert(RUN_LABEL.to_string(), request.name.clone());

    let container = Container {
        name: request.name.clone(),
        image: BASE_IMAGE.to_string(),
        command: vec![binary_path],
        args: request.args.clone(),
        env: env_vars(&request.env),
        resources: resources(request),
        volume_mounts: vec![mount],
    };

    Ok(ReplicaSet {
        api_version: api_version.to_string(),
        kind: KIND.to_string(),
        metadata: ObjectMeta {
            name: request.name.clone(),
            ..Default::default()
        },
        spec: ReplicaSetSpec {
            replicas: request.replicas,
            selector: Some(LabelSelector {
                match_labels: BTreeMap::from([(RUN_LABEL.to_string(), request.name.clone())]),
            }),
            template: PodTemplate {
                metadata: ObjectMeta {
                    labels,
                    annotations,
                    ..Default::default()
                },
                spec: PodSpec {
                    init_containers,
                    containers: vec![container],
                    volumes: vec![Volume::empty_dir(BIN_VOLUME)],
                },
            },
        },
        status: None,
    })
}

fn bin_mount() -> VolumeMount {
    VolumeMount {
        name: BIN_VOLUME.to_string(),
        mount_path: INSTALL_DIR.to_string(),
    }
}

/// `install` then `configure`; the workload command depends on both
/// Pretty JSON with a one-space indent, the layout older servers were fed
fn encode_annotation(containers: &[Container]) -> Result<String, SpecError> {
    let mut buf = Vec::new();
    let mut ser =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b" "));
    containers.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn init_containers(request: &DeploymentRequest, mount: &VolumeMount) -> Vec<Container> {
    let binary_path = request.binary_path();

    vec![
        Container {
            name: "install".to_string(),
            image: BASE_IMAGE.to_string(),
            command: vec![
                "wget".to_string(),
                "-O".to_string(),
                binary_path.clone(),
                request.binary_url.clone(),
            ],
            volume_mounts: vec![mount.clone()],
            ..Default::default()
        },
        Container {
            name: "configure".to_string(),
            image: BASE_IMAGE.to_string(),
            command: vec!["chmod".to_string(), "+x".to_string(), binary_path],
            volume_mounts: vec![mount.clone()],
            ..Default::default()
        },
    ]
}

fn env_vars(env: &BTreeMap<String, String>) -> Vec<EnvVar> {
    env.iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: value.clone(),
        })
        .collect()
}

fn resources(request: &DeploymentRequest) -> Option<ResourceRequirements> {
    let requirements = ResourceRequirements {
        limits: resource_list(&request.cpu_limit, &request.memory_limit),
        requests: resource_list(&request.cpu_request, &request.memory_request),
    };
    (!requirements.is_empty()).then_some(requirements)
}

fn resource_list(cpu: &str, memory: &str) -> Option<ResourceList> {
    let mut list = ResourceList::new();
    if !cpu.is_empty() {
        list.insert("cpu".to_string(), cpu.to_string());
    }
    if !memory.is_empty() {
        list.insert("memory".to_string(), memory.to_string());
    }
    (!list.is_empty()).then_some(list)
}
