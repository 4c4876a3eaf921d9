//! Cluster contexts (kubeconfig-style)
//!
//! A context names one API server endpoint together with the namespace and
//! ReplicaSet API version to use there. Contexts live in a YAML file
//! (`~/.kargo/config` by default); the built-in `local` context points at a
//! `kubectl proxy` on the default port and needs no entry in the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `kubectl proxy` default address
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8001";

pub const DEFAULT_NAMESPACE: &str = "default";

/// ReplicaSet API group/version
pub const DEFAULT_API_VERSION: &str = "extensions/v1beta1";

/// Name of the built-in context
pub const LOCAL_CONTEXT: &str = "local";

/// Default config file location: ~/.kargo/config
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kargo")
        .join("config")
}

/// Errors that can occur during context operations
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Context '{0}' not found")]
    ContextNotFound(String),

    #[error("Context '{0}' is built in and cannot be changed")]
    BuiltIn(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to write config: {0}")]
    WriteError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// One cluster endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Context {
    /// Display name for this context
    pub name: String,

    /// Base URL of the API server (e.g., "https://10.0.0.1:6443")
    pub url: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Bearer token sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

/// The complete configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Currently active context name
    #[serde(rename = "current-context")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,

    /// Map of context name to context definition
    #[serde(default)]
    pub contexts: HashMap<String, Context>,
}

/// Per-invocation overrides (CLI flags / environment), applied on top of
/// the selected context
#[derive(Debug, Clone, Default)]
pub struct ContextOverrides {
    pub context: Option<String>,
    pub url: Option<String>,
    pub namespace: Option<String>,
    pub token: Option<String>,
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Parse config from YAML string
pub fn parse_config(content: &str) -> Result<Config, ContextError> {
    serde_yaml::from_str(content).map_err(|e| ContextError::ParseError(e.to_string()))
}

/// Serialize config to YAML string
pub fn serialize_config(config: &Config) -> Result<String, ContextError> {
    serde_yaml::to_string(config).map_err(|e| ContextError::WriteError(e.to_string()))
}

/// Add or update a context in the config
pub fn add_context(config: &mut Config, context: Context) -> Result<(), ContextError> {
    if context.name == LOCAL_CONTEXT {
        return Err(ContextError::BuiltIn(context.name));
    }
    config.contexts.insert(context.name.clone(), context);
    Ok(())
}

/// Remove a context from the config
pub fn remove_context(config: &mut Config, name: &str) -> Option<Context> {
    let removed = config.contexts.remove(name);
    // Clear current context if it was the removed one
    if config.current_context.as_deref() == Some(name) {
        config.current_context = None;
    }
    removed
}

/// Set the current context
pub fn set_current_context(config: &mut Config, name: &str) -> Result<(), ContextError> {
    if !config.contexts.contains_key(name) && name != LOCAL_CONTEXT {
        return Err(ContextError::ContextNotFound(name.to_string()));
    }
    config.current_context = Some(name.to_string());
    Ok(())
}

impl Config {
    /// Name of the active context (`local` when none is set)
    pub fn current_name(&self) -> &str {
        self.current_context.as_deref().unwrap_or(LOCAL_CONTEXT)
    }

    /// Look up a context by name, including the built-in one
    pub fn context(&self, name: &str) -> Result<Context, ContextError> {
        if let Some(ctx) = self.contexts.get(name) {
            return Ok(ctx.clone());
        }
        if name == LOCAL_CONTEXT {
            return Ok(Context::local());
        }
        Err(ContextError::ContextNotFound(name.to_string()))
    }

    /// Active context with overrides applied
    pub fn resolve(&self, overrides: &ContextOverrides) -> Result<Context, ContextError> {
        let name = overrides
            .context
            .as_deref()
            .unwrap_or_else(|| self.current_name());
        let mut ctx = self.context(name)?;

        if let Some(ref url) = overrides.url {
            ctx.url = url.clone();
        }
        if let Some(ref namespace) = overrides.namespace {
            ctx.namespace = namespace.clone();
        }
        if let Some(ref token) = overrides.token {
            ctx.token = Some(token.clone());
        }
        Ok(ctx)
    }
}

impl Context {
    /// Create a new context with the default namespace and API version
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            namespace: default_namespace(),
            api_version: default_api_version(),
            token: None,
            description: None,
        }
    }

    /// The built-in context: a local `kubectl proxy`
    pub fn local() -> Self {
        Self::new(LOCAL_CONTEXT, DEFAULT_API_URL)
            .with_description("kubectl proxy on localhost")
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Load config from a specific path; a missing file is an empty config
pub fn load_config_from(path: &Path) -> Result<Config, ContextError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Save config to a specific path
pub fn save_config_to(config: &Config, path: &Path) -> Result<(), ContextError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serialize_config(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
