//! CLI module for kargo
//!
//! Provides kubectl-like subcommands:
//! - `kargo deploy` - Create a ReplicaSet running a downloaded binary
//! - `kargo get` - Show a ReplicaSet and its scale
//! - `kargo scale` - Set the replica count
//! - `kargo delete` - Drain and delete a ReplicaSet
//! - `kargo logs` - Follow a pod's logs
//! - `kargo context` - Manage contexts

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

#[derive(Parser, Debug)]
#[command(name = "kargo")]
#[command(about = "Deploy, scale and tail ReplicaSets")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file (default: ~/.kargo/config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to a .env file to load before resolving the context
    #[arg(long, value_name = "FILE", global = true)]
    pub env_file: Option<PathBuf>,

    /// Context to use instead of the current one
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// Override the API server URL
    #[arg(long, env = "KARGO_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Override the namespace
    #[arg(short, long, env = "KARGO_NAMESPACE", global = true)]
    pub namespace: Option<String>,

    /// Bearer token for the API server
    #[arg(long, env = "KARGO_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a ReplicaSet
    Deploy(DeployArgs),

    /// Show a ReplicaSet
    Get(GetArgs),

    /// Set the replica count of a ReplicaSet
    Scale(ScaleArgs),

    /// Scale a ReplicaSet to zero and delete it
    Delete(DeleteArgs),

    /// Follow the logs of a pod
    Logs(LogsArgs),

    /// Manage cluster contexts
    Context(ContextArgs),
}

/// Arguments for the deploy command
#[derive(Parser, Debug)]
pub struct DeployArgs {
    /// ReplicaSet name
    pub name: String,

    /// URL the binary is downloaded from
    #[arg(long)]
    pub binary_url: String,

    /// Number of replicas
    #[arg(short, long, default_value = "1")]
    pub replicas: i64,

    /// CPU limit (e.g. "500m")
    #[arg(long, default_value = "")]
    pub cpu_limit: String,

    /// Memory limit (e.g. "128Mi")
    #[arg(long, default_value = "")]
    pub memory_limit: String,

    /// CPU request
    #[arg(long, default_value = "")]
    pub cpu_request: String,

    /// Memory request
    #[arg(long, default_value = "")]
    pub memory_request: String,

    /// Environment variable (KEY=VALUE, repeatable)
    #[arg(short, long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Pod label (KEY=VALUE, repeatable)
    #[arg(short, long = "label", value_name = "KEY=VALUE")]
    pub labels: Vec<String>,

    /// Pod annotation (KEY=VALUE, repeatable)
    #[arg(short, long = "annotation", value_name = "KEY=VALUE")]
    pub annotations: Vec<String>,

    /// Print the ReplicaSet document instead of creating it
    #[arg(long)]
    pub dry_run: bool,

    /// Arguments passed to the binary
    #[arg(last = true)]
    pub args: Vec<String>,
}

/// Arguments for the get command
#[derive(Parser, Debug)]
pub struct GetArgs {
    /// ReplicaSet name
    pub name: String,

    /// Print the raw document as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments for the scale command
#[derive(Parser, Debug)]
pub struct ScaleArgs {
    /// ReplicaSet name
    pub name: String,

    /// Number of replicas
    pub replicas: i64,
}

/// Arguments for the delete command
#[derive(Parser, Debug)]
pub struct DeleteArgs {
    /// ReplicaSet name
    pub name: String,
}

/// Arguments for the logs command
#[derive(Parser, Debug)]
pub struct LogsArgs {
    /// Pod name
    pub pod: String,

    /// Seconds to wait before reconnecting
    #[arg(long, default_value = "10")]
    pub retry_interval: u64,
}

/// Arguments for the context command
#[derive(Parser, Debug)]
pub struct ContextArgs {
    #[command(subcommand)]
    pub action: ContextAction,
}

#[derive(Subcommand, Debug)]
pub enum ContextAction {
    /// List all contexts
    List,

    /// Show current context
    Current,

    /// Switch to a context
    Use {
        /// Context name
        name: String,
    },

    /// Add a new context
    Add {
        /// Context name
        name: String,

        /// API server URL
        url: String,

        /// Namespace for this context
        #[arg(long = "ns")]
        namespace: Option<String>,

        /// ReplicaSet API version (e.g. "apps/v1")
        #[arg(long)]
        api_version: Option<String>,

        /// Bearer token
        #[arg(long = "bearer")]
        token: Option<String>,
    },

    /// Delete a context
    Delete {
        /// Context name
        name: String,
    },
}
