//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, printing is handled by the caller

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWrite;
use tracing::debug;

use super::DeployArgs;
use crate::cluster::{
    build_replica_set, ApiPaths, ClusterApi, ClusterClient, ControllerError, DeploymentRequest,
    LogStreamConfig, LogStreamer, ReplicaSet, Scale, SpecError, TransportError,
    WorkloadController,
};
use crate::context::{self, Config, Context, ContextError};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Argument parsing (pure)
// ============================================================================

/// Parse repeated `KEY=VALUE` arguments into a map (later keys win)
pub fn parse_key_values(pairs: &[String]) -> CommandResult<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(CommandError::InvalidArgument(format!(
                "expected KEY=VALUE, got '{}'",
                pair
            ))),
        })
        .collect()
}

/// Turn deploy arguments into a deployment request
pub fn deployment_request(args: &DeployArgs) -> CommandResult<DeploymentRequest> {
    Ok(DeploymentRequest {
        name: args.name.clone(),
        replicas: args.replicas,
        args: args.args.clone(),
        binary_url: args.binary_url.clone(),
        cpu_limit: args.cpu_limit.clone(),
        memory_limit: args.memory_limit.clone(),
        cpu_request: args.cpu_request.clone(),
        memory_request: args.memory_request.clone(),
        env: parse_key_values(&args.env)?,
        labels: parse_key_values(&args.labels)?,
        annotations: parse_key_values(&args.annotations)?,
    })
}

// ============================================================================
// Context Commands (pure business logic)
// ============================================================================

/// Info about a context for display
#[derive(Debug, Clone)]
pub struct ContextInfo {
    pub name: String,
    pub url: String,
    pub namespace: String,
    pub is_current: bool,
}

/// List all contexts, including the built-in one
pub fn context_list(config: &Config) -> Vec<ContextInfo> {
    let current = config.current_name();
    let mut contexts: Vec<_> = config
        .contexts
        .values()
        .cloned()
        .chain(
            (!config.contexts.contains_key(context::LOCAL_CONTEXT)).then(Context::local),
        )
        .map(|ctx| ContextInfo {
            is_current: ctx.name == current,
            name: ctx.name,
            url: ctx.url,
            namespace: ctx.namespace,
        })
        .collect();

    contexts.sort_by(|a, b| a.name.cmp(&b.name));
    contexts
}

/// Switch to a context
pub fn context_use(config: &mut Config, name: &str) -> CommandResult<()> {
    context::set_current_context(config, name)?;
    Ok(())
}

/// Add a new context
pub fn context_add(
    config: &mut Config,
    name: &str,
    url: &str,
    namespace: Option<&str>,
    api_version: Option<&str>,
    token: Option<&str>,
) -> CommandResult<()> {
    let mut ctx = Context::new(name, url);
    if let Some(ns) = namespace {
        ctx = ctx.with_namespace(ns);
    }
    if let Some(version) = api_version {
        ctx = ctx.with_api_version(version);
    }
    if let Some(token) = token {
        ctx = ctx.with_token(token);
    }
    context::add_context(config, ctx)?;
    Ok(())
}

/// Delete a context
pub fn context_delete(config: &mut Config, name: &str) -> bool {
    context::remove_context(config, name).is_some()
}

// ============================================================================
// Cluster Commands
// ============================================================================

/// Everything a cluster command needs, built from one resolved context
pub struct Session<C> {
    pub context: Context,
    pub client: Arc<C>,
    pub controller: WorkloadController<C>,
}

impl Session<ClusterClient> {
    pub fn connect(context: Context) -> CommandResult<Self> {
        let client = Arc::new(ClusterClient::from_context(&context)?);
        Ok(Self::with_client(context, client))
    }
}

impl<C: ClusterApi + 'static> Session<C> {
    pub fn with_client(context: Context, client: Arc<C>) -> Self {
        let paths = ApiPaths::from_context(&context);
        let controller = WorkloadController::new(Arc::clone(&client), paths);
        Self {
            context,
            client,
            controller,
        }
    }

    pub async fn deploy(&self, request: &DeploymentRequest) -> CommandResult<ReplicaSet> {
        Ok(self.controller.create(request).await?)
    }

    /// The ReplicaSet and its current scale
    pub async fn get(&self, name: &str) -> CommandResult<(ReplicaSet, Scale)> {
        let rs = self.controller.get(name).await?;
        let scale = self.controller.get_scale(name).await?;
        Ok((rs, scale))
    }

    pub async fn scale(&self, name: &str, replicas: i64) -> CommandResult<Scale> {
        Ok(self.controller.scale(name, replicas).await?)
    }

    pub async fn delete(&self, name: &str) -> CommandResult<()> {
        Ok(self.controller.delete(name).await?)
    }

    /// Follow `pod` into stdout until ctrl-c or stdout closes
    pub async fn logs(&self, pod: &str, retry_interval: Duration) -> CommandResult<()> {
        self.follow_until(pod, retry_interval, tokio::io::stdout(), tokio::signal::ctrl_c())
            .await?;
        Ok(())
    }

    /// Follow `pod` into `sink` until `stop` resolves or the sink fails,
    /// handing the sink back
    pub async fn follow_until<W, F>(
        &self,
        pod: &str,
        retry_interval: Duration,
        sink: W,
        stop: F,
    ) -> CommandResult<W>
    where
        W: AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = std::io::Result<()>>,
    {
        let streamer = LogStreamer::new(
            Arc::clone(&self.client),
            LogStreamConfig::default().with_retry_interval(retry_interval),
        );
        let stream = streamer.follow(pod, &self.context.namespace, sink);

        tokio::select! {
            stopped = stop => stopped?,
            _ = stream.stopped() => debug!("Log output for {} closed", pod),
        }

        stream
            .shutdown()
            .await
            .map_err(|e| CommandError::Io(std::io::Error::other(e)))
    }
}

/// Render the document `deploy --dry-run` would submit
pub fn deploy_dry_run(request: &DeploymentRequest, context: &Context) -> CommandResult<String> {
    let rs = build_replica_set(request, &context.api_version)?;
    Ok(serde_json::to_string_pretty(&rs)?)
}

/// Load the config file, falling back to an empty config when absent
pub fn load_config(path: &Path) -> CommandResult<Config> {
    Ok(context::load_config_from(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::{LogAttempt, MockCluster, Route};
    use reqwest::Method;

    fn deploy_args() -> DeployArgs {
        DeployArgs {
            name: "worker".to_string(),
            binary_url: "https://x/worker".to_string(),
            replicas: 2,
            cpu_limit: "500m".to_string(),
            memory_limit: String::new(),
            cpu_request: String::new(),
            memory_request: String::new(),
            env: vec!["A=1".to_string(), "B=x=y".to_string()],
            labels: vec!["tier=batch".to_string()],
            annotations: vec![],
            dry_run: false,
            args: vec!["--verbose".to_string()],
        }
    }

    #[test]
    fn test_parse_key_values() {
        let map = parse_key_values(&["A=1".into(), "B=x=y".into(), "A=2".into()]).unwrap();
        assert_eq!(map["A"], "2");
        assert_eq!(map["B"], "x=y");

        assert!(parse_key_values(&["novalue".into()]).is_err());
        assert!(parse_key_values(&["=value".into()]).is_err());
    }

    #[test]
    fn test_deployment_request_from_args() {
        let request = deployment_request(&deploy_args()).unwrap();
        assert_eq!(request.name, "worker");
        assert_eq!(request.replicas, 2);
        assert_eq!(request.cpu_limit, "500m");
        assert_eq!(request.env.len(), 2);
        assert_eq!(request.labels["tier"], "batch");
        assert_eq!(request.args, vec!["--verbose"]);
    }

    #[test]
    fn test_dry_run_renders_document() {
        let request = deployment_request(&deploy_args()).unwrap();
        let rendered = deploy_dry_run(&request, &Context::local()).unwrap();
        assert!(rendered.contains("\"kind\": \"ReplicaSet\""));
        assert!(rendered.contains("pod.alpha.kubernetes.io/init-containers"));
    }

    #[test]
    fn test_context_list_includes_local() {
        let config = Config::default();
        let contexts = context_list(&config);
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].name, "local");
        assert!(contexts[0].is_current);
    }

    #[test]
    fn test_context_add_use_delete() {
        let mut config = Config::default();
        context_add(
            &mut config,
            "prod",
            "https://10.0.0.1:6443",
            Some("workers"),
            None,
            None,
        )
        .unwrap();
        context_use(&mut config, "prod").unwrap();

        let contexts = context_list(&config);
        let prod = contexts.iter().find(|c| c.name == "prod").unwrap();
        assert!(prod.is_current);
        assert_eq!(prod.namespace, "workers");

        assert!(context_delete(&mut config, "prod"));
        assert!(!context_delete(&mut config, "prod"));
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let cluster = Arc::new(MockCluster::new());
        let session = Session::with_client(Context::local(), Arc::clone(&cluster));

        let request = deployment_request(&deploy_args()).unwrap();
        session.deploy(&request).await.unwrap();

        let (rs, scale) = session.get("worker").await.unwrap();
        assert_eq!(rs.spec.replicas, 2);
        assert_eq!(scale.spec.replicas, 2);

        session.scale("worker", 4).await.unwrap();
        session.delete("worker").await.unwrap();

        assert!(cluster.replica_set("worker").is_none());
        assert_eq!(cluster.count(Method::DELETE, Route::Item), 1);
    }

    #[tokio::test]
    async fn test_follow_ends_when_output_closes() {
        let cluster = Arc::new(MockCluster::new());
        cluster.push_log_attempts([LogAttempt::Open(vec!["line\n"])]);
        let session = Session::with_client(Context::local(), Arc::clone(&cluster));

        // Reader dropped up front: every write fails with a broken pipe
        let (writer, reader) = tokio::io::duplex(64);
        drop(reader);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            session.follow_until(
                "worker-1",
                Duration::from_millis(50),
                writer,
                std::future::pending(),
            ),
        )
        .await;
        assert!(result.expect("follow kept waiting after output closed").is_ok());
    }

    #[tokio::test]
    async fn test_follow_until_stop_signal() {
        let cluster = Arc::new(MockCluster::new());
        cluster.push_log_attempts([LogAttempt::Open(vec!["a\n", "b\n"])]);
        let session = Session::with_client(Context::local(), Arc::clone(&cluster));

        let stop = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        };
        let sink = session
            .follow_until("worker-1", Duration::from_millis(50), Vec::new(), stop)
            .await
            .unwrap();
        assert_eq!(sink, b"a\nb\n");
    }
}
