use std::path::Path;
use std::process;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use kargo::cli::{
    self, format_context_list, format_created, format_current_context, format_deleted,
    format_replica_set, format_scaled, Cli, Commands, ContextAction, Session,
};
use kargo::context::{self, Config, Context, ContextOverrides};

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(context::default_config_path);
    let mut config = cli::load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let overrides = ContextOverrides {
        context: args.context.clone(),
        url: args.api_url.clone(),
        namespace: args.namespace.clone(),
        token: args.token.clone(),
    };
    let resolve = || -> anyhow::Result<Context> {
        let ctx = config.resolve(&overrides)?;
        debug!(
            "Using context '{}' ({}, namespace {})",
            ctx.name, ctx.url, ctx.namespace
        );
        Ok(ctx)
    };

    match args.command {
        Commands::Deploy(deploy) => {
            let request = cli::deployment_request(&deploy)?;
            if deploy.dry_run {
                println!("{}", cli::deploy_dry_run(&request, &resolve()?)?);
                return Ok(());
            }
            let session = Session::connect(resolve()?)?;
            let rs = session.deploy(&request).await?;
            print!("{}", format_created(&rs));
        }
        Commands::Get(get) => {
            let session = Session::connect(resolve()?)?;
            let (rs, scale) = session.get(&get.name).await?;
            if get.json {
                println!("{}", serde_json::to_string_pretty(&rs)?);
            } else {
                print!("{}", format_replica_set(&rs, &scale));
            }
        }
        Commands::Scale(scale) => {
            let session = Session::connect(resolve()?)?;
            let result = session.scale(&scale.name, scale.replicas).await?;
            print!("{}", format_scaled(&scale.name, &result));
        }
        Commands::Delete(delete) => {
            let session = Session::connect(resolve()?)?;
            session.delete(&delete.name).await?;
            print!("{}", format_deleted(&delete.name));
        }
        Commands::Logs(logs) => {
            let session = Session::connect(resolve()?)?;
            session
                .logs(&logs.pod, Duration::from_secs(logs.retry_interval))
                .await?;
        }
        Commands::Context(ctx_args) => {
            run_context(ctx_args.action, &mut config, &config_path)?;
        }
    }

    Ok(())
}

fn run_context(action: ContextAction, config: &mut Config, path: &Path) -> anyhow::Result<()> {
    match action {
        ContextAction::List => print!("{}", format_context_list(&cli::context_list(config))),
        ContextAction::Current => {
            let ctx = config.context(config.current_name())?;
            print!("{}", format_current_context(&ctx.name, &ctx.url));
        }
        ContextAction::Use { name } => {
            cli::context_use(config, &name)?;
            context::save_config_to(config, path)?;
            println!("Switched to context '{}'", name);
        }
        ContextAction::Add {
            name,
            url,
            namespace,
            api_version,
            token,
        } => {
            cli::context_add(
                config,
                &name,
                &url,
                namespace.as_deref(),
                api_version.as_deref(),
                token.as_deref(),
            )?;
            context::save_config_to(config, path)?;
            println!("Context '{}' saved", name);
        }
        ContextAction::Delete { name } => {
            if !cli::context_delete(config, &name) {
                anyhow::bail!("context '{}' not found", name);
            }
            context::save_config_to(config, path)?;
            println!("Context '{}' deleted", name);
        }
    }
    Ok(())
}
