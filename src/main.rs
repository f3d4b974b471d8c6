use anyhow::Context;
use lxcapi::cli::{Args, ConfigDiscovery, ExecutionMode, ServeOptions};
use lxcapi::{ContainerRegistry, LifecycleOrchestrator, api};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    match mode {
        ExecutionMode::Serve(options) => run_server(options).await,
        ExecutionMode::ShowConfig { config } => {
            ConfigDiscovery::show_discovery_info(config.as_deref())
        }
        ExecutionMode::InitConfig { path, force } => {
            let path = ConfigDiscovery::init_config(path.as_deref(), force)?;
            println!("Wrote default configuration to {:?}", path);
            Ok(())
        }
    }
}

/// `RUST_LOG` wins over the configured filter; `--verbose` raises the
/// configured filter to debug.
fn init_tracing(log_filter: &str, verbose: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if verbose => EnvFilter::try_new("lxcapi=debug,tower_http=debug")?,
        Err(_) => EnvFilter::try_new(log_filter)
            .with_context(|| format!("Invalid log_filter '{}'", log_filter))?,
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

async fn run_server(options: ServeOptions) -> anyhow::Result<()> {
    let (mut config, source) = ConfigDiscovery::load(options.config_override.as_deref())?;
    options.apply(&mut config);
    init_tracing(&config.log_filter, options.verbose)?;

    match source {
        Some(path) => info!("Loaded configuration from {:?}", path),
        None => info!("No configuration file found, using defaults"),
    }

    config.validate()?;
    let addr = config.listen_addr()?;

    let runtime = config.build_runtime().await?;
    runtime
        .health_check()
        .await
        .with_context(|| format!("The {} runtime is not usable", runtime.runtime_type()))?;
    info!(
        runtime = runtime.runtime_type(),
        lxcpath = %config.lxcpath.display(),
        "Runtime ready"
    );

    let registry = Arc::new(ContainerRegistry::new(config.lock.to_lock_policy()));
    let orchestrator = LifecycleOrchestrator::new(runtime, registry);

    if config.reconcile_on_startup {
        let report = orchestrator
            .reconcile()
            .await
            .context("Startup reconciliation failed")?;
        info!(
            discovered = report.added.len(),
            evicted = report.vanished.len(),
            skipped = report.skipped.len(),
            "Startup reconciliation complete"
        );
    }

    api::serve(addr, orchestrator).await
}
