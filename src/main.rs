use gatewarden::config::Config;
use gatewarden::pool::{ConnectionPool, PoolConfig};
use gatewarden::probe::{ProbeConfig, ReadinessPolicy, ReadinessProbe};
use gatewarden::proxy::{ProxyContext, ProxyServer};
use gatewarden::setup::SetupSurface;
use gatewarden::state::ConfigStore;
use gatewarden::supervisor::{GatewaySupervisor, LaunchSpec};
use gatewarden::token::{BearerCredential, TokenStore};
use gatewarden::{PKG_NAME, VERSION};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gatewarden=debug".parse().expect("valid log directive")),
        )
        .init();

    // Config file is optional; environment variables override it
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    let config = Config::resolve(config_path.as_deref()).map_err(|e| {
        error!(path = ?config_path, error = %e, "Failed to load configuration");
        e
    })?;

    match &config_path {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("No configuration file given, using defaults and environment"),
    }

    print_startup_banner(&config);

    let config_store = ConfigStore::new(config.state.config_path());

    let token_store = TokenStore::new(config.state.token_path(), config.gateway.token.clone());
    let resolved = token_store.get_or_create();
    info!(source = ?resolved.source, path = %token_store.path().display(), "Gateway token resolved");
    if resolved.is_degraded() {
        warn!("Gateway token could not be persisted; clients holding a previous token will be rejected after restart");
    }
    let credential = BearerCredential::new(&resolved.token)?;

    let pool_config = PoolConfig {
        max_idle_per_host: config.server.pool_max_idle_per_host,
        idle_timeout: Duration::from_secs(config.server.pool_idle_timeout_secs),
    };
    let pool = Arc::new(ConnectionPool::new(pool_config));

    let target = config.gateway.target();
    let probe = Arc::new(ReadinessProbe::new(
        Arc::clone(&pool),
        target,
        ProbeConfig {
            interval: config.gateway.probe_interval(),
            request_timeout: config.gateway.probe_request_timeout(),
        },
    ));

    let supervisor = Arc::new(GatewaySupervisor::new(LaunchSpec::from_config(
        &config,
        &resolved.token,
    )));

    let setup = SetupSurface::new(config.server.setup_path.clone(), config.server.setup_target()?);

    let ctx = Arc::new(ProxyContext {
        config_store,
        supervisor: Arc::clone(&supervisor),
        probe,
        readiness: ReadinessPolicy::from_config(&config),
        pool,
        credential,
        target,
        setup,
        request_timeout: config.server.request_timeout(),
    });

    if ctx.config_store.is_configured().await {
        info!("Gateway is configured, launching at boot");
        ctx.ensure_started();
    } else {
        info!(
            marker = %ctx.config_store.path().display(),
            setup = %ctx.setup.prefix(),
            "Gateway is not configured, serving setup until onboarding completes"
        );
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let proxy = ProxyServer::new(config.server.bind_addr()?, Arc::clone(&ctx), shutdown_rx);
    let proxy_handle = tokio::spawn(async move {
        if let Err(e) = proxy.run().await {
            error!(error = %e, "Proxy server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    info!("Stopping gateway...");
    supervisor.shutdown().await;

    // Wait for the listener to stop (with timeout)
    let _ = tokio::time::timeout(Duration::from_secs(5), proxy_handle).await;

    info!("Shutdown complete");
    Ok(())
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting gateway supervisor");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        setup_path = %config.server.setup_path,
        setup_upstream = ?config.server.setup_upstream,
        request_timeout_secs = config.server.request_timeout_secs,
        "Server configuration"
    );
    info!(
        state_dir = %config.state.state_dir().display(),
        workspace_dir = %config.state.workspace_dir().display(),
        "State layout"
    );
    info!(
        command = %config.gateway.command,
        args = ?config.gateway.args,
        gateway = %config.gateway.target(),
        "Gateway process"
    );
    info!(
        health_paths = ?config.gateway.health_paths,
        startup_timeout_ms = config.gateway.startup_timeout_ms,
        probe_interval_ms = config.gateway.probe_interval_ms,
        shutdown_grace_period_secs = config.gateway.shutdown_grace_period_secs,
        "Readiness settings"
    );
}
