//! Warden server binary.
//!
//! Runs the admin API and one reverse proxy listener per configured proxy
//! service.
//!
//! # Usage
//!
//! ```bash
//! # With config file
//! warden --config config.yaml
//!
//! # With environment variables only
//! WARDEN_SERVER__PORT=9090 warden
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderName;
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info};

use warden_api::errors::ErrorConfig;
use warden_api::http::{create_router, create_router_with_observability, AppState};
use warden_api::observability::{init_logging, init_metrics, parse_log_level, LoggingConfig};
use warden_api::proxy::{
    proxy_router, AuthzHook, Enforcer, HookRegistry, ProxyState, RuleMatcher, Transport,
};
use warden_domain::RelationAdapter;
use warden_server::{
    Bootstrap, PermissionResolver, RelationService, ResourceService, ServerConfig, UserService,
};
use warden_storage::{
    BlobStore, FsBlobStore, MemoryMetadataStore, MemoryRelationStore, SpiceDbClient, SpiceDbConfig,
};

/// Warden - relationship-based authorization proxy
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = if let Some(config_path) = args.config {
        ServerConfig::load(&config_path)?
    } else {
        ServerConfig::from_env()?
    };

    init_logging(LoggingConfig {
        json_format: config.logging.json,
        default_level: parse_log_level(&config.logging.level),
        include_spans: false,
    });

    let metrics_state = if config.metrics.enabled {
        Some(init_metrics()?)
    } else {
        None
    };

    let adapter = relation_adapter(&config)?;
    let repositories = MemoryMetadataStore::new().repositories();

    // Compile and publish before accepting traffic; a bad definitions file
    // stops startup here.
    let schema = Bootstrap::new(repositories.clone(), Arc::clone(&adapter))
        .run(&config.bootstrap)
        .await
        .context("bootstrap failed")?;
    info!(definitions = schema.len(), backend = %config.authz.backend, "schema published");

    let resolver = Arc::new(PermissionResolver::new(
        repositories.clone(),
        Arc::clone(&adapter),
    ));
    let users = Arc::new(UserService::new(repositories.users.clone()));
    let relations = Arc::new(RelationService::new(
        repositories.relations.clone(),
        Arc::clone(&adapter),
    ));
    let resources = Arc::new(ResourceService::new(
        repositories.resources.clone(),
        Arc::clone(&resolver),
        Arc::clone(&relations),
    ));

    let errors = if config.server.detailed_errors {
        ErrorConfig::development()
    } else {
        ErrorConfig::production()
    };
    let identity_header = HeaderName::from_bytes(config.app.identity_header.as_bytes())
        .context("invalid identity header")?;
    let user_id_header = HeaderName::from_bytes(config.app.user_id_header.as_bytes())
        .context("invalid user id header")?;

    let state = AppState {
        schema: Arc::new(schema),
        adapter: Arc::clone(&adapter),
        principals: users.clone(),
        authorizer: resolver.clone(),
        relations,
        resources: Arc::clone(&resources),
        identity_header: identity_header.clone(),
        errors,
    };
    let admin_router = match metrics_state {
        Some(metrics_state) => create_router_with_observability(
            state,
            metrics_state,
            &config.metrics.path,
            config.server.body_limit_bytes,
        ),
        None => create_router(state, config.server.body_limit_bytes),
    };
    let admin_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid admin listen address")?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut servers = JoinSet::new();

    let enforcer = Arc::new(Enforcer::new(
        users,
        resolver,
        identity_header,
        errors,
    ));
    let transport = Arc::new(Transport::new(
        Duration::from_secs(config.server.request_timeout_secs),
        user_id_header,
    )?);
    let hooks = Arc::new(HookRegistry::new().register(Arc::new(AuthzHook::new(resources))));

    for service in &config.proxy.services {
        let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&service.ruleset));
        let matcher = Arc::new(
            RuleMatcher::load(service.name.clone(), store)
                .await
                .with_context(|| format!("failed to load rules for proxy '{}'", service.name))?,
        );
        Arc::clone(&matcher)
            .spawn_refresher(config.app.rule_refresh_interval(), shutdown_tx.subscribe());

        let router = proxy_router(ProxyState {
            matcher,
            enforcer: Arc::clone(&enforcer),
            transport: Arc::clone(&transport),
            hooks: Arc::clone(&hooks),
            body_limit: config.server.body_limit_bytes,
        });
        let addr: SocketAddr = format!("{}:{}", service.host, service.port)
            .parse()
            .with_context(|| format!("invalid listen address for proxy '{}'", service.name))?;
        servers.spawn(run_http_server(
            format!("proxy:{}", service.name),
            router,
            addr,
            shutdown_tx.subscribe(),
        ));
    }
    servers.spawn(run_http_server(
        "admin".to_string(),
        admin_router,
        admin_addr,
        shutdown_tx.subscribe(),
    ));

    let result = tokio::select! {
        Some(joined) = servers.join_next() => {
            // A listener stopped on its own: stop the others too.
            let _ = shutdown_tx.send(());
            match joined {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("server task panicked: {e}")),
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping servers");
            let _ = shutdown_tx.send(());
            Ok(())
        }
    };

    while let Some(joined) = servers.join_next().await {
        if let Ok(Err(e)) = joined {
            error!("server error during shutdown: {}", e);
        }
    }
    info!("All servers shutdown complete");
    result
}

fn relation_adapter(config: &ServerConfig) -> anyhow::Result<Arc<dyn RelationAdapter>> {
    match config.authz.backend.as_str() {
        "spicedb" => {
            let endpoint = config
                .authz
                .endpoint
                .clone()
                .context("authz.endpoint is required for the spicedb backend")?;
            let client = SpiceDbClient::new(SpiceDbConfig {
                endpoint,
                preshared_key: config.authz.preshared_key.clone(),
                timeout: config.authz.timeout(),
                fully_consistent: config.authz.fully_consistent,
            })?;
            info!("using SpiceDB relation backend");
            let adapter: Arc<dyn RelationAdapter> = Arc::new(client);
            Ok(adapter)
        }
        _ => {
            info!("using in-memory relation backend");
            let adapter: Arc<dyn RelationAdapter> = MemoryRelationStore::new_shared();
            Ok(adapter)
        }
    }
}

/// Run an HTTP listener with graceful shutdown.
async fn run_http_server(
    name: String,
    router: axum::Router,
    addr: SocketAddr,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("{name}: failed to bind {addr}"))?;
    info!(%addr, listener = %name, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

    info!(listener = %name, "HTTP server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_args_parsing() {
        let args = Args::try_parse_from(["warden"]).unwrap();
        assert!(args.config.is_none());

        let args = Args::try_parse_from(["warden", "--config", "config.yaml"]).unwrap();
        assert_eq!(args.config, Some("config.yaml".to_string()));

        let args = Args::try_parse_from(["warden", "-c", "test.yaml"]).unwrap();
        assert_eq!(args.config, Some("test.yaml".to_string()));
    }

    #[test]
    fn test_memory_backend_is_default() {
        let config = ServerConfig::default();
        assert!(relation_adapter(&config).is_ok());
    }
}
