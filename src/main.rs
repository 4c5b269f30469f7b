mod audit;
mod auth;
mod catalog;
mod config;
mod crypto;
mod db;
mod dispatcher;
mod error;
mod policy;
mod pool;
mod query;
mod rest;
mod session;
mod tools;

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::audit::AuditLogger;
use crate::auth::Authenticator;
use crate::catalog::CatalogStore;
use crate::config::{Config, Transport};
use crate::crypto::FieldEncryptor;
use crate::pool::PoolManager;
use crate::session::{ProcessContext, SessionManager};
use crate::tools::ToolRegistry;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load config: {e}");
            std::process::exit(2);
        }
    };

    info!(transport = ?config.transport, http_port = config.http_port, "gateway starting");

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!("failed to create data dir {}: {e}", config.data_dir.display());
        std::process::exit(2);
    }

    let conn = match db::open(&config.catalog_path()) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to open catalog store: {e}");
            std::process::exit(2);
        }
    };
    let conn = Arc::new(tokio::sync::Mutex::new(conn));

    let encryptor = match FieldEncryptor::ensure_key(&config.data_dir) {
        Ok(e) => e,
        Err(e) => {
            error!("failed to initialize field encryption: {e}");
            std::process::exit(2);
        }
    };

    let catalog = Arc::new(CatalogStore::new(conn, encryptor));

    if args.iter().any(|a| a == "--check") {
        run_checks(&catalog).await;
        return;
    }

    if let Err(e) = bootstrap(&catalog).await {
        error!("bootstrap failed: {e}");
        std::process::exit(2);
    }

    let pools = Arc::new(PoolManager::new(catalog.clone()));
    let sessions = SessionManager::new(catalog.clone());
    let authenticator = Authenticator::new(catalog.clone(), config.jwt_secret.clone());
    let audit = Arc::new(AuditLogger::new(catalog.clone()));
    let registry = Arc::new(ToolRegistry::with_gateway_tools());

    let dispatcher_state = dispatcher::DispatcherState {
        registry,
        catalog: catalog.clone(),
        pools: pools.clone(),
        audit: audit.clone(),
    };

    let exit_code = match config.transport {
        Transport::Stdio => match dispatcher::stdio::run(dispatcher_state, config.auth_token.clone()).await {
            Ok(()) => 0,
            Err(e) => {
                error!("stdio transport failed: {e}");
                1
            }
        },
        Transport::Http => {
            let process_context = match ProcessContext::new(catalog.clone()).await {
                Ok(ctx) => Arc::new(ctx),
                Err(e) => {
                    error!("failed to initialize process context: {e}");
                    std::process::exit(2);
                }
            };

            let app_state = rest::AppState {
                catalog: catalog.clone(),
                pools: pools.clone(),
                sessions: sessions.clone(),
                process_context,
                audit: audit.clone(),
                authenticator,
            };

            let mut app = rest::build(app_state).merge(dispatcher::http::router(dispatcher_state, sessions.clone()));
            if config.rate_limit_enabled {
                app = app.layer(rate_limit_layer(&config));
            }

            let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.http_port));
            let code = if config.enable_https {
                serve_https(&config, addr, app).await
            } else {
                serve_http(addr, app).await
            };

            sessions.shutdown();
            pools.close_all().await;
            code
        }
    };

    info!("gateway stopped");
    std::process::exit(exit_code);
}

/// Per-peer-IP token bucket sized from `RATE_LIMIT_WINDOW_MS` /
/// `RATE_LIMIT_MAX_REQUESTS`: the bucket refills one request every
/// `window_ms / max_requests` and allows bursts up to `max_requests`.
fn rate_limit_layer(config: &Config) -> tower_governor::GovernorLayer<'static, tower_governor::key_extractor::PeerIpKeyExtractor, tower_governor::governor::middleware::NoOpMiddleware> {
    let replenish_ms = (config.rate_limit_window_ms / config.rate_limit_max_requests.max(1) as u64).max(1);
    let governor_conf = tower_governor::governor::GovernorConfigBuilder::default()
        .per_millisecond(replenish_ms)
        .burst_size(config.rate_limit_max_requests.max(1))
        .finish()
        .expect("static rate limit config is always valid");
    tower_governor::GovernorLayer { config: Box::leak(Box::new(governor_conf)) }
}

async fn serve_http(addr: std::net::SocketAddr, app: axum::Router) -> i32 {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            return 2;
        }
    };
    info!(%addr, "http transport listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!("http server error: {e}");
                return 1;
            }
            0
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, stopping...");
            0
        }
    }
}

async fn serve_https(config: &Config, addr: std::net::SocketAddr, app: axum::Router) -> i32 {
    let (cert, key) = match (&config.ssl_cert_path, &config.ssl_key_path) {
        (Some(c), Some(k)) => (c, k),
        _ => {
            error!("ENABLE_HTTPS=true but SSL_CERT_PATH/SSL_KEY_PATH missing");
            return 2;
        }
    };
    let tls_config = match axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key).await {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load TLS cert/key: {e}");
            return 2;
        }
    };
    info!(%addr, "https transport listening");

    tokio::select! {
        result = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()) => {
            if let Err(e) = result {
                error!("https server error: {e}");
                return 1;
            }
            0
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, stopping...");
            0
        }
    }
}

/// Inserts the default admin user and a starter API key on a brand-new
/// catalog, inside one transaction so two processes racing on an empty
/// catalog can't both seed it. The key's plaintext secret is only ever
/// visible in this startup log line.
async fn bootstrap(catalog: &CatalogStore) -> crate::error::Result<()> {
    let outcome = catalog.bootstrap().await?;

    if outcome.admin_created {
        warn!("created default admin user (username: admin, password: admin) — change it immediately");
    }
    if let Some(secret) = outcome.seeded_key_secret {
        eprintln!("generated default API key (shown once): {secret}");
    }

    Ok(())
}

async fn run_checks(catalog: &CatalogStore) {
    info!("running pre-flight checks...");
    match catalog.list_users().await {
        Ok(users) => info!(count = users.len(), "catalog reachable, users table OK"),
        Err(e) => error!("catalog check failed: {e}"),
    }
    match catalog.list_connections().await {
        Ok(conns) => info!(count = conns.len(), "connections table OK"),
        Err(e) => error!("connections check failed: {e}"),
    }
}

fn print_usage() {
    println!(
        "mysql-gateway — multi-tenant MySQL access gateway

USAGE:
    gateway [OPTIONS]

OPTIONS:
    --check             Validate catalog connectivity and migrations, then exit
    -h, --help          Print this help message

ENVIRONMENT:
    TRANSPORT                 \"stdio\" or \"http\" (default: http)
    HTTP_PORT                 Port for the http transport (default: 9274)
    AUTH_TOKEN                Required when TRANSPORT=stdio
    JWT_SECRET                At least 32 characters; generated ephemerally if unset
    JWT_EXPIRES_IN            Duration string like 7d, 24h, 30m (default: 7d)
    ENABLE_HTTPS              \"true\" to serve TLS (requires SSL_CERT_PATH/SSL_KEY_PATH)
    SSL_CERT_PATH             PEM certificate path
    SSL_KEY_PATH              PEM private key path
    RATE_LIMIT_ENABLED        \"true\"/\"false\" (default: true)
    RATE_LIMIT_WINDOW_MS      Rate limit window in milliseconds (default: 900000)
    RATE_LIMIT_MAX_REQUESTS   Requests allowed per window (default: 100)
    GATEWAY_DATA_DIR          Directory for catalog.db and master.key (default: data)
    RUST_LOG                  Tracing filter (default: info)
"
    );
}
