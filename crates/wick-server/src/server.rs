use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    handlers::{consume_secret, create_secret, health, prune_secrets},
    lifecycle::Lifecycle,
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    pub sweep_interval: Duration,
    pub cors_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("WICK_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("WICK_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            data_dir: std::env::var("WICK_DATA_DIR").ok().map(PathBuf::from),
            sweep_interval: Duration::from_secs(
                std::env::var("WICK_SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
            ),
            cors_origins: std::env::var("WICK_CORS_ORIGINS").ok(),
        }
    }
}

/// Resolve the data directory for `wick.db`, creating it if needed.
/// Falls back to the platform app data dir (`~/.local/share/wick/`, etc.)
/// when neither the config nor `WICK_DATA_DIR` names one.
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    let path = match data_dir {
        Some(d) => d.clone(),
        None => match std::env::var("WICK_DATA_DIR") {
            Ok(d) => PathBuf::from(d),
            Err(_) => directories::ProjectDirs::from("", "", "wick")
                .context("could not determine platform data directory")?
                .data_dir()
                .to_owned(),
        },
    };
    std::fs::create_dir_all(&path).context("create data dir")?;
    Ok(path)
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
    info!(data_dir = %data_dir.display(), "using data directory");

    let db_path = data_dir.join("wick.db");
    let store = crate::store::Store::open(&db_path).context("open store")?;

    let clock = crate::system_clock();

    // Eager eviction of dead records; lazy checks on every consume keep the
    // system correct even if the sweep never runs.
    store.clone().spawn_sweep(cfg.sweep_interval, clock.clone());

    let state = AppState {
        lifecycle: Lifecycle::new(store, clock),
    };

    let cors = build_cors(cfg.cors_origins.as_deref());

    let app = Router::new()
        .route("/health", get(health))
        .route("/secrets", post(create_secret))
        .route("/secrets/{handle}", get(consume_secret))
        .route("/prune", post(prune_secrets))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "wick server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app).await.context("server error")
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
