use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "wick", about = "wick — secrets that burn after reading", version)]
struct Cli {
    /// Wick server URL (default: http://localhost:8080 or $WICK_SERVER)
    #[arg(long, env = "WICK_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the wick HTTP server
    Serve {
        /// Port to listen on (default: $WICK_PORT or 8080)
        #[arg(long, env = "WICK_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $WICK_HOST or 0.0.0.0)
        #[arg(long, env = "WICK_HOST", default_value = "0.0.0.0")]
        host: String,
    },
    /// Store a secret and print its one-time handle
    Create {
        /// The secret payload
        payload: String,
        /// Time window before the secret expires, e.g. 1h, 30m, 90s
        #[arg(long, default_value = "1h")]
        ttl: String,
        /// Number of reads before the secret self-destructs
        #[arg(long, default_value = "1")]
        views: u32,
    },
    /// Read a secret by handle, spending one view
    Get {
        /// Secret handle as printed by `create`
        handle: String,
    },
    /// Delete all expired or spent secrets immediately
    Prune,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("WICK_LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(host, port).await,
        Commands::Create {
            payload,
            ttl,
            views,
        } => cmd_create(&cli.server, &payload, &ttl, views).await,
        Commands::Get { handle } => cmd_get(&cli.server, &handle).await,
        Commands::Prune => cmd_prune(&cli.server).await,
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16) -> Result<()> {
    let cfg = wick_server::ServerConfig {
        host,
        port,
        ..Default::default()
    };
    wick_server::run(cfg).await
}

async fn cmd_create(server: &str, payload: &str, ttl: &str, views: u32) -> Result<()> {
    let ttl_minutes = parse_ttl_minutes(ttl)?;

    let client = Client::new();
    let body = serde_json::json!({
        "payload": payload,
        "ttl_minutes": ttl_minutes,
        "view_budget": views,
    });

    let resp = client
        .post(format!("{}/secrets", server.trim_end_matches('/')))
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;

    if !status.is_success() {
        anyhow::bail!(
            "server returned {status}: {}",
            json["error"].as_str().unwrap_or("")
        );
    }

    let handle = json["handle"].as_str().unwrap_or("");
    println!("{handle}");
    println!(
        "share: {}/secrets/{handle}",
        server.trim_end_matches('/')
    );
    Ok(())
}

async fn cmd_get(server: &str, handle: &str) -> Result<()> {
    let client = Client::new();
    let resp = client
        .get(format!(
            "{}/secrets/{}",
            server.trim_end_matches('/'),
            handle
        ))
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;

    if status.is_success() {
        let payload = json["payload"].as_str().unwrap_or("");
        println!("{payload}");
        let left = json["remaining_views"].as_u64().unwrap_or(0);
        if left == 0 {
            eprintln!("(this was the final view — the secret is gone)");
        } else {
            eprintln!("({left} view(s) left)");
        }
    } else {
        let error = json["error"].as_str().unwrap_or("unknown error");
        anyhow::bail!("{error}");
    }
    Ok(())
}

async fn cmd_prune(server: &str) -> Result<()> {
    let client = Client::new();
    let resp = client
        .post(format!("{}/prune", server.trim_end_matches('/')))
        .send()
        .await
        .context("HTTP request failed")?;

    if resp.status().is_success() {
        let json: Value = resp.json().await?;
        let n = json["pruned"].as_u64().unwrap_or(0);
        println!("pruned {n} dead secret(s)");
    } else {
        let status = resp.status();
        anyhow::bail!("server returned {status}");
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Parse human duration strings like "1h", "30m", "90s" into fractional minutes.
fn parse_ttl_minutes(s: &str) -> Result<f64> {
    let d: humantime::Duration = s
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;
    Ok(d.as_secs_f64() / 60.0)
}
