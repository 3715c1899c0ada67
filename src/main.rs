use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use relay_proxy::{
    config::{DEFAULT_ENDPOINT, DEFAULT_MAX_BODY_BYTES},
    logging::init_tracing,
    proxy, HttpUpstream, ProxyConfig, RequestHandler,
};
use tokio::net::TcpListener;

#[derive(Debug, Parser)]
#[command(name = "relay-proxy", about = "Relay web pages through a single endpoint")]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Path the relay is served from.
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Shared key callers must send as `X-Proxy-Key` or `?key=`. Unset means open access.
    #[arg(long, env = "PROXY_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Upstream request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Largest request body accepted for forwarding, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES)]
    max_body_bytes: usize,

    /// Emit JSON logs instead of the compact format.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = ProxyConfig::default()
        .with_access_key(cli.key)
        .with_endpoint_path(&cli.endpoint)
        .with_upstream_timeout(Duration::from_secs(cli.timeout_secs))
        .with_max_body_bytes(cli.max_body_bytes);
    let upstream = HttpUpstream::new(config.upstream_timeout).context("building HTTP client")?;

    tracing::info!(
        addr = %cli.bind,
        endpoint = %config.endpoint_path,
        key_required = config.access_key.is_some(),
        "listening"
    );

    let handler = Arc::new(RequestHandler::new(config, Arc::new(upstream)));
    let listener = TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;
    proxy::run(listener, handler).await?;
    Ok(())
}
