//! kvfront server
//!
//! Runs the backend over an in-process store: background loops plus the
//! health and metrics endpoints.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        kvfront                            │
//! ├──────────────────────────────────────────────────────────┤
//! │  session eviction │ popularity rescale │ row dispatch     │
//! │                 ──────────┬──────────                     │
//! │                     InMemoryStore                         │
//! │  /healthz /readyz /livez          /metrics                │
//! └──────────────────────────────────────────────────────────┘
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kvfront::adapters::{InMemoryStore, InventoryProvider, SystemClock};
use kvfront::config::{AppConfig, EvictionMode};
use kvfront::{app, metrics, Backend, QueryParamClassifier};

// =============================================================================
// CLI Arguments
// =============================================================================

/// kvfront - vote ranking, sessions and caches over a shared key-value store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Session tokens kept before the oldest are evicted
    #[arg(long, env = "MAX_TOKENS", default_value = "10000000")]
    max_tokens: u64,

    /// Viewed items kept per session
    #[arg(long, env = "VIEWED_CAP", default_value = "25")]
    viewed_cap: usize,

    /// Eviction mode: sessions-only or with-carts
    #[arg(long, env = "EVICTION_MODE", default_value = "sessions-only")]
    eviction_mode: String,

    /// Page cache entry lifetime in seconds
    #[arg(long, env = "PAGE_CACHE_TTL_SECONDS", default_value = "300")]
    page_cache_ttl_seconds: u64,

    /// Popularity rank below which item pages are cached
    #[arg(long, env = "CACHEABLE_RANK_LIMIT", default_value = "10000")]
    cacheable_rank_limit: u64,

    /// Popularity rescale interval in seconds
    #[arg(long, env = "RESCALE_INTERVAL_SECONDS", default_value = "300")]
    rescale_interval_seconds: u64,

    /// Row dispatcher poll interval in milliseconds
    #[arg(long, env = "ROW_POLL_MS", default_value = "50")]
    row_poll_ms: u64,

    /// JSON array of {user, link, title} articles posted at startup
    #[arg(long, env = "SEED_ARTICLES")]
    seed_articles: Option<PathBuf>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn app_config(&self) -> kvfront::Result<AppConfig> {
        let mut config = AppConfig::default();
        config.session.max_tokens = self.max_tokens;
        config.session.viewed_cap = self.viewed_cap;
        config.session.mode = self.eviction_mode.parse::<EvictionMode>()?;
        config.page_cache.ttl = Duration::from_secs(self.page_cache_ttl_seconds);
        config.popularity.cacheable_rank_limit = self.cacheable_rank_limit;
        config.popularity.rescale_interval = Duration::from_secs(self.rescale_interval_seconds);
        config.row_cache.poll_interval = Duration::from_millis(self.row_poll_ms);
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting kvfront");
    info!("  Max tokens: {}", args.max_tokens);
    info!("  Eviction mode: {}", args.eviction_mode);
    info!("  Page cache TTL: {}s", args.page_cache_ttl_seconds);
    info!("  Cacheable rank limit: {}", args.cacheable_rank_limit);

    let config = args.app_config()?;
    let clock = Arc::new(SystemClock);
    let backend = Backend::new(
        config,
        Arc::new(InMemoryStore::with_clock(clock.clone())),
        clock,
        Arc::new(InventoryProvider::new()),
        Arc::new(QueryParamClassifier::default()),
    )?;

    if let Some(path) = &args.seed_articles {
        let seeds = app::load_seed_file(path)
            .await
            .with_context(|| format!("reading seed articles from {}", path.display()))?;
        backend.seed_articles(&seeds).await?;
    }

    let ready = Arc::new(AtomicBool::new(false));
    let cancel = CancellationToken::new();
    let tasks = backend.spawn_background(&cancel);

    let health_addr = args.health_addr.clone();
    let health_ready = ready.clone();
    tokio::spawn(async move {
        if let Err(e) = serve("health", &health_addr, move |path| {
            health_response(path, health_ready.load(Ordering::Relaxed))
        })
        .await
        {
            error!("Health server error: {}", e);
        }
    });

    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = serve("metrics", &metrics_addr, metrics_response).await {
            error!("Metrics server error: {}", e);
        }
    });

    ready.store(true, Ordering::Relaxed);
    info!("Backend ready");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");
    ready.store(false, Ordering::Relaxed);
    cancel.cancel();

    for (name, report) in tasks.join().await? {
        info!(
            task = name,
            iterations = report.iterations,
            failures = report.failures,
            "Task finished"
        );
    }
    info!("kvfront shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// HTTP Endpoints
// =============================================================================

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn health_response(path: &str, ready: bool) -> Response<Full<Bytes>> {
    match path {
        "/healthz" | "/livez" => respond(StatusCode::OK, "ok"),
        "/readyz" if ready => respond(StatusCode::OK, "ok"),
        "/readyz" => respond(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
        _ => respond(StatusCode::NOT_FOUND, "not found"),
    }
}

fn metrics_response(path: &str) -> Response<Full<Bytes>> {
    use prometheus::{Encoder, TextEncoder};

    if path != "/metrics" {
        return respond(StatusCode::NOT_FOUND, "not found");
    }
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&metrics::gather(), &mut buffer) {
        Ok(()) => {
            let mut response = respond(StatusCode::OK, buffer);
            if let Ok(content_type) = encoder.format_type().parse() {
                response
                    .headers_mut()
                    .insert(hyper::header::CONTENT_TYPE, content_type);
            }
            response
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            respond(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed")
        }
    }
}

/// Serve `handler` over HTTP/1 on `addr` until the process exits
async fn serve<H>(name: &'static str, addr: &str, handler: H) -> anyhow::Result<()>
where
    H: Fn(&str) -> Response<Full<Bytes>> + Clone + Send + Sync + 'static,
{
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid {} server address", name))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {} server", name))?;

    info!("{} server listening on {}", name, addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let handler = handler.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let response = handler(req.uri().path());
                async move { Ok::<_, Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("{} server connection error: {}", name, e);
            }
        });
    }
}
