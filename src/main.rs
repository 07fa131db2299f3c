//! CLI entry point for the GTFS-RT subway tracker.
//!
//! Provides subcommands for decoding a captured feed, serving one vehicles or
//! stops envelope, listing routes, and running the live poll and animate loop.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use gtfs_rt_tracker::{
    animator::PositionAnimator,
    api::{self, DataResponse, FeedQuery},
    cache::FeedCache,
    clock::{Clock, SystemClock},
    extract::extract,
    fetch::{BasicClient, HttpClient, auth::ApiKey, fetch_bytes},
    output::{append_vehicles, print_json, print_pretty},
    parser::{maybe_gunzip, parse_feed},
    poller::{PollConfig, PollState, Selection, SnapshotPoller},
    render::{MapAdapter, MapView, TracingSink},
    routes::{FeedGroup, ROUTE_FEEDS, route_color, route_text_color},
    source::{HttpSnapshotSource, SnapshotSource},
    stops::{StopIndex, StopLookup},
};
use serde::Serialize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_rt_tracker")]
#[command(about = "Live subway positions from MTA GTFS-RT feeds", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Config {
    /// Provider API key, sent as the `x-api-key` header
    #[arg(long, env = "MTA_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// Directory containing `stops.<routeId>.json` files
    #[arg(long, env = "STOPS_DIR", default_value = "data", global = true)]
    stops_dir: PathBuf,

    /// GTFS stops.txt to use instead of the per-route stop files
    #[arg(long, env = "GTFS_STOPS", global = true)]
    gtfs_stops: Option<PathBuf>,

    /// How long a fetched snapshot is served before refreshing
    #[arg(long, env = "CACHE_TTL_MS", default_value_t = 10_000, global = true)]
    cache_ttl_ms: u64,

    /// Timeout for a single feed request
    #[arg(long, env = "HTTP_TIMEOUT_MS", default_value_t = 15_000, global = true)]
    http_timeout_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a GTFS-RT feed from a file (optionally gzipped) or URL
    Decode {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// Only print vehicles of this route
        #[arg(short, long)]
        route: Option<String>,

        /// CSV file to append the decoded vehicles to
        #[arg(long)]
        csv: Option<String>,
    },
    /// Fetch the vehicles envelope for a feed group or route
    Snapshot {
        /// Feed group id, e.g. "ACE" or "123456S"
        #[arg(short, long)]
        feed: Option<String>,

        /// Route id, e.g. "A"; narrows the result to that route
        #[arg(short, long)]
        route: Option<String>,
    },
    /// List routes with their feed group and colors
    Routes,
    /// Print the stop reference data for a route
    Stops {
        #[arg(short, long)]
        route: String,
    },
    /// Print the health envelope
    Health,
    /// Poll a route and animate its vehicles until interrupted
    Watch {
        #[arg(short, long)]
        route: String,

        /// Poll interval
        #[arg(short, long, env = "POLL_INTERVAL_MS", default_value_t = 10_000)]
        interval_ms: u64,

        /// Animation frames per second
        #[arg(long, default_value_t = 60)]
        fps: u32,

        /// Stop after this many seconds (runs until Ctrl+C when omitted)
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RouteInfo {
    route_id: &'static str,
    feed: FeedGroup,
    color: &'static str,
    text_color: &'static str,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/gtfs_rt_tracker.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_tracker.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(env_filter("RUST_LOG", LevelFilter::INFO));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(env_filter("RUST_LOG_JSON", LevelFilter::DEBUG));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = cli.config;

    match cli.command {
        Commands::Decode { source, route, csv } => {
            let stops = load_stops(&config)?;
            let bytes = fetcher(&config, &source).await?;
            let feed = parse_feed(&bytes)?;
            let now_ms = SystemClock.now_ms();

            let mut vehicles = extract(&feed.entity, now_ms, &stops);
            if let Some(route) = route.as_deref() {
                vehicles.retain(|v| v.route_id == route);
            }
            info!(
                entities = feed.entity.len(),
                vehicles = vehicles.len(),
                proxies = vehicles.iter().filter(|v| v.is_proxy()).count(),
                "Feed decoded"
            );
            print_pretty(&feed.header);

            if let Some(csv) = csv.as_deref() {
                append_vehicles(csv, &vehicles)?;
            }
            print_json(&DataResponse {
                data: vehicles,
                timestamp: now_ms,
            })?;
        }
        Commands::Snapshot { feed, route } => {
            let ttl = Duration::from_millis(config.cache_ttl_ms);
            let source = build_source(&config)?;
            let cache = FeedCache::new();
            let query = FeedQuery { feed, route };

            let result = api::vehicles(&query, &cache, source.as_ref(), ttl).await;
            respond(result)?;
        }
        Commands::Routes => {
            let routes: Vec<RouteInfo> = ROUTE_FEEDS
                .iter()
                .map(|&(route_id, feed)| RouteInfo {
                    route_id,
                    feed,
                    color: route_color(route_id),
                    text_color: route_text_color(route_id),
                })
                .collect();
            print_json(&routes)?;
        }
        Commands::Stops { route } => {
            let stops = load_stops(&config)?;
            respond(api::stops(&route, &stops, SystemClock.now_ms()))?;
        }
        Commands::Health => {
            print_json(&api::health(Utc::now()))?;
        }
        Commands::Watch {
            route,
            interval_ms,
            fps,
            duration_secs,
        } => {
            watch(&config, &route, interval_ms, fps, duration_secs).await?;
        }
    }

    Ok(())
}

/// `RUST_LOG`-style filter with a default level when the variable is unset.
fn env_filter(var: &str, default: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default.into())
        .with_env_var(var)
        .from_env_lossy()
}

/// Prints a handler's envelope and fails the command on a non-200 status.
fn respond<T: Serialize>(result: Result<T, api::ApiError>) -> Result<()> {
    let (status, body) = api::into_json(result)?;
    print_json(&body)?;
    if status != 200 {
        bail!("request failed with status {status}");
    }
    Ok(())
}

fn http_client(config: &Config) -> Result<Box<dyn HttpClient>> {
    let basic = BasicClient::new(Duration::from_millis(config.http_timeout_ms))?;
    Ok(match config.api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => Box::new(ApiKey::x_api_key(basic, key)?),
        None => Box::new(basic),
    })
}

fn load_stops(config: &Config) -> Result<StopIndex> {
    let stops = match &config.gtfs_stops {
        Some(path) => StopIndex::load_gtfs_stops(path)?,
        None => StopIndex::load_dir(&config.stops_dir)?,
    };
    debug!(stops = stops.len(), "Stop reference data loaded");
    Ok(stops)
}

fn build_source(config: &Config) -> Result<Arc<dyn SnapshotSource>> {
    let stops: Arc<dyn StopLookup> = Arc::new(load_stops(config)?);
    let source = HttpSnapshotSource::new(http_client(config)?, stops, Arc::new(SystemClock));
    Ok(Arc::new(source))
}

/// Loads feed data from a local file path or fetches it over HTTP.
#[tracing::instrument(skip(config), fields(source = %url))]
async fn fetcher(config: &Config, url: &str) -> Result<Vec<u8>> {
    let bytes = if url.starts_with("http") {
        let client = http_client(config)?;
        fetch_bytes(&client, url).await?.to_vec()
    } else {
        std::fs::read(url).with_context(|| format!("reading {url}"))?
    };
    Ok(maybe_gunzip(bytes)?)
}

/// Polls `route` and drives the animator and map adapter until Ctrl+C or
/// the optional deadline.
#[tracing::instrument(skip(config))]
async fn watch(
    config: &Config,
    route: &str,
    interval_ms: u64,
    fps: u32,
    duration_secs: Option<u64>,
) -> Result<()> {
    let poll_config = PollConfig::new(
        Duration::from_millis(interval_ms),
        Duration::from_millis(config.cache_ttl_ms),
    );
    let source = build_source(config)?;
    let clock = SystemClock;

    let mut poller = SnapshotPoller::new(Arc::new(FeedCache::new()), source, poll_config);
    let mut states = poller.subscribe();
    poller.select(Selection::route(route));

    let mut animator = PositionAnimator::new();
    let mut map = MapAdapter::new(TracingSink::default(), MapView::default());

    let mut frames = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(fps.max(1))));
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let deadline = async {
        match duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().state.clone();
                match state {
                    PollState::Cached(update) => {
                        if let Some(warning) = &update.warning {
                            warn!(warning = %warning, "Showing stale vehicles");
                        }
                        let duration_ms = animator.deliver(&update.vehicles, clock.now_ms());
                        info!(
                            vehicles = update.vehicles.len(),
                            cached = update.cached,
                            duration_ms,
                            "Vehicles updated"
                        );
                    }
                    PollState::Error(message) => error!(error = %message, "Failed to load vehicles"),
                    PollState::Loading => info!("Loading vehicles"),
                    PollState::Idle => {}
                }
            }
            _ = frames.tick(), if animator.is_animating() => {
                map.render(&animator.frame(clock.now_ms()));
            }
            _ = &mut deadline => break,
            _ = &mut ctrl_c => break,
        }
    }

    poller.stop();
    info!(
        markers_placed = map.sink().placed,
        icons = map.icons().len(),
        timers_started = poller.stats().timers_started,
        "Watch finished"
    );
    Ok(())
}
