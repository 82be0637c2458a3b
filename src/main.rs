use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::{LoggingConfig, TollgateConfig};
use tollgate::gateway::GatewayPolicy;
use tollgate::metrics::{InMemoryMetrics, RateLimitMetrics};
use tollgate::ratelimit::RuleStore;
use tollgate::request::GatewayRequest;

#[derive(Parser)]
#[command(name = "tollgate")]
#[command(about = "Rate limit rule resolution for API gateways", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a single request and print the decision
    Check {
        #[arg(long, default_value = "GET")]
        method: String,

        #[arg(long, default_value = "/")]
        path: String,

        /// Matched proxy route id
        #[arg(long)]
        route: Option<String>,

        /// Peer address as seen by the transport
        #[arg(long, value_name = "IP")]
        remote_addr: Option<IpAddr>,

        /// Request header, can be repeated
        #[arg(
            short = 'H',
            long = "header",
            value_name = "NAME: VALUE",
            value_parser = parse_header
        )]
        headers: Vec<(String, String)>,

        /// Authenticated claim, can be repeated
        #[arg(long = "claim", value_name = "TYPE=VALUE", value_parser = parse_claim)]
        claims: Vec<(String, String)>,
    },

    /// Print rule counts and index statistics
    Inspect,

    /// Resolve every request of a YAML request list
    Replay {
        #[arg(value_name = "REQUESTS")]
        requests: PathBuf,
    },
}

fn parse_header(value: &str) -> Result<(String, String), String> {
    let (name, value) = value
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{value}`"))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn parse_claim(value: &str) -> Result<(String, String), String> {
    let (kind, value) = value
        .split_once('=')
        .ok_or_else(|| format!("expected `type=value`, got `{value}`"))?;
    Ok((kind.trim().to_string(), value.to_string()))
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TollgateConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => TollgateConfig::default(),
    };
    init_tracing(&config.logging);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Tollgate");

    let store = Arc::new(RuleStore::new(config.rate_limit.to_snapshot()));
    let metrics = config
        .metrics
        .enabled
        .then(|| Arc::new(InMemoryMetrics::new()));
    let policy = match &metrics {
        Some(metrics) => GatewayPolicy::with_metrics(Arc::clone(&store), metrics.clone()),
        None => GatewayPolicy::new(Arc::clone(&store)),
    };

    match cli.command {
        Commands::Check {
            method,
            path,
            route,
            remote_addr,
            headers,
            claims,
        } => {
            let mut request = GatewayRequest::new(method, path);
            if let Some(route) = route {
                request = request.with_route(route);
            }
            if let Some(addr) = remote_addr {
                request = request.with_remote_addr(addr);
            }
            for (name, value) in headers {
                request = request.with_header(name, value);
            }
            for (kind, value) in claims {
                request = request.with_claim(kind, value);
            }

            let partition = policy.partition(&request);
            println!("{}", serde_json::to_string_pretty(&partition)?);
        }
        Commands::Inspect => {
            let snapshot = store.load();
            let report = json!({
                "version": snapshot.version,
                "loaded_at": snapshot.loaded_at,
                "global_default": snapshot.global_default,
                "stats": snapshot.cache.stats(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Replay { requests } => {
            let requests = GatewayRequest::load_all(&requests)
                .with_context(|| format!("failed to load {}", requests.display()))?;

            info!(count = requests.len(), "Replaying requests");
            for request in &requests {
                let partition = policy.partition(request);
                println!("{}", serde_json::to_string(&partition)?);
            }

            if let Some(metrics) = &metrics {
                println!("{}", serde_json::to_string_pretty(&metrics.snapshot())?);
            }
        }
    }

    Ok(())
}
