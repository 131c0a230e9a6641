use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use shuttle::config::CAPTURE_DIR;
use shuttle::policy::{DnsPolicy, DnsRule};
use shuttle::{CaptureConfig, CaptureRegistry, Config, DnsCache, DnsConfig, SystemResolver};

#[derive(Parser)]
#[command(name = "shuttle")]
#[command(about = "Cached domain resolution with per-connection capture", long_about = None)]
struct Args {
    /// Domains to resolve through the cache
    domains: Vec<String>,

    /// Directory for captured request/response artifacts
    #[arg(short, long, default_value = CAPTURE_DIR)]
    capture_dir: PathBuf,

    /// Time-to-live for cached answers, in seconds
    #[arg(short, long, default_value = "600")]
    ttl_secs: u64,

    /// Domain pattern resolved remotely, bypassing the cache (e.g. "*google.com")
    #[arg(short, long = "remote-resolve")]
    remote_resolve: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn config(&self) -> Config {
        let rules = self
            .remote_resolve
            .iter()
            .map(|pattern| DnsRule::new(pattern.as_str(), true))
            .collect();

        Config {
            dns: DnsConfig {
                cache_ttl: Duration::from_secs(self.ttl_secs),
                policy: DnsPolicy {
                    rules,
                    ..DnsPolicy::default()
                },
            },
            capture: CaptureConfig::new(&self.capture_dir),
        }
    }
}

fn init_logging(level: &str) {
    let max_level = level.parse().unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_max_level(max_level)
        .init();
}

async fn run(args: Args) -> io::Result<()> {
    let config = args.config();

    let capture = CaptureRegistry::new(&config.capture);
    if let Err(e) = capture.clear().await {
        error!(error = %e, "failed to prepare capture directory");
        return Err(io::Error::other(e));
    }

    let cache = Arc::new(DnsCache::new(SystemResolver, &config.dns));
    cache.run().map_err(io::Error::other)?;

    let upstreams: Vec<_> = cache.policy().servers.iter().map(|s| s.to_string()).collect();
    info!(
        ttl_secs = config.dns.cache_ttl.as_secs(),
        upstreams = %upstreams.join(", "),
        capture_dir = %config.capture.dir.display(),
        "shuttle started"
    );

    // Each domain is looked up twice so the second pass is served from cache.
    let mut id = 0u64;
    for _ in 0..2 {
        for domain in &args.domains {
            id += 1;
            let _session = capture.init_session(id);
            capture.write_request(id, domain.as_bytes()).await;

            let lookup = {
                let cache = Arc::clone(&cache);
                let domain = domain.clone();
                tokio::task::spawn_blocking(move || cache.resolve_with_cache(&domain))
            };
            match lookup.await.map_err(io::Error::other)? {
                Ok(answer) => {
                    let addresses: Vec<_> =
                        answer.addresses.iter().map(|a| a.to_string()).collect();
                    let line = addresses.join(" ");
                    capture.write_response(id, line.as_bytes()).await;
                    info!(id, domain = %answer.domain, addresses = %line, "resolved");
                }
                Err(e) => warn!(id, domain = %domain, error = %e, "resolve failed"),
            }

            capture.complete(id).await;
        }
    }

    let stats = cache.stats_snapshot_and_reset();
    info!(
        cache = cache.len(),
        lookups = stats.lookups,
        hits = stats.hits,
        misses = stats.misses,
        bypassed = stats.bypassed,
        failures = stats.failures,
        evicted = stats.evicted,
        hit_ratio = %format!("{:.2}", stats.hit_ratio),
        "[stats]"
    );

    capture.shutdown().await;
    cache.shutdown().await;
    Ok(())
}

fn main() -> io::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(run(args))
}
