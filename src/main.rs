use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fwdproxy::{Proxy, ProxyConfig, SystemResolver};

#[derive(Parser)]
#[command(name = "fwdproxy")]
#[command(about = "Forwarding HTTP proxy with a hostname cache", long_about = None)]
struct Args {
    /// Local port to listen on
    #[arg(short, long, default_value = "5005")]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// Seconds a resolved hostname stays cached
    #[arg(long, default_value = "30")]
    cache_ttl_secs: u64,

    /// Destination port for upstream connections
    #[arg(long, default_value = "80")]
    upstream_port: u16,

    /// Seconds between cache statistics log lines (0 disables)
    #[arg(long, default_value = "60")]
    stats_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = ProxyConfig::default()
        .with_cache_ttl(Duration::from_secs(args.cache_ttl_secs))
        .with_upstream_port(args.upstream_port);

    let proxy = Proxy::bind(format!("{}:{}", args.bind, args.port), config, SystemResolver).await?;

    if args.stats_interval_secs > 0 {
        let cache = proxy.cache();
        let period = Duration::from_secs(args.stats_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick is immediate
            loop {
                interval.tick().await;
                let stats = cache.stats();
                info!(
                    entries = stats.entries,
                    hits = stats.hits,
                    misses = stats.misses,
                    evictions = stats.evictions,
                    "resolution cache stats"
                );
            }
        });
    }

    proxy.run().await?;
    Ok(())
}
