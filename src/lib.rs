use std::path::PathBuf;
use std::sync::Arc;

/// scrapecache: a cached metrics gatherer for container workloads.
///
/// Collecting per-container metrics is expensive (proportional to entity and
/// series count), while scrapes can arrive far more often than the state
/// changes. This crate caches the last collected snapshot in a double-buffered
/// gatherer: a periodic collection pass repopulates the spare buffer in place
/// and commits it atomically, and the scrape endpoint serves the published
/// snapshot without ever blocking on an in-progress pass.
pub mod cache;
pub mod collect;
pub mod export;
pub mod metrics;

use collect::{CgroupStatsProvider, Collector};

/// Runs the scrapecache daemon.
///
/// Tracks child cgroups under the cgroup-v2 root, collects their cpu/memory
/// usage on an interval, and serves the cached snapshot over HTTP
/// (`/metrics` for the text exposition, `/status` for cache diagnostics).
///
/// Configuration via environment variables:
///
/// - `CGROUP_ROOT` — cgroup-v2 root to scan (default `/sys/fs/cgroup`).
/// - `METRICS_ADDR` — HTTP listen address (default `0.0.0.0:9101`).
/// - `COLLECT_INTERVAL_SECS` — seconds between collection passes (default 10).
///
/// # Errors
///
/// Returns an error if the system clock reads before the UNIX epoch; server
/// and collection errors are logged, not propagated.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cgroup_root = std::env::var_os("CGROUP_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/sys/fs/cgroup"));
    let addr = std::env::var("METRICS_ADDR").unwrap_or_else(|_| "0.0.0.0:9101".to_owned());
    let interval_secs = std::env::var("COLLECT_INTERVAL_SECS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(10);
    log::debug!("cgroup root: {}", cgroup_root.display());

    let gatherer = Arc::new(cache::CachedGatherer::new());
    let collector = Arc::new(Collector::new(
        CgroupStatsProvider::new(cgroup_root),
        collect::default_labels,
    ));

    {
        let gatherer = Arc::clone(&gatherer);
        tokio::spawn(async move {
            let server = export::MetricsServer::new(gatherer);
            server.listen(addr).await
        });
    }

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        let timestamp_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)?
            .as_millis() as i64;

        let gatherer = Arc::clone(&gatherer);
        let collector = Arc::clone(&collector);
        tokio::task::spawn_blocking(move || {
            let before = std::time::Instant::now();
            let mut session = gatherer.begin_update();
            collector.collect_into(&mut session, timestamp_ms);
            session.commit();
            log::trace!(
                "collection pass took {} nanoseconds",
                before.elapsed().as_nanos()
            );
        })
        .await
        .expect("spawn_blocking panicked");
    }
}
