/// Entry point for the scrapecache daemon.
///
/// Collects container resource usage from the cgroup-v2 tree on an interval
/// and serves the cached metric snapshot over HTTP.
///
/// # Examples
///
/// ```bash
/// CGROUP_ROOT=/sys/fs/cgroup METRICS_ADDR=0.0.0.0:9101 cargo run
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    scrapecache::run().await
}
