pub mod builders;
pub mod fake_remote;
pub mod handlers;

use std::sync::{Arc, Once};
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

use dagrelay::channel::{BackoffPolicy, ChannelOptions};

pub use fake_remote::{FakeConnector, FakeTransport};
pub use handlers::{InvocationRecord, ScriptedHandler};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Channel timings small enough for tests: 100ms backoff base capped at
/// 500ms, probes every 50ms, 1s request timeout.
pub fn fast_channel_options() -> ChannelOptions {
    ChannelOptions {
        health_interval: Duration::from_millis(50),
        probe_timeout: Duration::from_millis(20),
        request_timeout: Duration::from_secs(1),
        connect_timeout: Duration::from_millis(200),
        backoff: BackoffPolicy::new(Duration::from_millis(100), Duration::from_millis(500)),
    }
}

/// Every node counts as reachable.
pub fn all_reachable() -> Arc<dyn dagrelay::channel::Reachability> {
    Arc::new(|_: &str| true)
}
