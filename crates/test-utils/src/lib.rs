//! Shared helpers for the `workchain` integration tests.

pub mod builders;
pub mod fake_executor;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};
use workchain::bus::{ChainSnapshot, Subscription};
use workchain::chain::ChainState;
use workchain::engine::ChainId;
use workchain::logging::LOG_ENV_VAR;

static INIT: Once = Once::new();

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test-writer subscriber once per test binary.
///
/// Output is only shown for failing tests (or with `-- --nocapture`). The
/// filter comes from `WORKCHAIN_LOG`, then `RUST_LOG`, then `info`:
/// `WORKCHAIN_LOG=workchain::engine=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, failing the test if it takes longer than five seconds.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, f)
        .await
        .expect("test timed out after 5 seconds")
}

/// Skip snapshots on `sub` until chain `chain_id` reports `state`.
pub async fn wait_state(sub: &mut Subscription, chain_id: ChainId, state: ChainState) -> ChainSnapshot {
    with_timeout(sub.wait_for(|s| s.chain_id == chain_id && s.state == state))
        .await
        .unwrap_or_else(|| panic!("bus closed before chain {chain_id} reached {state}"))
}
