#![allow(dead_code, unused_imports)]

pub use workchain_test_utils::builders;
pub use workchain_test_utils::fake_executor;
pub use workchain_test_utils::{init_tracing, wait_state, with_timeout};
