//! Shared fixtures for unit and scenario tests.

use crate::config::TreeConfig;

/// Small node capacities so a few dozen keys already build a deep tree.
pub fn small_config() -> TreeConfig {
    #[allow(clippy::expect_used)]
    TreeConfig::new(6, 3).expect("6 leaf slots and 3 inner slots are valid")
}

/// Value stored under `key` in tests, derived from the key.
pub fn tag(key: u64) -> String {
    format!("value-{key}")
}
