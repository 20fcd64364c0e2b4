//! Log subscriber setup
//!
//! Library code only emits `tracing` events under `osrtier::*` targets.
//! Embedders that have no subscriber of their own can call [`init`].

use tracing::Level;

use crate::config::TierConfig;

/// Install a fmt subscriber sized by `verbose_osr`
///
/// Safe to call more than once; later calls are no-ops.
pub fn init(config: &TierConfig) {
    let level = if config.verbose_osr {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init();
}
