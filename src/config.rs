//! Tier-up and OSR Tunables
//!
//! Every heuristic threshold lives in [`TierConfig`]. A configuration is built
//! once and handed to the [`Vm`](crate::vm::Vm); nothing reads it from a
//! global.
//!
//! Sources, lowest precedence first:
//!
//! 1. [`TierConfig::default`]
//! 2. a TOML document ([`TierConfig::from_toml_str`])
//! 3. `OSRTIER_*` environment variables ([`TierConfig::with_env_overrides`])
//!
//! ```toml
//! threshold_for_optimize_after_warm_up = 50000
//! threshold_for_optimize_soon = 500
//! verbose_osr = true
//! ```

use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};

/// Default counter threshold before the next tier is requested after warm-up
pub const DEFAULT_OPTIMIZE_AFTER_WARM_UP: i32 = 100_000;

/// Default counter threshold when a unit should be optimized soon
pub const DEFAULT_OPTIMIZE_SOON: i32 = 1_000;

/// Cap on the exponential back-off applied per reoptimization
pub const DEFAULT_MAX_REOPTIMIZATION_RETRY_SHIFT: u32 = 18;

/// Failed OSR entry attempts tolerated before OSR entry is abandoned
pub const DEFAULT_OSR_ENTRY_RETRY_THRESHOLD: u8 = 100;

/// OSR exits taken before an optimized unit is thrown away
pub const DEFAULT_OSR_EXIT_COUNT_FOR_REOPTIMIZATION: u32 = 100;

/// Callees a call site tracks before going megamorphic
pub const DEFAULT_MAX_POLYMORPHIC_CALL_VARIANTS: usize = 8;

/// Access cases a property access site tracks before going megamorphic
pub const DEFAULT_MAX_ACCESS_VARIANTS: usize = 8;

/// Tunables for tier-up, OSR and inline caching
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Threshold used by `optimize_after_warm_up`
    pub threshold_for_optimize_after_warm_up: i32,

    /// Threshold used by `optimize_soon`
    pub threshold_for_optimize_soon: i32,

    /// Maximum left shift applied to thresholds for repeated reoptimization
    pub max_reoptimization_retry_shift: u32,

    /// Failed OSR entries before entry is abandoned for a unit
    pub osr_entry_retry_threshold: u8,

    /// Exits taken before an optimized unit is jettisoned
    pub osr_exit_count_for_reoptimization: u32,

    /// Call link variants before megamorphic
    pub max_polymorphic_call_variants: usize,

    /// Stub info access cases before megamorphic
    pub max_access_variants: usize,

    /// Threads in the background compiler pool
    pub compiler_threads: usize,

    /// Log every OSR and tier-up decision at DEBUG
    pub verbose_osr: bool,
}

impl Default for TierConfig {
    fn default() -> Self {
        TierConfig {
            threshold_for_optimize_after_warm_up: DEFAULT_OPTIMIZE_AFTER_WARM_UP,
            threshold_for_optimize_soon: DEFAULT_OPTIMIZE_SOON,
            max_reoptimization_retry_shift: DEFAULT_MAX_REOPTIMIZATION_RETRY_SHIFT,
            osr_entry_retry_threshold: DEFAULT_OSR_ENTRY_RETRY_THRESHOLD,
            osr_exit_count_for_reoptimization: DEFAULT_OSR_EXIT_COUNT_FOR_REOPTIMIZATION,
            max_polymorphic_call_variants: DEFAULT_MAX_POLYMORPHIC_CALL_VARIANTS,
            max_access_variants: DEFAULT_MAX_ACCESS_VARIANTS,
            compiler_threads: default_compiler_threads(),
            verbose_osr: false,
        }
    }
}

/// Leave one core for the mutator
fn default_compiler_threads() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

fn env_override<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl TierConfig {
    /// Defaults overlaid with `OSRTIER_*` environment variables
    pub fn from_env() -> ConfigResult<Self> {
        TierConfig::default().with_env_overrides()
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let config: TierConfig =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()
    }

    /// Apply `OSRTIER_*` environment variables on top of this configuration
    ///
    /// Unparseable values are ignored, the same way cache sizes are read
    /// elsewhere in the runtime.
    pub fn with_env_overrides(mut self) -> ConfigResult<Self> {
        if let Some(v) = env_override("OSRTIER_THRESHOLD_OPTIMIZE_AFTER_WARM_UP") {
            self.threshold_for_optimize_after_warm_up = v;
        }
        if let Some(v) = env_override("OSRTIER_THRESHOLD_OPTIMIZE_SOON") {
            self.threshold_for_optimize_soon = v;
        }
        if let Some(v) = env_override("OSRTIER_MAX_REOPTIMIZATION_RETRY_SHIFT") {
            self.max_reoptimization_retry_shift = v;
        }
        if let Some(v) = env_override("OSRTIER_OSR_ENTRY_RETRY_THRESHOLD") {
            self.osr_entry_retry_threshold = v;
        }
        if let Some(v) = env_override("OSRTIER_OSR_EXIT_COUNT_FOR_REOPTIMIZATION") {
            self.osr_exit_count_for_reoptimization = v;
        }
        if let Some(v) = env_override("OSRTIER_COMPILER_THREADS") {
            self.compiler_threads = v;
        }
        if std::env::var("OSRTIER_VERBOSE_OSR").is_ok() {
            self.verbose_osr = true;
        }
        self.validate()
    }

    /// Reject values the tier-up machinery cannot work with
    pub fn validate(self) -> ConfigResult<Self> {
        if self.threshold_for_optimize_after_warm_up < 0 {
            return Err(ConfigError::InvalidValue {
                key: "threshold_for_optimize_after_warm_up",
                value: self.threshold_for_optimize_after_warm_up.to_string(),
            });
        }
        if self.threshold_for_optimize_soon < 0 {
            return Err(ConfigError::InvalidValue {
                key: "threshold_for_optimize_soon",
                value: self.threshold_for_optimize_soon.to_string(),
            });
        }
        if self.max_reoptimization_retry_shift > 30 {
            return Err(ConfigError::InvalidValue {
                key: "max_reoptimization_retry_shift",
                value: self.max_reoptimization_retry_shift.to_string(),
            });
        }
        if self.osr_exit_count_for_reoptimization == 0 {
            return Err(ConfigError::InvalidValue {
                key: "osr_exit_count_for_reoptimization",
                value: "0".to_string(),
            });
        }
        if self.compiler_threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "compiler_threads",
                value: "0".to_string(),
            });
        }
        if self.max_polymorphic_call_variants == 0 || self.max_access_variants == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_variants",
                value: "0".to_string(),
            });
        }
        Ok(self)
    }
}

// =============================================================================
// Tests
// =============================================================================
