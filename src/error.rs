//! Error types.
//!
//! Every error here is recoverable: the caller keeps running the lower tier.
//! Broken invariants (dangling references, unknown record tags) panic instead
//! of producing an error value.

use std::fmt;

use crate::operands::Operand;
use crate::origin::BytecodeIndex;
use crate::value::Value;
use crate::watchpoint::WatchpointSetKind;

// =============================================================================
// LinkError
// =============================================================================

/// A watchpoint record whose set was already invalidated at link time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedWatchpoint {
    /// Position of the record in the linker table
    pub record_index: usize,
    /// Set that could not be watched
    pub kind: WatchpointSetKind,
}

/// Linking a compiled unit against its global object failed
///
/// The unit's speculative assumptions no longer hold. The caller must discard
/// it and keep running baseline code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// One or more watchpoint sets had already fired
    WatchpointsInvalidated { failed: Vec<FailedWatchpoint> },
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::WatchpointsInvalidated { failed } => {
                write!(f, "{} watchpoint set(s) already invalidated:", failed.len())?;
                for failure in failed {
                    write!(f, " {:?}@{}", failure.kind, failure.record_index)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for LinkError {}

// =============================================================================
// OsrEntryError
// =============================================================================

/// Entering optimized code from a baseline frame is not possible
#[derive(Debug, Clone, PartialEq)]
pub enum OsrEntryError {
    /// The optimized unit has no entrypoint at this bytecode index
    NoEntryPoint(BytecodeIndex),

    /// OSR entry was abandoned after too many failed attempts
    Abandoned,

    /// Baseline frame shape differs from the entrypoint's expectations
    FrameShapeMismatch { expected: usize, got: usize },

    /// A live baseline value contradicts what the optimized code assumes
    UnexpectedValue { operand: Operand, value: Value },
}

impl fmt::Display for OsrEntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsrEntryError::NoEntryPoint(index) => write!(f, "No OSR entrypoint at {}", index),
            OsrEntryError::Abandoned => write!(f, "OSR entry abandoned"),
            OsrEntryError::FrameShapeMismatch { expected, got } => {
                write!(f, "Frame shape mismatch: expected {} operands, got {}", expected, got)
            }
            OsrEntryError::UnexpectedValue { operand, value } => {
                write!(f, "Unexpected value {} in {}", value, operand)
            }
        }
    }
}

impl std::error::Error for OsrEntryError {}

// =============================================================================
// ConfigError
// =============================================================================

/// Error loading a [`TierConfig`](crate::config::TierConfig)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// TOML could not be parsed into a configuration
    Parse(String),

    /// A field holds a value outside its valid range
    InvalidValue { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "Invalid value for {}: {}", key, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;
