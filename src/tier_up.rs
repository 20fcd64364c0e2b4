//! Tier-Up Counter and Triggers
//!
//! Decides when an optimized unit should ask for a compilation at the next
//! tier. The counter is a heuristic: increments may be lost under contention
//! and nobody cares. The one transition that must not race is
//! `Counting → ThresholdCrossed`, which is a compare-and-swap so that a
//! crossing is reported to exactly one caller.
//!
//! ```text
//!             crossed (CAS)                  set_new_threshold
//! Counting ─────────────────▶ ThresholdCrossed ─────────────────▶ Counting
//!    │  ▲
//!    │  └──────── set_new_threshold ─────── Deferred ◀── defer_indefinitely
//!    └── force_slow_path_concurrently ──▶ SlowPathForcedConcurrently ──check──▶ ThresholdCrossed
//! ```

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::Arc;

use crate::code_block::CodeBlock;
use crate::origin::BytecodeIndex;

/// Counter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CounterState {
    Counting = 0,
    /// A crossing was reported and a compile requested
    ThresholdCrossed = 1,
    /// Never cross until a new threshold is set
    Deferred = 2,
    /// The next check takes the slow path regardless of the count
    SlowPathForcedConcurrently = 3,
}

impl From<u8> for CounterState {
    fn from(v: u8) -> Self {
        match v {
            0 => CounterState::Counting,
            1 => CounterState::ThresholdCrossed,
            2 => CounterState::Deferred,
            _ => CounterState::SlowPathForcedConcurrently,
        }
    }
}

/// Execution counter of one optimized unit
#[derive(Debug)]
pub struct TierUpCounter {
    count: AtomicI32,
    threshold: AtomicI32,
    state: AtomicU8,
}

impl TierUpCounter {
    /// Counter that stays deferred until a threshold is set
    pub fn new() -> Self {
        TierUpCounter {
            count: AtomicI32::new(0),
            threshold: AtomicI32::new(i32::MAX),
            state: AtomicU8::new(CounterState::Deferred as u8),
        }
    }

    pub fn with_threshold(threshold: i32) -> Self {
        let counter = Self::new();
        counter.set_new_threshold(threshold);
        counter
    }

    #[inline]
    pub fn state(&self) -> CounterState {
        CounterState::from(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn count(&self) -> i32 {
        self.count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn threshold(&self) -> i32 {
        self.threshold.load(Ordering::Relaxed)
    }

    /// Record one execution of a check point
    #[inline]
    pub fn count_execution(&self) {
        // Saturate instead of wrapping on absurdly long runs.
        let _ = self
            .count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_add(1));
    }

    /// Report a crossing exactly once
    ///
    /// True if the count reached the threshold (or the slow path was forced)
    /// and this call moved the counter to `ThresholdCrossed`.
    pub fn check_if_threshold_crossed_and_set(&self) -> bool {
        match self.state() {
            CounterState::Counting => {
                self.count() >= self.threshold()
                    && self.transition(CounterState::Counting, CounterState::ThresholdCrossed)
            }
            CounterState::SlowPathForcedConcurrently => self.transition(
                CounterState::SlowPathForcedConcurrently,
                CounterState::ThresholdCrossed,
            ),
            CounterState::ThresholdCrossed | CounterState::Deferred => false,
        }
    }

    fn transition(&self, from: CounterState, to: CounterState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Restart counting toward `threshold`
    pub fn set_new_threshold(&self, threshold: i32) {
        self.count.store(0, Ordering::Relaxed);
        self.threshold.store(threshold.max(0), Ordering::Relaxed);
        self.state.store(CounterState::Counting as u8, Ordering::Release);
    }

    pub fn defer_indefinitely(&self) {
        self.threshold.store(i32::MAX, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        self.state.store(CounterState::Deferred as u8, Ordering::Release);
    }

    /// Make the next check take the slow path, from any thread
    pub fn force_slow_path_concurrently(&self) {
        self.state
            .store(CounterState::SlowPathForcedConcurrently as u8, Ordering::Release);
    }
}

impl Default for TierUpCounter {
    fn default() -> Self {
        TierUpCounter::new()
    }
}

/// Per-bytecode trigger flag for loop entry compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerReason {
    #[default]
    NoTrigger,
    /// A compile for this loop was requested; enter once it lands
    CompileOptimizedCode,
    /// Request a compile at this loop regardless of the counter
    CompileOptimizedCodeForced,
}

/// Result of a background compilation, as applied to the requesting unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationResult {
    Successful,
    Failed,
    /// The compiler could not run yet; retry after warm-up
    Deferred,
    /// The requesting unit became invalid while compiling
    Invalidated,
}

/// Where a tier-up check runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierUpSite {
    FunctionEntry,
    LoopHint(BytecodeIndex),
}

impl TierUpSite {
    pub fn bytecode_index(&self) -> Option<BytecodeIndex> {
        match self {
            TierUpSite::FunctionEntry => None,
            TierUpSite::LoopHint(index) => Some(*index),
        }
    }
}

/// What the running code should do after a tier-up check
#[derive(Debug, Clone)]
pub enum TierUpDecision {
    /// Nothing to do yet
    KeepCounting,
    /// Tier-up is off for this code
    Suppressed,
    /// A background compilation was queued
    RequestedCompile,
    /// A compilation for this unit is already in flight
    AlreadyQueued,
    /// Jump into this unit through its loop entrypoint
    EnterOsr(Arc<CodeBlock>),
}

impl PartialEq for TierUpDecision {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TierUpDecision::EnterOsr(a), TierUpDecision::EnterOsr(b)) => Arc::ptr_eq(a, b),
            (TierUpDecision::EnterOsr(_), _) | (_, TierUpDecision::EnterOsr(_)) => false,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
