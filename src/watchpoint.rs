//! Watchpoint Sets and Bindings
//!
//! A [`WatchpointSet`] is a shared, monotonic flag standing for a global
//! invariant ("nobody has mutated Array.prototype", ...). Compiled units that
//! speculate on the invariant subscribe through a [`WatchpointBinding`].
//!
//! ```text
//! CodeBlock ──owns──▶ JitData ──owns──▶ Arc<WatchpointBinding>
//!     ▲                                        │  ▲
//!     └──────────── Weak (target) ─────────────┘  │
//! WatchpointSet ──── Weak (watchers) ─────────────┘
//! ```
//!
//! Ownership only flows from the compiled unit down. The set and the binding
//! hold weak references, so firing a set after its subscribers died is a
//! no-op.
//!
//! # Binding states
//!
//! ```text
//! Unarmed ──arm──▶ Armed ──fire──▶ Fired
//!                    │
//!                    └──clear (owner destroyed)──▶ Cleared
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::code_block::{CodeBlock, JettisonReason};

// =============================================================================
// Watchpoint set kinds
// =============================================================================

/// Named global invariants a compiled unit can depend on
///
/// Adding a kind means adding a variant here and to [`WatchpointSetKind::ALL`];
/// the linker resolves every kind through the same table lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum WatchpointSetKind {
    HavingABadTime = 0,
    MasqueradesAsUndefined = 1,
    ArrayBufferDetach = 2,
    ArrayIteratorProtocol = 3,
    NumberToString = 4,
    StructureCacheCleared = 5,
    StringToString = 6,
    StringValueOf = 7,
    StringSymbolReplace = 8,
    StringSymbolToPrimitive = 9,
    RegExpPrimordialProperties = 10,
    ArraySpecies = 11,
    ArrayPrototypeChainIsSane = 12,
    StringPrototypeChainIsSane = 13,
    ObjectPrototypeChainIsSane = 14,
}

impl WatchpointSetKind {
    /// Number of kinds
    pub const COUNT: usize = 15;

    /// Every kind, in discriminant order
    pub const ALL: [WatchpointSetKind; Self::COUNT] = [
        WatchpointSetKind::HavingABadTime,
        WatchpointSetKind::MasqueradesAsUndefined,
        WatchpointSetKind::ArrayBufferDetach,
        WatchpointSetKind::ArrayIteratorProtocol,
        WatchpointSetKind::NumberToString,
        WatchpointSetKind::StructureCacheCleared,
        WatchpointSetKind::StringToString,
        WatchpointSetKind::StringValueOf,
        WatchpointSetKind::StringSymbolReplace,
        WatchpointSetKind::StringSymbolToPrimitive,
        WatchpointSetKind::RegExpPrimordialProperties,
        WatchpointSetKind::ArraySpecies,
        WatchpointSetKind::ArrayPrototypeChainIsSane,
        WatchpointSetKind::StringPrototypeChainIsSane,
        WatchpointSetKind::ObjectPrototypeChainIsSane,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Decode a kind from its discriminant
    pub fn from_u8(raw: u8) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }
}

// =============================================================================
// WatchpointSet
// =============================================================================

/// State of a watchpoint set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SetState {
    /// Nobody watches yet; the invariant holds
    Clear = 0,
    /// At least one binding subscribed
    Watched = 1,
    /// The invariant broke; never changes again
    Invalidated = 2,
}

impl From<u8> for SetState {
    fn from(v: u8) -> Self {
        match v {
            0 => SetState::Clear,
            1 => SetState::Watched,
            _ => SetState::Invalidated,
        }
    }
}

/// A shared invariant flag with its subscribers
///
/// `has_been_invalidated` is a lock-free acquire load. Only
/// [`WatchpointSet::invalidate`] moves the set to `Invalidated`, and nothing
/// moves it back.
#[derive(Debug)]
pub struct WatchpointSet {
    kind: WatchpointSetKind,
    state: AtomicU8,
    watchers: Mutex<Vec<Weak<WatchpointBinding>>>,
}

impl WatchpointSet {
    pub fn new(kind: WatchpointSetKind) -> Self {
        WatchpointSet {
            kind,
            state: AtomicU8::new(SetState::Clear as u8),
            watchers: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    pub fn kind(&self) -> WatchpointSetKind {
        self.kind
    }

    #[inline]
    pub fn state(&self) -> SetState {
        SetState::from(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn has_been_invalidated(&self) -> bool {
        self.state() == SetState::Invalidated
    }

    /// Subscribe an armed binding
    ///
    /// Returns `false` if the set was invalidated before the binding could be
    /// added. The check happens under the watcher lock, so a concurrent
    /// `invalidate` either sees the new binding or this call sees the
    /// invalidation.
    pub fn add(&self, binding: &Arc<WatchpointBinding>) -> bool {
        let mut watchers = self.watchers.lock();
        if self.has_been_invalidated() {
            return false;
        }
        watchers.retain(|w| w.strong_count() > 0);
        watchers.push(Arc::downgrade(binding));
        let _ = self.state.compare_exchange(
            SetState::Clear as u8,
            SetState::Watched as u8,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        true
    }

    /// Break the invariant and fire every live subscriber
    ///
    /// Returns the number of bindings that fired. Only the first call fires
    /// anything; later calls return 0.
    pub fn invalidate(&self, detail: &str) -> usize {
        let watchers = {
            let mut watchers = self.watchers.lock();
            let previous = self.state.swap(SetState::Invalidated as u8, Ordering::AcqRel);
            if SetState::from(previous) == SetState::Invalidated {
                return 0;
            }
            std::mem::take(&mut *watchers)
        };

        debug!(
            target: "osrtier::watchpoint::fire",
            kind = ?self.kind,
            watchers = watchers.len(),
            detail,
            "Invalidating watchpoint set"
        );

        watchers
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|binding| binding.fire(self.kind))
            .count()
    }

    /// Number of subscribers still alive
    pub fn watcher_count(&self) -> usize {
        self.watchers
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

// =============================================================================
// InvariantRegistry
// =============================================================================

/// One watchpoint set per [`WatchpointSetKind`]
///
/// Usually owned by a global object. Several global objects may share one
/// registry when an invariant is process-wide.
#[derive(Debug)]
pub struct InvariantRegistry {
    sets: [Arc<WatchpointSet>; WatchpointSetKind::COUNT],
}

impl InvariantRegistry {
    pub fn new() -> Self {
        InvariantRegistry {
            sets: std::array::from_fn(|i| Arc::new(WatchpointSet::new(WatchpointSetKind::ALL[i]))),
        }
    }

    #[inline]
    pub fn set(&self, kind: WatchpointSetKind) -> &Arc<WatchpointSet> {
        &self.sets[kind.index()]
    }

    /// Break an invariant, firing every unit that depends on it
    pub fn fire(&self, kind: WatchpointSetKind, detail: &str) -> usize {
        self.set(kind).invalidate(detail)
    }
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        InvariantRegistry::new()
    }
}

// =============================================================================
// WatchpointBinding
// =============================================================================

/// Binding lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BindingState {
    Unarmed = 0,
    Armed = 1,
    Fired = 2,
    Cleared = 3,
}

impl From<u8> for BindingState {
    fn from(v: u8) -> Self {
        match v {
            0 => BindingState::Unarmed,
            1 => BindingState::Armed,
            2 => BindingState::Fired,
            _ => BindingState::Cleared,
        }
    }
}

/// Subscription of one compiled unit to one watchpoint set
///
/// Firing jettisons the target unit. The unit is handed to the VM's
/// reclamation queue, so it is never freed from inside the firing call.
#[derive(Debug)]
pub struct WatchpointBinding {
    state: AtomicU8,
    target: Mutex<Weak<CodeBlock>>,
}

impl WatchpointBinding {
    pub fn new() -> Self {
        WatchpointBinding {
            state: AtomicU8::new(BindingState::Unarmed as u8),
            target: Mutex::new(Weak::new()),
        }
    }

    #[inline]
    pub fn state(&self) -> BindingState {
        BindingState::from(self.state.load(Ordering::Acquire))
    }

    /// Record the unit to invalidate
    ///
    /// Callers hold the unit's concurrent access lock while doing this.
    pub fn initialize(&self, target: &Arc<CodeBlock>) {
        *self.target.lock() = Arc::downgrade(target);
        let _ = self.state.compare_exchange(
            BindingState::Unarmed as u8,
            BindingState::Armed as u8,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Armed → Unarmed, forgetting the target
    ///
    /// Used when the set refused the subscription after the binding was armed.
    fn disarm(&self) {
        if self
            .state
            .compare_exchange(
                BindingState::Armed as u8,
                BindingState::Unarmed as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            *self.target.lock() = Weak::new();
        }
    }

    /// The target unit if it is still alive
    pub fn target(&self) -> Option<Arc<CodeBlock>> {
        self.target.lock().upgrade()
    }

    /// Armed → Fired; returns whether this call did the transition
    pub fn fire(&self, kind: WatchpointSetKind) -> bool {
        if self
            .state
            .compare_exchange(
                BindingState::Armed as u8,
                BindingState::Fired as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }

        match self.target() {
            Some(code_block) => {
                code_block.jettison(JettisonReason::WatchpointFired(kind));
            }
            None => {
                trace!(target: "osrtier::watchpoint::fire", ?kind, "Target already destroyed");
            }
        }
        true
    }

    /// Detach from the target because its owner is being destroyed
    pub fn clear(&self) {
        self.state.store(BindingState::Cleared as u8, Ordering::Release);
    }
}

impl Default for WatchpointBinding {
    fn default() -> Self {
        WatchpointBinding::new()
    }
}

/// Subscribe `binding` to `set` on behalf of `code_block`
///
/// Fails without side effects on the set if it already fired. A failed
/// subscription leaves the binding unarmed.
pub fn attempt_to_watch(
    code_block: &Arc<CodeBlock>,
    set: &WatchpointSet,
    binding: &Arc<WatchpointBinding>,
) -> bool {
    if set.has_been_invalidated() {
        return false;
    }
    {
        let _locker = code_block.concurrent_lock();
        binding.initialize(code_block);
    }
    if set.add(binding) {
        return true;
    }
    // Fired between the check and the add.
    let _locker = code_block.concurrent_lock();
    binding.disarm();
    false
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierConfig;
    use crate::global_object::GlobalObject;
    use crate::value::CellRef;
    use crate::vm::Vm;

    #[test]
    fn test_kind_table_matches_discriminants() {
        for (i, kind) in WatchpointSetKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
            assert_eq!(WatchpointSetKind::from_u8(i as u8), Some(*kind));
        }
        assert_eq!(WatchpointSetKind::from_u8(WatchpointSetKind::COUNT as u8), None);
    }

    #[test]
    fn test_set_invalidation_is_monotonic() {
        let set = WatchpointSet::new(WatchpointSetKind::HavingABadTime);
        assert_eq!(set.state(), SetState::Clear);
        set.invalidate("first");
        assert!(set.has_been_invalidated());
        assert_eq!(set.invalidate("second"), 0);
        assert_eq!(set.state(), SetState::Invalidated);
    }

    #[test]
    fn test_add_after_invalidation_fails() {
        let set = WatchpointSet::new(WatchpointSetKind::ArraySpecies);
        set.invalidate("gone");
        let binding = Arc::new(WatchpointBinding::new());
        assert!(!set.add(&binding));
        assert_eq!(set.watcher_count(), 0);
    }

    #[test]
    fn test_refused_subscription_disarms_binding() {
        let vm = Vm::new(TierConfig::default());
        let global = GlobalObject::new(CellRef::new(0x1000));
        let block = CodeBlock::new_baseline(&vm, global, 1, 1);
        let set = WatchpointSet::new(WatchpointSetKind::StringToString);
        let binding = Arc::new(WatchpointBinding::new());
        binding.initialize(&block);
        assert_eq!(binding.state(), BindingState::Armed);
        assert!(binding.target().is_some());

        set.invalidate("fired mid-link");
        assert!(!set.add(&binding));
        binding.disarm();
        assert_eq!(binding.state(), BindingState::Unarmed);
        assert!(binding.target().is_none());
        assert!(!binding.fire(WatchpointSetKind::StringToString));
    }

    #[test]
    fn test_unarmed_binding_does_not_fire() {
        let binding = WatchpointBinding::new();
        assert!(!binding.fire(WatchpointSetKind::NumberToString));
        assert_eq!(binding.state(), BindingState::Unarmed);
    }

    #[test]
    fn test_dead_watchers_are_pruned() {
        let set = WatchpointSet::new(WatchpointSetKind::StringValueOf);
        {
            let binding = Arc::new(WatchpointBinding::new());
            assert!(set.add(&binding));
        }
        assert_eq!(set.watcher_count(), 0);
        assert_eq!(set.invalidate("nobody left"), 0);
    }

    #[test]
    fn test_registry_sets_are_distinct() {
        let registry = InvariantRegistry::new();
        registry.fire(WatchpointSetKind::ArrayBufferDetach, "detached");
        assert!(registry.set(WatchpointSetKind::ArrayBufferDetach).has_been_invalidated());
        assert!(!registry.set(WatchpointSetKind::HavingABadTime).has_been_invalidated());
    }
}
