//! Call Link Info
//!
//! Remembers the callee(s) seen at one call site so generated code can call
//! them directly.
//!
//! ```text
//! Uninitialized ──CAS──▶ Monomorphic ──new callee──▶ Polymorphic ──limit──▶ Megamorphic
//!       ▲                     │                            │                     │
//!       └──────────────────── reset() (GC sweep / unlink) ─┴─────────────────────┘
//! ```
//!
//! Callees are held weakly: a GC sweep calls [`CallLinkInfo::visit_weak`] and
//! the slot resets itself if any cached callee died.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::CacheMode;
use crate::code_block::CodeBlock;
use crate::origin::{CallSiteIndex, CodeOrigin};
use crate::value::CellRef;

/// Kind of call the site performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    Call,
    Construct,
    TailCall,
    CallVarargs,
}

/// Compile-time template for a call site
#[derive(Debug, Clone, PartialEq)]
pub struct UnlinkedCallLinkInfo {
    pub code_origin: CodeOrigin,
    pub call_type: CallType,
    pub call_site_index: CallSiteIndex,
}

/// What [`CallLinkInfo::observe`] did with a callee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallLinkOutcome {
    /// Callee already cached
    Hit,
    /// First callee, site is now monomorphic
    LinkedMonomorphic,
    /// Callee appended to the polymorphic list
    AddedVariant,
    /// Site gave up caching
    Megamorphic,
}

/// Point-in-time copy of a call site for the background compiler
#[derive(Debug, Clone, PartialEq)]
pub struct CallLinkSnapshot {
    pub mode: CacheMode,
    pub call_type: CallType,
    pub callees: Vec<CellRef>,
}

/// Runtime state of one call site
#[derive(Debug)]
pub struct CallLinkInfo {
    code_origin: Option<CodeOrigin>,
    call_type: CallType,
    call_site_index: Option<CallSiteIndex>,
    owner: Weak<CodeBlock>,

    mode: AtomicU8,
    /// Monomorphic callee address, 0 when empty
    callee: AtomicU64,
    variants: Mutex<SmallVec<[CellRef; 4]>>,
    max_variants: usize,
}

impl CallLinkInfo {
    /// Empty slot not yet associated with a call site
    pub fn new(max_variants: usize) -> Self {
        CallLinkInfo {
            code_origin: None,
            call_type: CallType::Call,
            call_site_index: None,
            owner: Weak::new(),
            mode: AtomicU8::new(CacheMode::Uninitialized as u8),
            callee: AtomicU64::new(0),
            variants: Mutex::new(SmallVec::new()),
            max_variants: max_variants.max(1),
        }
    }

    /// Copy the template and associate the slot with its owning unit
    pub fn initialize_from_unlinked(
        &mut self,
        unlinked: &UnlinkedCallLinkInfo,
        owner: &Arc<CodeBlock>,
    ) {
        self.code_origin = Some(unlinked.code_origin);
        self.call_type = unlinked.call_type;
        self.call_site_index = Some(unlinked.call_site_index);
        self.owner = Arc::downgrade(owner);
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.code_origin.is_some()
    }

    #[inline]
    pub fn mode(&self) -> CacheMode {
        CacheMode::from(self.mode.load(Ordering::Acquire))
    }

    pub fn code_origin(&self) -> Option<CodeOrigin> {
        self.code_origin
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    pub fn call_site_index(&self) -> Option<CallSiteIndex> {
        self.call_site_index
    }

    pub fn owner(&self) -> Option<Arc<CodeBlock>> {
        self.owner.upgrade()
    }

    /// Monomorphic callee, if the site is monomorphic
    pub fn callee(&self) -> Option<CellRef> {
        if self.mode() != CacheMode::Monomorphic {
            return None;
        }
        match self.callee.load(Ordering::Acquire) {
            0 => None,
            bits => Some(CellRef::new(bits)),
        }
    }

    /// Claim an empty slot for `callee`
    ///
    /// This is the one transition raced by concurrent linkers; exactly one
    /// caller wins.
    pub fn try_link_monomorphic(&self, callee: CellRef) -> bool {
        if self
            .callee
            .compare_exchange(0, callee.as_u64(), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.mode
            .compare_exchange(
                CacheMode::Uninitialized as u8,
                CacheMode::Monomorphic as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Update the cache after a call reached `callee` through the slow path
    pub fn observe(&self, callee: CellRef) -> CallLinkOutcome {
        match self.mode() {
            CacheMode::Uninitialized => {
                if self.try_link_monomorphic(callee) {
                    return CallLinkOutcome::LinkedMonomorphic;
                }
                // Lost the race; fall through to the general path.
                self.observe_linked(callee)
            }
            CacheMode::Megamorphic => CallLinkOutcome::Megamorphic,
            _ => self.observe_linked(callee),
        }
    }

    fn observe_linked(&self, callee: CellRef) -> CallLinkOutcome {
        let mut variants = self.variants.lock();
        match self.mode() {
            CacheMode::Uninitialized => {
                // A reset happened between our mode read and the lock.
                drop(variants);
                if self.try_link_monomorphic(callee) {
                    CallLinkOutcome::LinkedMonomorphic
                } else {
                    CallLinkOutcome::Hit
                }
            }
            CacheMode::Monomorphic => {
                let current = self.callee.load(Ordering::Acquire);
                if current == callee.as_u64() {
                    return CallLinkOutcome::Hit;
                }
                if current != 0 {
                    variants.push(CellRef::new(current));
                }
                variants.push(callee);
                self.callee.store(0, Ordering::Release);
                self.transition_polymorphic(&variants)
            }
            CacheMode::Polymorphic => {
                if variants.contains(&callee) {
                    return CallLinkOutcome::Hit;
                }
                variants.push(callee);
                self.transition_polymorphic(&variants)
            }
            CacheMode::Megamorphic => CallLinkOutcome::Megamorphic,
        }
    }

    fn transition_polymorphic(&self, variants: &SmallVec<[CellRef; 4]>) -> CallLinkOutcome {
        if variants.len() > self.max_variants {
            self.mode.store(CacheMode::Megamorphic as u8, Ordering::Release);
            CallLinkOutcome::Megamorphic
        } else {
            self.mode.store(CacheMode::Polymorphic as u8, Ordering::Release);
            CallLinkOutcome::AddedVariant
        }
    }

    /// Return the slot to the uninitialized state
    ///
    /// Safe to call from a GC thread while the mutator is between bytecodes.
    pub fn reset(&self) {
        let mut variants = self.variants.lock();
        variants.clear();
        self.mode.store(CacheMode::Uninitialized as u8, Ordering::Release);
        self.callee.store(0, Ordering::Release);
    }

    /// Reset the slot if any cached callee is no longer live
    ///
    /// Returns whether the slot was reset.
    pub fn visit_weak(&self, is_live: impl Fn(CellRef) -> bool) -> bool {
        let dead = self.cached_callees().into_iter().any(|c| !is_live(c));
        if dead {
            self.reset();
        }
        dead
    }

    fn cached_callees(&self) -> Vec<CellRef> {
        let variants = self.variants.lock();
        match self.mode() {
            CacheMode::Monomorphic => match self.callee.load(Ordering::Acquire) {
                0 => Vec::new(),
                bits => vec![CellRef::new(bits)],
            },
            CacheMode::Polymorphic => variants.to_vec(),
            _ => Vec::new(),
        }
    }

    /// Consistent copy for the concurrent compiler
    pub fn snapshot(&self) -> CallLinkSnapshot {
        let callees = self.cached_callees();
        CallLinkSnapshot {
            mode: self.mode(),
            call_type: self.call_type,
            callees,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
