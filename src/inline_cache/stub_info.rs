//! Structure Stub Info
//!
//! Inline cache for one property access site. Each cached [`AccessCase`]
//! records the receiver structure, the slot offset, and the prototype chain
//! the lookup walked. Once a case list exists the site may own a generated
//! [`StubRoutine`] covering those cases.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::CacheMode;
use crate::code_block::CodeBlock;
use crate::origin::{CallSiteIndex, CodeOrigin};
use crate::osr::ExecutableMemoryHandle;
use crate::value::StructureId;

/// Kind of property access the site performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    GetById,
    PutById,
    InById,
    GetByVal,
    PutByVal,
    InstanceOf,
}

/// Compile-time template for an access site
#[derive(Debug, Clone, PartialEq)]
pub struct UnlinkedStubInfo {
    pub access_type: AccessType,
    pub code_origin: CodeOrigin,
    pub call_site_index: CallSiteIndex,
    /// Interned property name, absent for by-value accesses
    pub identifier: Option<u32>,
    /// Base is known to be an object at compile time
    pub prototype_is_known_object: bool,
}

/// One cached shape for an access site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCase {
    pub structure: StructureId,
    pub offset: u32,
    /// Structures along the prototype chain that must stay unchanged
    pub chain: SmallVec<[StructureId; 2]>,
}

impl AccessCase {
    pub fn own(structure: StructureId, offset: u32) -> Self {
        AccessCase {
            structure,
            offset,
            chain: SmallVec::new(),
        }
    }

    pub fn with_chain(structure: StructureId, offset: u32, chain: &[StructureId]) -> Self {
        AccessCase {
            structure,
            offset,
            chain: SmallVec::from_slice(chain),
        }
    }

    fn structures(&self) -> impl Iterator<Item = StructureId> + '_ {
        std::iter::once(self.structure).chain(self.chain.iter().copied())
    }
}

/// Generated fast-path code for the current case list
#[derive(Debug, Clone)]
pub struct StubRoutine {
    pub code: Arc<ExecutableMemoryHandle>,
}

/// What [`StructureStubInfo::add_case`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    /// Structure already cached
    Hit,
    /// First case, site is now monomorphic
    CachedMonomorphic,
    /// Case appended to the polymorphic list
    AddedCase,
    /// Site gave up caching
    Megamorphic,
}

/// Point-in-time copy of an access site for the background compiler
#[derive(Debug, Clone, PartialEq)]
pub struct StubInfoSnapshot {
    pub mode: CacheMode,
    pub access_type: AccessType,
    pub cases: Vec<AccessCase>,
    pub has_stub: bool,
}

#[derive(Debug, Default)]
struct StubCache {
    cases: SmallVec<[AccessCase; 4]>,
    stub: Option<StubRoutine>,
}

/// Runtime state of one property access site
#[derive(Debug)]
pub struct StructureStubInfo {
    access_type: AccessType,
    code_origin: Option<CodeOrigin>,
    call_site_index: Option<CallSiteIndex>,
    identifier: Option<u32>,
    prototype_is_known_object: bool,
    owner: Weak<CodeBlock>,

    mode: AtomicU8,
    cache: Mutex<StubCache>,
    max_cases: usize,
}

impl StructureStubInfo {
    pub fn new(max_cases: usize) -> Self {
        StructureStubInfo {
            access_type: AccessType::GetById,
            code_origin: None,
            call_site_index: None,
            identifier: None,
            prototype_is_known_object: false,
            owner: Weak::new(),
            mode: AtomicU8::new(CacheMode::Uninitialized as u8),
            cache: Mutex::new(StubCache::default()),
            max_cases: max_cases.max(1),
        }
    }

    /// Copy the template and associate the site with its owning unit
    pub fn initialize_from_unlinked(&mut self, unlinked: &UnlinkedStubInfo, owner: &Arc<CodeBlock>) {
        self.access_type = unlinked.access_type;
        self.code_origin = Some(unlinked.code_origin);
        self.call_site_index = Some(unlinked.call_site_index);
        self.identifier = unlinked.identifier;
        self.prototype_is_known_object = unlinked.prototype_is_known_object;
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

    pub fn access_type(&self) -> AccessType {
        self.access_type
    }

    pub fn code_origin(&self) -> Option<CodeOrigin> {
        self.code_origin
    }

    pub fn call_site_index(&self) -> Option<CallSiteIndex> {
        self.call_site_index
    }

    pub fn identifier(&self) -> Option<u32> {
        self.identifier
    }

    pub fn prototype_is_known_object(&self) -> bool {
        self.prototype_is_known_object
    }

    pub fn owner(&self) -> Option<Arc<CodeBlock>> {
        self.owner.upgrade()
    }

    /// Cached slot offset for a receiver structure
    pub fn lookup(&self, structure: StructureId) -> Option<u32> {
        if matches!(self.mode(), CacheMode::Uninitialized | CacheMode::Megamorphic) {
            return None;
        }
        self.cache
            .lock()
            .cases
            .iter()
            .find(|c| c.structure == structure)
            .map(|c| c.offset)
    }

    /// Record a case observed on the slow path
    pub fn add_case(&self, case: AccessCase) -> AccessOutcome {
        let mut cache = self.cache.lock();
        match self.mode() {
            CacheMode::Megamorphic => return AccessOutcome::Megamorphic,
            CacheMode::Uninitialized => {
                if self
                    .mode
                    .compare_exchange(
                        CacheMode::Uninitialized as u8,
                        CacheMode::Monomorphic as u8,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    cache.cases.clear();
                    cache.cases.push(case);
                    return AccessOutcome::CachedMonomorphic;
                }
            }
            _ => {}
        }

        if cache.cases.iter().any(|c| c.structure == case.structure) {
            return AccessOutcome::Hit;
        }
        cache.cases.push(case);
        // Any previously generated stub no longer covers every case.
        cache.stub = None;
        if cache.cases.len() > self.max_cases {
            cache.cases.clear();
            self.mode.store(CacheMode::Megamorphic as u8, Ordering::Release);
            AccessOutcome::Megamorphic
        } else {
            self.mode.store(CacheMode::Polymorphic as u8, Ordering::Release);
            AccessOutcome::AddedCase
        }
    }

    /// Install generated code for the current case list
    pub fn set_stub(&self, routine: StubRoutine) {
        self.cache.lock().stub = Some(routine);
    }

    pub fn has_stub(&self) -> bool {
        self.cache.lock().stub.is_some()
    }

    /// Return the site to the uninitialized state
    ///
    /// Safe to call from a GC thread while the mutator is between bytecodes.
    pub fn reset(&self) {
        let mut cache = self.cache.lock();
        cache.cases.clear();
        cache.stub = None;
        self.mode.store(CacheMode::Uninitialized as u8, Ordering::Release);
    }

    /// Reset the site if any structure it depends on died
    pub fn visit_weak(&self, is_live: impl Fn(StructureId) -> bool) -> bool {
        let dead = {
            let cache = self.cache.lock();
            let dead = cache
                .cases
                .iter()
                .flat_map(AccessCase::structures)
                .any(|s| !is_live(s));
            dead
        };
        if dead {
            self.reset();
        }
        dead
    }

    /// Consistent copy for the concurrent compiler
    pub fn snapshot(&self) -> StubInfoSnapshot {
        let cache = self.cache.lock();
        StubInfoSnapshot {
            mode: self.mode(),
            access_type: self.access_type,
            cases: cache.cases.to_vec(),
            has_stub: cache.stub.is_some(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_case_is_monomorphic() {
        let info = StructureStubInfo::new(4);
        assert_eq!(info.lookup(StructureId(1)), None);
        assert_eq!(
            info.add_case(AccessCase::own(StructureId(1), 16)),
            AccessOutcome::CachedMonomorphic
        );
        assert_eq!(info.mode(), CacheMode::Monomorphic);
        assert_eq!(info.lookup(StructureId(1)), Some(16));
        assert_eq!(
            info.add_case(AccessCase::own(StructureId(1), 16)),
            AccessOutcome::Hit
        );
    }

    #[test]
    fn test_case_limit_goes_megamorphic() {
        let info = StructureStubInfo::new(2);
        info.add_case(AccessCase::own(StructureId(1), 0));
        assert_eq!(info.add_case(AccessCase::own(StructureId(2), 8)), AccessOutcome::AddedCase);
        assert_eq!(info.add_case(AccessCase::own(StructureId(3), 8)), AccessOutcome::Megamorphic);
        assert_eq!(info.lookup(StructureId(1)), None);
        assert!(info.snapshot().cases.is_empty());
    }

    #[test]
    fn test_adding_case_drops_stale_stub() {
        let info = StructureStubInfo::new(4);
        info.add_case(AccessCase::own(StructureId(1), 0));
        info.set_stub(StubRoutine {
            code: Arc::new(ExecutableMemoryHandle::new(0x1000, 0x1040)),
        });
        assert!(info.has_stub());
        info.add_case(AccessCase::own(StructureId(2), 0));
        assert!(!info.has_stub());
    }

    #[test]
    fn test_visit_weak_checks_prototype_chain() {
        let info = StructureStubInfo::new(4);
        info.add_case(AccessCase::with_chain(
            StructureId(1),
            0,
            &[StructureId(7), StructureId(8)],
        ));
        assert!(!info.visit_weak(|_| true));
        assert!(info.visit_weak(|s| s != StructureId(8)));
        assert_eq!(info.mode(), CacheMode::Uninitialized);
    }
}
