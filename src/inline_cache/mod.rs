//! Inline Cache Slots
//!
//! Per-call-site ([`CallLinkInfo`]) and per-property-access-site
//! ([`StructureStubInfo`]) runtime caches. Both are created empty when a
//! compiled unit's `JitData` is allocated and initialized from compile-time
//! templates during linking.
//!
//! # Concurrency
//!
//! Each site has a single mutator at a time, but the background compiler may
//! read any site while the mutator runs, and a GC sweep may reset a site
//! between bytecodes. The cache mode is therefore an atomic, and the one hot
//! transition `Uninitialized → Monomorphic` is a compare-and-swap. Payloads
//! (variant lists, access cases) sit behind a narrow `parking_lot` lock.

pub mod call_link;
pub mod stub_info;

pub use call_link::{
    CallLinkInfo, CallLinkOutcome, CallLinkSnapshot, CallType, UnlinkedCallLinkInfo,
};
pub use stub_info::{
    AccessCase, AccessOutcome, AccessType, StubInfoSnapshot, StubRoutine, StructureStubInfo,
    UnlinkedStubInfo,
};

/// Caching mode shared by call and access sites
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CacheMode {
    /// Nothing cached yet
    Uninitialized = 0,
    /// Exactly one target/shape cached
    Monomorphic = 1,
    /// A bounded list of targets/shapes
    Polymorphic = 2,
    /// Too many targets; always take the generic path
    Megamorphic = 3,
}

impl From<u8> for CacheMode {
    fn from(v: u8) -> Self {
        match v {
            0 => CacheMode::Uninitialized,
            1 => CacheMode::Monomorphic,
            2 => CacheMode::Polymorphic,
            _ => CacheMode::Megamorphic,
        }
    }
}

impl Default for CacheMode {
    fn default() -> Self {
        CacheMode::Uninitialized
    }
}
