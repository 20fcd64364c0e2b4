//! On-Stack Replacement
//!
//! Exit records (optimized → baseline), entry data (baseline → optimized) and
//! the code handles exits jump through.
//!
//! Exits start out pointing at the VM's shared generic exit thunk. Because
//! that thunk serves every exit of every unit, a program counter inside it
//! says nothing about which exit was taken; PC lookup skips it.

pub mod code;
pub mod entry;
pub mod exit;

pub use code::ExecutableMemoryHandle;
pub use entry::{AbstractValue, OsrEntryData, OsrEntryPlan, OsrEntryReshuffling, SpeculatedType};
pub use exit::{ExitKind, ExitState, OsrExit};
