//! State Recovery
//!
//! Everything needed to rebuild interpreter-visible state from a suspended
//! optimized frame: machine registers, recovery descriptors, the variable
//! event stream and the minified graph it refers to.

pub mod events;
pub mod minified;
pub mod registers;
pub mod value_recovery;

pub use events::{RegisterLocation, VariableEvent, VariableEventStream};
pub use minified::{MinifiedGraph, MinifiedNode, NodeId};
pub use registers::{Fpr, Gpr, MachineFrame, RegisterSet, NUM_FPRS, NUM_GPRS};
pub use value_recovery::{DataFormat, StackSlot, ValueRecovery};
