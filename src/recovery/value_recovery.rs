//! Value recovery descriptors
//!
//! A [`ValueRecovery`] says where the optimized code keeps an interpreter
//! variable at one exit point and in which representation. Recovering it
//! against a [`MachineFrame`] produces the boxed [`Value`] the baseline tier
//! expects.

use std::fmt;

use super::registers::{Fpr, Gpr, MachineFrame, RegisterSet};
use crate::value::{CellRef, Value};

/// Representation of a value held in a register or stack slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFormat {
    /// Unboxed 32-bit integer in the low bits
    Int32,
    /// Raw IEEE-754 bits
    Double,
    /// 0 or 1
    Boolean,
    /// Cell pointer
    Cell,
    /// Fully boxed value
    JsValue,
}

impl DataFormat {
    /// Decode raw bits stored in this format
    pub fn decode(self, bits: u64) -> Option<Value> {
        match self {
            DataFormat::Int32 => Some(Value::Int32(bits as u32 as i32)),
            DataFormat::Double => Some(Value::Double(f64::from_bits(bits))),
            DataFormat::Boolean => Some(Value::Boolean(bits & 1 != 0)),
            DataFormat::Cell => {
                CellRef::is_valid_address(bits).then(|| Value::Cell(CellRef::new(bits)))
            }
            DataFormat::JsValue => Value::decode(bits),
        }
    }
}

/// Stack slot in the optimized frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackSlot(pub u32);

/// Where one variable lives at an exit point
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRecovery {
    InGpr(Gpr, DataFormat),
    InFpr(Fpr),
    Displaced(StackSlot, DataFormat),
    Constant(Value),
    /// No live value; the baseline tier sees `undefined`
    Dead,
}

impl ValueRecovery {
    #[inline]
    pub fn is_in_gpr(&self) -> bool {
        matches!(self, ValueRecovery::InGpr(..))
    }

    #[inline]
    pub fn is_in_fpr(&self) -> bool {
        matches!(self, ValueRecovery::InFpr(_))
    }

    #[inline]
    pub fn is_in_registers(&self) -> bool {
        self.is_in_gpr() || self.is_in_fpr()
    }

    /// Add the register this recovery reads, if any
    pub fn add_registers_to(&self, set: &mut RegisterSet) {
        match *self {
            ValueRecovery::InGpr(gpr, _) => set.add_gpr(gpr),
            ValueRecovery::InFpr(fpr) => set.add_fpr(fpr),
            _ => {}
        }
    }

    /// Materialize the value from a suspended frame
    ///
    /// Returns `None` for dead variables and for bits that do not decode in
    /// the recorded format.
    pub fn recover(&self, frame: &MachineFrame) -> Option<Value> {
        match *self {
            ValueRecovery::InGpr(gpr, format) => format.decode(frame.gpr(gpr)),
            ValueRecovery::InFpr(fpr) => Some(Value::Double(frame.fpr(fpr))),
            ValueRecovery::Displaced(slot, format) => {
                frame.slot(slot.0 as usize).and_then(|bits| format.decode(bits))
            }
            ValueRecovery::Constant(value) => Some(value),
            ValueRecovery::Dead => None,
        }
    }
}

impl fmt::Display for ValueRecovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueRecovery::InGpr(gpr, format) => write!(f, "{}:{:?}", gpr, format),
            ValueRecovery::InFpr(fpr) => write!(f, "{}", fpr),
            ValueRecovery::Displaced(slot, format) => write!(f, "stack[{}]:{:?}", slot.0, format),
            ValueRecovery::Constant(value) => write!(f, "const({})", value),
            ValueRecovery::Dead => write!(f, "dead"),
        }
    }
}
