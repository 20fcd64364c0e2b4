//! OSR entry data
//!
//! An optimized unit compiled with loop entrypoints can be entered from a
//! running baseline frame at a loop header. Each entrypoint records what the
//! optimized code assumed about every live variable; the baseline frame's
//! values must satisfy those assumptions before control is transferred.

use std::ops::{BitOr, BitOrAssign};

use crate::error::OsrEntryError;
use crate::operands::{Operand, Operands};
use crate::origin::BytecodeIndex;
use crate::tracked::TrackedReferences;
use crate::value::Value;

/// Bitmask of value types a speculation admits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SpeculatedType(u32);

impl SpeculatedType {
    pub const NONE: SpeculatedType = SpeculatedType(0);
    pub const INT32: SpeculatedType = SpeculatedType(1 << 0);
    pub const DOUBLE: SpeculatedType = SpeculatedType(1 << 1);
    pub const BOOLEAN: SpeculatedType = SpeculatedType(1 << 2);
    /// `undefined` and `null`
    pub const OTHER: SpeculatedType = SpeculatedType(1 << 3);
    pub const CELL: SpeculatedType = SpeculatedType(1 << 4);
    pub const NUMBER: SpeculatedType = SpeculatedType(Self::INT32.0 | Self::DOUBLE.0);
    pub const TOP: SpeculatedType =
        SpeculatedType(Self::NUMBER.0 | Self::BOOLEAN.0 | Self::OTHER.0 | Self::CELL.0);

    /// Narrowest type containing `value`
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Int32(_) => Self::INT32,
            Value::Double(_) => Self::DOUBLE,
            Value::Boolean(_) => Self::BOOLEAN,
            Value::Undefined | Value::Null => Self::OTHER,
            Value::Cell(_) => Self::CELL,
        }
    }

    #[inline]
    pub fn contains(self, other: SpeculatedType) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for SpeculatedType {
    type Output = SpeculatedType;

    fn bitor(self, rhs: Self) -> Self {
        SpeculatedType(self.0 | rhs.0)
    }
}

impl BitOrAssign for SpeculatedType {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// What the optimizer proved about one variable at an entrypoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbstractValue {
    pub types: SpeculatedType,
    /// Exact value, when the optimizer proved one
    pub constant: Option<Value>,
}

impl AbstractValue {
    /// Admits anything
    pub fn top() -> Self {
        AbstractValue {
            types: SpeculatedType::TOP,
            constant: None,
        }
    }

    pub fn of_type(types: SpeculatedType) -> Self {
        AbstractValue {
            types,
            constant: None,
        }
    }

    pub fn constant(value: Value) -> Self {
        AbstractValue {
            types: SpeculatedType::of(&value),
            constant: Some(value),
        }
    }

    /// Whether a concrete baseline value satisfies this abstraction
    pub fn validate(&self, value: &Value) -> bool {
        if let Some(expected) = &self.constant {
            return expected.is_identical(value);
        }
        self.types.contains(SpeculatedType::of(value))
    }
}

impl Default for AbstractValue {
    fn default() -> Self {
        AbstractValue::top()
    }
}

/// Move of a value between stack slots when entering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsrEntryReshuffling {
    pub from: Operand,
    pub to: Operand,
}

/// One loop entrypoint of an optimized unit
#[derive(Debug, Clone, PartialEq)]
pub struct OsrEntryData {
    pub bytecode_index: BytecodeIndex,
    /// Offset of the entrypoint in the unit's machine code
    pub machine_code_offset: u32,
    pub expected_values: Operands<AbstractValue>,
    /// Locals the optimized code keeps as unboxed doubles
    pub locals_forced_double: Vec<Operand>,
    pub reshufflings: Vec<OsrEntryReshuffling>,
}

impl OsrEntryData {
    pub fn new(
        bytecode_index: BytecodeIndex,
        machine_code_offset: u32,
        expected_values: Operands<AbstractValue>,
    ) -> Self {
        OsrEntryData {
            bytecode_index,
            machine_code_offset,
            expected_values,
            locals_forced_double: Vec::new(),
            reshufflings: Vec::new(),
        }
    }

    /// Check a baseline frame against this entrypoint and build its entry frame
    pub fn prepare(&self, baseline_values: &Operands<Value>) -> Result<OsrEntryPlan, OsrEntryError> {
        if baseline_values.len() != self.expected_values.len() {
            return Err(OsrEntryError::FrameShapeMismatch {
                expected: self.expected_values.len(),
                got: baseline_values.len(),
            });
        }

        let mut values = baseline_values.clone();
        for operand in &self.locals_forced_double {
            let value = baseline_values[*operand];
            match value.as_number() {
                Some(number) => values[*operand] = Value::Double(number),
                None => {
                    return Err(OsrEntryError::UnexpectedValue {
                        operand: *operand,
                        value,
                    })
                }
            }
        }

        for (operand, expected) in self.expected_values.iter() {
            let value = &values[operand];
            if !expected.validate(value) {
                return Err(OsrEntryError::UnexpectedValue {
                    operand,
                    value: *value,
                });
            }
        }

        let converted = values.clone();
        for shuffle in &self.reshufflings {
            values[shuffle.to] = converted[shuffle.from];
        }

        Ok(OsrEntryPlan {
            bytecode_index: self.bytecode_index,
            machine_code_offset: self.machine_code_offset,
            values,
        })
    }

    pub fn validate_references(&self, tracked: &TrackedReferences) {
        for value in self.expected_values.values() {
            if let Some(constant) = &value.constant {
                tracked.check_value(constant);
            }
        }
    }
}

/// Frame to install when jumping into optimized code
#[derive(Debug, Clone, PartialEq)]
pub struct OsrEntryPlan {
    pub bytecode_index: BytecodeIndex,
    pub machine_code_offset: u32,
    pub values: Operands<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> OsrEntryData {
        let mut expected = Operands::new(1, 2, AbstractValue::top());
        expected[Operand::Local(0)] = AbstractValue::of_type(SpeculatedType::INT32);
        expected[Operand::Local(1)] = AbstractValue::of_type(SpeculatedType::DOUBLE);
        let mut data = OsrEntryData::new(BytecodeIndex(12), 0x80, expected);
        data.locals_forced_double.push(Operand::Local(1));
        data
    }

    #[test]
    fn test_forced_double_is_converted() {
        let mut values = Operands::new(1, 2, Value::Undefined);
        values[Operand::Local(0)] = Value::Int32(1);
        values[Operand::Local(1)] = Value::Int32(7);
        let plan = entry().prepare(&values).unwrap();
        assert_eq!(plan.values[Operand::Local(1)], Value::Double(7.0));
        assert_eq!(plan.machine_code_offset, 0x80);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut values = Operands::new(1, 2, Value::Undefined);
        values[Operand::Local(0)] = Value::Boolean(true);
        values[Operand::Local(1)] = Value::Double(0.5);
        assert_eq!(
            entry().prepare(&values),
            Err(OsrEntryError::UnexpectedValue {
                operand: Operand::Local(0),
                value: Value::Boolean(true),
            })
        );
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let values = Operands::new(1, 1, Value::Undefined);
        assert_eq!(
            entry().prepare(&values),
            Err(OsrEntryError::FrameShapeMismatch { expected: 3, got: 2 })
        );
    }

    #[test]
    fn test_reshuffling_moves_converted_values() {
        let mut data = entry();
        data.reshufflings.push(OsrEntryReshuffling {
            from: Operand::Local(1),
            to: Operand::Argument(0),
        });
        let mut values = Operands::new(1, 2, Value::Undefined);
        values[Operand::Local(0)] = Value::Int32(1);
        values[Operand::Local(1)] = Value::Int32(3);
        let plan = data.prepare(&values).unwrap();
        assert_eq!(plan.values[Operand::Argument(0)], Value::Double(3.0));
    }

    #[test]
    fn test_constant_expectation_requires_identity() {
        let value = AbstractValue::constant(Value::Int32(4));
        assert!(value.validate(&Value::Int32(4)));
        assert!(!value.validate(&Value::Int32(5)));
        assert!(SpeculatedType::TOP.contains(SpeculatedType::CELL));
    }
}
