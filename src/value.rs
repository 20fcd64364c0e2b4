//! Runtime Values and Cell Identities
//!
//! The optimizing tier never owns heap objects. It only refers to them through
//! opaque identities ([`CellRef`], [`StructureId`]) handed out by the object
//! model and the garbage collector.
//!
//! [`Value`] is the interpreter-visible value. Registers and stack slots that
//! hold a full `JSValue` use the 64-bit NaN-boxed encoding below:
//!
//! ```text
//! Int32:   0xFFFE_0000_xxxx_xxxx
//! Double:  raw bits + 2^49
//! Null:    0x02      False: 0x06      True: 0x07      Undefined: 0x0A
//! Cell:    pointer bits (non-zero, 8-byte aligned, below 2^48)
//! ```

use std::fmt;

/// Tag bits shared by every boxed number
const NUMBER_TAG: u64 = 0xFFFE_0000_0000_0000;

/// Offset added to double bit patterns so they never collide with cells
const DOUBLE_ENCODE_OFFSET: u64 = 1 << 49;

const VALUE_NULL: u64 = 0x02;
const VALUE_FALSE: u64 = 0x06;
const VALUE_TRUE: u64 = 0x07;
const VALUE_UNDEFINED: u64 = 0x0A;

/// Highest address a cell may live at
const CELL_ADDRESS_LIMIT: u64 = 1 << 48;

/// Opaque identity of a garbage-collected cell
///
/// The raw bits are the cell address, so a `CellRef` can be stored directly
/// in a boxed value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef(u64);

impl CellRef {
    /// Create a cell reference from an address
    ///
    /// # Panics
    /// Panics if the address is null, unaligned or outside the 48-bit
    /// address space. Such an address cannot come from the heap.
    pub fn new(address: u64) -> Self {
        assert!(
            Self::is_valid_address(address),
            "invalid cell address {:#x}",
            address
        );
        CellRef(address)
    }

    /// Check whether an address could name a heap cell
    #[inline]
    pub fn is_valid_address(address: u64) -> bool {
        address != 0 && address & 0x7 == 0 && address < CELL_ADDRESS_LIMIT
    }

    /// Raw address bits
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cell({:#x})", self.0)
    }
}

/// Identity of an object layout (hidden class)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructureId(pub u32);

/// Interpreter-visible value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Boolean(bool),
    Int32(i32),
    Double(f64),
    Cell(CellRef),
}

impl Value {
    /// Box this value into its 64-bit register representation
    pub fn encode(&self) -> u64 {
        match *self {
            Value::Undefined => VALUE_UNDEFINED,
            Value::Null => VALUE_NULL,
            Value::Boolean(false) => VALUE_FALSE,
            Value::Boolean(true) => VALUE_TRUE,
            Value::Int32(i) => NUMBER_TAG | (i as u32 as u64),
            Value::Double(d) => d.to_bits().wrapping_add(DOUBLE_ENCODE_OFFSET),
            Value::Cell(cell) => cell.as_u64(),
        }
    }

    /// Unbox a 64-bit register representation
    ///
    /// Returns `None` for bit patterns no value encodes to.
    pub fn decode(bits: u64) -> Option<Self> {
        if bits & NUMBER_TAG == NUMBER_TAG {
            return Some(Value::Int32(bits as u32 as i32));
        }
        if bits & NUMBER_TAG != 0 {
            return Some(Value::Double(f64::from_bits(
                bits.wrapping_sub(DOUBLE_ENCODE_OFFSET),
            )));
        }
        match bits {
            VALUE_UNDEFINED => Some(Value::Undefined),
            VALUE_NULL => Some(Value::Null),
            VALUE_FALSE => Some(Value::Boolean(false)),
            VALUE_TRUE => Some(Value::Boolean(true)),
            _ if CellRef::is_valid_address(bits) => Some(Value::Cell(CellRef(bits))),
            _ => None,
        }
    }

    /// The cell this value points at, if any
    #[inline]
    pub fn as_cell(&self) -> Option<CellRef> {
        match self {
            Value::Cell(cell) => Some(*cell),
            _ => None,
        }
    }

    /// Numeric view used when a local is forced to double format
    pub fn as_number(&self) -> Option<f64> {
        match *self {
            Value::Int32(i) => Some(i as f64),
            Value::Double(d) => Some(d),
            _ => None,
        }
    }

    /// Bitwise identity, treating NaNs with equal payloads as equal
    pub fn is_identical(&self, other: &Value) -> bool {
        self.encode() == other.encode()
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Undefined
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int32(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Cell(cell) => write!(f, "{:?}", cell),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
