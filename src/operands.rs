//! Interpreter Operand Tables
//!
//! [`Operands`] stores one entry per interpreter-visible variable slot:
//! arguments first (including `this`), then locals. The same flat index is
//! used by the baseline frame layout, so operand `i` lives in interpreter
//! stack slot `i`.

use std::fmt;
use std::ops::{Index, IndexMut};

/// A single interpreter-visible variable slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operand {
    /// Argument slot (0 is `this`)
    Argument(u32),
    /// Local variable slot
    Local(u32),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Argument(i) => write!(f, "arg{}", i),
            Operand::Local(i) => write!(f, "loc{}", i),
        }
    }
}

/// Table of per-operand values
#[derive(Debug, Clone, PartialEq)]
pub struct Operands<T> {
    num_arguments: usize,
    values: Vec<T>,
}

impl<T> Operands<T> {
    /// Number of argument slots
    #[inline]
    pub fn num_arguments(&self) -> usize {
        self.num_arguments
    }

    /// Number of local slots
    #[inline]
    pub fn num_locals(&self) -> usize {
        self.values.len() - self.num_arguments
    }

    /// Total number of slots
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Flat index of an operand, if it is in range
    pub fn index_of(&self, operand: Operand) -> Option<usize> {
        let index = match operand {
            Operand::Argument(i) if (i as usize) < self.num_arguments => i as usize,
            Operand::Local(i) if (i as usize) < self.num_locals() => {
                self.num_arguments + i as usize
            }
            _ => return None,
        };
        Some(index)
    }

    /// Operand naming a flat index
    pub fn operand_for_index(&self, index: usize) -> Operand {
        if index < self.num_arguments {
            Operand::Argument(index as u32)
        } else {
            Operand::Local((index - self.num_arguments) as u32)
        }
    }

    pub fn get(&self, operand: Operand) -> Option<&T> {
        self.index_of(operand).map(|i| &self.values[i])
    }

    pub fn get_mut(&mut self, operand: Operand) -> Option<&mut T> {
        self.index_of(operand).map(move |i| &mut self.values[i])
    }

    pub fn argument(&self, i: u32) -> Option<&T> {
        self.get(Operand::Argument(i))
    }

    pub fn local(&self, i: u32) -> Option<&T> {
        self.get(Operand::Local(i))
    }

    /// Iterate `(operand, value)` pairs in flat order
    pub fn iter(&self) -> impl Iterator<Item = (Operand, &T)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(move |(i, v)| (self.operand_for_index(i), v))
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Same-shaped table built by mapping every entry
    pub fn map<U>(&self, mut f: impl FnMut(Operand, &T) -> U) -> Operands<U> {
        Operands {
            num_arguments: self.num_arguments,
            values: self
                .values
                .iter()
                .enumerate()
                .map(|(i, v)| f(self.operand_for_index(i), v))
                .collect(),
        }
    }
}

impl<T: Clone> Operands<T> {
    /// Table with every slot set to `fill`
    pub fn new(num_arguments: usize, num_locals: usize, fill: T) -> Self {
        Operands {
            num_arguments,
            values: vec![fill; num_arguments + num_locals],
        }
    }

    /// Table shaped like `other`, every slot set to `fill`
    pub fn like<U>(other: &Operands<U>, fill: T) -> Self {
        Operands::new(other.num_arguments(), other.num_locals(), fill)
    }
}

impl<T> Index<usize> for Operands<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.values[index]
    }
}

impl<T> IndexMut<usize> for Operands<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.values[index]
    }
}

impl<T> Index<Operand> for Operands<T> {
    type Output = T;

    fn index(&self, operand: Operand) -> &T {
        match self.index_of(operand) {
            Some(i) => &self.values[i],
            None => panic!("operand {} out of range", operand),
        }
    }
}

impl<T> IndexMut<Operand> for Operands<T> {
    fn index_mut(&mut self, operand: Operand) -> &mut T {
        match self.index_of(operand) {
            Some(i) => &mut self.values[i],
            None => panic!("operand {} out of range", operand),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
