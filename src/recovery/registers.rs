//! Machine registers and the frame view used during OSR exit

use std::fmt;
use std::marker::PhantomData;

pub const NUM_GPRS: usize = 16;
pub const NUM_FPRS: usize = 16;

/// General-purpose register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Gpr(u8);

impl Gpr {
    pub fn new(index: u8) -> Self {
        assert!((index as usize) < NUM_GPRS, "gpr index {} out of range", index);
        Gpr(index)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Floating-point register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fpr(u8);

impl Fpr {
    pub fn new(index: u8) -> Self {
        assert!((index as usize) < NUM_FPRS, "fpr index {} out of range", index);
        Fpr(index)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Fpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// Bitset of GPRs and FPRs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RegisterSet {
    gprs: u16,
    fprs: u16,
}

impl RegisterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_gpr(&mut self, gpr: Gpr) {
        self.gprs |= 1 << gpr.0;
    }

    pub fn add_fpr(&mut self, fpr: Fpr) {
        self.fprs |= 1 << fpr.0;
    }

    pub fn contains_gpr(&self, gpr: Gpr) -> bool {
        self.gprs & (1 << gpr.0) != 0
    }

    pub fn contains_fpr(&self, fpr: Fpr) -> bool {
        self.fprs & (1 << fpr.0) != 0
    }

    pub fn len(&self) -> usize {
        (self.gprs.count_ones() + self.fprs.count_ones()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.gprs == 0 && self.fprs == 0
    }

    pub fn merge(&mut self, other: RegisterSet) {
        self.gprs |= other.gprs;
        self.fprs |= other.fprs;
    }

    pub fn gprs(&self) -> impl Iterator<Item = Gpr> + '_ {
        (0..NUM_GPRS as u8).map(Gpr).filter(|g| self.contains_gpr(*g))
    }

    pub fn fprs(&self) -> impl Iterator<Item = Fpr> + '_ {
        (0..NUM_FPRS as u8).map(Fpr).filter(|f| self.contains_fpr(*f))
    }
}

/// Register file and stack of a suspended optimized frame
///
/// Not `Send`: a frame may only be inspected by the thread that owns it.
#[derive(Debug, Clone)]
pub struct MachineFrame {
    gprs: [u64; NUM_GPRS],
    fprs: [f64; NUM_FPRS],
    stack: Vec<u64>,
    _owner: PhantomData<*const ()>,
}

impl MachineFrame {
    /// Zeroed registers and `stack_slots` zeroed stack slots
    pub fn new(stack_slots: usize) -> Self {
        MachineFrame {
            gprs: [0; NUM_GPRS],
            fprs: [0.0; NUM_FPRS],
            stack: vec![0; stack_slots],
            _owner: PhantomData,
        }
    }

    #[inline]
    pub fn gpr(&self, gpr: Gpr) -> u64 {
        self.gprs[gpr.index()]
    }

    pub fn set_gpr(&mut self, gpr: Gpr, bits: u64) {
        self.gprs[gpr.index()] = bits;
    }

    #[inline]
    pub fn fpr(&self, fpr: Fpr) -> f64 {
        self.fprs[fpr.index()]
    }

    pub fn set_fpr(&mut self, fpr: Fpr, value: f64) {
        self.fprs[fpr.index()] = value;
    }

    /// Stack slot contents, `None` past the end of the frame
    #[inline]
    pub fn slot(&self, index: usize) -> Option<u64> {
        self.stack.get(index).copied()
    }

    /// Write a stack slot, growing the frame if needed
    pub fn set_slot(&mut self, index: usize, bits: u64) {
        if index >= self.stack.len() {
            self.stack.resize(index + 1, 0);
        }
        self.stack[index] = bits;
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_set_membership() {
        let mut set = RegisterSet::new();
        assert!(set.is_empty());
        set.add_gpr(Gpr::new(0));
        set.add_gpr(Gpr::new(15));
        set.add_fpr(Fpr::new(3));
        assert_eq!(set.len(), 3);
        assert!(set.contains_gpr(Gpr::new(15)));
        assert!(!set.contains_fpr(Fpr::new(0)));
        assert_eq!(set.gprs().collect::<Vec<_>>(), vec![Gpr::new(0), Gpr::new(15)]);
    }

    #[test]
    #[should_panic(expected = "gpr index 16 out of range")]
    fn test_gpr_out_of_range() {
        Gpr::new(16);
    }

    #[test]
    fn test_frame_slots_grow() {
        let mut frame = MachineFrame::new(2);
        assert_eq!(frame.slot(5), None);
        frame.set_slot(5, 9);
        assert_eq!(frame.slot(5), Some(9));
        assert_eq!(frame.stack_len(), 6);
    }
}
