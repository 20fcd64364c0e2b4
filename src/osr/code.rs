//! Handles to generated machine code

use std::fmt;

/// Half-open address range `[start, end)` of one piece of generated code
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ExecutableMemoryHandle {
    start: u64,
    end: u64,
}

impl ExecutableMemoryHandle {
    pub fn new(start: u64, end: u64) -> Self {
        assert!(start <= end, "code range {:#x}..{:#x} is inverted", start, end);
        ExecutableMemoryHandle { start, end }
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    #[inline]
    pub fn contains(&self, pc: u64) -> bool {
        self.start <= pc && pc < self.end
    }
}

impl fmt::Debug for ExecutableMemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code({:#x}..{:#x})", self.start, self.end)
    }
}
