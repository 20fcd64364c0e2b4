//! Bytecode positions and code origins

use std::fmt;

/// Position of an instruction in a baseline code block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BytecodeIndex(pub u32);

impl BytecodeIndex {
    #[inline]
    pub fn offset(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for BytecodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bc#{}", self.0)
    }
}

/// Index of an inlined call frame within a compiled unit's common data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InlineCallFrameId(pub u32);

/// Describes a callee inlined into an optimized unit
#[derive(Debug, Clone, PartialEq)]
pub struct InlineCallFrame {
    /// Where the inlined call happened in the caller
    pub caller: CodeOrigin,
    /// Stack offset of the inlined frame relative to the machine frame
    pub stack_offset: i32,
    /// Argument count the inlined callee was compiled for
    pub argument_count: u32,
}

/// Bytecode position plus inlining context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeOrigin {
    pub bytecode_index: BytecodeIndex,
    pub inline_call_frame: Option<InlineCallFrameId>,
}

impl CodeOrigin {
    /// Origin in the outermost (machine) frame
    pub fn new(bytecode_index: BytecodeIndex) -> Self {
        CodeOrigin {
            bytecode_index,
            inline_call_frame: None,
        }
    }

    /// Origin inside an inlined callee
    pub fn inlined(bytecode_index: BytecodeIndex, frame: InlineCallFrameId) -> Self {
        CodeOrigin {
            bytecode_index,
            inline_call_frame: Some(frame),
        }
    }

    #[inline]
    pub fn is_inlined(&self) -> bool {
        self.inline_call_frame.is_some()
    }
}

impl fmt::Display for CodeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inline_call_frame {
            Some(frame) => write!(f, "{} (inlined #{})", self.bytecode_index, frame.0),
            None => write!(f, "{}", self.bytecode_index),
        }
    }
}

/// Identity of a call site that may throw, used to find exception handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSiteIndex(pub u32);

impl CallSiteIndex {
    #[inline]
    pub fn bits(&self) -> u32 {
        self.0
    }
}
