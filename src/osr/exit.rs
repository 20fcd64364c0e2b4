//! OSR exit records

use crate::operands::Operands;
use crate::origin::{BytecodeIndex, CallSiteIndex, CodeOrigin};
use crate::value::Value;

/// Why a speculation check failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitKind {
    BadType,
    BadCell,
    BadIndexingType,
    Overflow,
    OutOfBounds,
    NegativeZero,
    Uncountable,
    /// Exit into a baseline exception handler after a call threw
    ExceptionCheck,
    /// Unwind into a handler through the generic path
    GenericUnwind,
}

/// One side exit of an optimized unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsrExit {
    /// Where execution resumes in the baseline tier
    pub code_origin: CodeOrigin,
    /// Origin whose profile is blamed for the exit
    pub code_origin_for_exit_profile: CodeOrigin,
    /// Position in the variable event stream
    pub stream_index: usize,
    /// Call site whose exception handler this exit implements
    pub exception_handler: Option<CallSiteIndex>,
    pub kind: ExitKind,
}

impl OsrExit {
    pub fn new(code_origin: CodeOrigin, stream_index: usize, kind: ExitKind) -> Self {
        OsrExit {
            code_origin,
            code_origin_for_exit_profile: code_origin,
            stream_index,
            exception_handler: None,
            kind,
        }
    }

    /// Mark this exit as the exception handler for `call_site`
    pub fn for_exception_handler(mut self, call_site: CallSiteIndex) -> Self {
        self.exception_handler = Some(call_site);
        self
    }

    #[inline]
    pub fn is_exception_handler(&self) -> bool {
        self.exception_handler.is_some()
    }
}

/// Interpreter state handed to the baseline tier after an exit
#[derive(Debug, Clone, PartialEq)]
pub struct ExitState {
    pub bytecode_index: BytecodeIndex,
    pub code_origin: CodeOrigin,
    /// `None` for dead variables
    pub values: Operands<Option<Value>>,
    /// Exit count of the unit after this exit
    pub total_exit_count: u32,
    /// This exit pushed the unit over the reoptimization limit
    pub triggered_jettison: bool,
}
