//! Virtual machine context
//!
//! Holds what every code block of one VM shares: configuration, the generic
//! OSR exit thunk, the compiler worklist and the receiving end of the
//! jettison queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use crate::code_block::CodeBlock;
use crate::config::TierConfig;
use crate::osr::ExecutableMemoryHandle;
use crate::worklist::Worklist;

/// Where the shared exit thunk lives
const OSR_EXIT_THUNK_START: u64 = 0x7f00_0000_0000;
const OSR_EXIT_THUNK_SIZE: u64 = 0x200;

#[derive(Debug)]
pub struct Vm {
    config: Arc<TierConfig>,
    osr_exit_thunk: Arc<ExecutableMemoryHandle>,
    worklist: Worklist,
    reclaim_tx: Sender<Arc<CodeBlock>>,
    reclaim_rx: Receiver<Arc<CodeBlock>>,
    next_code_block_id: AtomicU64,
}

impl Vm {
    pub fn new(config: TierConfig) -> Self {
        let (reclaim_tx, reclaim_rx) = crossbeam_channel::unbounded();
        Vm {
            worklist: Worklist::new(config.compiler_threads),
            config: Arc::new(config),
            osr_exit_thunk: Arc::new(ExecutableMemoryHandle::new(
                OSR_EXIT_THUNK_START,
                OSR_EXIT_THUNK_START + OSR_EXIT_THUNK_SIZE,
            )),
            reclaim_tx,
            reclaim_rx,
            next_code_block_id: AtomicU64::new(1),
        }
    }

    #[inline]
    pub fn config(&self) -> &Arc<TierConfig> {
        &self.config
    }

    #[inline]
    pub fn osr_exit_thunk(&self) -> &Arc<ExecutableMemoryHandle> {
        &self.osr_exit_thunk
    }

    #[inline]
    pub fn worklist(&self) -> &Worklist {
        &self.worklist
    }

    pub(crate) fn next_code_block_id(&self) -> u64 {
        self.next_code_block_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn reclaim_sender(&self) -> Sender<Arc<CodeBlock>> {
        self.reclaim_tx.clone()
    }

    /// Jettisoned blocks waiting to be dropped
    pub fn pending_reclamations(&self) -> usize {
        self.reclaim_rx.len()
    }

    /// Drop every jettisoned block queued so far; returns how many
    ///
    /// Call from the mutator thread at a safe point.
    pub fn reclaim_jettisoned(&self) -> usize {
        let reclaimed = self.reclaim_rx.try_iter().count();
        if reclaimed > 0 {
            debug!(target: "osrtier::jettison::reclaim", reclaimed, "Reclaimed jettisoned code");
        }
        reclaimed
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new(TierConfig::default())
    }
}
