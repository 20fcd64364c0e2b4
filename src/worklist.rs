//! Background compilation worklist
//!
//! Tier-up requests become [`Plan`]s that run on a dedicated rayon pool.
//! Finished plans travel back over a crossbeam channel and are applied by
//! the mutator in [`Worklist::complete_ready`].
//!
//! A plan only holds its requesting block weakly. If the block dies or is
//! jettisoned before or during compilation, the plan finishes as a no-op.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use dashmap::DashMap;
use tracing::{debug, trace, warn};

use crate::code_block::CodeBlock;
use crate::origin::BytecodeIndex;
use crate::tier_up::CompilationResult;

/// What the external compiler produced for a plan
#[derive(Debug)]
pub enum PlanOutcome {
    /// New code block, already installed and linked
    Compiled(Arc<CodeBlock>),
    Failed,
    /// Compiler declined to run now
    Deferred,
    /// Requesting block was gone or invalid when the plan ran
    Cancelled,
}

/// Compiler entry point run on a worker thread
pub type CompileFn = Box<dyn FnOnce(&Arc<CodeBlock>) -> PlanOutcome + Send + 'static>;

/// One queued compilation request
pub struct Plan {
    key: u64,
    target: Weak<CodeBlock>,
    osr_entry: Option<BytecodeIndex>,
    compile: CompileFn,
}

impl Plan {
    pub fn new(target: &Arc<CodeBlock>, osr_entry: Option<BytecodeIndex>, compile: CompileFn) -> Self {
        Plan {
            key: target.id(),
            target: Arc::downgrade(target),
            osr_entry,
            compile,
        }
    }

    pub fn osr_entry(&self) -> Option<BytecodeIndex> {
        self.osr_entry
    }

    fn run(self) -> FinishedPlan {
        let outcome = match self.target.upgrade() {
            Some(target) if !target.is_invalidated() => (self.compile)(&target),
            _ => PlanOutcome::Cancelled,
        };
        FinishedPlan {
            key: self.key,
            target: self.target,
            osr_entry: self.osr_entry,
            outcome,
        }
    }
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("key", &self.key)
            .field("osr_entry", &self.osr_entry)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct FinishedPlan {
    key: u64,
    target: Weak<CodeBlock>,
    osr_entry: Option<BytecodeIndex>,
    outcome: PlanOutcome,
}

#[derive(Debug)]
pub struct Worklist {
    pool: Option<rayon::ThreadPool>,
    in_flight: DashMap<u64, Option<BytecodeIndex>>,
    finished_tx: Sender<FinishedPlan>,
    finished_rx: Receiver<FinishedPlan>,
}

impl Worklist {
    /// Worklist with `threads` compiler threads
    ///
    /// Falls back to rayon's global pool if a dedicated pool cannot be built.
    pub fn new(threads: usize) -> Self {
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("osrtier-compiler-{}", i))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(err) => {
                warn!(target: "osrtier::worklist", %err, "Using global rayon pool");
                None
            }
        };
        let (finished_tx, finished_rx) = crossbeam_channel::unbounded();
        Worklist {
            pool,
            in_flight: DashMap::new(),
            finished_tx,
            finished_rx,
        }
    }

    pub fn is_queued(&self, code_block: &CodeBlock) -> bool {
        self.in_flight.contains_key(&code_block.id())
    }

    /// Plans submitted but not yet applied
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Queue a plan; returns `false` if one for the same block is in flight
    pub fn submit(&self, plan: Plan) -> bool {
        match self.in_flight.entry(plan.key) {
            dashmap::mapref::entry::Entry::Occupied(_) => return false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(plan.osr_entry);
            }
        }
        debug!(
            target: "osrtier::worklist::submit",
            code_block = plan.key,
            osr_entry = ?plan.osr_entry,
            "Queued compilation"
        );

        let tx = self.finished_tx.clone();
        let task = move || {
            let finished = plan.run();
            // Receiver only goes away with the worklist itself.
            let _ = tx.send(finished);
        };
        match &self.pool {
            Some(pool) => pool.spawn(task),
            None => rayon::spawn(task),
        }
        true
    }

    /// Apply every finished plan without blocking; returns how many
    pub fn complete_ready(&self) -> usize {
        let mut applied = 0;
        while let Ok(finished) = self.finished_rx.try_recv() {
            self.apply(finished);
            applied += 1;
        }
        applied
    }

    /// Block until nothing is in flight or `timeout` passes
    pub fn complete_all(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut applied = 0;
        while !self.in_flight.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.finished_rx.recv_timeout(remaining) {
                Ok(finished) => {
                    self.apply(finished);
                    applied += 1;
                }
                Err(_) => break,
            }
        }
        applied
    }

    fn apply(&self, finished: FinishedPlan) {
        self.in_flight.remove(&finished.key);

        let Some(target) = finished.target.upgrade() else {
            trace!(target: "osrtier::worklist::complete", code_block = finished.key, "Requester gone; discarding");
            return;
        };
        let Some(jit_code) = target.jit_code() else {
            return;
        };

        let result = match finished.outcome {
            PlanOutcome::Cancelled => {
                debug!(target: "osrtier::worklist::complete", code_block = finished.key, "Plan cancelled");
                return;
            }
            _ if target.is_invalidated() => CompilationResult::Invalidated,
            PlanOutcome::Compiled(compiled) => {
                if compiled.is_invalidated() {
                    CompilationResult::Invalidated
                } else {
                    if finished.osr_entry.is_some() {
                        jit_code.set_osr_entry_block(&target, compiled);
                    }
                    CompilationResult::Successful
                }
            }
            PlanOutcome::Failed => CompilationResult::Failed,
            PlanOutcome::Deferred => CompilationResult::Deferred,
        };

        debug!(
            target: "osrtier::worklist::complete",
            code_block = finished.key,
            ?result,
            "Applying compilation result"
        );
        jit_code.set_optimization_threshold_based_on_compilation_result(&target, result);
    }
}
