//! Variable event stream
//!
//! While generating code the optimizer logs, in program order, every change
//! to where a node's value lives and which interpreter variable currently
//! holds which node. Each OSR exit records its position in this log; replaying
//! the log up to that position yields a [`ValueRecovery`] per operand.
//!
//! ```text
//! index:   0      1          2                 3             4 ...
//! event:  Reset  Birth(@1)  Fill(@1, r0, JS)  MovHint(@1→loc0) ...
//!           ▲
//!           └── replay starts at the last Reset before the exit's index
//! ```
//!
//! Replay is a pure function of the stream, the minified graph and the index.

use std::collections::HashMap;

use super::minified::{MinifiedGraph, NodeId};
use super::registers::{Fpr, Gpr};
use super::value_recovery::{DataFormat, StackSlot, ValueRecovery};
use crate::operands::{Operand, Operands};

/// Register a node was filled into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterLocation {
    Gpr(Gpr),
    Fpr(Fpr),
}

/// One entry of the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableEvent {
    /// Start of a basic block; nothing before it is relevant
    Reset,
    /// Node started to exist
    Birth(NodeId),
    /// Node loaded into a register
    Fill {
        node: NodeId,
        location: RegisterLocation,
        format: DataFormat,
    },
    /// Node stored to a stack slot
    Spill {
        node: NodeId,
        slot: StackSlot,
        format: DataFormat,
    },
    /// Node no longer available anywhere
    Death(NodeId),
    /// Interpreter variable now holds the node's value
    MovHint { node: NodeId, operand: Operand },
    /// Interpreter variable flushed to a stack slot
    SetLocal {
        operand: Operand,
        slot: StackSlot,
        format: DataFormat,
    },
}

/// Where a node is available during replay
///
/// A spill takes the node out of its register; the register may be reused.
#[derive(Debug, Clone, Copy, Default)]
struct NodeLocation {
    register: Option<(RegisterLocation, DataFormat)>,
    spill: Option<(StackSlot, DataFormat)>,
}

/// What an operand is bound to during replay
#[derive(Debug, Clone, Copy)]
enum OperandSource {
    Canonical,
    Node(NodeId),
    Flushed(StackSlot, DataFormat),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableEventStream {
    events: Vec<VariableEvent>,
}

impl VariableEventStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, returning its index
    pub fn append(&mut self, event: VariableEvent) -> usize {
        self.events.push(event);
        self.events.len() - 1
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[VariableEvent] {
        &self.events
    }

    pub fn shrink_to_fit(&mut self) {
        self.events.shrink_to_fit();
    }

    /// Replay events `[last Reset, index)` into one recovery per operand
    ///
    /// Operands the replayed window never mentions are read from their
    /// canonical stack slot (the flat operand index) as boxed values.
    ///
    /// # Panics
    /// Panics if `index` is past the end of the stream.
    pub fn reconstruct(
        &self,
        num_arguments: usize,
        num_locals: usize,
        graph: &MinifiedGraph,
        index: usize,
    ) -> Operands<ValueRecovery> {
        assert!(
            index <= self.events.len(),
            "stream index {} past end of stream ({})",
            index,
            self.events.len()
        );

        let mut sources = Operands::new(num_arguments, num_locals, OperandSource::Canonical);
        let window = &self.events[..index];
        let start = window
            .iter()
            .rposition(|e| matches!(e, VariableEvent::Reset))
            .map_or(0, |reset| reset + 1);

        let mut nodes: HashMap<NodeId, NodeLocation> = HashMap::new();
        for event in &window[start..] {
            match *event {
                VariableEvent::Reset => {}
                VariableEvent::Birth(node) => {
                    nodes.insert(node, NodeLocation::default());
                }
                VariableEvent::Fill { node, location, format } => {
                    nodes.entry(node).or_default().register = Some((location, format));
                }
                VariableEvent::Spill { node, slot, format } => {
                    let location = nodes.entry(node).or_default();
                    location.register = None;
                    location.spill = Some((slot, format));
                }
                VariableEvent::Death(node) => {
                    nodes.remove(&node);
                }
                VariableEvent::MovHint { node, operand } => {
                    if let Some(source) = sources.get_mut(operand) {
                        *source = OperandSource::Node(node);
                    }
                }
                VariableEvent::SetLocal { operand, slot, format } => {
                    if let Some(source) = sources.get_mut(operand) {
                        *source = OperandSource::Flushed(slot, format);
                    }
                }
            }
        }

        sources.map(|operand, source| match *source {
            OperandSource::Canonical => {
                let slot = sources.index_of(operand).unwrap_or_default() as u32;
                ValueRecovery::Displaced(StackSlot(slot), DataFormat::JsValue)
            }
            OperandSource::Flushed(slot, format) => ValueRecovery::Displaced(slot, format),
            OperandSource::Node(node) => recovery_for_node(node, &nodes, graph),
        })
    }
}

/// Constant first, then the latest fill or spill
fn recovery_for_node(
    node: NodeId,
    nodes: &HashMap<NodeId, NodeLocation>,
    graph: &MinifiedGraph,
) -> ValueRecovery {
    if let Some(value) = graph.constant(node) {
        return ValueRecovery::Constant(value);
    }
    let Some(location) = nodes.get(&node) else {
        return ValueRecovery::Dead;
    };
    match (location.register, location.spill) {
        (Some((RegisterLocation::Gpr(gpr), format)), _) => ValueRecovery::InGpr(gpr, format),
        (Some((RegisterLocation::Fpr(fpr), _)), _) => ValueRecovery::InFpr(fpr),
        (None, Some((slot, format))) => ValueRecovery::Displaced(slot, format),
        (None, None) => ValueRecovery::Dead,
    }
}

// =============================================================================
// Tests
// =============================================================================
