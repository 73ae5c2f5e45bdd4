//! Graph Nodes
//!
//! This module defines the per-node record stored in the graph arena: the
//! node's identity, its settlement state machine, and the tagged slots that
//! describe what to run (receiver, work reference, arguments).
//!
//! A node settles at most once, from `Pending` to either `Fulfilled` or
//! `Rejected`, and never reverts. Everything else in the record exists to
//! decide *when* the work may start (the pending-dependency counter), *what*
//! to invoke (receiver/work/argument slots, resolved lazily at execution
//! time), and *who* to tell afterwards (observers and dependents).

use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::error::Outcome;
use crate::value::{Value, WorkFn};

/// Unique identifier for a node in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// The settlement state of a node.
///
/// Transitions at most once, `Pending` to one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Not yet settled; the only state that accepts mutation.
    Pending,

    /// The work completed and produced a value.
    Fulfilled,

    /// The work failed, a dependency failed, or the watchdog fired.
    Rejected,
}

impl Settlement {
    pub fn is_pending(&self) -> bool {
        matches!(self, Settlement::Pending)
    }

    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }
}

/// The receiver slot: a literal value, or a node whose fulfilled value is
/// unwrapped at execution time.
#[derive(Debug, Clone)]
pub enum Operand {
    Value(Value),
    Node(NodeId),
}

/// One position in a node's argument list.
///
/// The completion marker is an explicit variant rather than a reserved stub
/// value; exactly one is present in a fully assigned argument list (appended
/// automatically when the caller supplies none).
#[derive(Debug, Clone)]
pub enum Slot {
    /// A literal passed through unchanged.
    Value(Value),

    /// A node reference, unwrapped to its fulfilled value at execution time.
    Node(NodeId),

    /// The reserved completion-callback position.
    Completion,
}

impl Slot {
    /// A literal argument.
    pub fn lit(value: impl Into<Value>) -> Self {
        Slot::Value(value.into())
    }

    /// The completion-callback marker.
    pub fn done() -> Self {
        Slot::Completion
    }
}

/// The work reference: what to invoke once all dependencies have settled.
///
/// Resolved exactly once, at execution time, into a concrete callable.
#[derive(Clone)]
pub enum Work {
    /// A callable invoked directly.
    Callable(WorkFn),

    /// A member name looked up on the resolved receiver.
    Member(String),

    /// A node whose fulfilled value must be a callable.
    Node(NodeId),

    /// The pass-through default: completes immediately with no value.
    Noop,
}

impl std::fmt::Debug for Work {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Work::Callable(_) => f.write_str("Callable(..)"),
            Work::Member(name) => f.debug_tuple("Member").field(name).finish(),
            Work::Node(id) => f.debug_tuple("Node").field(id).finish(),
            Work::Noop => f.write_str("Noop"),
        }
    }
}

impl From<()> for Work {
    fn from(_: ()) -> Self {
        Work::Noop
    }
}

impl From<&str> for Work {
    fn from(name: &str) -> Self {
        Work::Member(name.to_string())
    }
}

impl From<String> for Work {
    fn from(name: String) -> Self {
        Work::Member(name)
    }
}

impl From<WorkFn> for Work {
    fn from(f: WorkFn) -> Self {
        Work::Callable(f)
    }
}

/// A listener awaiting a node's terminal outcome.
pub(crate) type Observer = Box<dyn FnOnce(Outcome)>;

/// The per-node record stored in the arena.
pub(crate) struct NodeState {
    pub(crate) settlement: Settlement,
    pub(crate) outcome: Option<Outcome>,
    pub(crate) receiver: Option<Operand>,
    pub(crate) work: Option<Work>,
    pub(crate) args: SmallVec<[Slot; 4]>,
    pub(crate) observers: Vec<Observer>,
    /// Count of not-yet-settled dependencies. Never goes negative; reaches
    /// zero at most once.
    pub(crate) pending: usize,
    /// Nodes waiting on this one, in registration order. Populated only
    /// while this node is pending; cleared after fan-out.
    pub(crate) dependents: SmallVec<[NodeId; 4]>,
    pub(crate) timer_armed: bool,
}

impl NodeState {
    pub(crate) fn new() -> Self {
        Self {
            settlement: Settlement::Pending,
            outcome: None,
            receiver: None,
            work: None,
            args: SmallVec::new(),
            observers: Vec::new(),
            pending: 0,
            dependents: SmallVec::new(),
            timer_armed: false,
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.settlement.is_pending()
    }

    /// Record the terminal outcome. Returns false (and changes nothing) when
    /// the node already settled.
    pub(crate) fn record(&mut self, outcome: Outcome) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.settlement = match outcome {
            Ok(_) => Settlement::Fulfilled,
            Err(_) => Settlement::Rejected,
        };
        self.outcome = Some(outcome);
        true
    }

    /// The outcome, present only once the node has settled.
    pub(crate) fn settled_outcome(&self) -> Option<Outcome> {
        match self.settlement {
            Settlement::Pending => None,
            _ => self.outcome.clone(),
        }
    }

    /// The fulfilled value, or `Null` when there is none to unwrap.
    pub(crate) fn fulfilled_value(&self) -> Value {
        match &self.outcome {
            Some(Ok(value)) => value.clone(),
            _ => Value::Null,
        }
    }
}
