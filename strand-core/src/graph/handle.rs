//! Public Handles
//!
//! `Graph` owns the arena; `Node` is a cheap cloneable handle (shared arena
//! plus an id) exposing the chaining API: link dependencies, assign the
//! receiver and the work, register observers, arm the watchdog, inspect the
//! outcome. `Completion` is the settle-once callback a work function invokes
//! to report its result, and `Call` is the fully resolved invocation the
//! work function receives.
//!
//! # Example
//!
//! ```rust,ignore
//! use strand_core::graph::{Call, Graph, Work};
//! use strand_core::value::Value;
//!
//! let graph = Graph::new();
//!
//! let fetch = graph.call(
//!     Work::func(|call: Call| {
//!         // kick off some async work, then:
//!         call.done.fulfill("payload");
//!     }),
//!     (),
//! );
//!
//! // Runs only after `fetch` fulfills; rejects immediately if it fails.
//! let parse = graph.after(&fetch);
//! parse.set_work(Work::func(|call: Call| call.done.fulfill(())), ());
//! parse.on_settled(|outcome| println!("{outcome:?}"));
//! ```

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use smallvec::{smallvec, SmallVec};

use crate::error::{Fault, Outcome};
use crate::graph::engine::{Shared, SharedWeak};
use crate::graph::node::{NodeId, Operand, Settlement, Slot, Work};
use crate::host::{Host, TokioHost};
use crate::value::Value;

/// A dependency graph of settle-once nodes.
///
/// All nodes created through a graph share one arena and one host; they are
/// retained until the graph (and every handle cloned from it) is dropped.
#[derive(Clone)]
pub struct Graph {
    shared: Shared,
}

impl Graph {
    /// Create a graph driven by [`TokioHost`].
    ///
    /// The graph must then run inside a `tokio::task::LocalSet` on a
    /// current-thread runtime.
    pub fn new() -> Self {
        Self::with_host(TokioHost::new())
    }

    /// Create a graph driven by an injected host.
    pub fn with_host(host: Rc<dyn Host>) -> Self {
        Self {
            shared: Shared::with_host(host),
        }
    }

    /// Create a fresh pending node.
    pub fn node(&self) -> Node {
        Node {
            id: self.shared.insert(),
            shared: self.shared.clone(),
        }
    }

    /// Create a node that waits on `deps`.
    pub fn after(&self, deps: impl IntoDependencies) -> Node {
        let node = self.node();
        node.add_dependencies(deps);
        node
    }

    /// Create a node with its receiver already assigned.
    pub fn with_receiver(&self, receiver: impl Into<Operand>) -> Node {
        let node = self.node();
        node.set_receiver(receiver);
        node
    }

    /// Create a node with its work already assigned.
    pub fn call(&self, work: impl Into<Work>, args: impl IntoSlots) -> Node {
        let node = self.node();
        node.set_work(work, args);
        node
    }

    /// Total number of nodes in the arena.
    pub fn node_count(&self) -> usize {
        self.shared.node_count()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("node_count", &self.node_count())
            .finish()
    }
}

/// A handle to one node in the graph.
///
/// Handles are cheap clones; every clone addresses the same underlying node.
#[derive(Clone)]
pub struct Node {
    shared: Shared,
    id: NodeId,
}

impl Node {
    /// The node's stable identifier.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Link this node to each candidate dependency, in order.
    ///
    /// A settled node accepts no new edges (the whole call is inert). A
    /// pending candidate registers this node and bumps its pending counter;
    /// a rejected candidate forces this node to the same rejection and makes
    /// the rest of the call inert; a fulfilled candidate is already
    /// satisfied.
    pub fn add_dependencies(&self, deps: impl IntoDependencies) -> &Self {
        let ids = deps.into_ids();
        self.shared.link(self.id, &ids);
        self
    }

    /// Assign the receiver: a literal value, or a node whose fulfilled value
    /// is unwrapped at execution time (the node is also linked as a
    /// dependency).
    ///
    /// # Panics
    ///
    /// Panics when the receiver or the work is already assigned.
    pub fn set_receiver(&self, receiver: impl Into<Operand>) -> &Self {
        self.shared.assign_receiver(self.id, receiver.into());
        self
    }

    /// Assign the unit of work and its arguments.
    ///
    /// Work may be a callable, a member name resolved on the receiver, a
    /// node producing a callable, or `()` for the pass-through default. Node
    /// arguments are linked as dependencies; a completion slot is appended
    /// when the arguments carry none.
    ///
    /// # Panics
    ///
    /// Panics when work is already assigned.
    pub fn set_work(&self, work: impl Into<Work>, args: impl IntoSlots) -> &Self {
        self.shared.assign_work(self.id, work.into(), args.into_slots());
        self
    }

    /// Register a listener for the terminal outcome. A settled node replays
    /// queued listeners immediately, in registration order.
    pub fn on_settled<F>(&self, listener: F)
    where
        F: FnOnce(Outcome) + 'static,
    {
        self.shared.observe(self.id, Box::new(listener));
    }

    /// Arm the watchdog: after `after`, a still-pending node is forced to
    /// reject with [`Fault::Timeout`]. A second call on a node that already
    /// has a timer is a no-op.
    pub fn attach_timeout(&self, after: Duration) -> &Self {
        self.shared.arm_timeout(self.id, after);
        self
    }

    /// Current settlement state.
    pub fn settlement(&self) -> Settlement {
        self.shared.settlement(self.id)
    }

    /// The terminal outcome, once settled.
    pub fn outcome(&self) -> Option<Outcome> {
        self.shared.outcome(self.id)
    }

    /// The fulfilled value, when settled fulfilled.
    pub fn value(&self) -> Option<Value> {
        match self.outcome() {
            Some(Ok(value)) => Some(value),
            _ => None,
        }
    }

    /// The rejection fault, when settled rejected.
    pub fn error(&self) -> Option<Fault> {
        match self.outcome() {
            Some(Err(fault)) => Some(fault),
            _ => None,
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id.raw())
            .field("settlement", &self.settlement())
            .finish()
    }
}

impl Work {
    /// Wrap a closure as a work reference.
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(Call) + 'static,
    {
        Work::Callable(Rc::new(f))
    }
}

impl From<&Node> for Work {
    fn from(node: &Node) -> Self {
        Work::Node(node.id())
    }
}

impl From<&Node> for Operand {
    fn from(node: &Node) -> Self {
        Operand::Node(node.id())
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

impl From<&str> for Operand {
    fn from(s: &str) -> Self {
        Operand::Value(Value::from(s))
    }
}

impl From<i64> for Operand {
    fn from(n: i64) -> Self {
        Operand::Value(Value::from(n))
    }
}

impl From<bool> for Operand {
    fn from(b: bool) -> Self {
        Operand::Value(Value::from(b))
    }
}

impl From<&Node> for Slot {
    fn from(node: &Node) -> Self {
        Slot::Node(node.id())
    }
}

impl From<Value> for Slot {
    fn from(value: Value) -> Self {
        Slot::Value(value)
    }
}

/// The settle-once callback handed to a work function.
///
/// Cloning is cheap; every clone reports to the same node, and only the
/// first report counts. A completion outliving its graph is inert.
#[derive(Clone)]
pub struct Completion {
    shared: SharedWeak,
    node: NodeId,
}

impl Completion {
    pub(crate) fn new(shared: SharedWeak, node: NodeId) -> Self {
        Self { shared, node }
    }

    /// Report the terminal outcome. A node that already settled (including
    /// via the watchdog) ignores the report.
    pub fn settle(&self, outcome: Outcome) {
        if let Some(shared) = self.shared.upgrade() {
            shared.settle(self.node, outcome);
        }
    }

    /// Report success.
    pub fn fulfill(&self, value: impl Into<Value>) {
        self.settle(Ok(value.into()));
    }

    /// Report failure.
    pub fn reject(&self, fault: impl Into<Fault>) {
        self.settle(Err(fault.into()));
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("node", &self.node.raw())
            .finish()
    }
}

/// A fully resolved invocation, handed to the work function by the host.
///
/// `args` carries the literal and node arguments (the latter unwrapped to
/// their fulfilled values) in their original order; the completion slot is
/// delivered as `done` rather than spliced between them.
pub struct Call {
    pub receiver: Option<Value>,
    pub args: Vec<Value>,
    pub done: Completion,
}

impl Call {
    /// The argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("receiver", &self.receiver)
            .field("args", &self.args)
            .finish()
    }
}

/// Conversion of the `add_dependencies` argument: nothing, a single node,
/// or a sequence of nodes.
pub trait IntoDependencies {
    fn into_ids(self) -> SmallVec<[NodeId; 4]>;
}

impl IntoDependencies for () {
    fn into_ids(self) -> SmallVec<[NodeId; 4]> {
        SmallVec::new()
    }
}

impl IntoDependencies for &Node {
    fn into_ids(self) -> SmallVec<[NodeId; 4]> {
        smallvec![self.id()]
    }
}

impl IntoDependencies for &[Node] {
    fn into_ids(self) -> SmallVec<[NodeId; 4]> {
        self.iter().map(Node::id).collect()
    }
}

impl IntoDependencies for &[&Node] {
    fn into_ids(self) -> SmallVec<[NodeId; 4]> {
        self.iter().map(|node| node.id()).collect()
    }
}

impl<const N: usize> IntoDependencies for [&Node; N] {
    fn into_ids(self) -> SmallVec<[NodeId; 4]> {
        self.iter().map(|node| node.id()).collect()
    }
}

impl IntoDependencies for &Vec<Node> {
    fn into_ids(self) -> SmallVec<[NodeId; 4]> {
        self.iter().map(Node::id).collect()
    }
}

/// Conversion of the `set_work` argument list: nothing, a single value or
/// slot, or a sequence of slots.
pub trait IntoSlots {
    fn into_slots(self) -> SmallVec<[Slot; 4]>;
}

impl IntoSlots for () {
    fn into_slots(self) -> SmallVec<[Slot; 4]> {
        SmallVec::new()
    }
}

impl IntoSlots for Slot {
    fn into_slots(self) -> SmallVec<[Slot; 4]> {
        smallvec![self]
    }
}

impl IntoSlots for Value {
    fn into_slots(self) -> SmallVec<[Slot; 4]> {
        smallvec![Slot::Value(self)]
    }
}

impl IntoSlots for &Node {
    fn into_slots(self) -> SmallVec<[Slot; 4]> {
        smallvec![Slot::Node(self.id())]
    }
}

impl<const N: usize> IntoSlots for [Slot; N] {
    fn into_slots(self) -> SmallVec<[Slot; 4]> {
        self.into_iter().collect()
    }
}

impl IntoSlots for Vec<Slot> {
    fn into_slots(self) -> SmallVec<[Slot; 4]> {
        self.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ManualHost;
    use std::cell::{Cell, RefCell};

    fn graph() -> (Graph, Rc<ManualHost>) {
        let host = ManualHost::new();
        (Graph::with_host(host.clone()), host)
    }

    #[test]
    fn work_never_runs_within_the_assigning_call() {
        let (graph, host) = graph();
        let ran = Rc::new(Cell::new(false));

        let flag = ran.clone();
        let node = graph.call(
            Work::func(move |call: Call| {
                flag.set(true);
                call.done.fulfill(());
            }),
            (),
        );

        assert!(!ran.get());
        assert!(node.settlement().is_pending());

        host.run();
        assert!(ran.get());
        assert_eq!(node.value(), Some(Value::Null));
    }

    #[test]
    #[should_panic(expected = "work may only be assigned once")]
    fn assigning_work_twice_is_fatal() {
        let (graph, _host) = graph();
        let node = graph.node();
        node.set_work((), ());
        node.set_work((), ());
    }

    #[test]
    #[should_panic(expected = "receiver may only be set once")]
    fn assigning_the_receiver_twice_is_fatal() {
        let (graph, _host) = graph();
        let node = graph.node();
        node.set_receiver(Value::from(1));
        node.set_receiver(Value::from(2));
    }

    #[test]
    #[should_panic(expected = "receiver may only be set once")]
    fn assigning_the_receiver_after_work_is_fatal() {
        let (graph, _host) = graph();
        let node = graph.node();
        node.set_work((), ());
        node.set_receiver(Value::from(1));
    }

    #[test]
    fn settled_node_replays_late_observers_synchronously() {
        let (graph, host) = graph();
        let node = graph.call(Work::func(|call: Call| call.done.fulfill(7)), ());
        host.run();

        let seen = Rc::new(RefCell::new(None));
        let slot = seen.clone();
        node.on_settled(move |outcome| *slot.borrow_mut() = outcome.ok());

        // No host pump needed; delivery happened inside on_settled.
        assert_eq!(*seen.borrow(), Some(Value::Int(7)));
    }

    #[test]
    fn missing_member_rejects_instead_of_dispatching() {
        let (graph, host) = graph();
        let node = graph.node();
        node.set_receiver(Value::object([("present", Value::from(1))]));
        node.set_work("absent", ());

        host.run();
        assert_eq!(node.error(), Some(Fault::NoSuchMember("absent".to_string())));
    }

    #[test]
    fn non_callable_member_rejects() {
        let (graph, host) = graph();
        let node = graph.node();
        node.set_receiver(Value::object([("field", Value::from(1))]));
        node.set_work("field", ());

        host.run();
        assert_eq!(node.error(), Some(Fault::NotCallable));
    }

    #[test]
    fn work_node_must_fulfill_with_a_callable() {
        let (graph, host) = graph();
        let source = graph.call(Work::func(|call: Call| call.done.fulfill("not a fn")), ());

        let node = graph.node();
        node.set_work(&source, ());

        host.run();
        assert_eq!(node.error(), Some(Fault::NotCallable));
    }

    #[test]
    fn second_timeout_attachment_is_a_no_op() {
        let (graph, host) = graph();
        let node = graph.node();

        node.attach_timeout(Duration::from_millis(5))
            .attach_timeout(Duration::from_millis(50));
        assert_eq!(host.pending_timers(), 1);

        host.advance(Duration::from_millis(5));
        assert_eq!(node.error(), Some(Fault::Timeout));
    }

    #[test]
    fn empty_dependency_call_leaves_the_node_ready() {
        let (graph, host) = graph();
        let node = graph.after(());
        node.set_work((), ());

        host.run();
        assert_eq!(node.value(), Some(Value::Null));
    }

    #[test]
    fn node_handles_are_interchangeable_clones() {
        let (graph, host) = graph();
        let node = graph.call(Work::func(|call: Call| call.done.fulfill(1)), ());
        let twin = node.clone();

        assert_eq!(node, twin);
        host.run();
        assert_eq!(twin.value(), Some(Value::Int(1)));
    }
}
