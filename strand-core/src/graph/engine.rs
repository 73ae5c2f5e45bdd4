//! Execution Engine
//!
//! The engine owns the arena of nodes and the three algorithms that drive
//! them:
//!
//! 1. **Linking** builds edges before settlement: a pending candidate records
//!    the dependent and bumps its pending counter; a rejected candidate
//!    forces the dependent terminal on the spot; a fulfilled candidate is
//!    already satisfied and contributes nothing.
//! 2. **Execution** starts a node's work once it has work, is still pending,
//!    and its pending counter has reached zero. Receiver, work reference,
//!    and arguments resolve synchronously; the invocation itself is always
//!    handed to the host for the next cycle.
//! 3. **Propagation** runs settlement fan-out as an iterative worklist:
//!    drain the settled node's observers, then notify dependents
//!    (decrementing counters, short-circuiting rejection, and re-checking
//!    execution eligibility) without ever recursing, so arbitrarily long
//!    chains cannot grow the call stack.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a centralized, id-keyed arena rather than pointing at
//!    each other directly. Handles and edges are plain ids, which keeps the
//!    borrow story trivial and lookups O(1).
//!
//! 2. User code (work functions, observers) never runs while the arena is
//!    borrowed. Every algorithm collects what it needs under a short borrow,
//!    releases it, and only then calls out, so callbacks may freely re-enter
//!    the graph.
//!
//! 3. Edges to a node are recorded in registration order, and observers and
//!    dependents are notified in that order.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::error::{Fault, Outcome};
use crate::graph::handle::{Call, Completion};
use crate::graph::node::{NodeId, NodeState, Observer, Operand, Settlement, Slot, Work};
use crate::host::Host;
use crate::value::{Value, WorkFn};

/// The node table plus the injected scheduling collaborators.
struct Arena {
    nodes: IndexMap<NodeId, NodeState>,
    host: Rc<dyn Host>,
}

impl Arena {
    /// Unwrap a node reference to its fulfilled value (`Null` when there is
    /// nothing to unwrap).
    fn fulfilled_value(&self, id: NodeId) -> Value {
        self.nodes
            .get(&id)
            .map(|node| node.fulfilled_value())
            .unwrap_or(Value::Null)
    }
}

/// Shared ownership of the arena. Every public handle is a cheap clone of
/// this plus a node id.
#[derive(Clone)]
pub(crate) struct Shared {
    inner: Rc<RefCell<Arena>>,
}

/// Weak counterpart held by completion callbacks and timers, so a late
/// firing after the graph is gone is silently inert.
#[derive(Clone)]
pub(crate) struct SharedWeak {
    inner: Weak<RefCell<Arena>>,
}

impl SharedWeak {
    pub(crate) fn upgrade(&self) -> Option<Shared> {
        self.inner.upgrade().map(|inner| Shared { inner })
    }
}

/// What `try_execute` decided to do after resolution.
enum Dispatch {
    /// Hand the invocation to the host; `None` is the pass-through default.
    Run(Option<WorkFn>, Call),

    /// Resolution failed; reject the node instead of dispatching.
    Fail(Fault),
}

impl Shared {
    pub(crate) fn with_host(host: Rc<dyn Host>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Arena {
                nodes: IndexMap::new(),
                host,
            })),
        }
    }

    pub(crate) fn downgrade(&self) -> SharedWeak {
        SharedWeak {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub(crate) fn insert(&self) -> NodeId {
        let id = NodeId::new();
        self.inner.borrow_mut().nodes.insert(id, NodeState::new());
        id
    }

    pub(crate) fn node_count(&self) -> usize {
        self.inner.borrow().nodes.len()
    }

    pub(crate) fn settlement(&self, id: NodeId) -> Settlement {
        self.inner
            .borrow()
            .nodes
            .get(&id)
            .map(|node| node.settlement)
            .unwrap_or(Settlement::Pending)
    }

    pub(crate) fn outcome(&self, id: NodeId) -> Option<Outcome> {
        self.inner
            .borrow()
            .nodes
            .get(&id)
            .and_then(|node| node.settled_outcome())
    }

    /// Link `id` to each candidate dependency, in order.
    ///
    /// The whole call is inert when the node is already settled, and a
    /// rejected candidate forces settlement mid-call, which makes every
    /// remaining candidate inert as well.
    pub(crate) fn link(&self, id: NodeId, deps: &[NodeId]) {
        let mut arena = self.inner.borrow_mut();
        for &dep in deps {
            match arena.nodes.get(&id) {
                Some(node) if node.is_pending() => {}
                _ => return,
            }
            let candidate = match arena.nodes.get_mut(&dep) {
                Some(candidate) => candidate,
                None => continue,
            };
            match candidate.settlement {
                Settlement::Pending => {
                    candidate.dependents.push(id);
                    if let Some(node) = arena.nodes.get_mut(&id) {
                        node.pending += 1;
                    }
                    tracing::trace!(node = id.raw(), dependency = dep.raw(), "edge linked");
                }
                Settlement::Rejected => {
                    let fault = match &candidate.outcome {
                        Some(Err(fault)) => fault.clone(),
                        _ => Fault::Message("dependency rejected".to_string()),
                    };
                    if let Some(node) = arena.nodes.get_mut(&id) {
                        node.record(Err(fault));
                    }
                    tracing::debug!(
                        node = id.raw(),
                        dependency = dep.raw(),
                        "rejected dependency forced settlement"
                    );
                }
                Settlement::Fulfilled => {}
            }
        }
    }

    /// Assign the receiver slot.
    ///
    /// # Panics
    ///
    /// Panics when the receiver or the work is already assigned; both are
    /// programmer mistakes that must surface immediately.
    pub(crate) fn assign_receiver(&self, id: NodeId, operand: Operand) {
        {
            let mut arena = self.inner.borrow_mut();
            let node = match arena.nodes.get_mut(&id) {
                Some(node) => node,
                None => return,
            };
            if node.receiver.is_some() || node.work.is_some() {
                panic!("receiver may only be set once, before work is assigned");
            }
            node.receiver = Some(operand.clone());
        }
        if let Operand::Node(dep) = operand {
            self.link(id, &[dep]);
        }
    }

    /// Assign the unit of work and its argument slots, then hand off: an
    /// already-rejected node propagates, a node with no pending
    /// dependencies becomes eligible to execute, anything else waits for
    /// the propagator.
    ///
    /// # Panics
    ///
    /// Panics when work is already assigned.
    pub(crate) fn assign_work(&self, id: NodeId, work: Work, mut args: SmallVec<[Slot; 4]>) {
        {
            let mut arena = self.inner.borrow_mut();
            let node = match arena.nodes.get_mut(&id) {
                Some(node) => node,
                None => return,
            };
            if node.work.is_some() {
                panic!("work may only be assigned once");
            }
            node.work = Some(work.clone());
        }

        if let Work::Node(dep) = &work {
            self.link(id, &[*dep]);
        }

        // One candidate per call, so a rejection forced mid-way leaves the
        // remaining node arguments unlinked.
        for slot in &args {
            if let Slot::Node(dep) = slot {
                self.link(id, &[*dep]);
            }
        }

        if !args.iter().any(|slot| matches!(slot, Slot::Completion)) {
            args.push(Slot::Completion);
        }

        let (settled, ready) = {
            let mut arena = self.inner.borrow_mut();
            let node = match arena.nodes.get_mut(&id) {
                Some(node) => node,
                None => return,
            };
            node.args = args;
            (!node.is_pending(), node.pending == 0)
        };

        if settled {
            self.propagate(id);
        } else if ready {
            self.try_execute(id);
        }
    }

    /// Register an observer; a settled node replays every queued observer
    /// immediately, in FIFO order.
    pub(crate) fn observe(&self, id: NodeId, observer: Observer) {
        let replay = {
            let mut arena = self.inner.borrow_mut();
            let node = match arena.nodes.get_mut(&id) {
                Some(node) => node,
                None => return,
            };
            if node.work.is_none() {
                tracing::warn!(
                    node = id.raw(),
                    "observer registered before work was assigned; the node may never settle"
                );
            }
            node.observers.push(observer);
            node.settled_outcome()
                .map(|outcome| (std::mem::take(&mut node.observers), outcome))
        };
        if let Some((observers, outcome)) = replay {
            for observer in observers {
                observer(outcome.clone());
            }
        }
    }

    /// Arm the watchdog. A node that already has a timer keeps it; there is
    /// no cancellation, only the settled check when the timer fires.
    pub(crate) fn arm_timeout(&self, id: NodeId, after: Duration) {
        let host = {
            let mut arena = self.inner.borrow_mut();
            let node = match arena.nodes.get_mut(&id) {
                Some(node) => node,
                None => return,
            };
            if node.timer_armed {
                return;
            }
            node.timer_armed = true;
            arena.host.clone()
        };

        let weak = self.downgrade();
        host.delay(
            after,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.force_timeout(id);
                }
            }),
        );
    }

    fn force_timeout(&self, id: NodeId) {
        let fired = {
            let mut arena = self.inner.borrow_mut();
            match arena.nodes.get_mut(&id) {
                Some(node) => node.record(Err(Fault::Timeout)),
                None => false,
            }
        };
        if fired {
            tracing::debug!(node = id.raw(), "watchdog fired");
            self.propagate(id);
        }
    }

    /// Record a terminal outcome reported through a completion callback. A
    /// node that already settled ignores the report.
    pub(crate) fn settle(&self, id: NodeId, outcome: Outcome) {
        let recorded = {
            let mut arena = self.inner.borrow_mut();
            match arena.nodes.get_mut(&id) {
                Some(node) => node.record(outcome),
                None => false,
            }
        };
        if recorded {
            self.propagate(id);
        }
    }

    /// Start the node's work if it is eligible: work assigned, still
    /// pending, and no pending dependencies. Resolution happens now; the
    /// invocation is deferred to the host's next cycle.
    pub(crate) fn try_execute(&self, id: NodeId) {
        let dispatch = {
            let arena = self.inner.borrow();
            let node = match arena.nodes.get(&id) {
                Some(node) => node,
                None => return,
            };
            if !node.is_pending() || node.pending != 0 {
                return;
            }
            let work = match &node.work {
                Some(work) => work.clone(),
                None => return,
            };

            let receiver = match &node.receiver {
                None => None,
                Some(Operand::Value(value)) => Some(value.clone()),
                Some(Operand::Node(dep)) => Some(arena.fulfilled_value(*dep)),
            };

            let callable = match work {
                Work::Callable(f) => Ok(Some(f)),
                Work::Noop => Ok(None),
                Work::Member(name) => {
                    match receiver.as_ref().and_then(|receiver| receiver.member(&name)) {
                        Some(Value::Callable(f)) => Ok(Some(f.clone())),
                        Some(_) => Err(Fault::NotCallable),
                        None => Err(Fault::NoSuchMember(name)),
                    }
                }
                Work::Node(dep) => match arena.fulfilled_value(dep) {
                    Value::Callable(f) => Ok(Some(f)),
                    _ => Err(Fault::NotCallable),
                },
            };

            match callable {
                Err(fault) => Dispatch::Fail(fault),
                Ok(callable) => {
                    let args = node
                        .args
                        .iter()
                        .filter_map(|slot| match slot {
                            Slot::Value(value) => Some(value.clone()),
                            Slot::Node(dep) => Some(arena.fulfilled_value(*dep)),
                            Slot::Completion => None,
                        })
                        .collect();
                    let done = Completion::new(self.downgrade(), id);
                    Dispatch::Run(callable, Call { receiver, args, done })
                }
            }
        };

        match dispatch {
            Dispatch::Fail(fault) => {
                tracing::debug!(node = id.raw(), %fault, "work resolution failed");
                self.settle(id, Err(fault));
            }
            Dispatch::Run(callable, call) => {
                tracing::debug!(node = id.raw(), "work dispatched");
                let host = self.inner.borrow().host.clone();
                match callable {
                    Some(f) => host.defer(Box::new(move || f(call))),
                    None => host.defer(Box::new(move || call.done.fulfill(Value::Null))),
                }
            }
        }
    }

    /// Settlement fan-out, drained as an iterative worklist.
    ///
    /// Per settled node: observers first, in FIFO order and with no arena
    /// borrow held; then each dependent recorded while the node was pending
    /// has its counter decremented and is either forced to the same
    /// rejection (and enqueued for its own fan-out) or re-checked for
    /// execution eligibility. The dependent list is cleared so nobody is
    /// notified twice.
    pub(crate) fn propagate(&self, id: NodeId) {
        let mut queue = VecDeque::new();
        queue.push_back(id);

        while let Some(current) = queue.pop_front() {
            let (observers, outcome) = {
                let mut arena = self.inner.borrow_mut();
                let node = match arena.nodes.get_mut(&current) {
                    Some(node) => node,
                    None => continue,
                };
                let outcome = match node.settled_outcome() {
                    Some(outcome) => outcome,
                    None => continue,
                };
                (std::mem::take(&mut node.observers), outcome)
            };
            for observer in observers {
                observer(outcome.clone());
            }

            let fault = outcome.err();
            let ready = {
                let mut arena = self.inner.borrow_mut();
                let dependents = match arena.nodes.get_mut(&current) {
                    Some(node) => std::mem::take(&mut node.dependents),
                    None => continue,
                };
                let mut ready = SmallVec::<[NodeId; 4]>::new();
                for dep in dependents {
                    let dependent = match arena.nodes.get_mut(&dep) {
                        Some(dependent) => dependent,
                        None => continue,
                    };
                    dependent.pending = dependent.pending.saturating_sub(1);
                    match &fault {
                        Some(fault) => {
                            if dependent.record(Err(fault.clone())) {
                                queue.push_back(dep);
                            }
                        }
                        None => ready.push(dep),
                    }
                }
                ready
            };
            for dep in ready {
                self.try_execute(dep);
            }
        }
    }

    #[cfg(test)]
    fn pending_count(&self, id: NodeId) -> usize {
        self.inner
            .borrow()
            .nodes
            .get(&id)
            .map(|node| node.pending)
            .unwrap_or(0)
    }

    #[cfg(test)]
    fn dependent_count(&self, id: NodeId) -> usize {
        self.inner
            .borrow()
            .nodes
            .get(&id)
            .map(|node| node.dependents.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ManualHost;

    fn shared() -> Shared {
        Shared::with_host(ManualHost::new())
    }

    #[test]
    fn pending_candidates_register_back_references() {
        let shared = shared();
        let dep = shared.insert();
        let node = shared.insert();

        shared.link(node, &[dep]);

        assert_eq!(shared.pending_count(node), 1);
        assert_eq!(shared.dependent_count(dep), 1);
    }

    #[test]
    fn settled_candidates_never_register() {
        let shared = shared();
        let fulfilled = shared.insert();
        let rejected = shared.insert();
        shared.settle(fulfilled, Ok(Value::from(1)));
        shared.settle(rejected, Err(Fault::from("boom")));

        let a = shared.insert();
        shared.link(a, &[fulfilled]);
        assert_eq!(shared.pending_count(a), 0);
        assert_eq!(shared.dependent_count(fulfilled), 0);
        assert!(shared.settlement(a).is_pending());

        let b = shared.insert();
        shared.link(b, &[rejected]);
        assert_eq!(shared.settlement(b), Settlement::Rejected);
        assert_eq!(shared.outcome(b), Some(Err(Fault::from("boom"))));
        assert_eq!(shared.dependent_count(rejected), 0);
    }

    #[test]
    fn forced_rejection_skips_later_candidates() {
        let shared = shared();
        let rejected = shared.insert();
        shared.settle(rejected, Err(Fault::from("early")));
        let still_pending = shared.insert();

        let node = shared.insert();
        shared.link(node, &[rejected, still_pending]);

        assert_eq!(shared.settlement(node), Settlement::Rejected);
        assert_eq!(shared.pending_count(node), 0);
        assert_eq!(shared.dependent_count(still_pending), 0);
    }

    #[test]
    fn links_are_inert_once_the_node_settled() {
        let shared = shared();
        let node = shared.insert();
        shared.settle(node, Ok(Value::Null));

        let dep = shared.insert();
        shared.link(node, &[dep]);

        assert_eq!(shared.pending_count(node), 0);
        assert_eq!(shared.dependent_count(dep), 0);
    }

    #[test]
    fn rejection_cascade_does_not_recurse() {
        let shared = shared();
        let root = shared.insert();

        let mut prev = root;
        for _ in 0..5_000 {
            let next = shared.insert();
            shared.link(next, &[prev]);
            prev = next;
        }

        shared.settle(root, Err(Fault::from("cascade")));

        assert_eq!(shared.settlement(prev), Settlement::Rejected);
        assert_eq!(shared.outcome(prev), Some(Err(Fault::from("cascade"))));
    }

    #[test]
    fn duplicate_links_count_twice() {
        let shared = shared();
        let dep = shared.insert();
        let node = shared.insert();

        shared.link(node, &[dep, dep]);
        assert_eq!(shared.pending_count(node), 2);

        shared.settle(dep, Ok(Value::Null));
        assert_eq!(shared.pending_count(node), 0);
    }
}
