//! Dependency Graph
//!
//! This module implements the deferred-computation graph: settle-once nodes
//! whose work starts only after every linked dependency has settled.
//!
//! # Overview
//!
//! A node is a unit of asynchronous work plus bookkeeping:
//!
//! - Edges are built while the node is pending; each pending dependency
//!   bumps a counter, and each settlement decrements it.
//! - When the counter reaches zero the node's work is resolved and handed to
//!   the host for the next cycle, never run inside the triggering call.
//! - Settlement is terminal: fulfilled with a value or rejected with a
//!   fault. Observers fire once, in registration order, and dependents are
//!   notified exactly once.
//! - Rejection is fail-fast: a rejected dependency rejects every reachable
//!   dependent with the identical fault, without waiting for siblings.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a centralized, id-keyed arena; public handles carry an
//!    id plus shared ownership of the arena, so cloning a handle is cheap
//!    and edges are plain index collections.
//!
//! 2. Settlement fan-out is an iterative worklist rather than recursion, so
//!    chain depth never translates into call-stack depth.
//!
//! 3. The scheduling environment (next-cycle deferral, fire-once timers) is
//!    an injected `Host`, which is what makes the whole state machine
//!    deterministic under test.

mod engine;
mod handle;
mod node;

pub use handle::{Call, Completion, Graph, IntoDependencies, IntoSlots, Node};
pub use node::{NodeId, Operand, Settlement, Slot, Work};
