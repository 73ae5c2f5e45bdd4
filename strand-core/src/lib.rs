//! Strand Core
//!
//! This crate provides the core runtime for the Strand deferred-execution
//! graph. It implements:
//!
//! - Settle-once nodes: a hand-rolled future with explicit dependency
//!   tracking, at-most-once settlement, and FIFO observer delivery
//! - Dependency-counted execution: work starts only when every linked
//!   dependency has settled, and never inside the call that made it ready
//! - Fail-fast fan-out: a rejection propagates the identical fault to every
//!   transitive dependent without waiting for sibling dependencies
//! - An optional per-node timeout watchdog with a distinguishable sentinel
//!
//! The crate is single-threaded by design: everything runs on one
//! cooperative event loop, injected through the `Host` trait (`TokioHost`
//! in production, `ManualHost` for deterministic driving).
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: nodes, linking, execution, and settlement fan-out
//! - `host`: the scheduling seam (next-cycle deferral, fire-once timers)
//! - `value`: the dynamic value currency moving between units of work
//! - `error`: rejection faults carried by the terminal state
//!
//! # Example
//!
//! ```rust,ignore
//! use strand_core::graph::{Call, Graph, Work};
//!
//! let graph = Graph::new();
//!
//! // Two independent fetches.
//! let left = graph.call(Work::func(|call: Call| call.done.fulfill(2)), ());
//! let right = graph.call(Work::func(|call: Call| call.done.fulfill(3)), ());
//!
//! // Runs once both have fulfilled; rejects if either fails.
//! let sum = graph.after([&left, &right]);
//! sum.set_work(Work::func(|call: Call| call.done.fulfill(5)), ());
//!
//! sum.on_settled(|outcome| println!("sum settled: {outcome:?}"));
//! ```

pub mod error;
pub mod graph;
pub mod host;
pub mod value;
