//! Host Scheduling
//!
//! The graph never runs work inside the call stack that made it ready; it
//! asks the host for two primitives instead:
//!
//! 1. `defer`: run a task on the next cycle of the event loop.
//! 2. `delay`: run a task once after a duration, with no cancellation.
//!
//! Keeping these behind a trait makes the scheduling environment an explicit,
//! injected collaborator rather than a module-level default. `TokioHost` is
//! the production implementation; `ManualHost` is a deterministic driver with
//! a pumped queue and a virtual clock, useful both for tests and for
//! embedders that own their own loop.
//!
//! # Deferral Guarantees
//!
//! Because dispatch always goes through `defer`, a work function's completion
//! callback can never run before the call that scheduled it returns, and
//! dependents constructed immediately after scheduling cannot race the work's
//! completion.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

/// A unit of deferred work handed to the host.
pub type Task = Box<dyn FnOnce()>;

/// The scheduling collaborators the graph requires from its environment.
pub trait Host {
    /// Run `task` on the next cycle, never synchronously within this call.
    fn defer(&self, task: Task);

    /// Run `task` once after `after` has elapsed. Fire-once, no cancellation;
    /// consumers guard against stale firings themselves.
    fn delay(&self, after: Duration, task: Task);
}

/// Production host backed by Tokio's current-thread machinery.
///
/// Both primitives spawn onto the local task set, so a `TokioHost`-driven
/// graph must run inside a `tokio::task::LocalSet` on a current-thread
/// runtime.
pub struct TokioHost;

impl TokioHost {
    pub fn new() -> Rc<Self> {
        Rc::new(Self)
    }
}

impl Host for TokioHost {
    fn defer(&self, task: Task) {
        tokio::task::spawn_local(async move {
            task();
        });
    }

    fn delay(&self, after: Duration, task: Task) {
        tokio::task::spawn_local(async move {
            tokio::time::sleep(after).await;
            task();
        });
    }
}

/// A manually pumped host with a virtual clock.
///
/// Deferred tasks queue in FIFO order and run only when [`ManualHost::run`]
/// is called. Timers fire only as [`ManualHost::advance`] moves the clock
/// past their deadline. Nothing happens between calls, which makes every
/// interleaving reproducible.
pub struct ManualHost {
    now: Cell<Duration>,
    ready: RefCell<VecDeque<Task>>,
    timers: RefCell<Vec<Timer>>,
    seq: Cell<u64>,
}

struct Timer {
    due: Duration,
    seq: u64,
    task: Task,
}

impl ManualHost {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            now: Cell::new(Duration::ZERO),
            ready: RefCell::new(VecDeque::new()),
            timers: RefCell::new(Vec::new()),
            seq: Cell::new(0),
        })
    }

    /// The current virtual time.
    pub fn now(&self) -> Duration {
        self.now.get()
    }

    /// Number of tasks waiting in the ready queue.
    pub fn pending_tasks(&self) -> usize {
        self.ready.borrow().len()
    }

    /// Number of timers that have not fired yet.
    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Drain the ready queue in FIFO order, including tasks enqueued by the
    /// tasks being drained.
    pub fn run(&self) {
        loop {
            let task = self.ready.borrow_mut().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }

    /// Advance the virtual clock by `by`.
    ///
    /// Pending ready tasks run first. Timers whose deadline falls inside the
    /// window then fire in deadline order (insertion order on ties), each
    /// followed by a drain of the ready queue, so a timer that schedules
    /// another timer inside the window is honored.
    pub fn advance(&self, by: Duration) {
        self.run();

        let target = self.now.get() + by;
        loop {
            let next = {
                let timers = self.timers.borrow();
                timers
                    .iter()
                    .enumerate()
                    .filter(|(_, timer)| timer.due <= target)
                    .min_by_key(|(_, timer)| (timer.due, timer.seq))
                    .map(|(index, _)| index)
            };

            match next {
                Some(index) => {
                    let timer = self.timers.borrow_mut().remove(index);
                    self.now.set(self.now.get().max(timer.due));
                    (timer.task)();
                    self.run();
                }
                None => break,
            }
        }

        self.now.set(target);
    }
}

impl Host for ManualHost {
    fn defer(&self, task: Task) {
        self.ready.borrow_mut().push_back(task);
    }

    fn delay(&self, after: Duration, task: Task) {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        self.timers.borrow_mut().push(Timer {
            due: self.now.get() + after,
            seq,
            task,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deferred_tasks_run_in_fifo_order() {
        let host = ManualHost::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            host.defer(Box::new(move || log.borrow_mut().push(i)));
        }

        assert_eq!(host.pending_tasks(), 3);
        host.run();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert_eq!(host.pending_tasks(), 0);
    }

    #[test]
    fn tasks_enqueued_while_draining_still_run() {
        let host = ManualHost::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        {
            let host2 = host.clone();
            let log = log.clone();
            host.defer(Box::new(move || {
                log.borrow_mut().push("outer");
                let log = log.clone();
                host2.defer(Box::new(move || log.borrow_mut().push("inner")));
            }));
        }

        host.run();
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let host = ManualHost::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for (label, ms) in [("late", 20u64), ("early", 5), ("mid", 10)] {
            let log = log.clone();
            host.delay(
                Duration::from_millis(ms),
                Box::new(move || log.borrow_mut().push(label)),
            );
        }

        host.advance(Duration::from_millis(15));
        assert_eq!(*log.borrow(), vec!["early", "mid"]);
        assert_eq!(host.pending_timers(), 1);

        host.advance(Duration::from_millis(5));
        assert_eq!(*log.borrow(), vec!["early", "mid", "late"]);
    }

    #[test]
    fn timer_scheduled_by_a_timer_fires_within_the_same_window() {
        let host = ManualHost::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        {
            let host2 = host.clone();
            let log = log.clone();
            host.delay(
                Duration::from_millis(5),
                Box::new(move || {
                    log.borrow_mut().push("first");
                    let log = log.clone();
                    host2.delay(
                        Duration::from_millis(5),
                        Box::new(move || log.borrow_mut().push("second")),
                    );
                }),
            );
        }

        host.advance(Duration::from_millis(10));
        assert_eq!(*log.borrow(), vec!["first", "second"]);
        assert_eq!(host.now(), Duration::from_millis(10));
    }
}
