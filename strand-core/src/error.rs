//! Rejection Values
//!
//! Errors in the graph are data, not control flow: a rejected node carries a
//! `Fault` in its terminal state, and that exact value is copied to every
//! transitive dependent during fan-out. Nothing here is ever raised as a
//! panic. Caller-misuse (double work assignment and friends) panics at the
//! call site instead, because that is a programmer mistake and not a runtime
//! outcome.
//!
//! `Fault::Timeout` is reserved for the watchdog so callers can always tell
//! a timeout-induced rejection apart from anything a work function reports.

use thiserror::Error;

use crate::value::Value;

/// The terminal result of a node: its fulfilled value or the fault that
/// rejected it.
pub type Outcome = Result<Value, Fault>;

/// An opaque rejection value carried by a settled node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// A failure reported by a work function through its completion callback.
    #[error("{0}")]
    Message(String),

    /// The watchdog fired before the node settled.
    #[error("work timed out")]
    Timeout,

    /// A member-name work reference did not resolve against the receiver.
    #[error("receiver has no member `{0}`")]
    NoSuchMember(String),

    /// A work reference resolved to something that is not callable.
    #[error("work reference did not resolve to a callable")]
    NotCallable,
}

impl From<&str> for Fault {
    fn from(message: &str) -> Self {
        Fault::Message(message.to_string())
    }
}

impl From<String> for Fault {
    fn from(message: String) -> Self {
        Fault::Message(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_distinguishable_from_reported_failures() {
        let reported = Fault::from("timed out");
        assert_ne!(reported, Fault::Timeout);
    }

    #[test]
    fn display_formats() {
        assert_eq!(Fault::from("boom").to_string(), "boom");
        assert_eq!(Fault::Timeout.to_string(), "work timed out");
        assert_eq!(
            Fault::NoSuchMember("greet".to_string()).to_string(),
            "receiver has no member `greet`"
        );
    }
}
