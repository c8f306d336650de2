//! The outcome algebra of dispatch.

use crate::error::DispatchError;
use crate::promise::{Promise, PromiseError};

/// The outcome of dispatching a callback: whether it was handled, whether
/// the reduction should stop, and any error carried along.
///
/// Results compose with [`or`](HandleResult::or) / [`and`](HandleResult::and)
/// as candidates accumulate, and with the guarded sequencing combinators
/// ([`then`](HandleResult::then), [`otherwise`](HandleResult::otherwise))
/// inside handler compositions.
#[derive(Debug, Clone, Default)]
pub struct HandleResult {
    handled: bool,
    stop: bool,
    error: Option<DispatchError>,
}

/// The callback was handled; reduction may continue.
pub const HANDLED: HandleResult = HandleResult {
    handled: true,
    stop: false,
    error: None,
};

/// The callback was handled and the reduction must stop.
pub const HANDLED_AND_STOP: HandleResult = HandleResult {
    handled: true,
    stop: true,
    error: None,
};

/// The callback was not handled.
pub const NOT_HANDLED: HandleResult = HandleResult {
    handled: false,
    stop: false,
    error: None,
};

/// The callback was not handled and the reduction must stop.
pub const NOT_HANDLED_AND_STOP: HandleResult = HandleResult {
    handled: false,
    stop: true,
    error: None,
};

impl HandleResult {
    /// Whether the callback was handled.
    pub fn handled(&self) -> bool {
        self.handled
    }

    /// Whether the reduction must stop.
    pub fn stop(&self) -> bool {
        self.stop
    }

    /// Whether an error is attached.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The attached error, if any.
    pub fn error(&self) -> Option<&DispatchError> {
        self.error.as_ref()
    }

    /// Consume the result, yielding the attached error.
    pub fn into_error(self) -> Option<DispatchError> {
        self.error
    }

    /// Attach `err`, marking the reduction stopped.
    pub fn with_error(self, err: DispatchError) -> Self {
        HandleResult {
            handled: self.handled,
            stop: true,
            error: match self.error {
                None => Some(err),
                Some(prior) => Some(DispatchError::aggregate(vec![prior, err])),
            },
        }
    }

    /// Strip any attached error.
    pub fn without_error(self) -> Self {
        HandleResult {
            error: None,
            ..self
        }
    }

    /// Run `block` unless this result already stopped, combining with `or`.
    pub fn then(self, block: impl FnOnce() -> HandleResult) -> Self {
        if self.stop {
            self
        } else {
            let next = block();
            self.or(next)
        }
    }

    /// Like [`then`](Self::then), gated on `condition`.
    pub fn then_if(self, condition: bool, block: impl FnOnce() -> HandleResult) -> Self {
        if self.stop || !condition {
            self
        } else {
            let next = block();
            self.or(next)
        }
    }

    /// Run `block` only when nothing handled the callback yet.
    pub fn otherwise(self, block: impl FnOnce() -> HandleResult) -> Self {
        if self.handled || self.stop {
            self
        } else {
            block()
        }
    }

    /// Like [`otherwise`](Self::otherwise), gated on `condition`.
    pub fn otherwise_if(self, condition: bool, block: impl FnOnce() -> HandleResult) -> Self {
        if self.stop || (self.handled && !condition) {
            self
        } else {
            let next = block();
            self.or(next)
        }
    }

    /// Force the handled bit on when `handled` is true, preserving stop
    /// and error state.
    pub fn otherwise_handled_if(self, handled: bool) -> Self {
        let base = if handled || self.handled {
            if self.stop {
                HANDLED_AND_STOP
            } else {
                HANDLED
            }
        } else if self.stop {
            NOT_HANDLED_AND_STOP
        } else {
            NOT_HANDLED
        };
        self.or(base)
    }

    /// Disjunction: handled if either side handled; stop and errors merge.
    pub fn or(self, other: HandleResult) -> Self {
        HandleResult {
            handled: self.handled || other.handled,
            stop: self.stop || other.stop,
            error: combine_errors(self.error, other.error),
        }
    }

    /// Conjunction: handled only if both sides handled; stop and errors
    /// merge.
    pub fn and(self, other: HandleResult) -> Self {
        HandleResult {
            handled: self.handled && other.handled,
            stop: self.stop || other.stop,
            error: combine_errors(self.error, other.error),
        }
    }
}

/// A dispatch outcome the caller picks up either synchronously or as a
/// promise, depending on whether anything on the chain went async.
pub enum Reply<T> {
    /// The value is available now.
    Now(T),
    /// The value settles through a promise.
    Soon(Promise<T>),
}

impl<T: std::fmt::Debug> std::fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Now(value) => f.debug_tuple("Now").field(value).finish(),
            Reply::Soon(promise) => f.debug_tuple("Soon").field(promise).finish(),
        }
    }
}

impl<T: Clone + Send + 'static> Reply<T> {
    /// The value, blocking if it settles later.
    pub fn wait(self) -> Result<T, PromiseError> {
        match self {
            Reply::Now(value) => Ok(value),
            Reply::Soon(promise) => promise.wait(),
        }
    }

    /// The value when already available.
    pub fn now(self) -> Option<T> {
        match self {
            Reply::Now(value) => Some(value),
            Reply::Soon(_) => None,
        }
    }

    /// Whether the value settles later.
    pub fn is_async(&self) -> bool {
        matches!(self, Reply::Soon(_))
    }
}

fn combine_errors(
    a: Option<DispatchError>,
    b: Option<DispatchError>,
) -> Option<DispatchError> {
    match (a, b) {
        (Some(a), Some(b)) => Some(DispatchError::aggregate(vec![a, b])),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn or_prefers_handled() {
        assert!(NOT_HANDLED.or(HANDLED).handled());
        assert!(HANDLED.or(NOT_HANDLED).handled());
        assert!(!NOT_HANDLED.or(NOT_HANDLED).handled());
    }

    #[test]
    fn and_requires_both() {
        assert!(HANDLED.and(HANDLED).handled());
        assert!(!HANDLED.and(NOT_HANDLED).handled());
    }

    #[test]
    fn stop_propagates_through_combination() {
        assert!(HANDLED_AND_STOP.or(NOT_HANDLED).stop());
        assert!(NOT_HANDLED.and(HANDLED_AND_STOP).stop());
    }

    #[test]
    fn then_skips_after_stop() {
        let result = HANDLED_AND_STOP.then(|| panic!("must not run"));
        assert!(result.handled() && result.stop());
    }

    #[test]
    fn otherwise_runs_only_when_unhandled() {
        let ran = NOT_HANDLED.otherwise(|| HANDLED);
        assert!(ran.handled());

        let kept = HANDLED.otherwise(|| panic!("must not run"));
        assert!(kept.handled());
    }

    #[test]
    fn errors_merge_into_aggregates() {
        let a = NOT_HANDLED.with_error(DispatchError::Cancelled);
        let b = NOT_HANDLED.with_error(DispatchError::Panicked("x".into()));
        let merged = a.or(b);
        assert!(merged.stop());
        assert!(matches!(
            merged.error(),
            Some(DispatchError::Aggregate(v)) if v.len() == 2
        ));
    }

    #[test]
    fn otherwise_handled_if_upgrades() {
        let upgraded = NOT_HANDLED.otherwise_handled_if(true);
        assert!(upgraded.handled());
        let kept = NOT_HANDLED.otherwise_handled_if(false);
        assert!(!kept.handled());
    }
}
