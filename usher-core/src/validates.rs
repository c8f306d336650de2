//! `Validates`: contravariant validation passes over a target value.

use std::any::Any;
use std::sync::Arc;

use crate::callback::{Callback, CallbackBase};
use crate::error::DispatchError;
use crate::handler::Handler;
use crate::key::{upcasts_of, value, Key, Payload, Upcast, Value};
use crate::policy::Policy;

/// A contravariant validation pass.
pub struct Validates {
    base: CallbackBase,
    source: Value,
    key: Key,
    upcasts: Arc<[Upcast]>,
}

impl Validates {
    /// Validate `target`.
    pub fn new<M: Payload>(target: M) -> Self {
        Validates {
            base: CallbackBase::new(true),
            source: value(target),
            key: Key::of::<M>(),
            upcasts: upcasts_of::<M>(),
        }
    }
}

impl Callback for Validates {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn policy(&self) -> Policy {
        Policy::Validates
    }

    fn source(&self) -> Option<&Value> {
        Some(&self.source)
    }

    fn upcasts(&self) -> &[Upcast] {
        &self.upcasts
    }

    fn base(&self) -> &CallbackBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CallbackBase {
        &mut self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The outcome of validating a target: valid, or the failures found.
#[derive(Debug, Default)]
pub struct ValidationOutcome {
    failures: Vec<DispatchError>,
}

impl ValidationOutcome {
    /// Whether every validator passed.
    pub fn valid(&self) -> bool {
        self.failures.is_empty()
    }

    /// The failures, in discovery order.
    pub fn failures(&self) -> &[DispatchError] {
        &self.failures
    }
}

/// Run every matching validator over `target`.
pub fn validate<M: Payload>(
    handler: &dyn Handler,
    target: M,
) -> Result<ValidationOutcome, DispatchError> {
    let mut validates = Validates::new(target);
    let result = handler.handle(&mut validates, true, None);
    let mut outcome = ValidationOutcome::default();
    if let Some(err) = result.into_error() {
        collect_failures(err, &mut outcome.failures);
    }
    Ok(outcome)
}

fn collect_failures(err: DispatchError, into: &mut Vec<DispatchError>) {
    match err {
        DispatchError::Aggregate(errors) => {
            for err in errors {
                collect_failures(err, into);
            }
        }
        other => into.push(other),
    }
}
