//! `Handles`: contravariant command and event dispatch.

use std::any::Any;
use std::sync::Arc;

use crate::callback::{Callback, CallbackBase};
use crate::constraint::Constraint;
use crate::error::DispatchError;
use crate::handler::Handler;
use crate::key::{coerce_cloned, upcasts_of, value, Key, Payload, Upcast, Value};
use crate::policy::Policy;
use crate::promise::Promise;
use crate::result::Reply;

/// A contravariant dispatch of one message.
pub struct Handles {
    base: CallbackBase,
    source: Value,
    key: Key,
    upcasts: Arc<[Upcast]>,
}

impl Callback for Handles {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn policy(&self) -> Policy {
        Policy::Handles
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

/// Builds [`Handles`] callbacks.
pub struct HandlesBuilder {
    source: Value,
    key: Key,
    upcasts: Arc<[Upcast]>,
    many: bool,
    constraints: Vec<Arc<dyn Constraint>>,
}

impl HandlesBuilder {
    /// Dispatch `message`.
    pub fn new<M: Payload>(message: M) -> Self {
        HandlesBuilder {
            source: value(message),
            key: Key::of::<M>(),
            upcasts: upcasts_of::<M>(),
            many: false,
            constraints: Vec::new(),
        }
    }

    /// Collect results from every matching binding.
    pub fn many(mut self, many: bool) -> Self {
        self.many = many;
        self
    }

    /// Require `constraint` of matching bindings.
    pub fn constraint(mut self, constraint: Arc<dyn Constraint>) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// The configured callback.
    pub fn build(self) -> Handles {
        let mut base = CallbackBase::new(self.many);
        for constraint in self.constraints {
            base.add_constraint(constraint);
        }
        Handles {
            base,
            source: self.source,
            key: self.key,
            upcasts: self.upcasts,
        }
    }
}

/// Dispatch `message` to the first matching handler, discarding results.
/// Returns a completion promise when the handling went asynchronous.
pub fn command<M: Payload>(
    handler: &dyn Handler,
    message: M,
) -> Result<Option<Promise<()>>, DispatchError> {
    let mut handles = HandlesBuilder::new(message).build();
    let result = handler.handle(&mut handles, false, None);
    if result.is_error() {
        return Err(result.into_error().expect("checked"));
    }
    if !result.handled() {
        return Err(DispatchError::NotHandled);
    }
    Ok(handles
        .base()
        .promised_results()
        .map(|joined| joined.then(|_| ())))
}

/// Dispatch `message` to the first matching handler, expecting a typed
/// result.
pub fn execute<M, T>(handler: &dyn Handler, message: M) -> Result<Reply<Option<T>>, DispatchError>
where
    M: Payload,
    T: Any + Send + Sync + Clone,
{
    let mut handles = HandlesBuilder::new(message).build();
    let result = handler.handle(&mut handles, false, None);
    if result.is_error() {
        return Err(result.into_error().expect("checked"));
    }
    if !result.handled() {
        return Err(DispatchError::NotHandled);
    }
    let base = handles.base();
    match base.promised_results() {
        Some(joined) => {
            let sync: Vec<Value> = base.results().to_vec();
            Ok(Reply::Soon(joined.then(move |late| {
                let mut all = sync;
                all.extend(late.into_iter().flatten());
                all.iter().find_map(coerce_cloned::<T>)
            })))
        }
        None => Ok(Reply::Now(
            base.results().iter().find_map(coerce_cloned::<T>),
        )),
    }
}

/// Dispatch `message` to every matching handler. Nothing handling it is
/// not an error.
pub fn publish<M: Payload>(
    handler: &dyn Handler,
    message: M,
) -> Result<Option<Promise<()>>, DispatchError> {
    let mut handles = HandlesBuilder::new(message).many(true).build();
    let result = handler.handle(&mut handles, true, None);
    if result.is_error() {
        return Err(result.into_error().expect("checked"));
    }
    Ok(handles
        .base()
        .promised_results()
        .map(|joined| joined.then(|_| ())))
}

/// Dispatch `message` to every matching handler, failing when none
/// handled it.
pub fn command_all<M: Payload>(
    handler: &dyn Handler,
    message: M,
) -> Result<Option<Promise<()>>, DispatchError> {
    let mut handles = HandlesBuilder::new(message).many(true).build();
    let result = handler.handle(&mut handles, true, None);
    if result.is_error() {
        return Err(result.into_error().expect("checked"));
    }
    if !result.handled() {
        return Err(DispatchError::NotHandled);
    }
    Ok(handles
        .base()
        .promised_results()
        .map(|joined| joined.then(|_| ())))
}

/// Dispatch `message` greedily, collecting every typed result.
pub fn execute_all<M, T>(handler: &dyn Handler, message: M) -> Result<Reply<Vec<T>>, DispatchError>
where
    M: Payload,
    T: Any + Send + Sync + Clone,
{
    let mut handles = HandlesBuilder::new(message).many(true).build();
    let result = handler.handle(&mut handles, true, None);
    if result.is_error() {
        return Err(result.into_error().expect("checked"));
    }
    if !result.handled() {
        return Err(DispatchError::NotHandled);
    }
    let base = handles.base();
    match base.promised_results() {
        Some(joined) => {
            let sync: Vec<Value> = base.results().to_vec();
            Ok(Reply::Soon(joined.then(move |late| {
                let mut all = sync;
                all.extend(late.into_iter().flatten());
                all.iter().filter_map(coerce_cloned::<T>).collect()
            })))
        }
        None => Ok(Reply::Now(
            base.results().iter().filter_map(coerce_cloned::<T>).collect(),
        )),
    }
}
