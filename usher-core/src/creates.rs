//! `Creates`: covariant creation requests.

use std::any::Any;
use std::sync::Arc;

use crate::callback::{Callback, CallbackBase};
use crate::error::DispatchError;
use crate::handler::Handler;
use crate::key::{coerce, Key, Value};
use crate::policy::Policy;
use crate::result::Reply;

/// A covariant request to create an instance.
pub struct Creates {
    base: CallbackBase,
    key: Key,
}

impl Creates {
    /// Request creation of `key`.
    pub fn new(key: Key) -> Self {
        Creates {
            base: CallbackBase::new(false),
            key,
        }
    }
}

impl Callback for Creates {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn policy(&self) -> Policy {
        Policy::Creates
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

/// Create a `T` through the composition's `Creates` bindings.
pub fn create<T: Send + Sync + 'static>(
    handler: &dyn Handler,
) -> Result<Reply<Option<Arc<T>>>, DispatchError> {
    let mut creates = Creates::new(Key::of::<T>());
    let result = handler.handle(&mut creates, false, None);
    if result.is_error() {
        return Err(result.into_error().expect("checked"));
    }
    let base = creates.base();
    match base.promised_results() {
        Some(joined) => {
            let sync: Vec<Value> = base.results().to_vec();
            Ok(Reply::Soon(joined.then(move |late| {
                let mut all = sync;
                all.extend(late.into_iter().flatten());
                all.iter().find_map(coerce::<T>)
            })))
        }
        None => Ok(Reply::Now(base.results().iter().find_map(coerce::<T>))),
    }
}
