//! `Maps`: covariant mapping requests, selected by target type and an
//! optional format tag.

use std::any::Any;
use std::sync::Arc;

use crate::callback::{Callback, CallbackBase};
use crate::constraint::Named;
use crate::error::DispatchError;
use crate::handler::Handler;
use crate::key::{coerce, value, Key, Payload, Value};
use crate::policy::Policy;
use crate::result::Reply;

/// A covariant request to map a source value into a target type.
pub struct Maps {
    base: CallbackBase,
    source: Value,
    key: Key,
}

impl Callback for Maps {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn policy(&self) -> Policy {
        Policy::Maps
    }

    fn source(&self) -> Option<&Value> {
        Some(&self.source)
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

/// Builds [`Maps`] callbacks.
pub struct MapsBuilder {
    source: Value,
    key: Key,
    format: Option<Arc<str>>,
}

impl MapsBuilder {
    /// Map `source` into `T`.
    pub fn new<T: Any, S: Payload>(source: S) -> Self {
        MapsBuilder {
            source: value(source),
            key: Key::of::<T>(),
            format: None,
        }
    }

    /// Constrain to bindings tagged with `format`.
    pub fn format(mut self, format: &str) -> Self {
        self.format = Some(Arc::from(format));
        self
    }

    /// The configured callback.
    pub fn build(self) -> Maps {
        let mut base = CallbackBase::new(false);
        if let Some(format) = self.format {
            base.add_constraint(Arc::new(Named::new(format)));
        }
        Maps {
            base,
            source: self.source,
            key: self.key,
        }
    }
}

/// Map `source` into a `T` using any matching mapping.
pub fn map_into<T, S>(handler: &dyn Handler, source: S) -> Result<Reply<Option<Arc<T>>>, DispatchError>
where
    T: Any + Send + Sync,
    S: Payload,
{
    dispatch_maps::<T>(handler, MapsBuilder::new::<T, S>(source).build())
}

/// Map `source` into a `T` using a mapping tagged with `format`.
pub fn map_as<T, S>(
    handler: &dyn Handler,
    source: S,
    format: &str,
) -> Result<Reply<Option<Arc<T>>>, DispatchError>
where
    T: Any + Send + Sync,
    S: Payload,
{
    dispatch_maps::<T>(handler, MapsBuilder::new::<T, S>(source).format(format).build())
}

fn dispatch_maps<T: Any + Send + Sync>(
    handler: &dyn Handler,
    mut maps: Maps,
) -> Result<Reply<Option<Arc<T>>>, DispatchError> {
    let result = handler.handle(&mut maps, false, None);
    if result.is_error() {
        return Err(result.into_error().expect("checked"));
    }
    let base = maps.base();
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
