//! `Provides`: covariant instance resolution with cycle detection.

use std::any::Any;
use std::sync::Arc;

use crate::binding::{Binding, DependencySpec, HandleContext, Resolved};
use crate::callback::{Callback, CallbackBase, GuardFrame, InstanceId};
use crate::constraint::Constraint;
use crate::error::DispatchError;
use crate::handler::Handler;
use crate::key::{coerce, Key, TypeToken, Value};
use crate::policy::Policy;
use crate::result::Reply;

/// One step of an in-flight resolution: the `(handler, binding)` pair a
/// parent resolution is currently dispatching. Children link back here so
/// re-entry on the same pair is rejected instead of recursing.
pub(crate) struct ChainNode {
    pub(crate) handler: InstanceId,
    pub(crate) binding: Arc<Binding>,
    pub(crate) parent: Option<Arc<ChainNode>>,
}

/// A covariant resolution request.
pub struct Provides {
    base: CallbackBase,
    key: Key,
    current: Option<(InstanceId, Arc<Binding>)>,
    chain: Option<Arc<ChainNode>>,
}

impl Provides {
    /// The requested key.
    pub fn requested(&self) -> &Key {
        &self.key
    }

    /// The binding of the resolution that spawned this one, if any.
    /// Lifestyles consult it for scope compatibility.
    pub fn parent_binding(&self) -> Option<Arc<Binding>> {
        self.chain.as_ref().map(|node| Arc::clone(&node.binding))
    }

    /// Capture the chain a child resolution must link to.
    pub(crate) fn snapshot_chain(&self) -> Option<Arc<ChainNode>> {
        match &self.current {
            Some((handler, binding)) => Some(Arc::new(ChainNode {
                handler: *handler,
                binding: Arc::clone(binding),
                parent: self.chain.clone(),
            })),
            None => self.chain.clone(),
        }
    }

    fn in_progress(&self, handler: InstanceId, binding: &Arc<Binding>) -> bool {
        if let Some((h, b)) = &self.current {
            if *h == handler && Arc::ptr_eq(b, binding) {
                return true;
            }
        }
        let mut node = self.chain.as_ref();
        while let Some(n) = node {
            if n.handler == handler && Arc::ptr_eq(&n.binding, binding) {
                return true;
            }
            node = n.parent.as_ref();
        }
        false
    }
}

impl Callback for Provides {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn policy(&self) -> Policy {
        Policy::Provides
    }

    fn base(&self) -> &CallbackBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CallbackBase {
        &mut self.base
    }

    fn approve_dispatch(
        &mut self,
        handler: InstanceId,
        binding: &Arc<Binding>,
    ) -> Option<GuardFrame> {
        if self.in_progress(handler, binding) {
            return None;
        }
        let frame = GuardFrame {
            prev: self.current.take(),
        };
        self.current = Some((handler, Arc::clone(binding)));
        Some(frame)
    }

    fn restore_dispatch(&mut self, frame: GuardFrame) {
        self.current = frame.prev;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Builds [`Provides`] callbacks.
pub struct ProvidesBuilder {
    key: Key,
    many: bool,
    constraints: Vec<Arc<dyn Constraint>>,
    chain: Option<Arc<ChainNode>>,
}

impl ProvidesBuilder {
    /// Request `key`.
    pub fn new(key: Key) -> Self {
        ProvidesBuilder {
            key,
            many: false,
            constraints: Vec::new(),
            chain: None,
        }
    }

    /// Collect every matching instance.
    pub fn many(mut self, many: bool) -> Self {
        self.many = many;
        self
    }

    /// Require `constraint` of matching bindings.
    pub fn constraint(mut self, constraint: Arc<dyn Constraint>) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub(crate) fn chain(mut self, chain: Option<Arc<ChainNode>>) -> Self {
        self.chain = chain;
        self
    }

    /// The configured callback.
    pub fn build(self) -> Provides {
        let mut base = CallbackBase::new(self.many);
        for constraint in self.constraints {
            base.add_constraint(constraint);
        }
        Provides {
            base,
            key: self.key,
            current: None,
            chain: self.chain,
        }
    }
}

/// Resolve a single `T` from `handler`.
pub fn resolve<T: Send + Sync + 'static>(
    handler: &dyn Handler,
) -> Result<Reply<Option<Arc<T>>>, DispatchError> {
    resolve_key::<T>(handler, Key::of::<T>())
}

/// Resolve a single `T` under an explicit key.
pub fn resolve_key<T: Send + Sync + 'static>(
    handler: &dyn Handler,
    key: Key,
) -> Result<Reply<Option<Arc<T>>>, DispatchError> {
    let mut provides = ProvidesBuilder::new(key).build();
    let result = handler.handle(&mut provides, false, None);
    if result.is_error() {
        return Err(result.into_error().expect("checked"));
    }
    let base = provides.base();
    match base.promised_results() {
        Some(joined) => {
            let sync: Vec<Value> = base.results().to_vec();
            // A failed async resolution degrades to a miss, like any
            // other unhandled resolution.
            let promise = joined.catch(|_| Ok(Vec::new())).then(move |late| {
                let mut all = sync;
                all.extend(late.into_iter().flatten());
                all.iter().find_map(coerce::<T>)
            });
            Ok(Reply::Soon(promise))
        }
        None => Ok(Reply::Now(base.results().iter().find_map(coerce::<T>))),
    }
}

/// Resolve every `T` reachable from `handler`.
pub fn resolve_all<T: Send + Sync + 'static>(
    handler: &dyn Handler,
) -> Result<Reply<Vec<Arc<T>>>, DispatchError> {
    let mut provides = ProvidesBuilder::new(Key::of::<T>()).many(true).build();
    let result = handler.handle(&mut provides, true, None);
    if result.is_error() {
        return Err(result.into_error().expect("checked"));
    }
    let base = provides.base();
    match base.promised_results() {
        Some(joined) => {
            let sync: Vec<Value> = base.results().to_vec();
            let promise = joined.catch(|_| Ok(Vec::new())).then(move |late| {
                let mut all = sync;
                all.extend(late.into_iter().flatten());
                all.iter().filter_map(coerce::<T>).collect()
            });
            Ok(Reply::Soon(promise))
        }
        None => Ok(Reply::Now(
            base.results().iter().filter_map(coerce::<T>).collect(),
        )),
    }
}

/// Resolve `key` to a raw value; misses and errors both yield `None`.
pub(crate) fn resolve_value(handler: &dyn Handler, key: Key) -> Option<Value> {
    let mut provides = ProvidesBuilder::new(key).build();
    let result = handler.handle(&mut provides, false, None);
    if result.is_error() {
        return None;
    }
    provides.base().first_result().cloned()
}

fn chain_of(callback: &dyn Callback) -> Option<Arc<ChainNode>> {
    callback
        .as_any()
        .downcast_ref::<Provides>()
        .and_then(|p| p.snapshot_chain())
}

/// The default dependency resolver: a child `Provides` parented to the
/// current callback, dispatched against the composition.
pub(crate) fn resolve_dependency_default(
    spec: &DependencySpec,
    ctx: &mut HandleContext<'_>,
) -> Result<Resolved, DispatchError> {
    let chain = chain_of(ctx.callback);
    let many = spec.many && !spec.strict;
    let mut provides = ProvidesBuilder::new(spec.key.clone())
        .many(many)
        .chain(chain)
        .build();
    let result = ctx.composer.handle(&mut provides, many, None);
    if result.is_error() {
        return Err(result.into_error().expect("checked"));
    }
    let base = provides.base();

    if many {
        let mut values = base.results().to_vec();
        if let Some(joined) = base.promised_results() {
            let late = joined.wait().map_err(DispatchError::from)?;
            values.extend(late.into_iter().flatten());
        }
        return Ok(Resolved::Many(values));
    }

    if let Some(joined) = base.promised_results() {
        let sync: Vec<Value> = base.results().to_vec();
        let promise = joined.catch(|_| Ok(Vec::new())).then(move |late| {
            let mut all = sync;
            all.extend(late.into_iter().flatten());
            all.into_iter().next()
        });
        if spec.promise {
            return Ok(Resolved::Promised(promise));
        }
        // A synchronous parameter awaits cooperatively.
        return match promise.wait().map_err(DispatchError::from)? {
            Some(v) => Ok(Resolved::One(Some(v))),
            None if spec.optional => Ok(Resolved::One(None)),
            None => Err(DispatchError::NotHandled),
        };
    }

    match base.first_result() {
        Some(v) => Ok(Resolved::One(Some(v.clone()))),
        None if spec.optional => Ok(Resolved::One(None)),
        None => Err(DispatchError::NotHandled),
    }
}

/// Materialize a live handler instance for inference: resolve the
/// handler type through the composition, linked to the current chain.
pub(crate) fn resolve_instance(
    ctx: &mut HandleContext<'_>,
    token: TypeToken,
) -> Result<Option<Value>, DispatchError> {
    let chain = chain_of(ctx.callback);
    let mut provides = ProvidesBuilder::new(Key::Type(token)).chain(chain).build();
    let result = ctx.composer.handle(&mut provides, false, None);
    if result.is_error() {
        return Err(result.into_error().expect("checked"));
    }
    let base = provides.base();
    if let Some(joined) = base.promised_results() {
        let late = joined.wait().map_err(DispatchError::from)?;
        if let Some(found) = late.into_iter().flatten().next() {
            return Ok(Some(found));
        }
    }
    Ok(base.first_result().cloned())
}
