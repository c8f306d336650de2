//! Handlers and their composition.

use std::sync::{Arc, Mutex};

use crate::callback::Callback;
use crate::descriptor::{DescriptorFactory, HandlerDescriptor};
use crate::dispatch::dispatch_callback;
use crate::error::DispatchError;
use crate::key::{upcasts_of, TypeToken, Upcast, Value};
use crate::result::{HandleResult, NOT_HANDLED};
use crate::spec::HandlerSpec;

/// Handles callbacks, possibly delegating to a composition.
///
/// `composer` is the root of the current composition; when absent the
/// receiver establishes itself as the root.
pub trait Handler: Send + Sync {
    /// Dispatch `callback`; `greedy` accumulates all results.
    fn handle(
        &self,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: Option<&dyn Handler>,
    ) -> HandleResult;
}

/// Marks callbacks as composed on re-entry so chain-level handlers can
/// tell direct from composed delivery.
pub struct CompositionScope<'a> {
    inner: &'a dyn Handler,
}

impl<'a> CompositionScope<'a> {
    /// Scope `inner` as a composition root.
    pub fn new(inner: &'a dyn Handler) -> Self {
        CompositionScope { inner }
    }
}

impl Handler for CompositionScope<'_> {
    fn handle(
        &self,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: Option<&dyn Handler>,
    ) -> HandleResult {
        callback.base_mut().set_composed();
        self.inner.handle(callback, greedy, composer)
    }
}

/// An ordered chain of handlers; the root of most compositions.
///
/// Non-greedy dispatch stops at the first handler that handles; greedy
/// dispatch walks every element and accumulates.
pub struct HandlerChain {
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerChain {
    /// A chain over `handlers`, consulted in order.
    pub fn new(handlers: Vec<Arc<dyn Handler>>) -> Self {
        HandlerChain { handlers }
    }

    /// The number of elements in the chain.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Handler for HandlerChain {
    fn handle(
        &self,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: Option<&dyn Handler>,
    ) -> HandleResult {
        let scope;
        let composer: &dyn Handler = match composer {
            Some(c) => c,
            None => {
                scope = CompositionScope::new(self);
                &scope
            }
        };
        let mut result = NOT_HANDLED;
        for handler in &self.handlers {
            result = result.or(handler.handle(callback, greedy, Some(composer)));
            if result.stop() || (result.handled() && !greedy) {
                break;
            }
        }
        result
    }
}

/// A live handler instance paired with its descriptor.
///
/// Besides dispatching its bindings, an instance satisfies a `Provides`
/// request for its own (or a widened) type directly.
pub struct InstanceHandler {
    instance: Value,
    token: TypeToken,
    upcasts: Arc<[Upcast]>,
    descriptor: Arc<HandlerDescriptor>,
}

impl InstanceHandler {
    /// Wrap `instance`, registering its spec with `factory` when new.
    pub fn new<T: HandlerSpec>(
        instance: T,
        factory: &DescriptorFactory,
    ) -> Result<Self, DispatchError> {
        let descriptor = factory.register::<T>()?;
        Ok(InstanceHandler {
            instance: Arc::new(instance),
            token: TypeToken::of::<T>(),
            upcasts: upcasts_of::<T>(),
            descriptor,
        })
    }

    /// Wrap an already shared `instance`.
    pub fn from_arc<T: HandlerSpec>(
        instance: Arc<T>,
        factory: &DescriptorFactory,
    ) -> Result<Self, DispatchError> {
        let descriptor = factory.register::<T>()?;
        Ok(InstanceHandler {
            instance,
            token: TypeToken::of::<T>(),
            upcasts: upcasts_of::<T>(),
            descriptor,
        })
    }

    /// The wrapped instance.
    pub fn instance(&self) -> &Value {
        &self.instance
    }

    /// The instance's type token.
    pub fn token(&self) -> TypeToken {
        self.token
    }

    /// The instance's descriptor.
    pub fn descriptor(&self) -> &Arc<HandlerDescriptor> {
        &self.descriptor
    }
}

impl Handler for InstanceHandler {
    fn handle(
        &self,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: Option<&dyn Handler>,
    ) -> HandleResult {
        let scope;
        let composer: &dyn Handler = match composer {
            Some(c) => c,
            None => {
                scope = CompositionScope::new(self);
                &scope
            }
        };
        dispatch_callback(
            crate::binding::InstanceRef::Object(Arc::clone(&self.instance)),
            Some((self.token, self.upcasts.as_ref())),
            &self.descriptor,
            callback,
            greedy,
            composer,
        )
    }
}

/// A thread-safe, growable set of instance handlers; the batch scope
/// appends batchers here while a batch is open.
#[derive(Default)]
pub struct MutableHandlers {
    handlers: Mutex<Vec<Arc<InstanceHandler>>>,
}

impl MutableHandlers {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler.
    pub fn append(&self, handler: Arc<InstanceHandler>) {
        self.handlers.lock().expect("handlers poisoned").push(handler);
    }

    /// Snapshot the current handlers.
    pub fn snapshot(&self) -> Vec<Arc<InstanceHandler>> {
        self.handlers.lock().expect("handlers poisoned").clone()
    }
}

impl Handler for MutableHandlers {
    fn handle(
        &self,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: Option<&dyn Handler>,
    ) -> HandleResult {
        let mut result = NOT_HANDLED;
        for handler in self.snapshot() {
            result = result.or(handler.handle(callback, greedy, composer));
            if result.stop() || (result.handled() && !greedy) {
                break;
            }
        }
        result
    }
}
