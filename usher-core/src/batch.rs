//! Batch scope: coalesce callbacks by tag for deferred completion.

use std::any::TypeId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::callback::Callback;
use crate::descriptor::DescriptorFactory;
use crate::error::DispatchError;
use crate::handler::{CompositionScope, Handler, InstanceHandler};
use crate::key::{coerce, KeyAtom, Payload, Value};
use crate::promise::{Promise, PromiseError};
use crate::result::{HandleResult, NOT_HANDLED};
use crate::spec::HandlerSpec;

/// A collector accumulating callbacks for one deferred flush.
pub trait Batching: Send + Sync + 'static {
    /// Flush the accumulated work, returning a value now or a promise of
    /// it.
    fn complete_batch(
        &self,
        composer: &dyn Handler,
    ) -> Result<(Value, Option<Promise<Value>>), DispatchError>;
}

/// The tag admitting a batcher, derived from a marker type.
pub fn batch_tag<T: 'static>() -> KeyAtom {
    KeyAtom::Type(TypeId::of::<T>())
}

#[derive(Clone)]
struct BatchEntry {
    instance: Value,
    handler: Arc<InstanceHandler>,
    batching: Arc<dyn Batching>,
}

struct BatchState {
    tags: HashSet<KeyAtom>,
    entries: Vec<BatchEntry>,
}

impl BatchState {
    fn should_batch(&self, tag: &KeyAtom) -> bool {
        self.tags.is_empty() || self.tags.contains(tag)
    }
}

/// Wraps a composition for the duration of one batch: callbacks that can
/// batch are offered to the collectors first, everything else falls
/// through to the wrapped handler.
pub struct BatchHandler {
    inner: Arc<dyn Handler>,
    factory: Arc<DescriptorFactory>,
    batch: Mutex<Option<BatchState>>,
}

impl BatchHandler {
    /// Open a batch over `inner`, admitting collectors for `tags`
    /// (everything when empty).
    pub fn new(
        inner: Arc<dyn Handler>,
        factory: Arc<DescriptorFactory>,
        tags: Vec<KeyAtom>,
    ) -> Self {
        BatchHandler {
            inner,
            factory,
            batch: Mutex::new(Some(BatchState {
                tags: tags.into_iter().collect(),
                entries: Vec::new(),
            })),
        }
    }

    /// Find or create the batcher of type `B`, gated by `tag` when given.
    pub fn batch_for<B>(&self, tag: Option<KeyAtom>) -> Option<Arc<B>>
    where
        B: HandlerSpec + Batching + Default,
    {
        let mut guard = self.batch.lock().expect("batch poisoned");
        let batch = guard.as_mut()?;
        if let Some(tag) = &tag {
            if !batch.should_batch(tag) {
                return None;
            }
        }
        for entry in &batch.entries {
            if let Some(found) = coerce::<B>(&entry.instance) {
                return Some(found);
            }
        }
        let created = Arc::new(B::default());
        let handler = InstanceHandler::from_arc(Arc::clone(&created), &self.factory).ok()?;
        batch.entries.push(BatchEntry {
            instance: Arc::clone(&created) as Value,
            handler: Arc::new(handler),
            batching: Arc::clone(&created) as Arc<dyn Batching>,
        });
        Some(created)
    }

    /// Flush every collector and join their completions. Panics if the
    /// batch already completed.
    pub fn complete(&self) -> Promise<Vec<Value>> {
        let state = self
            .batch
            .lock()
            .expect("batch poisoned")
            .take()
            .expect("batch has already completed");
        let mut completions = Vec::new();
        for entry in state.entries {
            match entry.batching.complete_batch(self) {
                Ok((now, None)) => completions.push(Promise::resolved(now)),
                Ok((_, Some(later))) => completions.push(later),
                Err(err) => {
                    return Promise::rejected(PromiseError::Rejected(Arc::new(err)));
                }
            }
        }
        Promise::all(completions)
    }

    fn offer(
        &self,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> HandleResult {
        let entries: Vec<BatchEntry> = match &*self.batch.lock().expect("batch poisoned") {
            Some(state) => state.entries.clone(),
            None => return NOT_HANDLED,
        };
        let mut result = NOT_HANDLED;
        for entry in entries {
            result = result.or(entry.handler.handle(callback, greedy, Some(composer)));
            if result.stop() || (result.handled() && !greedy) {
                break;
            }
        }
        result
    }
}

impl Handler for BatchHandler {
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
        if callback.can_batch() {
            let offered = self.offer(callback, greedy, composer);
            if offered.handled() && !offered.stop() {
                return offered;
            }
        }
        self.inner.handle(callback, greedy, Some(composer))
    }
}

/// Run `block` in a batch scope over `handler`, then flush every
/// collector and join their completions.
pub fn batch(
    handler: Arc<dyn Handler>,
    factory: Arc<DescriptorFactory>,
    tags: Vec<KeyAtom>,
    block: impl FnOnce(&BatchHandler),
) -> Promise<Vec<Value>> {
    let scope = BatchHandler::new(handler, factory, tags);
    block(&scope);
    scope.complete()
}

/// Vetoes batching for everything dispatched through it.
pub struct NoBatch {
    inner: Arc<dyn Handler>,
}

impl NoBatch {
    /// Wrap `inner`, exempting nested callbacks from batching.
    pub fn new(inner: Arc<dyn Handler>) -> Self {
        NoBatch { inner }
    }
}

impl Handler for NoBatch {
    fn handle(
        &self,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: Option<&dyn Handler>,
    ) -> HandleResult {
        callback.base_mut().set_no_batch();
        self.inner.handle(callback, greedy, composer)
    }
}

/// A source value travelling through a batch, kept with its origin so
/// the flush can complete each one individually.
pub struct Batched<T> {
    /// The batched source.
    pub source: T,
    /// Settles when the batch flush delivers this item's result.
    pub settled: Promise<Value>,
}

impl<T: Send + Sync + 'static> Payload for Batched<T> {}

impl<T> Batched<T> {
    /// Pair `source` with the promise its flush will settle.
    pub fn new(source: T) -> (Self, crate::promise::Settle<Value>) {
        let (settled, settle) = Promise::pending();
        (Batched { source, settled }, settle)
    }
}
