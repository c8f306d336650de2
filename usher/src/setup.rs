//! Composition setup: assemble a root handler from instances, inferable
//! types and ambient options.

use std::sync::Arc;

use usher_core::{
    batch, BatchHandler, Callback, DescriptorFactory, DispatchError, HandleResult, Handler,
    HandlerChain, HandlerSpec, InferenceBuilder, InstanceHandler, KeyAtom, Options,
    OptionsHandler, Promise, Value,
};

type InferAdd = Box<dyn FnOnce(&mut InferenceBuilder<'_>) -> Result<(), DispatchError>>;
type OptionsWrap = Box<dyn FnOnce(Arc<dyn Handler>) -> Arc<dyn Handler>>;

/// Start composing a root handler.
pub fn setup() -> SetupBuilder {
    SetupBuilder {
        factory: Arc::new(DescriptorFactory::new()),
        handlers: Vec::new(),
        infer: Vec::new(),
        options: Vec::new(),
        errors: Vec::new(),
    }
}

/// Collects handlers, inferable specs and options into a [`Root`].
pub struct SetupBuilder {
    factory: Arc<DescriptorFactory>,
    handlers: Vec<Arc<dyn Handler>>,
    infer: Vec<InferAdd>,
    options: Vec<OptionsWrap>,
    errors: Vec<DispatchError>,
}

impl SetupBuilder {
    /// Add a live handler instance.
    pub fn handler<T: HandlerSpec>(mut self, instance: T) -> Self {
        if T::suppressed() {
            return self;
        }
        match InstanceHandler::new(instance, &self.factory) {
            Ok(wrapped) => self.handlers.push(Arc::new(wrapped)),
            Err(err) => self.errors.push(err),
        }
        self
    }

    /// Add an already shared handler instance.
    pub fn handler_arc<T: HandlerSpec>(mut self, instance: Arc<T>) -> Self {
        if T::suppressed() {
            return self;
        }
        match InstanceHandler::from_arc(instance, &self.factory) {
            Ok(wrapped) => self.handlers.push(Arc::new(wrapped)),
            Err(err) => self.errors.push(err),
        }
        self
    }

    /// Add a pre-built handler (contexts, decorators).
    pub fn chain(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Register `T` for inference: instances materialize on demand
    /// through resolution.
    pub fn spec<T: HandlerSpec>(mut self) -> Self {
        self.infer
            .push(Box::new(|b| b.add::<T>().map(|_| ())));
        self
    }

    /// Install ambient options; earlier installations win on overlap.
    pub fn options<O: Options>(mut self, options: O) -> Self {
        self.options
            .push(Box::new(move |inner| Arc::new(OptionsHandler::new(inner, options))));
        self
    }

    /// Build the root handler composition.
    pub fn build(self) -> Result<Root, DispatchError> {
        let mut errors = self.errors;
        let mut chain = self.handlers;
        if !self.infer.is_empty() {
            let mut inference = InferenceBuilder::new(&self.factory);
            for add in self.infer {
                if let Err(err) = add(&mut inference) {
                    errors.push(err);
                }
            }
            chain.push(Arc::new(inference.build()));
        }
        if !errors.is_empty() {
            return Err(DispatchError::aggregate(errors));
        }
        let mut root: Arc<dyn Handler> = Arc::new(HandlerChain::new(chain));
        // First-installed options win, so the first wrap goes outermost.
        for wrap in self.options.into_iter().rev() {
            root = wrap(root);
        }
        Ok(Root {
            handler: root,
            factory: self.factory,
        })
    }
}

/// A fresh root handler composition with its descriptor factory.
pub struct Root {
    handler: Arc<dyn Handler>,
    factory: Arc<DescriptorFactory>,
}

impl Root {
    /// The composed handler.
    pub fn handler(&self) -> Arc<dyn Handler> {
        Arc::clone(&self.handler)
    }

    /// The descriptor factory behind this composition.
    pub fn factory(&self) -> Arc<DescriptorFactory> {
        Arc::clone(&self.factory)
    }

    /// Run `block` in a batch scope over this composition and flush.
    pub fn batch(&self, block: impl FnOnce(&BatchHandler)) -> Promise<Vec<Value>> {
        batch(
            Arc::clone(&self.handler),
            Arc::clone(&self.factory),
            Vec::new(),
            block,
        )
    }

    /// Like [`batch`](Self::batch), admitting only collectors for `tags`.
    pub fn batch_tagged(
        &self,
        tags: Vec<KeyAtom>,
        block: impl FnOnce(&BatchHandler),
    ) -> Promise<Vec<Value>> {
        batch(
            Arc::clone(&self.handler),
            Arc::clone(&self.factory),
            tags,
            block,
        )
    }
}

impl Handler for Root {
    fn handle(
        &self,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: Option<&dyn Handler>,
    ) -> HandleResult {
        self.handler.handle(callback, greedy, composer)
    }
}
