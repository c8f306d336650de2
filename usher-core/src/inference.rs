//! Inference: dispatch that resolves handler instances on demand from
//! their types.
//!
//! Registered types contribute *intercept* bindings that keep the
//! original key and output type, so selection costs nothing extra. At
//! invocation time the interceptor resolves a live instance through the
//! composition, then runs the original binding against it. The original
//! binding's filters are suppressed (they run on the materialized
//! instance); constructor bindings pass through untouched so their
//! lifestyles still apply.

use std::collections::HashMap;
use std::sync::Arc;

use crate::binding::{Binding, BindingFlags, HandleContext, InstanceRef, InvokeFn, Resolved};
use crate::callback::Callback;
use crate::descriptor::{DescriptorFactory, HandlerDescriptor, PolicyBindings};
use crate::error::DispatchError;
use crate::handler::{CompositionScope, Handler};
use crate::key::TypeToken;
use crate::policy::Policy;
use crate::result::{HandleResult, NOT_HANDLED};
use crate::spec::HandlerSpec;

/// Collects inferable handler types into an [`InferenceHandler`].
pub struct InferenceBuilder<'f> {
    factory: &'f DescriptorFactory,
    bindings: HashMap<Policy, PolicyBindings>,
}

impl<'f> InferenceBuilder<'f> {
    /// Build against `factory`; newly registered types announce their
    /// bindings to the factory's observers as usual.
    pub fn new(factory: &'f DescriptorFactory) -> Self {
        InferenceBuilder {
            factory,
            bindings: HashMap::new(),
        }
    }

    /// Register `T` for inference.
    pub fn add<T: HandlerSpec>(&mut self) -> Result<&mut Self, DispatchError> {
        if T::suppressed() {
            return Ok(self);
        }
        let (descriptor, added) = self.factory.register_new::<T>()?;
        if !added {
            return Ok(self);
        }
        let token = TypeToken::of::<T>();
        for policy in descriptor.policies() {
            let source = descriptor
                .bindings_for(policy)
                .expect("policy listed by descriptor");
            // One binding per distinct key suffices to infer the type.
            let bucket = self
                .bindings
                .entry(policy)
                .or_insert_with(|| PolicyBindings::new(policy));
            source.representatives(|original| {
                bucket.insert(intercept(token, original));
            });
        }
        Ok(self)
    }

    /// The finished inference handler.
    pub fn build(self) -> InferenceHandler {
        InferenceHandler {
            descriptor: HandlerDescriptor::new(
                TypeToken::of::<InferenceHandler>(),
                Arc::from("inference"),
                self.bindings,
                Vec::new(),
            ),
        }
    }
}

fn intercept(token: TypeToken, original: &Arc<Binding>) -> Arc<Binding> {
    if original.is_ctor() {
        return Arc::clone(original);
    }
    let inner = Arc::clone(original);
    let target = Arc::clone(original);
    let invoke: InvokeFn = Arc::new(move |ctx: &mut HandleContext<'_>, _resolved: Vec<Resolved>| {
        // A callback instantiates each handler type at most once.
        if !ctx.callback.base_mut().mark_inferred(token.id()) {
            return Ok(Vec::new());
        }
        let live = crate::provides::resolve_instance(ctx, token)?
            .ok_or(DispatchError::NotHandled)?;
        let mut live_ctx = HandleContext {
            handler: InstanceRef::Object(live),
            callback: &mut *ctx.callback,
            binding: &target,
            composer: ctx.composer,
            greedy: ctx.greedy,
            source_view: ctx.source_view.clone(),
        };
        target.invoke(&mut live_ctx)
    });
    Arc::new(Binding::new(
        inner.policy(),
        inner.key().clone(),
        inner.upcasts_shared(),
        inner.out(),
        BindingFlags {
            strict: inner.strict(),
            skip_filters: true,
            asynchronous: inner.flags().asynchronous,
        },
        Vec::new(),
        Vec::new(),
        invoke,
        false,
        Arc::from(format!("{}(inferred)", inner.origin())),
    ))
}

/// Services callbacks by inferring handler instances from registered
/// types.
pub struct InferenceHandler {
    descriptor: HandlerDescriptor,
}

impl Handler for InferenceHandler {
    fn handle(
        &self,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: Option<&dyn Handler>,
    ) -> HandleResult {
        if !callback.can_infer() {
            return NOT_HANDLED;
        }
        let scope;
        let composer: &dyn Handler = match composer {
            Some(c) => c,
            None => {
                scope = CompositionScope::new(self);
                &scope
            }
        };
        let policy = callback.policy();
        let before = callback.base().result_count();
        self.descriptor
            .dispatch(policy, InstanceRef::None, callback, greedy, composer)
            .otherwise_handled_if(callback.base().result_count() > before)
    }
}
