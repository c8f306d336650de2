//! The dispatch reducer: candidate selection, guards, filters, argument
//! resolution, invocation and result acceptance.

use std::sync::Arc;

use tracing::trace;

use crate::binding::{Binding, HandleContext, InstanceRef};
use crate::callback::Callback;
use crate::descriptor::HandlerDescriptor;
use crate::filter::{ordered_filters, run_pipeline, PipeOut, Piped};
use crate::handler::Handler;
use crate::key::{value, Key, TypeToken, Upcast, Value};
use crate::policy::{Accepted, Policy, Variance};
use crate::promise::Promise;
use crate::result::{HandleResult, NOT_HANDLED};

/// Dispatch `callback` against a handler instance and its descriptor.
///
/// A `Provides` request is first offered the instance itself (covariant
/// self-provision), then reduced over the descriptor's bindings.
pub(crate) fn dispatch_callback(
    instance: InstanceRef,
    instance_token: Option<(TypeToken, &[Upcast])>,
    descriptor: &HandlerDescriptor,
    callback: &mut dyn Callback,
    greedy: bool,
    composer: &dyn Handler,
) -> HandleResult {
    let policy = callback.policy();
    let before = callback.base().result_count();
    let mut result = NOT_HANDLED;

    if policy == Policy::Provides && callback.base().constraints().is_empty() {
        if let (InstanceRef::Object(object), Some((token, upcasts))) =
            (&instance, instance_token)
        {
            let candidate = Key::Type(token);
            if let Some(m) =
                policy.matches_key(&callback.key(), &[], &candidate, upcasts, false)
            {
                let delivered = match &m.view {
                    Some(view) => view.apply(&Arc::clone(object)),
                    None => Some(Arc::clone(object)),
                };
                if let Some(delivered) = delivered {
                    result = result.or(callback.receive_result(delivered, false, composer));
                    if result.stop() || (result.handled() && !greedy) {
                        return result;
                    }
                }
            }
        }
    }

    let reduced = descriptor.dispatch(policy, instance, callback, greedy, composer);
    result
        .or(reduced)
        .otherwise_handled_if(callback.base().result_count() > before)
}

impl HandlerDescriptor {
    /// Reduce the policy's bindings for `callback`, enforcing guards,
    /// running filter pipelines and accepting results.
    pub fn dispatch(
        &self,
        policy: Policy,
        instance: InstanceRef,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> HandleResult {
        let bindings = match self.bindings_for(policy) {
            Some(b) => b,
            None => return NOT_HANDLED,
        };
        let key = callback.key();
        let callback_upcasts: Vec<Upcast> = callback.upcasts().to_vec();

        bindings.reduce(&key, |binding, result| {
            if result.stop() || (result.handled() && !greedy) {
                return (result, true);
            }
            let matched = policy.matches_key(
                &key,
                &callback_upcasts,
                binding.key(),
                binding.upcasts(),
                false,
            );
            let matched = match matched {
                Some(m) => m,
                None => return (result, false),
            };
            trace!(
                handler = self.name(),
                binding = binding.origin(),
                exact = matched.exact,
                "candidate matched"
            );
            let result = invoke_candidate(
                self,
                policy,
                &instance,
                binding,
                matched.view,
                callback,
                greedy,
                composer,
                result,
            );
            let done = result.stop() || (result.handled() && !greedy);
            (result, done)
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn invoke_candidate(
    descriptor: &HandlerDescriptor,
    policy: Policy,
    instance: &InstanceRef,
    binding: &Arc<Binding>,
    view: Option<Upcast>,
    callback: &mut dyn Callback,
    greedy: bool,
    composer: &dyn Handler,
    result: HandleResult,
) -> HandleResult {
    let frame = match callback.approve_dispatch(instance.id(), binding) {
        Some(frame) => frame,
        None => return result,
    };

    let stages = if callback.can_filter() {
        let skip = binding.skip_filters();
        match ordered_filters(
            &[binding.filters(), descriptor.filters()],
            binding,
            callback,
            composer,
            skip,
        ) {
            Ok(stages) => stages,
            Err(_) => {
                callback.restore_dispatch(frame);
                return result;
            }
        }
    } else {
        Vec::new()
    };

    let (source_view, result_view) = match policy.variance() {
        Variance::Contravariant => {
            let converted = view
                .as_ref()
                .and_then(|v| callback.source().and_then(|s| v.apply(s)));
            (converted, None)
        }
        Variance::Covariant => (None, view),
    };

    let mut ctx = HandleContext {
        handler: instance.clone(),
        callback,
        binding,
        composer,
        greedy,
        source_view,
    };

    let mut terminal = |ctx: &mut HandleContext<'_>| -> PipeOut {
        let binding = Arc::clone(ctx.binding);
        binding.invoke(ctx).map(Piped::Sync)
    };

    let out = run_pipeline(&stages, &mut ctx, &mut terminal);

    let outcome = match out {
        Ok(Piped::Sync(values)) => {
            let (accepted, accept) = policy.accept_results(values);
            deliver(accepted, accept, &result_view, policy, binding, callback, composer)
        }
        Ok(Piped::Async(promise)) => {
            let result_view = result_view.clone();
            let settled: Promise<Option<Value>> = promise.then(move |values| {
                let (accepted, accept) = policy.accept_results(values);
                if !accept.handled() {
                    return None;
                }
                match accepted {
                    Accepted::Value(v) => apply_view(&result_view, v),
                    Accepted::Many { whole, .. } => apply_view(&result_view, whole),
                    Accepted::None => None,
                }
            });
            let strict = policy.strict() || binding.strict();
            callback.receive_result(value(settled), strict, composer)
        }
        Err(err) if err.skips_candidate() => {
            trace!(binding = binding.origin(), error = %err, "candidate skipped");
            NOT_HANDLED
        }
        Err(err) => NOT_HANDLED.with_error(err),
    };

    callback.restore_dispatch(frame);
    result.or(outcome)
}

fn deliver(
    accepted: Accepted,
    accept: HandleResult,
    result_view: &Option<Upcast>,
    policy: Policy,
    binding: &Arc<Binding>,
    callback: &mut dyn Callback,
    composer: &dyn Handler,
) -> HandleResult {
    if !accept.handled() {
        return accept;
    }
    let strict = policy.strict() || binding.strict();
    match accepted {
        Accepted::None => accept,
        Accepted::Value(v) => match apply_view(result_view, v) {
            Some(v) => accept.and(callback.receive_result(v, strict, composer)),
            None => accept,
        },
        Accepted::Many { items, whole } => {
            if strict {
                match apply_view(result_view, whole) {
                    Some(whole) => accept.and(callback.receive_result(whole, true, composer)),
                    None => accept,
                }
            } else {
                let items = match result_view {
                    Some(view) => items.iter().filter_map(|v| view.apply(v)).collect(),
                    None => items,
                };
                accept.and(callback.base_mut().add_results(items))
            }
        }
    }
}

fn apply_view(view: &Option<Upcast>, v: Value) -> Option<Value> {
    match view {
        Some(view) => view.apply(&v),
        None => Some(v),
    }
}
