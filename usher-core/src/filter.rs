//! The filter pipeline around binding invocation.
//!
//! Filters wrap a binding in order: each stage receives a [`Next`] handle
//! and chooses to [`pipe`](Next::pipe) onward, [`abort`](Next::abort) the
//! candidate, or substitute its own outcome. A stage may also return a
//! promise, deferring the remainder of acceptance to the promise's
//! continuation.

use std::any::Any;
use std::sync::Arc;

use crate::binding::{Binding, HandleContext};
use crate::callback::{Callback, ResultVal};
use crate::error::DispatchError;
use crate::handler::Handler;
use crate::key::TypeToken;
use crate::promise::Promise;

/// Order band for general-purpose filters.
pub const FILTER_STAGE: i32 = 0;

/// Order band for lifestyle caches; runs innermost, wrapping only the
/// constructor.
pub const LIFESTYLE_STAGE: i32 = i32::MAX - 1000;

/// What a pipeline stage produced.
pub enum Piped {
    /// Values available now.
    Sync(Vec<ResultVal>),
    /// Values settling later.
    Async(Promise<Vec<ResultVal>>),
}

/// Outcome of running a stage or the whole pipeline.
pub type PipeOut = Result<Piped, DispatchError>;

/// An ordered pipeline stage around binding invocation.
pub trait Filter: Send + Sync {
    /// The stage's preferred order; lower runs earlier (outermost).
    fn order(&self) -> Option<i32> {
        None
    }

    /// Process the invocation. Call `next.pipe(ctx)` to continue.
    fn next(
        &self,
        ctx: &mut HandleContext<'_>,
        next: &mut Next<'_>,
        provider: &dyn FilterProvider,
    ) -> PipeOut;
}

/// Supplies concrete filters for a matched binding.
pub trait FilterProvider: Send + Sync {
    /// Required providers survive skip-filters requests.
    fn required(&self) -> bool {
        false
    }

    /// Whether this provider participates for `callback`.
    fn applies_to(&self, callback: &dyn Callback) -> bool {
        let _ = callback;
        true
    }

    /// An explicit order for the provided filters, overriding each
    /// filter's own preference.
    fn order(&self) -> Option<i32> {
        None
    }

    /// Produce the concrete filters for this dispatch.
    fn filters(
        &self,
        binding: &Binding,
        callback: &dyn Callback,
        composer: &dyn Handler,
    ) -> Result<Vec<Arc<dyn Filter>>, DispatchError>;

    /// Downcast support for filters inspecting their provider.
    fn as_any(&self) -> &dyn Any;
}

/// Declarative filter configuration: required flag plus explicit order.
#[derive(Clone, Copy, Default, Debug)]
pub struct FilterSpec {
    required: bool,
    order: Option<i32>,
}

impl FilterSpec {
    /// A spec that survives skip-filters requests.
    pub fn required() -> Self {
        FilterSpec {
            required: true,
            order: None,
        }
    }

    /// Pin an explicit order.
    pub fn order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    /// Whether the spec is required.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// The explicit order, if pinned.
    pub fn explicit_order(&self) -> Option<i32> {
        self.order
    }
}

/// Provides a filter type by resolving it through the composition,
/// falling back to a fresh default instance.
pub struct FilterSpecProvider {
    spec: FilterSpec,
    key: TypeToken,
    find: Arc<dyn Fn(&dyn Handler) -> Option<Arc<dyn Filter>> + Send + Sync>,
    make: Option<Arc<dyn Fn() -> Arc<dyn Filter> + Send + Sync>>,
}

impl FilterSpecProvider {
    /// Provide filter type `F` under `spec`, defaulting a fresh instance
    /// when the composition cannot resolve one.
    pub fn of<F>(spec: FilterSpec) -> Self
    where
        F: Filter + Default + Send + Sync + 'static,
    {
        FilterSpecProvider {
            spec,
            key: TypeToken::of::<F>(),
            find: Self::finder::<F>(),
            make: Some(Arc::new(|| Arc::new(F::default()))),
        }
    }

    /// Provide filter type `F` under `spec`, strictly through resolution:
    /// a candidate whose filter cannot be resolved is skipped.
    pub fn resolved<F>(spec: FilterSpec) -> Self
    where
        F: Filter + Send + Sync + 'static,
    {
        FilterSpecProvider {
            spec,
            key: TypeToken::of::<F>(),
            find: Self::finder::<F>(),
            make: None,
        }
    }

    fn finder<F>() -> Arc<dyn Fn(&dyn Handler) -> Option<Arc<dyn Filter>> + Send + Sync>
    where
        F: Filter + Send + Sync + 'static,
    {
        Arc::new(|composer| {
            crate::provides::resolve_value(composer, crate::key::Key::of::<F>())
                .and_then(|v| crate::key::coerce::<F>(&v))
                .map(|found| found as Arc<dyn Filter>)
        })
    }

    /// The filter type provided.
    pub fn key(&self) -> TypeToken {
        self.key
    }
}

impl FilterProvider for FilterSpecProvider {
    fn required(&self) -> bool {
        self.spec.is_required()
    }

    fn order(&self) -> Option<i32> {
        self.spec.explicit_order()
    }

    fn filters(
        &self,
        _binding: &Binding,
        _callback: &dyn Callback,
        composer: &dyn Handler,
    ) -> Result<Vec<Arc<dyn Filter>>, DispatchError> {
        // Prefer an instance resolvable through the composition so filter
        // state can be configured like any other dependency.
        if let Some(found) = (self.find)(composer) {
            return Ok(vec![found]);
        }
        match &self.make {
            Some(make) => Ok(vec![make()]),
            None => Err(DispatchError::UnresolvedArg {
                name: self.key.name().to_string(),
                cause: None,
            }),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Provides pre-built filter instances.
pub struct FilterInstanceProvider {
    filters: Vec<Arc<dyn Filter>>,
    required: bool,
}

impl FilterInstanceProvider {
    /// Wrap ready filter instances.
    pub fn new(filters: Vec<Arc<dyn Filter>>, required: bool) -> Self {
        FilterInstanceProvider { filters, required }
    }
}

impl FilterProvider for FilterInstanceProvider {
    fn required(&self) -> bool {
        self.required
    }

    fn filters(
        &self,
        _binding: &Binding,
        _callback: &dyn Callback,
        _composer: &dyn Handler,
    ) -> Result<Vec<Arc<dyn Filter>>, DispatchError> {
        Ok(self.filters.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A filter paired with its provider and effective order.
pub struct ProvidedFilter {
    pub(crate) filter: Arc<dyn Filter>,
    pub(crate) provider: Arc<dyn FilterProvider>,
    order: i32,
}

/// Collect, filter and stably order the providers that apply to a
/// dispatch. `skip` keeps only required providers.
pub(crate) fn ordered_filters(
    sources: &[&[Arc<dyn FilterProvider>]],
    binding: &Binding,
    callback: &dyn Callback,
    composer: &dyn Handler,
    skip: bool,
) -> Result<Vec<ProvidedFilter>, DispatchError> {
    let mut provided = Vec::new();
    for source in sources {
        for provider in source.iter() {
            if skip && !provider.required() {
                continue;
            }
            if !provider.applies_to(callback) {
                continue;
            }
            for filter in provider.filters(binding, callback, composer)? {
                let order = provider
                    .order()
                    .or_else(|| filter.order())
                    .unwrap_or(FILTER_STAGE);
                provided.push(ProvidedFilter {
                    filter,
                    provider: Arc::clone(provider),
                    order,
                });
            }
        }
    }
    provided.sort_by_key(|p| p.order);
    Ok(provided)
}

/// Handle to the remainder of the pipeline.
pub struct Next<'a> {
    stages: &'a [ProvidedFilter],
    terminal: &'a mut (dyn FnMut(&mut HandleContext<'_>) -> PipeOut + 'a),
    pos: usize,
}

impl Next<'_> {
    /// Invoke the remainder of the pipeline.
    pub fn pipe(&mut self, ctx: &mut HandleContext<'_>) -> PipeOut {
        let stages = self.stages;
        if self.pos < stages.len() {
            let stage = &stages[self.pos];
            self.pos += 1;
            let out = stage.filter.next(ctx, self, stage.provider.as_ref());
            self.pos -= 1;
            out
        } else {
            (self.terminal)(ctx)
        }
    }

    /// Invoke the remainder and block for any promise it returns.
    pub fn pipe_await(
        &mut self,
        ctx: &mut HandleContext<'_>,
    ) -> Result<Vec<ResultVal>, DispatchError> {
        match self.pipe(ctx)? {
            Piped::Sync(values) => Ok(values),
            Piped::Async(promise) => promise.wait().map_err(DispatchError::from),
        }
    }

    /// Skip the remainder; the candidate is rejected, not failed.
    pub fn abort(&self) -> PipeOut {
        Err(DispatchError::Rejected)
    }
}

/// Run `stages` around `terminal`.
pub(crate) fn run_pipeline<'a>(
    stages: &'a [ProvidedFilter],
    ctx: &mut HandleContext<'_>,
    terminal: &'a mut (dyn FnMut(&mut HandleContext<'_>) -> PipeOut + 'a),
) -> PipeOut {
    let mut next = Next {
        stages,
        terminal,
        pos: 0,
    };
    next.pipe(ctx)
}
