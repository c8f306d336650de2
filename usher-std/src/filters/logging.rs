//! Logging filter - observability around binding invocation.

use usher_core::{
    Binding, Callback, DispatchError, Filter, FilterProvider, HandleContext, Handler, Next,
    PipeOut, Piped, Settled,
};

use std::any::Any;
use std::sync::Arc;

/// A filter that logs entry and exit around each binding invocation
/// through `tracing`. Asynchronous invocations log their exit when the
/// promise settles, including rejections.
pub struct Logging {
    name: &'static str,
}

impl Logging {
    /// A logging filter with the default stage name.
    pub fn new() -> Self {
        Self::named("dispatch")
    }

    /// A logging filter identified as `name` in log events.
    pub fn named(name: &'static str) -> Self {
        Logging { name }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for Logging {
    fn next(
        &self,
        ctx: &mut HandleContext<'_>,
        next: &mut Next<'_>,
        _provider: &dyn FilterProvider,
    ) -> PipeOut {
        let name = self.name;
        let origin = ctx.binding.origin().to_string();
        tracing::debug!(name, binding = %origin, "invoking");
        let out = next.pipe(ctx);
        match &out {
            Ok(Piped::Sync(values)) => {
                tracing::debug!(name, binding = %origin, results = values.len(), "completed");
            }
            Ok(Piped::Async(promise)) => {
                promise.subscribe(move |settled| match settled {
                    Settled::Fulfilled(values) => {
                        tracing::debug!(
                            name,
                            binding = %origin,
                            results = values.len(),
                            "completed"
                        );
                    }
                    Settled::Rejected(err) => {
                        tracing::debug!(name, binding = %origin, error = %err, "failed");
                    }
                    Settled::Cancelled => {
                        tracing::debug!(name, binding = %origin, "cancelled");
                    }
                });
            }
            Err(err) => {
                tracing::debug!(name, binding = %origin, error = %err, "failed");
            }
        }
        out
    }
}

/// Required provider wrapping a [`Logging`] filter, for attaching at the
/// descriptor level.
pub struct LoggingProvider {
    filter: Arc<Logging>,
}

impl LoggingProvider {
    /// Provide `filter` to every binding of the descriptor.
    pub fn new(filter: Logging) -> Self {
        LoggingProvider {
            filter: Arc::new(filter),
        }
    }
}

impl FilterProvider for LoggingProvider {
    fn filters(
        &self,
        _binding: &Binding,
        _callback: &dyn Callback,
        _composer: &dyn Handler,
    ) -> Result<Vec<Arc<dyn Filter>>, DispatchError> {
        Ok(vec![Arc::clone(&self.filter) as Arc<dyn Filter>])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
