//! Bindings: immutable, parsed call targets selected by a policy.

use std::fmt;
use std::sync::Arc;

use crate::callback::{Callback, ResultVal};
use crate::error::DispatchError;
use crate::filter::FilterProvider;
use crate::handler::Handler;
use crate::key::{Key, TypeToken, Upcast, Value};
use crate::policy::Policy;
use crate::promise::Promise;

/// Flags fixed on a binding at construction.
#[derive(Clone, Copy, Default, Debug)]
pub struct BindingFlags {
    /// Collection results deliver as the collection, never splat.
    pub strict: bool,
    /// Remove all but required filter providers.
    pub skip_filters: bool,
    /// The binding's logical result settles through a promise.
    pub asynchronous: bool,
}

/// A dependency parameter of a binding.
#[derive(Clone)]
pub struct DependencySpec {
    /// The key resolved for this parameter.
    pub key: Key,
    /// Zero value on miss instead of an unresolved-argument error.
    pub optional: bool,
    /// A collection parameter matches only collection-keyed bindings.
    pub strict: bool,
    /// Greedy resolution collecting every match.
    pub many: bool,
    /// The parameter receives a promise of the value.
    pub promise: bool,
    /// Custom resolution, replacing the default `Provides` walk.
    pub resolver: Option<Arc<dyn DependencyResolver>>,
    /// Diagnostic name of the parameter type.
    pub name: &'static str,
}

impl DependencySpec {
    /// A plain dependency on `key`.
    pub fn of(key: Key, name: &'static str) -> Self {
        DependencySpec {
            key,
            optional: false,
            strict: false,
            many: false,
            promise: false,
            resolver: None,
            name,
        }
    }
}

impl fmt::Debug for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DependencySpec({})", self.name)
    }
}

/// The value a dependency resolution produced.
pub enum Resolved {
    /// A single value, or nothing.
    One(Option<Value>),
    /// Every matching value, in discovery order.
    Many(Vec<Value>),
    /// The value settles later.
    Promised(Promise<Option<Value>>),
}

/// Custom retrieval of a dependency argument.
pub trait DependencyResolver: Send + Sync {
    /// Resolve `spec` in the context of the current dispatch.
    fn resolve(
        &self,
        spec: &DependencySpec,
        ctx: &mut HandleContext<'_>,
    ) -> Result<Resolved, DispatchError>;
}

/// The handler an invocation targets.
#[derive(Clone)]
pub enum InstanceRef {
    /// No receiver (function bindings and inference).
    None,
    /// A live handler instance.
    Object(Value),
}

impl InstanceRef {
    /// The live instance as `Arc<T>`, when present and of type `T`.
    pub fn instance<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        match self {
            InstanceRef::Object(v) => crate::key::coerce::<T>(v),
            InstanceRef::None => None,
        }
    }

    /// Identity used by dispatch guards.
    pub fn id(&self) -> usize {
        match self {
            InstanceRef::None => 0,
            InstanceRef::Object(v) => Arc::as_ptr(v) as *const () as usize,
        }
    }
}

/// Everything a binding invocation can see.
pub struct HandleContext<'a> {
    /// The handler being dispatched.
    pub handler: InstanceRef,
    /// The in-flight callback.
    pub callback: &'a mut dyn Callback,
    /// The binding being invoked.
    pub binding: &'a Arc<Binding>,
    /// The composition to resolve dependencies against.
    pub composer: &'a dyn Handler,
    /// Whether the dispatch accumulates all results.
    pub greedy: bool,
    /// The payload converted through the matched widening edge, when the
    /// key match was inexact.
    pub source_view: Option<Value>,
}

impl HandleContext<'_> {
    /// The payload as the binding's parameter type sees it.
    pub fn source_value(&self) -> Option<Value> {
        self.source_view
            .clone()
            .or_else(|| self.callback.source().cloned())
    }

    /// Resolve a dependency through the same machinery binding arguments
    /// use. Filters needing extra dependencies call this.
    pub fn resolve_dependency(
        &mut self,
        spec: &DependencySpec,
    ) -> Result<Resolved, DispatchError> {
        if let Some(resolver) = spec.resolver.clone() {
            resolver.resolve(spec, self)
        } else {
            crate::provides::resolve_dependency_default(spec, self)
        }
    }
}

pub(crate) type InvokeFn = Arc<
    dyn Fn(&mut HandleContext<'_>, Vec<Resolved>) -> Result<Vec<ResultVal>, DispatchError>
        + Send
        + Sync,
>;

/// An immutable call target: key, flags, filters, dependency list and
/// the invocation adapter. Policy is fixed at construction.
pub struct Binding {
    policy: Policy,
    key: Key,
    upcasts: Arc<[Upcast]>,
    out: Option<TypeToken>,
    flags: BindingFlags,
    filters: Vec<Arc<dyn FilterProvider>>,
    args: Vec<DependencySpec>,
    invoke: InvokeFn,
    ctor: bool,
    origin: Arc<str>,
}

impl Binding {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        policy: Policy,
        key: Key,
        upcasts: Arc<[Upcast]>,
        out: Option<TypeToken>,
        flags: BindingFlags,
        filters: Vec<Arc<dyn FilterProvider>>,
        args: Vec<DependencySpec>,
        invoke: InvokeFn,
        ctor: bool,
        origin: Arc<str>,
    ) -> Self {
        Binding {
            policy,
            key,
            upcasts,
            out,
            flags,
            filters,
            args,
            invoke,
            ctor,
            origin,
        }
    }

    /// The policy that owns this binding.
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// The key bindings are selected by.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Widening edges of the key (covariant matching and ordering).
    pub fn upcasts(&self) -> &[Upcast] {
        &self.upcasts
    }

    pub(crate) fn upcasts_shared(&self) -> Arc<[Upcast]> {
        Arc::clone(&self.upcasts)
    }

    /// The logical output type, when the binding produces one.
    pub fn out(&self) -> Option<TypeToken> {
        self.out
    }

    /// Construction-time flags.
    pub fn flags(&self) -> BindingFlags {
        self.flags
    }

    /// Collection results deliver whole.
    pub fn strict(&self) -> bool {
        self.flags.strict
    }

    /// Only required filter providers run.
    pub fn skip_filters(&self) -> bool {
        self.flags.skip_filters
    }

    /// The binding's filter providers, in declaration order.
    pub fn filters(&self) -> &[Arc<dyn FilterProvider>] {
        &self.filters
    }

    /// The binding's dependency parameters.
    pub fn args(&self) -> &[DependencySpec] {
        &self.args
    }

    /// Whether this is a constructor binding.
    pub fn is_ctor(&self) -> bool {
        self.ctor
    }

    /// The builder call site that declared this binding.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Resolve every dependency, then run the invocation adapter.
    pub fn invoke(
        &self,
        ctx: &mut HandleContext<'_>,
    ) -> Result<Vec<ResultVal>, DispatchError> {
        let mut resolved = Vec::with_capacity(self.args.len());
        for spec in &self.args {
            let arg = ctx.resolve_dependency(spec).map_err(|cause| {
                if cause.skips_candidate() {
                    DispatchError::UnresolvedArg {
                        name: spec.name.to_string(),
                        cause: Some(Box::new(cause)),
                    }
                } else {
                    cause
                }
            })?;
            resolved.push(arg);
        }
        (self.invoke)(ctx, resolved)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("policy", &self.policy)
            .field("key", &self.key)
            .field("origin", &self.origin)
            .finish()
    }
}
