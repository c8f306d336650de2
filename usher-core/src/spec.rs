//! Handler specs: the typed builder that turns describe-time
//! declarations into bindings.
//!
//! A handler type opts in by implementing [`HandlerSpec`]; each builder
//! call plays the role of one policy-marked method, and the closure's
//! parameter list is the signature the binding parser consumes. Wrapper
//! types ([`All`], [`Exactly`], [`Lazy`], [`Cloned`], [`Via`], `Option`)
//! are dependency directives applied to the parameter they wrap.

use std::any::type_name;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::binding::{
    Binding, BindingFlags, DependencyResolver, DependencySpec, HandleContext, Resolved,
};
use crate::callback::ResultVal;
use crate::constraint::{Constraint, ConstraintProvider, Metadata, Named};
use crate::descriptor::{DescriptorObserver, HandlerDescriptor, PolicyBindings};
use crate::error::{BindingError, DescriptorError, DispatchError};
use crate::filter::{Filter, FilterProvider, FilterSpec, FilterSpecProvider};
use crate::key::{
    coerce, coerce_cloned, upcasts_of, value, Key, Payload, TypeToken, Upcast, Value,
};
use crate::lifestyle::Singleton;
use crate::policy::Policy;
use crate::promise::Promise;
use crate::result::HandleResult;

/// A type whose bindings are declared through
/// [`describe`](HandlerSpec::describe).
pub trait HandlerSpec: Payload + Sized {
    /// Declare the handler's bindings.
    fn describe(b: &mut HandlerSpecBuilder<Self>);

    /// Implicit construction used by the synthesized constructor binding.
    /// Types constructible without dependencies return `Some`.
    fn construct() -> Option<Self> {
        None
    }

    /// Suppressed types are skipped by composition and inference.
    fn suppressed() -> bool {
        false
    }
}

type InvokeFn = Arc<
    dyn Fn(&mut HandleContext<'_>, Vec<Resolved>) -> Result<Vec<ResultVal>, DispatchError>
        + Send
        + Sync,
>;

/// A binding under construction; builder calls return it for chaining
/// flags, filters and constraints.
pub struct BindingConfig {
    policies: Vec<Policy>,
    contra_key: Option<(TypeToken, Arc<[Upcast]>)>,
    out_element: Option<TypeToken>,
    out_whole: Option<TypeToken>,
    out_upcasts: Arc<[Upcast]>,
    key_override: Option<Key>,
    asynchronous: bool,
    ctor: bool,
    origin: String,
    args: Vec<DependencySpec>,
    invoke: InvokeFn,
    strict: bool,
    skip_filters: bool,
    filters: Vec<Arc<dyn FilterProvider>>,
    constraints: Vec<Arc<dyn Constraint>>,
}

impl BindingConfig {
    /// Deliver collection results whole, and key collection returns by
    /// the collection type.
    pub fn strict(&mut self) -> &mut Self {
        self.strict = true;
        self
    }

    /// Run only required filter providers for this binding.
    pub fn skip_filters(&mut self) -> &mut Self {
        self.skip_filters = true;
        self
    }

    /// Attach filter type `F` under `spec`.
    pub fn filter<F>(&mut self, spec: FilterSpec) -> &mut Self
    where
        F: Filter + Default + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(FilterSpecProvider::of::<F>(spec)));
        self
    }

    /// Attach filter type `F` under `spec`, resolved strictly through
    /// the composition.
    pub fn filter_resolved<F>(&mut self, spec: FilterSpec) -> &mut Self
    where
        F: Filter + Send + Sync + 'static,
    {
        self.filters
            .push(Arc::new(FilterSpecProvider::resolved::<F>(spec)));
        self
    }

    /// Attach a ready filter provider.
    pub fn filter_provider(&mut self, provider: Arc<dyn FilterProvider>) -> &mut Self {
        self.filters.push(provider);
        self
    }

    /// Cache the binding's result process-wide.
    pub fn singleton(&mut self) -> &mut Self {
        self.filters.push(Arc::new(Singleton::new()));
        self
    }

    /// Require `constraint` of callers selecting this binding.
    pub fn constraint(&mut self, constraint: Arc<dyn Constraint>) -> &mut Self {
        self.constraints.push(constraint);
        self
    }

    /// Shorthand for a [`Named`] constraint.
    pub fn named(&mut self, name: &str) -> &mut Self {
        self.constraint(Arc::new(Named::new(name.to_string())))
    }

    /// Shorthand for a [`Metadata`] constraint in `k=v,flag` form.
    pub fn metadata(&mut self, tag: &str) -> &mut Self {
        self.constraint(Arc::new(Metadata::parse(tag)))
    }

    /// Select this binding by an explicit key instead of the derived one.
    pub fn keyed(&mut self, key: Key) -> &mut Self {
        self.key_override = Some(key);
        self
    }

    /// Register the same target under an additional policy.
    pub fn also(&mut self, policy: Policy) -> &mut Self {
        if !self.policies.contains(&policy) {
            self.policies.push(policy);
        }
        self
    }

    fn build(&self, policy: Policy, errors: &mut Vec<DispatchError>) -> Option<Arc<Binding>> {
        let (key, upcasts) = match self.key_override.clone() {
            Some(key) => (key, Arc::from(Vec::new())),
            None => match policy.variance() {
                crate::policy::Variance::Contravariant => match &self.contra_key {
                    Some((token, ups)) => (Key::Type(*token), Arc::clone(ups)),
                    None => {
                        errors.push(
                            BindingError::new(self.origin.clone(), "missing callback argument")
                                .into(),
                        );
                        return None;
                    }
                },
                crate::policy::Variance::Covariant => {
                    let token = if self.strict {
                        self.out_whole.or(self.out_element)
                    } else {
                        self.out_element.or(self.out_whole)
                    };
                    match token {
                        Some(token) => {
                            let ups = if self.strict {
                                Arc::from(Vec::new())
                            } else {
                                Arc::clone(&self.out_upcasts)
                            };
                            (Key::Type(token), ups)
                        }
                        None => {
                            errors.push(
                                BindingError::new(
                                    self.origin.clone(),
                                    "covariant binding must produce a value",
                                )
                                .into(),
                            );
                            return None;
                        }
                    }
                }
            },
        };
        let mut filters = self.filters.clone();
        if !self.constraints.is_empty() {
            filters.push(Arc::new(ConstraintProvider::new(self.constraints.clone())));
        }
        Some(Arc::new(Binding::new(
            policy,
            key,
            upcasts,
            self.out_element.or(self.out_whole),
            BindingFlags {
                strict: self.strict,
                skip_filters: self.skip_filters,
                asynchronous: self.asynchronous,
            },
            filters,
            self.args.clone(),
            Arc::clone(&self.invoke),
            self.ctor,
            Arc::from(self.origin.as_str()),
        )))
    }
}

/// Collects a handler type's binding declarations.
pub struct HandlerSpecBuilder<T> {
    pending: Vec<BindingConfig>,
    filters: Vec<Arc<dyn FilterProvider>>,
    no_ctor: bool,
    explicit_ctor: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: HandlerSpec> Default for HandlerSpecBuilder<T> {
    fn default() -> Self {
        HandlerSpecBuilder {
            pending: Vec::new(),
            filters: Vec::new(),
            no_ctor: false,
            explicit_ctor: false,
            _marker: PhantomData,
        }
    }
}

impl<T: HandlerSpec> HandlerSpecBuilder<T> {
    /// Attach a filter provider to every binding of this handler.
    pub fn filters(&mut self, provider: Arc<dyn FilterProvider>) -> &mut Self {
        self.filters.push(provider);
        self
    }

    /// Opt out of the synthesized constructor binding.
    pub fn no_constructor(&mut self) -> &mut Self {
        self.no_ctor = true;
        self
    }

    fn push(&mut self, config: BindingConfig) -> &mut BindingConfig {
        self.pending.push(config);
        self.pending.last_mut().expect("just pushed")
    }

    /// A contravariant binding handling message `M`.
    pub fn handles<M, A, RM, F>(&mut self, f: F) -> &mut BindingConfig
    where
        M: Payload,
        F: HandlesFn<T, M, A, RM>,
    {
        self.contravariant(Policy::Handles, f)
    }

    /// A contravariant binding validating message `M`.
    pub fn validates<M, A, RM, F>(&mut self, f: F) -> &mut BindingConfig
    where
        M: Payload,
        F: HandlesFn<T, M, A, RM>,
    {
        self.contravariant(Policy::Validates, f)
    }

    fn contravariant<M, A, RM, F>(&mut self, policy: Policy, f: F) -> &mut BindingConfig
    where
        M: Payload,
        F: HandlesFn<T, M, A, RM>,
    {
        let origin = format!(
            "{}::{}<{}>",
            short_name(type_name::<T>()),
            match policy {
                Policy::Validates => "validates",
                _ => "handles",
            },
            short_name(type_name::<M>())
        );
        let invoke: InvokeFn = Arc::new(
            move |ctx: &mut HandleContext<'_>, resolved: Vec<Resolved>| {
                let recv = ctx
                    .handler
                    .instance::<T>()
                    .ok_or(DispatchError::NotHandled)?;
                let src = ctx.source_value().ok_or(DispatchError::NotHandled)?;
                let msg = coerce::<M>(&src).ok_or(DispatchError::NotHandled)?;
                f.invoke(recv.as_ref(), msg.as_ref(), resolved)
            },
        );
        self.push(BindingConfig {
            policies: vec![policy],
            contra_key: Some((TypeToken::of::<M>(), upcasts_of::<M>())),
            out_element: F::out(),
            out_whole: F::whole(),
            out_upcasts: F::out_upcasts(),
            key_override: None,
            asynchronous: F::is_async(),
            ctor: false,
            origin,
            args: F::arg_specs(),
            invoke,
            strict: false,
            skip_filters: false,
            filters: Vec::new(),
            constraints: Vec::new(),
        })
    }

    /// A covariant binding providing the closure's return type.
    pub fn provides<A, RM, F>(&mut self, f: F) -> &mut BindingConfig
    where
        F: ProvidesFn<T, A, RM>,
    {
        self.covariant(Policy::Provides, f)
    }

    /// A covariant binding creating the closure's return type.
    pub fn creates<A, RM, F>(&mut self, f: F) -> &mut BindingConfig
    where
        F: ProvidesFn<T, A, RM>,
    {
        self.covariant(Policy::Creates, f)
    }

    fn covariant<A, RM, F>(&mut self, policy: Policy, f: F) -> &mut BindingConfig
    where
        F: ProvidesFn<T, A, RM>,
    {
        let origin = format!(
            "{}::{}",
            short_name(type_name::<T>()),
            match policy {
                Policy::Creates => "creates",
                _ => "provides",
            }
        );
        let invoke: InvokeFn = Arc::new(
            move |ctx: &mut HandleContext<'_>, resolved: Vec<Resolved>| {
                let recv = ctx
                    .handler
                    .instance::<T>()
                    .ok_or(DispatchError::NotHandled)?;
                f.invoke(recv.as_ref(), resolved)
            },
        );
        self.push(BindingConfig {
            policies: vec![policy],
            contra_key: None,
            out_element: F::out(),
            out_whole: F::whole(),
            out_upcasts: F::out_upcasts(),
            key_override: None,
            asynchronous: F::is_async(),
            ctor: false,
            origin,
            args: F::arg_specs(),
            invoke,
            strict: false,
            skip_filters: false,
            filters: Vec::new(),
            constraints: Vec::new(),
        })
    }

    /// A covariant mapping from source `S` to the closure's return type.
    pub fn maps<S, A, RM, F>(&mut self, f: F) -> &mut BindingConfig
    where
        S: Payload,
        F: MapsFn<T, S, A, RM>,
    {
        let origin = format!(
            "{}::maps<{}>",
            short_name(type_name::<T>()),
            short_name(type_name::<S>())
        );
        let invoke: InvokeFn = Arc::new(
            move |ctx: &mut HandleContext<'_>, resolved: Vec<Resolved>| {
                let recv = ctx
                    .handler
                    .instance::<T>()
                    .ok_or(DispatchError::NotHandled)?;
                let src = ctx.source_value().ok_or(DispatchError::NotHandled)?;
                let src = coerce::<S>(&src).ok_or(DispatchError::NotHandled)?;
                f.invoke(recv.as_ref(), src.as_ref(), resolved)
            },
        );
        self.push(BindingConfig {
            policies: vec![Policy::Maps],
            contra_key: None,
            out_element: F::out(),
            out_whole: F::whole(),
            out_upcasts: F::out_upcasts(),
            key_override: None,
            asynchronous: F::is_async(),
            ctor: false,
            origin,
            args: F::arg_specs(),
            invoke,
            strict: false,
            skip_filters: false,
            filters: Vec::new(),
            constraints: Vec::new(),
        })
    }

    /// The explicit constructor binding. Without one (and without
    /// [`no_constructor`](Self::no_constructor)) a constructor is
    /// synthesized from [`HandlerSpec::construct`] under the singleton
    /// lifestyle.
    pub fn constructor<A, RM, F>(&mut self, f: F) -> &mut BindingConfig
    where
        F: CtorFn<T, A, RM>,
    {
        self.explicit_ctor = true;
        let origin = format!("{}::constructor", short_name(type_name::<T>()));
        let invoke: InvokeFn = Arc::new(
            move |_ctx: &mut HandleContext<'_>, resolved: Vec<Resolved>| f.invoke(resolved),
        );
        self.push(BindingConfig {
            policies: vec![Policy::Provides],
            contra_key: None,
            out_element: Some(TypeToken::of::<T>()),
            out_whole: Some(TypeToken::of::<T>()),
            out_upcasts: upcasts_of::<T>(),
            key_override: None,
            asynchronous: F::is_async(),
            ctor: true,
            origin,
            args: F::arg_specs(),
            invoke,
            strict: false,
            skip_filters: false,
            filters: Vec::new(),
            constraints: Vec::new(),
        })
    }
}

fn short_name(full: &str) -> &str {
    full.rsplit("::").next().unwrap_or(full)
}

/// Build (and validate) the descriptor for `T`.
pub(crate) fn build_descriptor<T: HandlerSpec>(
    observers: &[Arc<dyn DescriptorObserver>],
) -> Result<HandlerDescriptor, DispatchError> {
    let mut b = HandlerSpecBuilder::<T>::default();
    T::describe(&mut b);

    let mut errors: Vec<DispatchError> = Vec::new();
    if b.explicit_ctor && b.no_ctor {
        errors.push(
            BindingError::new(
                short_name(type_name::<T>()),
                "has both a constructor and no_constructor",
            )
            .into(),
        );
    }
    if !b.explicit_ctor && !b.no_ctor {
        // Synthesized constructor under the singleton lifestyle.
        let origin = format!("{}::constructor(implicit)", short_name(type_name::<T>()));
        let invoke: InvokeFn = Arc::new(
            move |_ctx: &mut HandleContext<'_>, _resolved: Vec<Resolved>| {
                Ok(vec![ResultVal::Value(T::construct().map(value))])
            },
        );
        b.pending.push(BindingConfig {
            policies: vec![Policy::Provides],
            contra_key: None,
            out_element: Some(TypeToken::of::<T>()),
            out_whole: Some(TypeToken::of::<T>()),
            out_upcasts: upcasts_of::<T>(),
            key_override: None,
            asynchronous: false,
            ctor: true,
            origin,
            args: Vec::new(),
            invoke,
            strict: false,
            skip_filters: false,
            filters: vec![Arc::new(Singleton::new())],
            constraints: Vec::new(),
        });
    }

    let mut bindings: HashMap<Policy, PolicyBindings> = HashMap::new();
    let mut created: Vec<(Policy, Arc<Binding>)> = Vec::new();
    for config in &b.pending {
        for policy in &config.policies {
            if let Some(binding) = config.build(*policy, &mut errors) {
                bindings
                    .entry(*policy)
                    .or_insert_with(|| PolicyBindings::new(*policy))
                    .insert(Arc::clone(&binding));
                created.push((*policy, binding));
            }
        }
    }

    if !errors.is_empty() {
        return Err(DescriptorError {
            spec: short_name(type_name::<T>()).to_string(),
            causes: errors,
        }
        .into());
    }

    let descriptor = HandlerDescriptor::new(
        TypeToken::of::<T>(),
        Arc::from(short_name(type_name::<T>())),
        bindings,
        b.filters.clone(),
    );
    for (policy, binding) in &created {
        for observer in observers {
            observer.binding_created(*policy, &descriptor, binding);
        }
    }
    Ok(descriptor)
}

// ============================================================================
// Dependency directives
// ============================================================================

/// A binding parameter resolvable through the dispatch machinery.
pub trait Injectable: Sized + Send + 'static {
    /// The dependency this parameter declares.
    fn spec() -> DependencySpec;

    /// Convert the resolved value into the parameter.
    fn from_resolved(resolved: Resolved) -> Result<Self, DispatchError>;
}

impl<S: Send + Sync + 'static> Injectable for Arc<S> {
    fn spec() -> DependencySpec {
        DependencySpec::of(Key::of::<S>(), type_name::<S>())
    }

    fn from_resolved(resolved: Resolved) -> Result<Self, DispatchError> {
        match resolved {
            Resolved::One(Some(v)) => coerce::<S>(&v).ok_or(DispatchError::NotHandled),
            _ => Err(DispatchError::NotHandled),
        }
    }
}

impl<I: Injectable> Injectable for Option<I> {
    fn spec() -> DependencySpec {
        let mut spec = I::spec();
        spec.optional = true;
        spec
    }

    fn from_resolved(resolved: Resolved) -> Result<Self, DispatchError> {
        match resolved {
            Resolved::One(None) => Ok(None),
            other => Ok(I::from_resolved(other).ok()),
        }
    }
}

/// Greedy dependency: every matching `S`.
pub struct All<S>(pub Vec<Arc<S>>);

impl<S: Send + Sync + 'static> Injectable for All<S> {
    fn spec() -> DependencySpec {
        let mut spec = DependencySpec::of(Key::of::<S>(), type_name::<S>());
        spec.many = true;
        spec
    }

    fn from_resolved(resolved: Resolved) -> Result<Self, DispatchError> {
        match resolved {
            Resolved::Many(values) => {
                Ok(All(values.iter().filter_map(coerce::<S>).collect()))
            }
            Resolved::One(Some(v)) => Ok(All(coerce::<S>(&v).into_iter().collect())),
            Resolved::One(None) => Ok(All(Vec::new())),
            Resolved::Promised(_) => Err(DispatchError::NotHandled),
        }
    }
}

/// Strict collection dependency: matches only a binding keyed by the
/// collection type itself.
pub struct Exactly<V>(pub Arc<V>);

impl<V: Send + Sync + 'static> Injectable for Exactly<V> {
    fn spec() -> DependencySpec {
        let mut spec = DependencySpec::of(Key::of::<V>(), type_name::<V>());
        spec.strict = true;
        spec
    }

    fn from_resolved(resolved: Resolved) -> Result<Self, DispatchError> {
        match resolved {
            Resolved::One(Some(v)) => {
                coerce::<V>(&v).map(Exactly).ok_or(DispatchError::NotHandled)
            }
            _ => Err(DispatchError::NotHandled),
        }
    }
}

/// Promise-valued dependency: the binding is marked asynchronous and the
/// parameter receives the resolution's promise.
pub struct Lazy<S>(Promise<Option<Arc<S>>>);

impl<S: Send + Sync + 'static> Lazy<S> {
    /// The promised dependency.
    pub fn promise(self) -> Promise<Option<Arc<S>>> {
        self.0
    }
}

impl<S: Send + Sync + 'static> Injectable for Lazy<S> {
    fn spec() -> DependencySpec {
        let mut spec = DependencySpec::of(Key::of::<S>(), type_name::<S>());
        spec.promise = true;
        spec
    }

    fn from_resolved(resolved: Resolved) -> Result<Self, DispatchError> {
        match resolved {
            Resolved::Promised(p) => Ok(Lazy(p.then(|opt| opt.and_then(|v| coerce::<S>(&v))))),
            Resolved::One(opt) => Ok(Lazy(Promise::resolved(
                opt.and_then(|v| coerce::<S>(&v)),
            ))),
            Resolved::Many(_) => Err(DispatchError::NotHandled),
        }
    }
}

/// Owned-clone dependency for cheap-to-copy values.
pub struct Cloned<T>(pub T);

impl<T: Clone + Send + Sync + 'static> Injectable for Cloned<T> {
    fn spec() -> DependencySpec {
        DependencySpec::of(Key::of::<T>(), type_name::<T>())
    }

    fn from_resolved(resolved: Resolved) -> Result<Self, DispatchError> {
        match resolved {
            Resolved::One(Some(v)) => coerce_cloned::<T>(&v)
                .map(Cloned)
                .ok_or(DispatchError::NotHandled),
            _ => Err(DispatchError::NotHandled),
        }
    }
}

/// Resolve the wrapped dependency through resolver `R` instead of the
/// default `Provides` walk.
pub struct Via<R, I>(pub I, PhantomData<fn() -> R>);

impl<R, I> Injectable for Via<R, I>
where
    R: DependencyResolver + Default + 'static,
    I: Injectable,
{
    fn spec() -> DependencySpec {
        let mut spec = I::spec();
        spec.resolver = Some(Arc::new(R::default()));
        spec
    }

    fn from_resolved(resolved: Resolved) -> Result<Self, DispatchError> {
        I::from_resolved(resolved).map(|inner| Via(inner, PhantomData))
    }
}

// ============================================================================
// Return shapes
// ============================================================================

/// Marker: the binding returns nothing.
pub struct UnitRet;
/// Marker: the binding returns a plain payload.
pub struct ValueRet;
/// Marker: the binding returns an optional payload.
pub struct OptionRet;
/// Marker: the binding returns `Result<payload, error>`.
pub struct ResultRet;
/// Marker: the binding returns `Result<(), error>`.
pub struct ResultUnitRet;
/// Marker: the binding returns a [`HandleResult`].
pub struct HandleRet;
/// Marker: the binding returns `(payload, HandleResult)`.
pub struct PairRet;
/// Marker: the binding returns a collection of payloads.
pub struct VecRet;
/// Marker: the binding returns a promise of a payload.
pub struct PromiseRet;

/// Normalizes a binding's return shape into the canonical result list
/// the policies accept.
pub trait IntoResults<M>: Send + 'static {
    /// The logical (element) output type.
    fn out() -> Option<TypeToken> {
        None
    }

    /// The whole output type when it differs from the element.
    fn whole() -> Option<TypeToken> {
        Self::out()
    }

    /// Widening edges of the logical output type.
    fn out_upcasts() -> Arc<[Upcast]> {
        Arc::from(Vec::new())
    }

    /// Whether the result settles through a promise.
    fn is_async() -> bool {
        false
    }

    /// Normalize into result values.
    fn into_results(self) -> Vec<ResultVal>;
}

impl IntoResults<UnitRet> for () {
    fn into_results(self) -> Vec<ResultVal> {
        Vec::new()
    }
}

impl<T: Payload> IntoResults<ValueRet> for T {
    fn out() -> Option<TypeToken> {
        Some(TypeToken::of::<T>())
    }

    fn out_upcasts() -> Arc<[Upcast]> {
        upcasts_of::<T>()
    }

    fn into_results(self) -> Vec<ResultVal> {
        vec![ResultVal::Value(Some(value(self)))]
    }
}

impl<T: Payload> IntoResults<OptionRet> for Option<T> {
    fn out() -> Option<TypeToken> {
        Some(TypeToken::of::<T>())
    }

    fn out_upcasts() -> Arc<[Upcast]> {
        upcasts_of::<T>()
    }

    fn into_results(self) -> Vec<ResultVal> {
        vec![ResultVal::Value(self.map(value))]
    }
}

impl<T, E> IntoResults<ResultRet> for Result<T, E>
where
    T: Payload,
    E: std::error::Error + Send + Sync + 'static,
{
    fn out() -> Option<TypeToken> {
        Some(TypeToken::of::<T>())
    }

    fn out_upcasts() -> Arc<[Upcast]> {
        upcasts_of::<T>()
    }

    fn into_results(self) -> Vec<ResultVal> {
        match self {
            Ok(v) => vec![ResultVal::Value(Some(value(v)))],
            Err(e) => vec![ResultVal::Error(DispatchError::domain(Box::new(e)))],
        }
    }
}

impl<E> IntoResults<ResultUnitRet> for Result<(), E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_results(self) -> Vec<ResultVal> {
        match self {
            Ok(()) => Vec::new(),
            Err(e) => vec![ResultVal::Error(DispatchError::domain(Box::new(e)))],
        }
    }
}

impl IntoResults<HandleRet> for HandleResult {
    fn into_results(self) -> Vec<ResultVal> {
        vec![ResultVal::Result(self)]
    }
}

impl<T: Payload> IntoResults<PairRet> for (T, HandleResult) {
    fn out() -> Option<TypeToken> {
        Some(TypeToken::of::<T>())
    }

    fn out_upcasts() -> Arc<[Upcast]> {
        upcasts_of::<T>()
    }

    fn into_results(self) -> Vec<ResultVal> {
        vec![
            ResultVal::Value(Some(value(self.0))),
            ResultVal::Result(self.1),
        ]
    }
}

impl<T: Payload + Clone> IntoResults<VecRet> for Vec<T> {
    fn out() -> Option<TypeToken> {
        Some(TypeToken::of::<T>())
    }

    fn whole() -> Option<TypeToken> {
        Some(TypeToken::of::<Vec<T>>())
    }

    fn out_upcasts() -> Arc<[Upcast]> {
        upcasts_of::<T>()
    }

    fn into_results(self) -> Vec<ResultVal> {
        let items = self.iter().cloned().map(value).collect();
        vec![ResultVal::Many {
            items,
            whole: value(self),
        }]
    }
}

impl<T: Payload + Clone> IntoResults<PromiseRet> for Promise<T> {
    fn out() -> Option<TypeToken> {
        Some(TypeToken::of::<T>())
    }

    fn out_upcasts() -> Arc<[Upcast]> {
        upcasts_of::<T>()
    }

    fn is_async() -> bool {
        true
    }

    fn into_results(self) -> Vec<ResultVal> {
        let settled: Promise<Option<Value>> = self.then(|t| Some(value(t)));
        vec![ResultVal::Value(Some(value(settled)))]
    }
}

// ============================================================================
// Call adapters
// ============================================================================

/// Adapter for contravariant bindings `(&T, &M, deps…) -> R`.
pub trait HandlesFn<T, M, A, RM>: Send + Sync + 'static {
    /// Dependency parameters, in declaration order.
    fn arg_specs() -> Vec<DependencySpec>;
    /// Logical output type.
    fn out() -> Option<TypeToken>;
    /// Whole output type.
    fn whole() -> Option<TypeToken>;
    /// Output widening edges.
    fn out_upcasts() -> Arc<[Upcast]>;
    /// Whether the result is promised.
    fn is_async() -> bool;
    /// Invoke with pre-resolved dependencies.
    fn invoke(
        &self,
        recv: &T,
        msg: &M,
        args: Vec<Resolved>,
    ) -> Result<Vec<ResultVal>, DispatchError>;
}

/// Adapter for covariant bindings `(&T, deps…) -> R`.
pub trait ProvidesFn<T, A, RM>: Send + Sync + 'static {
    /// Dependency parameters, in declaration order.
    fn arg_specs() -> Vec<DependencySpec>;
    /// Logical output type.
    fn out() -> Option<TypeToken>;
    /// Whole output type.
    fn whole() -> Option<TypeToken>;
    /// Output widening edges.
    fn out_upcasts() -> Arc<[Upcast]>;
    /// Whether the result is promised.
    fn is_async() -> bool;
    /// Invoke with pre-resolved dependencies.
    fn invoke(&self, recv: &T, args: Vec<Resolved>) -> Result<Vec<ResultVal>, DispatchError>;
}

/// Adapter for mapping bindings `(&T, &S, deps…) -> R`.
pub trait MapsFn<T, S, A, RM>: Send + Sync + 'static {
    /// Dependency parameters, in declaration order.
    fn arg_specs() -> Vec<DependencySpec>;
    /// Logical output type.
    fn out() -> Option<TypeToken>;
    /// Whole output type.
    fn whole() -> Option<TypeToken>;
    /// Output widening edges.
    fn out_upcasts() -> Arc<[Upcast]>;
    /// Whether the result is promised.
    fn is_async() -> bool;
    /// Invoke with pre-resolved dependencies.
    fn invoke(
        &self,
        recv: &T,
        src: &S,
        args: Vec<Resolved>,
    ) -> Result<Vec<ResultVal>, DispatchError>;
}

/// Adapter for constructor bindings `(deps…) -> R`.
pub trait CtorFn<T, A, RM>: Send + Sync + 'static {
    /// Dependency parameters, in declaration order.
    fn arg_specs() -> Vec<DependencySpec>;
    /// Whether construction is promised.
    fn is_async() -> bool;
    /// Invoke with pre-resolved dependencies.
    fn invoke(&self, args: Vec<Resolved>) -> Result<Vec<ResultVal>, DispatchError>;
}

macro_rules! impl_binding_fns {
    ($($arg:ident),*) => {
        impl<T, M, F, R, RM, $($arg),*> HandlesFn<T, M, ($($arg,)*), RM> for F
        where
            T: Send + Sync + 'static,
            M: Payload,
            R: IntoResults<RM>,
            RM: 'static,
            F: Fn(&T, &M, $($arg),*) -> R + Send + Sync + 'static,
            $($arg: Injectable,)*
        {
            fn arg_specs() -> Vec<DependencySpec> {
                vec![$($arg::spec()),*]
            }

            fn out() -> Option<TypeToken> {
                R::out()
            }

            fn whole() -> Option<TypeToken> {
                R::whole()
            }

            fn out_upcasts() -> Arc<[Upcast]> {
                R::out_upcasts()
            }

            fn is_async() -> bool {
                R::is_async()
            }

            #[allow(unused_mut, unused_variables, non_snake_case)]
            fn invoke(
                &self,
                recv: &T,
                msg: &M,
                args: Vec<Resolved>,
            ) -> Result<Vec<ResultVal>, DispatchError> {
                let mut args = args.into_iter();
                $(let $arg = $arg::from_resolved(
                    args.next().expect("arity matches arg_specs"),
                )?;)*
                Ok(self(recv, msg, $($arg),*).into_results())
            }
        }

        impl<T, F, R, RM, $($arg),*> ProvidesFn<T, ($($arg,)*), RM> for F
        where
            T: Send + Sync + 'static,
            R: IntoResults<RM>,
            RM: 'static,
            F: Fn(&T, $($arg),*) -> R + Send + Sync + 'static,
            $($arg: Injectable,)*
        {
            fn arg_specs() -> Vec<DependencySpec> {
                vec![$($arg::spec()),*]
            }

            fn out() -> Option<TypeToken> {
                R::out()
            }

            fn whole() -> Option<TypeToken> {
                R::whole()
            }

            fn out_upcasts() -> Arc<[Upcast]> {
                R::out_upcasts()
            }

            fn is_async() -> bool {
                R::is_async()
            }

            #[allow(unused_mut, unused_variables, non_snake_case)]
            fn invoke(
                &self,
                recv: &T,
                args: Vec<Resolved>,
            ) -> Result<Vec<ResultVal>, DispatchError> {
                let mut args = args.into_iter();
                $(let $arg = $arg::from_resolved(
                    args.next().expect("arity matches arg_specs"),
                )?;)*
                Ok(self(recv, $($arg),*).into_results())
            }
        }

        impl<T, S, F, R, RM, $($arg),*> MapsFn<T, S, ($($arg,)*), RM> for F
        where
            T: Send + Sync + 'static,
            S: Payload,
            R: IntoResults<RM>,
            RM: 'static,
            F: Fn(&T, &S, $($arg),*) -> R + Send + Sync + 'static,
            $($arg: Injectable,)*
        {
            fn arg_specs() -> Vec<DependencySpec> {
                vec![$($arg::spec()),*]
            }

            fn out() -> Option<TypeToken> {
                R::out()
            }

            fn whole() -> Option<TypeToken> {
                R::whole()
            }

            fn out_upcasts() -> Arc<[Upcast]> {
                R::out_upcasts()
            }

            fn is_async() -> bool {
                R::is_async()
            }

            #[allow(unused_mut, unused_variables, non_snake_case)]
            fn invoke(
                &self,
                recv: &T,
                src: &S,
                args: Vec<Resolved>,
            ) -> Result<Vec<ResultVal>, DispatchError> {
                let mut args = args.into_iter();
                $(let $arg = $arg::from_resolved(
                    args.next().expect("arity matches arg_specs"),
                )?;)*
                Ok(self(recv, src, $($arg),*).into_results())
            }
        }
    };
}

impl_binding_fns!();
impl_binding_fns!(A1);
impl_binding_fns!(A1, A2);
impl_binding_fns!(A1, A2, A3);

macro_rules! impl_ctor_fns {
    ($($arg:ident),*) => {
        impl<T, F, R, RM, $($arg),*> CtorFn<T, ($($arg,)*), RM> for F
        where
            T: Send + Sync + 'static,
            R: IntoResults<RM>,
            RM: 'static,
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            $($arg: Injectable,)*
        {
            fn arg_specs() -> Vec<DependencySpec> {
                vec![$($arg::spec()),*]
            }

            fn is_async() -> bool {
                R::is_async()
            }

            #[allow(unused_mut, unused_variables, non_snake_case)]
            fn invoke(&self, args: Vec<Resolved>) -> Result<Vec<ResultVal>, DispatchError> {
                let mut args = args.into_iter();
                $(let $arg = $arg::from_resolved(
                    args.next().expect("arity matches arg_specs"),
                )?;)*
                Ok(self($($arg),*).into_results())
            }
        }
    };
}

impl_ctor_fns!();
impl_ctor_fns!(A1);
impl_ctor_fns!(A1, A2);
impl_ctor_fns!(A1, A2, A3);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Ping;
    impl Payload for Ping {}

    #[derive(Clone, Debug, PartialEq)]
    struct Pong(u32);
    impl Payload for Pong {}

    #[test]
    fn value_shape_boxes_the_payload() {
        let results = <Pong as IntoResults<ValueRet>>::into_results(Pong(3));
        assert_eq!(results.len(), 1);
        match &results[0] {
            ResultVal::Value(Some(v)) => {
                assert_eq!(v.downcast_ref::<Pong>(), Some(&Pong(3)));
            }
            _ => panic!("expected a value"),
        }
    }

    #[test]
    fn result_shape_splits_ok_and_err() {
        let ok: Result<Pong, std::io::Error> = Ok(Pong(1));
        assert!(matches!(
            ok.into_results().as_slice(),
            [ResultVal::Value(Some(_))]
        ));
        let err: Result<Pong, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "bad"));
        assert!(matches!(err.into_results().as_slice(), [ResultVal::Error(_)]));
    }

    #[test]
    fn vec_shape_reports_element_and_whole() {
        assert_eq!(
            <Vec<Pong> as IntoResults<VecRet>>::out(),
            Some(TypeToken::of::<Pong>())
        );
        assert_eq!(
            <Vec<Pong> as IntoResults<VecRet>>::whole(),
            Some(TypeToken::of::<Vec<Pong>>())
        );
        let results = vec![Pong(1), Pong(2)].into_results();
        match &results[0] {
            ResultVal::Many { items, .. } => assert_eq!(items.len(), 2),
            _ => panic!("expected many"),
        }
    }

    #[test]
    fn promise_shape_is_async() {
        assert!(<Promise<Pong> as IntoResults<PromiseRet>>::is_async());
    }

    #[test]
    fn option_injectable_marks_optional() {
        let spec = <Option<Arc<Pong>> as Injectable>::spec();
        assert!(spec.optional);
        assert!(!spec.many);
    }

    #[test]
    fn all_injectable_marks_many() {
        let spec = <All<Pong> as Injectable>::spec();
        assert!(spec.many);
    }

    #[test]
    fn lazy_injectable_marks_promise() {
        let spec = <Lazy<Pong> as Injectable>::spec();
        assert!(spec.promise);
    }
}
