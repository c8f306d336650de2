//! # usher - Variance-Aware Callback Dispatch
//!
//! `usher` routes in-process messages - commands, queries, events,
//! resolution, mapping and creation requests - to handlers selected by
//! variance-aware policy matching, runs every match through a filter
//! pipeline, and returns results synchronously or as promises.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use usher::{setup, command, resolve, HandlerSpec, HandlerSpecBuilder, Payload};
//!
//! struct Billing;
//! impl Payload for Billing {}
//! impl HandlerSpec for Billing {
//!     fn describe(b: &mut HandlerSpecBuilder<Self>) {
//!         b.handles(|_: &Self, debit: &DebitAccount| debit.amount);
//!     }
//! }
//!
//! let root = setup().handler(Billing).build()?;
//! command(&root, DebitAccount { amount: 5 })?;
//! ```

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

// ============================================================================
// Core kernel (from usher-core)
// ============================================================================
pub use usher_core::{
    // Batching
    batch,
    batch_tag,
    // Keys and variance
    coerce,
    coerce_cloned,
    // Client helpers
    command,
    command_all,
    create,
    execute,
    execute_all,
    // Ambient options
    get_options,
    map_as,
    map_into,
    publish,
    resolve,
    resolve_all,
    resolve_key,
    upcast,
    upcasts_of,
    validate,
    value,
    Accepted,
    All,
    Batched,
    BatchHandler,
    Batching,
    Binding,
    BindingConfig,
    BindingError,
    BindingFlags,
    BoxError,
    // Callback contract
    Callback,
    CallbackBase,
    Cloned,
    CompositionScope,
    Constraint,
    ConstraintProvider,
    Creates,
    DependencyResolver,
    DependencySpec,
    DescriptorError,
    DescriptorFactory,
    DescriptorObserver,
    // Errors
    DispatchError,
    Exactly,
    // Filters
    Filter,
    FilterInstanceProvider,
    FilterProvider,
    FilterSpec,
    FilterSpecProvider,
    FromOptions,
    GuardFrame,
    Next,
    HandleContext,
    HandleResult,
    // Handlers and composition
    Handler,
    HandlerChain,
    HandlerDescriptor,
    // Handler specs
    HandlerSpec,
    HandlerSpecBuilder,
    Handles,
    HandlesBuilder,
    InferenceBuilder,
    InferenceHandler,
    Injectable,
    InstanceHandler,
    InstanceRef,
    IntoResults,
    Key,
    KeyAtom,
    KeyMatch,
    Lazy,
    Maps,
    MapsBuilder,
    Metadata,
    MutableHandlers,
    Named,
    NoBatch,
    Opt,
    Options,
    OptionsHandler,
    Payload,
    PipeOut,
    Piped,
    // Policies
    Policy,
    PolicyBindings,
    // Promise
    Promise,
    PromiseError,
    Provides,
    ProvidesBuilder,
    Qualifier,
    Reply,
    ResultVal,
    Settle,
    Settled,
    SharedError,
    Singleton,
    TypeToken,
    Upcast,
    ValidationOutcome,
    Validates,
    Value,
    Variance,
    Via,
    FILTER_STAGE,
    HANDLED,
    HANDLED_AND_STOP,
    LIFESTYLE_STAGE,
    NOT_HANDLED,
    NOT_HANDLED_AND_STOP,
};

// ============================================================================
// Standard components (from usher-std)
// ============================================================================
pub use usher_std::{
    Contextual, ContextualBase, Context, ContextChanging, ContextObserver, ContextState, Dispose,
    EndedObserver, Logging, LoggingProvider, ObserverHandle, Scopable, ScopeError, Scoped,
};

/// Test fixtures shared by the integration suites.
pub mod testing {
    pub use usher_std::testing::{CallProbe, OrderLog, TraceFilter};
}

mod setup;

pub use setup::{setup, Root, SetupBuilder};
