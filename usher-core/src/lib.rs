//! # usher-core
//!
//! Core kernel of the usher callback-dispatch runtime:
//! - [`HandlerSpec`] / [`HandlerSpecBuilder`] - declare bindings grouped
//!   by variance-aware policies
//! - [`DescriptorFactory`] - memoized handler descriptors
//! - the dispatch reducer - candidate selection, guards, filter
//!   pipelines, result acceptance
//! - [`Provides`] resolution with cycle detection and the singleton
//!   lifestyle
//! - [`Promise`] - single-assignment future with cooperative await
//! - inference and batch scopes composing over the same dispatch core
//!
//! The standard components (context tree, scoped lifestyles, logging
//! filter) live in `usher-std`; `usher` re-exports both behind a setup
//! facade.

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

mod batch;
mod binding;
mod callback;
mod constraint;
mod creates;
mod descriptor;
mod dispatch;
mod error;
mod filter;
mod handler;
mod handles;
mod inference;
mod key;
mod lifestyle;
mod maps;
mod options;
mod policy;
mod promise;
mod provides;
mod result;
mod spec;
mod validates;

// Keys and variance
pub use key::{
    coerce, coerce_cloned, upcast, upcasts_of, value, Key, KeyAtom, Payload, TypeToken, Upcast,
    Value,
};

// Errors
pub use error::{BindingError, BoxError, DescriptorError, DispatchError, SharedError};

// Outcomes
pub use result::{
    HandleResult, Reply, HANDLED, HANDLED_AND_STOP, NOT_HANDLED, NOT_HANDLED_AND_STOP,
};

// Promise
pub use promise::{Promise, PromiseError, Settle, Settled};

// Callback contract
pub use callback::{Callback, CallbackBase, GuardFrame, InstanceId, ResultVal};

// Policies
pub use policy::{Accepted, KeyMatch, Policy, Variance};

// Bindings
pub use binding::{
    Binding, BindingFlags, DependencyResolver, DependencySpec, HandleContext, InstanceRef,
    Resolved,
};

// Filters
pub use filter::{
    Filter, FilterInstanceProvider, FilterProvider, FilterSpec, FilterSpecProvider, Next, PipeOut,
    Piped, FILTER_STAGE, LIFESTYLE_STAGE,
};

// Constraints
pub use constraint::{Constraint, ConstraintProvider, Metadata, Named, Qualifier};

// Handler specs and dependency directives
pub use spec::{
    All, BindingConfig, Cloned, CtorFn, Exactly, HandleRet, HandlerSpec, HandlerSpecBuilder,
    HandlesFn, Injectable, IntoResults, Lazy, MapsFn, OptionRet, PairRet, PromiseRet, ProvidesFn,
    ResultRet, ResultUnitRet, UnitRet, ValueRet, VecRet, Via,
};

// Descriptors
pub use descriptor::{DescriptorFactory, DescriptorObserver, HandlerDescriptor, PolicyBindings};

// Handlers and composition
pub use handler::{CompositionScope, Handler, HandlerChain, InstanceHandler, MutableHandlers};

// Callback kinds and client helpers
pub use creates::{create, Creates};
pub use handles::{command, command_all, execute, execute_all, publish, Handles, HandlesBuilder};
pub use maps::{map_as, map_into, Maps, MapsBuilder};
pub use provides::{resolve, resolve_all, resolve_key, Provides, ProvidesBuilder};
pub use validates::{validate, ValidationOutcome, Validates};

// Ambient options
pub use options::{get_options, FromOptions, Opt, Options, OptionsHandler};

// Lifestyles
pub use lifestyle::{CacheEntry, Singleton};

// Inference
pub use inference::{InferenceBuilder, InferenceHandler};

// Batching
pub use batch::{batch, batch_tag, Batched, BatchHandler, Batching, NoBatch};
