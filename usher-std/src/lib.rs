//! # usher-std
//!
//! Standard components layered on the `usher-core` dispatch kernel:
//! - [`Context`] - a hierarchical scope with an
//!   `Active → Ending → Ended` lifecycle
//! - [`Scoped`] - per-context lifestyle, with a rooted variant
//! - [`Logging`] - tracing-based entry/exit filter
//! - test fixtures shared by the integration suites

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

mod context;
mod filters;
mod scoped;
pub mod testing;

pub use context::{
    ContextChanging, ContextObserver, ContextState, Contextual, ContextualBase, Context, Dispose,
    EndedObserver, ObserverHandle,
};
pub use filters::logging::{Logging, LoggingProvider};
pub use scoped::{Scopable, ScopeError, Scoped};
