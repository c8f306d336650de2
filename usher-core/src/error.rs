//! Error kinds surfaced by dispatch.

use std::sync::Arc;
use thiserror::Error;

/// Boxed domain error carried through dispatch.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared domain error, cheap to clone across results.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Everything that can go wrong while dispatching a callback.
///
/// `Rejected`, `NotHandled` and `UnresolvedArg` are *non-fatal* to the
/// reducer: they skip the current candidate. Any other kind stops the
/// reduction and surfaces to the caller.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// No binding matched the callback.
    #[error("callback was not handled")]
    NotHandled,

    /// No binding matched, with an underlying cause.
    #[error("callback was not handled: {0}")]
    NotHandledBecause(SharedError),

    /// A guard or filter rejected the candidate binding.
    #[error("candidate was rejected")]
    Rejected,

    /// A binding argument could not be resolved.
    #[error("unresolved argument {name}{}", render_cause(.cause))]
    UnresolvedArg {
        /// Diagnostic name of the parameter.
        name: String,
        /// Underlying resolution failure, if any.
        cause: Option<Box<DispatchError>>,
    },

    /// A binding failed build-time validation.
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// A handler descriptor failed build-time validation.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// A promise the dispatch depended on was cancelled.
    #[error("dispatch was cancelled")]
    Cancelled,

    /// A panic was captured during dispatch.
    #[error("panic during dispatch: {0}")]
    Panicked(String),

    /// An error returned by a user binding, carried verbatim.
    #[error("{0}")]
    Domain(SharedError),

    /// Several errors accumulated during one reduction.
    #[error("{}", render_list(.0))]
    Aggregate(Vec<DispatchError>),
}

impl DispatchError {
    /// Wrap a boxed domain error.
    pub fn domain(err: BoxError) -> Self {
        DispatchError::Domain(Arc::from(err))
    }

    /// Combine errors, flattening singletons.
    pub fn aggregate(mut errors: Vec<DispatchError>) -> Self {
        if errors.len() == 1 {
            errors.pop().expect("length checked")
        } else {
            DispatchError::Aggregate(errors)
        }
    }

    /// Whether the reducer should skip this candidate and continue.
    pub fn skips_candidate(&self) -> bool {
        matches!(
            self,
            DispatchError::Rejected
                | DispatchError::NotHandled
                | DispatchError::NotHandledBecause(_)
                | DispatchError::UnresolvedArg { .. }
        )
    }
}

fn render_cause(cause: &Option<Box<DispatchError>>) -> String {
    match cause {
        Some(c) => format!(": {c}"),
        None => String::new(),
    }
}

fn render_list(errors: &[DispatchError]) -> String {
    let parts: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    format!("{} errors occurred: [{}]", errors.len(), parts.join("; "))
}

/// A binding could not be built from a handler spec.
#[derive(Error, Debug, Clone)]
#[error("binding {origin}: {}", .problems.join("; "))]
pub struct BindingError {
    /// The binding's declared origin (builder call site label).
    pub origin: String,
    /// Every validation problem found.
    pub problems: Vec<String>,
}

impl BindingError {
    /// A single-problem binding error.
    pub fn new(origin: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            problems: vec![problem.into()],
        }
    }
}

/// A handler descriptor could not be built; aggregates every binding
/// failure found while describing the handler.
#[derive(Error, Debug, Clone)]
#[error("invalid handler {spec}: {}", render_list(.causes))]
pub struct DescriptorError {
    /// Diagnostic name of the handler spec.
    pub spec: String,
    /// Every failure found.
    pub causes: Vec<DispatchError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_flattens_singletons() {
        let single = DispatchError::aggregate(vec![DispatchError::Rejected]);
        assert!(matches!(single, DispatchError::Rejected));

        let multi =
            DispatchError::aggregate(vec![DispatchError::Rejected, DispatchError::NotHandled]);
        assert!(matches!(multi, DispatchError::Aggregate(v) if v.len() == 2));
    }

    #[test]
    fn skippable_kinds() {
        assert!(DispatchError::Rejected.skips_candidate());
        assert!(DispatchError::NotHandled.skips_candidate());
        assert!(DispatchError::UnresolvedArg {
            name: "repo".into(),
            cause: None,
        }
        .skips_candidate());
        assert!(!DispatchError::Cancelled.skips_candidate());
        assert!(!DispatchError::Panicked("boom".into()).skips_candidate());
    }

    #[test]
    fn unresolved_arg_renders_cause() {
        let err = DispatchError::UnresolvedArg {
            name: "db".into(),
            cause: Some(Box::new(DispatchError::NotHandled)),
        };
        let text = err.to_string();
        assert!(text.contains("db"));
        assert!(text.contains("not handled"));
    }
}
