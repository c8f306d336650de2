//! Binding constraints: named, metadata and qualifier assertions
//! enforced by a required filter.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::binding::{Binding, HandleContext};
use crate::callback::Callback;
use crate::error::DispatchError;
use crate::filter::{Filter, FilterProvider, Next, PipeOut, FILTER_STAGE};
use crate::handler::Handler;

/// An assertion a caller can require of a binding.
pub trait Constraint: Send + Sync {
    /// Required constraints must be matched by the caller to select the
    /// binding at all.
    fn required(&self) -> bool {
        false
    }

    /// Whether this (binding-side) constraint satisfies a caller-side
    /// requirement.
    fn satisfies(&self, required: &dyn Constraint) -> bool;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

/// Matches against a name.
#[derive(Clone, Debug)]
pub struct Named(Arc<str>);

impl Named {
    /// A name constraint; the name must be non-empty.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        let name = name.into();
        assert!(
            !name.trim().is_empty(),
            "the Named constraint requires a non-empty name"
        );
        Named(name)
    }

    /// The required name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Constraint for Named {
    fn satisfies(&self, required: &dyn Constraint) -> bool {
        required
            .as_any()
            .downcast_ref::<Named>()
            .is_some_and(|other| self.0 == other.0)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Matches against key/value pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata(HashMap<String, Option<String>>);

impl Metadata {
    /// Parse the `k=v,flag` metadata grammar.
    pub fn parse(tag: &str) -> Self {
        let mut entries = HashMap::new();
        for part in tag.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.split_once('=') {
                Some((k, v)) => entries.insert(k.to_string(), Some(v.to_string())),
                None => entries.insert(part.to_string(), None),
            };
        }
        Metadata(entries)
    }

    /// The entry for `key`, when present.
    pub fn get(&self, key: &str) -> Option<&Option<String>> {
        self.0.get(key)
    }
}

impl Constraint for Metadata {
    fn satisfies(&self, required: &dyn Constraint) -> bool {
        required
            .as_any()
            .downcast_ref::<Metadata>()
            .is_some_and(|other| self == other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Matches against a marker type.
pub struct Qualifier<T: 'static>(PhantomData<fn() -> T>);

impl<T: 'static> Default for Qualifier<T> {
    fn default() -> Self {
        Qualifier(PhantomData)
    }
}

impl<T: 'static> Qualifier<T> {
    /// The qualifier for marker `T`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: 'static> Constraint for Qualifier<T> {
    fn satisfies(&self, required: &dyn Constraint) -> bool {
        required.as_any().downcast_ref::<Qualifier<T>>().is_some()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A required filter provider enforcing a binding's constraints against
/// the callback's.
pub struct ConstraintProvider {
    constraints: Vec<Arc<dyn Constraint>>,
}

impl ConstraintProvider {
    /// Enforce `constraints` on the owning binding.
    pub fn new(constraints: Vec<Arc<dyn Constraint>>) -> Self {
        ConstraintProvider { constraints }
    }

    /// The binding-side constraints.
    pub fn constraints(&self) -> &[Arc<dyn Constraint>] {
        &self.constraints
    }
}

impl FilterProvider for ConstraintProvider {
    fn required(&self) -> bool {
        true
    }

    fn filters(
        &self,
        _binding: &Binding,
        _callback: &dyn Callback,
        _composer: &dyn Handler,
    ) -> Result<Vec<Arc<dyn Filter>>, DispatchError> {
        Ok(vec![Arc::new(ConstraintFilter)])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct ConstraintFilter;

impl Filter for ConstraintFilter {
    fn order(&self) -> Option<i32> {
        Some(FILTER_STAGE)
    }

    fn next(
        &self,
        ctx: &mut HandleContext<'_>,
        next: &mut Next<'_>,
        provider: &dyn FilterProvider,
    ) -> PipeOut {
        let Some(provider) = provider.as_any().downcast_ref::<ConstraintProvider>() else {
            return next.pipe(ctx);
        };
        let supplied = provider.constraints();
        let required: Vec<Arc<dyn Constraint>> = ctx.callback.base().constraints().to_vec();

        if required.is_empty() {
            if supplied.iter().any(|c| c.required()) {
                return next.abort();
            }
            return next.pipe(ctx);
        }
        if supplied.is_empty() {
            return next.abort();
        }

        let mut matched = vec![false; supplied.len()];
        for req in &required {
            let mut satisfied = false;
            for (i, c) in supplied.iter().enumerate() {
                if c.satisfies(req.as_ref()) {
                    if c.required() {
                        matched[i] = true;
                    }
                    satisfied = true;
                    break;
                }
            }
            if !satisfied {
                return next.abort();
            }
        }
        for (i, c) in supplied.iter().enumerate() {
            if c.required() && !matched[i] {
                return next.abort();
            }
        }
        next.pipe(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker;

    #[test]
    fn named_satisfies_equal_names() {
        let a = Named::new("primary");
        let b = Named::new("primary");
        let c = Named::new("fallback");
        assert!(a.satisfies(&b));
        assert!(!a.satisfies(&c));
    }

    #[test]
    fn metadata_parses_the_tag_grammar() {
        let m = Metadata::parse("tier=gold,beta");
        assert_eq!(m.get("tier"), Some(&Some("gold".to_string())));
        assert_eq!(m.get("beta"), Some(&None));
        assert_eq!(m.get("absent"), None);
    }

    #[test]
    fn metadata_satisfies_by_deep_equality() {
        let a = Metadata::parse("tier=gold,beta");
        let b = Metadata::parse("beta,tier=gold");
        let c = Metadata::parse("tier=silver");
        assert!(a.satisfies(&b));
        assert!(!a.satisfies(&c));
    }

    #[test]
    fn qualifiers_match_by_marker_type() {
        let q = Qualifier::<Marker>::new();
        assert!(q.satisfies(&Qualifier::<Marker>::new()));
        assert!(!q.satisfies(&Named::new("x")));
    }
}
