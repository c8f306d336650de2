//! Ambient options: configuration values installed on the handler chain
//! and merged into matching requests.
//!
//! Options compose across the chain rather than override: the first
//! installed value of a field wins, and collection fields append. Types
//! express that contract through [`Options::merge_from`].

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::binding::{DependencyResolver, DependencySpec, HandleContext, Resolved};
use crate::callback::{Callback, CallbackBase};
use crate::error::DispatchError;
use crate::handler::{CompositionScope, Handler};
use crate::key::{coerce_cloned, value, Key};
use crate::policy::Policy;
use crate::result::{HandleResult, HANDLED};
use crate::spec::Injectable;

/// An options struct that knows how to merge an earlier-installed value
/// into itself: unset fields adopt, collection fields append.
pub trait Options: Any + Send + Sync + Clone + Default {
    /// Merge from `other`; report whether anything changed.
    fn merge_from(&mut self, other: &Self) -> bool;
}

/// Explicit optional carrier for option fields where the default value
/// cannot distinguish unset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Opt<T> {
    set: bool,
    val: T,
}

impl<T> Opt<T> {
    /// A set value.
    pub fn of(val: T) -> Self {
        Opt { set: true, val }
    }

    /// Whether the value was explicitly set.
    pub fn is_set(&self) -> bool {
        self.set
    }

    /// The value, set or not.
    pub fn get(&self) -> &T {
        &self.val
    }

    /// The value when set, otherwise `fallback`.
    pub fn or(&self, fallback: T) -> T
    where
        T: Clone,
    {
        if self.set {
            self.val.clone()
        } else {
            fallback
        }
    }

    /// Adopt `other` when unset; first-set wins.
    pub fn merge(&mut self, other: &Self) -> bool
    where
        T: Clone,
    {
        if self.set || !other.set {
            return false;
        }
        self.val = other.val.clone();
        self.set = true;
        true
    }
}

/// Internal collector dispatched greedily through the chain; each
/// matching options handler merges its value in.
pub(crate) struct OptCallback {
    base: CallbackBase,
    key: Key,
    target: Box<dyn Any + Send + Sync>,
    matched: bool,
}

impl OptCallback {
    pub(crate) fn new<O: Options>() -> Self {
        OptCallback {
            base: CallbackBase::new(true),
            key: Key::of::<O>(),
            target: Box::new(O::default()),
            matched: false,
        }
    }

    fn merge_with<O: Options>(&mut self, options: &O) -> bool {
        match self.target.downcast_mut::<O>() {
            Some(target) => {
                target.merge_from(options);
                self.matched = true;
                true
            }
            None => false,
        }
    }

    pub(crate) fn matched(&self) -> bool {
        self.matched
    }

    pub(crate) fn take<O: Options>(self) -> Option<O> {
        self.target.downcast::<O>().ok().map(|boxed| *boxed)
    }
}

impl Callback for OptCallback {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn policy(&self) -> Policy {
        Policy::Handles
    }

    fn base(&self) -> &CallbackBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CallbackBase {
        &mut self.base
    }

    fn can_batch(&self) -> bool {
        false
    }

    fn can_infer(&self) -> bool {
        false
    }

    fn can_filter(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Installs an options value on the chain.
pub struct OptionsHandler<O: Options> {
    inner: Arc<dyn Handler>,
    options: O,
}

impl<O: Options> OptionsHandler<O> {
    /// Make `options` available to everything dispatched through `inner`.
    pub fn new(inner: Arc<dyn Handler>, options: O) -> Self {
        OptionsHandler { inner, options }
    }
}

impl<O: Options> Handler for OptionsHandler<O> {
    fn handle(
        &self,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: Option<&dyn Handler>,
    ) -> HandleResult {
        let scope;
        let composer: &dyn Handler = match composer {
            Some(c) => c,
            None => {
                scope = CompositionScope::new(self);
                &scope
            }
        };
        if let Some(collect) = callback.as_any_mut().downcast_mut::<OptCallback>() {
            if collect.merge_with::<O>(&self.options) {
                if greedy {
                    return self
                        .inner
                        .handle(callback, greedy, Some(composer))
                        .or(HANDLED);
                }
                return HANDLED;
            }
        }
        self.inner.handle(callback, greedy, Some(composer))
    }
}

/// Collect the merged `O` visible from `handler`, if any handler
/// installed one.
pub fn get_options<O: Options>(handler: &dyn Handler) -> Option<O> {
    let mut collect = OptCallback::new::<O>();
    let _ = handler.handle(&mut collect, true, None);
    if collect.matched() {
        collect.take::<O>()
    } else {
        None
    }
}

/// Dependency directive: materialize the merged ambient `O`.
pub struct FromOptions<O: Options>(pub O);

struct FromOptionsResolver<O>(PhantomData<fn() -> O>);

impl<O: Options> DependencyResolver for FromOptionsResolver<O> {
    fn resolve(
        &self,
        spec: &DependencySpec,
        ctx: &mut HandleContext<'_>,
    ) -> Result<Resolved, DispatchError> {
        let mut collect = OptCallback::new::<O>();
        let _ = ctx.composer.handle(&mut collect, true, None);
        if collect.matched() {
            match collect.take::<O>() {
                Some(options) => Ok(Resolved::One(Some(value(options)))),
                None => Err(DispatchError::NotHandled),
            }
        } else if spec.optional {
            Ok(Resolved::One(None))
        } else {
            Err(DispatchError::NotHandled)
        }
    }
}

impl<O: Options> Injectable for FromOptions<O> {
    fn spec() -> DependencySpec {
        let mut spec = DependencySpec::of(Key::of::<O>(), std::any::type_name::<O>());
        spec.resolver = Some(Arc::new(FromOptionsResolver::<O>(PhantomData)));
        spec
    }

    fn from_resolved(resolved: Resolved) -> Result<Self, DispatchError> {
        match resolved {
            Resolved::One(Some(v)) => coerce_cloned::<O>(&v)
                .map(FromOptions)
                .ok_or(DispatchError::NotHandled),
            _ => Err(DispatchError::NotHandled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default, Debug, PartialEq)]
    struct RetryOptions {
        attempts: Opt<u32>,
        backends: Vec<String>,
    }

    impl Options for RetryOptions {
        fn merge_from(&mut self, other: &Self) -> bool {
            let mut changed = self.attempts.merge(&other.attempts);
            if !other.backends.is_empty() {
                self.backends.extend(other.backends.iter().cloned());
                changed = true;
            }
            changed
        }
    }

    #[test]
    fn opt_first_set_wins() {
        let mut a = Opt::of(3u32);
        let b = Opt::of(9u32);
        assert!(!a.merge(&b));
        assert_eq!(*a.get(), 3);

        let mut unset = Opt::<u32>::default();
        assert!(unset.merge(&b));
        assert_eq!(*unset.get(), 9);
    }

    #[test]
    fn merge_appends_collections() {
        let mut target = RetryOptions::default();
        target.merge_from(&RetryOptions {
            attempts: Opt::of(2),
            backends: vec!["a".into()],
        });
        target.merge_from(&RetryOptions {
            attempts: Opt::of(5),
            backends: vec!["b".into()],
        });
        assert_eq!(target.attempts.or(0), 2);
        assert_eq!(target.backends, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn collector_tracks_type_matches() {
        let mut collect = OptCallback::new::<RetryOptions>();
        assert!(collect.merge_with(&RetryOptions {
            attempts: Opt::of(1),
            backends: Vec::new(),
        }));
        assert!(collect.matched());
        let merged = collect.take::<RetryOptions>().unwrap();
        assert_eq!(merged.attempts.or(0), 1);
    }
}
