//! Context-scoped lifestyles: one instance per [`Context`], with a
//! rooted variant that pins every resolution to the scope tree's root.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use thiserror::Error;

use usher_core::{
    coerce, Binding, CacheEntry, Callback, DispatchError, Filter, FilterProvider, HandleContext,
    Handler, Key, KeyAtom, Next, PipeOut, Piped, Provides, Reply, ResultVal, TypeToken, Value,
    LIFESTYLE_STAGE,
};

use crate::context::{
    Context, ContextChanging, ContextObserver, ContextState, ContextualBase,
};

/// An instance manageable by a context-scoped lifestyle.
///
/// Override [`contextual`](Scopable::contextual) when the instance
/// tracks its owning scope, and [`dispose`](Scopable::dispose) for
/// teardown when the scope ends.
pub trait Scopable: Send + Sync + 'static {
    /// Contextual state, when the instance tracks its owning scope.
    fn contextual(&self) -> Option<&ContextualBase> {
        None
    }

    /// Teardown when the owning scope ends.
    fn dispose(&self) {}
}

/// Failures specific to scoped resolution.
#[derive(Error, Debug)]
pub enum ScopeError {
    /// The resolved context is ending or ended.
    #[error("scoped: cannot scope instances to an inactive context")]
    InactiveContext,
}

type Caster = Arc<dyn Fn(&Value) -> Option<Arc<dyn Scopable>> + Send + Sync>;

/// Per-context lifestyle provider; attach to a constructor binding with
/// `filter_provider`.
pub struct Scoped {
    rooted: bool,
    filter: Arc<ScopedFilter>,
}

impl Scoped {
    /// Scope instances of `T` to the resolving context.
    pub fn of<T: Scopable>() -> Arc<Self> {
        Self::build::<T>(false)
    }

    /// Scope instances of `T` to the resolving context's root.
    pub fn rooted<T: Scopable>() -> Arc<Self> {
        Self::build::<T>(true)
    }

    fn build<T: Scopable>(rooted: bool) -> Arc<Self> {
        let caster: Caster =
            Arc::new(|v| coerce::<T>(v).map(|found| found as Arc<dyn Scopable>));
        Arc::new(Scoped {
            rooted,
            filter: Arc::new(ScopedFilter {
                rooted,
                caster,
                cache: Arc::new(ScopedCache::default()),
            }),
        })
    }

    /// Whether resolutions pin to the root context.
    pub fn is_rooted(&self) -> bool {
        self.rooted
    }
}

impl FilterProvider for Scoped {
    fn required(&self) -> bool {
        true
    }

    fn applies_to(&self, callback: &dyn Callback) -> bool {
        callback.as_any().is::<Provides>()
    }

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

#[derive(Default)]
struct ScopedCache {
    map: RwLock<HashMap<usize, HashMap<KeyAtom, Arc<CacheEntry>>>>,
}

impl ScopedCache {
    fn entry(
        &self,
        ctx_id: usize,
        atom: KeyAtom,
        reuse_any_ready: bool,
        requested: &Key,
    ) -> Arc<CacheEntry> {
        if let Some(found) = self
            .map
            .read()
            .expect("scoped cache poisoned")
            .get(&ctx_id)
            .and_then(|keys| keys.get(&atom))
        {
            return Arc::clone(found);
        }
        let mut map = self.map.write().expect("scoped cache poisoned");
        let keys = map.entry(ctx_id).or_default();
        if let Some(found) = keys.get(&atom) {
            return Arc::clone(found);
        }
        // An instance this binding already produced for the context can
        // satisfy another key the binding matches.
        for existing in keys.values() {
            if let Some(values) = existing.ready() {
                let type_ok = if reuse_any_ready {
                    true
                } else if let (Key::Type(token), Some(ResultVal::Value(Some(v)))) =
                    (requested, values.first())
                {
                    (**v).type_id() == token.id()
                } else {
                    false
                };
                if type_ok {
                    let found = Arc::clone(existing);
                    keys.insert(atom, Arc::clone(&found));
                    return found;
                }
            }
        }
        let entry = Arc::new(CacheEntry::new());
        keys.insert(atom, Arc::clone(&entry));
        entry
    }

    fn remove_context(&self, ctx_id: usize) {
        self.map
            .write()
            .expect("scoped cache poisoned")
            .remove(&ctx_id);
    }

    fn remove_entry(&self, ctx_id: usize, atom: &KeyAtom) {
        if let Some(keys) = self
            .map
            .write()
            .expect("scoped cache poisoned")
            .get_mut(&ctx_id)
        {
            keys.remove(atom);
        }
    }
}

struct ScopedFilter {
    rooted: bool,
    caster: Caster,
    cache: Arc<ScopedCache>,
}

// Evicts and disposes a managed instance when someone tries to move it
// between contexts; moving to a different live context is a programming
// error and panics after cleanup.
struct ChangeGuard {
    armed: AtomicBool,
    cache: Arc<ScopedCache>,
    ctx_id: usize,
    atom: KeyAtom,
    instance: Weak<dyn Scopable>,
}

impl ChangeGuard {
    fn cleanup(&self) {
        self.cache.remove_entry(self.ctx_id, &self.atom);
        if let Some(instance) = self.instance.upgrade() {
            instance.dispose();
        }
    }
}

impl ContextChanging for ChangeGuard {
    fn context_changing(&self, old: Option<&Context>, new: Option<&Context>) {
        if !self.armed.load(Ordering::Acquire) {
            return;
        }
        let Some(old) = old else { return };
        if old.id() != self.ctx_id {
            return;
        }
        match new {
            Some(next) if next.id() == self.ctx_id => {}
            Some(_) => {
                self.cleanup();
                panic!("managed instances cannot change context");
            }
            None => {
                self.armed.store(false, Ordering::Release);
                self.cleanup();
            }
        }
    }
}

// Runs when the owning context ends: evict, dispose, detach.
struct EndGuard {
    cache: Arc<ScopedCache>,
    ctx_id: usize,
    managed: Option<Arc<dyn Scopable>>,
    change_guard: Option<Arc<ChangeGuard>>,
}

impl ContextObserver for EndGuard {
    fn context_ended(&self, _ctx: &Context) {
        if let Some(guard) = &self.change_guard {
            guard.armed.store(false, Ordering::Release);
        }
        self.cache.remove_context(self.ctx_id);
        if let Some(managed) = &self.managed {
            managed.dispose();
            if let Some(contextual) = managed.contextual() {
                contextual.set(None);
            }
        }
    }
}

impl ScopedFilter {
    fn attach(&self, context: &Context, atom: KeyAtom, values: &[ResultVal]) {
        let instance = match values.first() {
            Some(ResultVal::Value(Some(v))) => Some(v),
            Some(ResultVal::Many { items, .. }) => items.first(),
            _ => None,
        };
        let managed = instance.and_then(|v| (self.caster)(v));
        let mut change_guard = None;
        if let Some(managed) = &managed {
            if let Some(contextual) = managed.contextual() {
                contextual.set(Some(context.clone()));
                let guard = Arc::new(ChangeGuard {
                    armed: AtomicBool::new(true),
                    cache: Arc::clone(&self.cache),
                    ctx_id: context.id(),
                    atom,
                    instance: Arc::downgrade(managed),
                });
                contextual.observe(Arc::clone(&guard) as Arc<dyn ContextChanging>);
                change_guard = Some(guard);
            }
        }
        context.observe(Arc::new(EndGuard {
            cache: Arc::clone(&self.cache),
            ctx_id: context.id(),
            managed,
            change_guard,
        }));
    }
}

impl Filter for ScopedFilter {
    fn order(&self) -> Option<i32> {
        Some(LIFESTYLE_STAGE)
    }

    fn next(
        &self,
        ctx: &mut HandleContext<'_>,
        next: &mut Next<'_>,
        _provider: &dyn FilterProvider,
    ) -> PipeOut {
        let requested = match ctx.callback.as_any().downcast_ref::<Provides>() {
            Some(provides) => provides.requested().clone(),
            None => return next.pipe(ctx),
        };
        // A context itself is never scoped.
        if let Key::Type(token) = &requested {
            if *token == TypeToken::of::<Context>() {
                return next.pipe(ctx);
            }
        }
        // Scoped instances may only depend on compatible scoped
        // instances; a rooted parent cannot hold a narrower child.
        if let Some(parent) = ctx
            .callback
            .as_any()
            .downcast_ref::<Provides>()
            .and_then(|p| p.parent_binding())
        {
            for provider in parent.filters() {
                match provider.as_any().downcast_ref::<Scoped>() {
                    Some(scoped) if !(scoped.is_rooted() && !self.rooted) => {}
                    _ => return Ok(Piped::Sync(Vec::new())),
                }
            }
        }

        let context = match usher_core::resolve::<Context>(ctx.composer)? {
            Reply::Now(found) => found,
            Reply::Soon(promise) => promise.wait().map_err(DispatchError::from)?,
        };
        let Some(context) = context else {
            return next.abort();
        };
        let mut context = (*context).clone();
        if context.state() != ContextState::Active {
            return Err(DispatchError::domain(Box::new(ScopeError::InactiveContext)));
        }
        if self.rooted {
            context = context.root();
        }

        let reuse_any_ready = !matches!(ctx.binding.key(), Key::Any);
        let atom = requested.atom();
        let entry = self
            .cache
            .entry(context.id(), atom.clone(), reuse_any_ready, &requested);
        let values = entry.get_or_build(|| {
            let values = next.pipe_await(ctx)?;
            if !values.is_empty() {
                self.attach(&context, atom.clone(), &values);
            }
            Ok(values)
        })?;
        Ok(Piped::Sync(values))
    }
}
