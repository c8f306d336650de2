//! A hierarchical scope with an `Active → Ending → Ended` lifecycle.
//!
//! A context is itself a handler: callbacks dispatch to its own handlers
//! first, then walk the ancestor chain. Ending a context runs observers
//! in reverse registration order, ends its children and detaches it from
//! its parent.

use std::sync::{Arc, Mutex, Weak};

use usher_core::{
    value, Callback, CompositionScope, Handler, HandleResult, Key, Provides, TypeToken,
    NOT_HANDLED,
};

/// Lifecycle of a [`Context`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ContextState {
    /// Accepting handlers and dispatch.
    Active,
    /// Ending: observers are running, dispatch still possible.
    Ending,
    /// Ended: detached, dispatch returns unhandled.
    Ended,
}

/// Explicit resource teardown, run when an owning scope ends.
pub trait Dispose {
    /// Release held resources. Called at most once per owning scope.
    fn dispose(&self);
}

/// Observes a context's lifecycle.
pub trait ContextObserver: Send + Sync {
    /// The context began ending.
    fn context_ending(&self, ctx: &Context) {
        let _ = ctx;
    }

    /// The context ended.
    fn context_ended(&self, ctx: &Context) {
        let _ = ctx;
    }
}

struct ContextInner {
    parent: Weak<ContextInner>,
    state: Mutex<ContextState>,
    children: Mutex<Vec<Context>>,
    handlers: Mutex<Vec<Arc<dyn Handler>>>,
    observers: Mutex<Vec<Option<Arc<dyn ContextObserver>>>>,
}

/// One node of the scope tree. Clones share the node.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

/// Removes an observer registration when disposed.
pub struct ObserverHandle {
    inner: Weak<ContextInner>,
    slot: usize,
}

impl ObserverHandle {
    /// Detach the observed registration.
    pub fn dispose(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut observers = inner.observers.lock().expect("observers poisoned");
            if let Some(slot) = observers.get_mut(self.slot) {
                *slot = None;
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// A fresh root context.
    pub fn new() -> Self {
        Context {
            inner: Arc::new(ContextInner {
                parent: Weak::new(),
                state: Mutex::new(ContextState::Active),
                children: Mutex::new(Vec::new()),
                handlers: Mutex::new(Vec::new()),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A child scope of this context.
    ///
    /// # Panics
    /// Panics when the context is no longer active.
    pub fn create_child(&self) -> Context {
        assert!(
            self.state() == ContextState::Active,
            "cannot create a child of an inactive context"
        );
        let child = Context {
            inner: Arc::new(ContextInner {
                parent: Arc::downgrade(&self.inner),
                state: Mutex::new(ContextState::Active),
                children: Mutex::new(Vec::new()),
                handlers: Mutex::new(Vec::new()),
                observers: Mutex::new(Vec::new()),
            }),
        };
        self.inner
            .children
            .lock()
            .expect("children poisoned")
            .push(child.clone());
        child
    }

    /// The parent scope, while it is alive.
    pub fn parent(&self) -> Option<Context> {
        self.inner.parent.upgrade().map(|inner| Context { inner })
    }

    /// The root of the scope tree.
    pub fn root(&self) -> Context {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// The live child scopes.
    pub fn children(&self) -> Vec<Context> {
        self.inner.children.lock().expect("children poisoned").clone()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ContextState {
        *self.inner.state.lock().expect("state poisoned")
    }

    /// Whether this context ended.
    pub fn ended(&self) -> bool {
        self.state() == ContextState::Ended
    }

    /// Stable identity of the scope node.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    /// Whether two handles share the scope node.
    pub fn same(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Add a handler consulted by dispatch through this scope.
    pub fn add_handler(&self, handler: Arc<dyn Handler>) {
        self.inner
            .handlers
            .lock()
            .expect("handlers poisoned")
            .push(handler);
    }

    /// Observe lifecycle transitions; dispose the handle to detach.
    pub fn observe(&self, observer: Arc<dyn ContextObserver>) -> ObserverHandle {
        let mut observers = self.inner.observers.lock().expect("observers poisoned");
        observers.push(Some(observer));
        ObserverHandle {
            inner: Arc::downgrade(&self.inner),
            slot: observers.len() - 1,
        }
    }

    /// End the scope: notify ending observers, end children, notify
    /// ended observers in reverse registration order, detach.
    pub fn end(&self) {
        {
            let mut state = self.inner.state.lock().expect("state poisoned");
            if *state != ContextState::Active {
                return;
            }
            *state = ContextState::Ending;
        }
        // Observers run against a snapshot so user code never executes
        // under the lock.
        let snapshot: Vec<Arc<dyn ContextObserver>> = self
            .inner
            .observers
            .lock()
            .expect("observers poisoned")
            .iter()
            .flatten()
            .cloned()
            .collect();
        for observer in &snapshot {
            observer.context_ending(self);
        }
        for child in self.children() {
            child.end();
        }
        *self.inner.state.lock().expect("state poisoned") = ContextState::Ended;
        for observer in snapshot.iter().rev() {
            observer.context_ended(self);
        }
        self.inner
            .observers
            .lock()
            .expect("observers poisoned")
            .clear();
        if let Some(parent) = self.parent() {
            parent
                .inner
                .children
                .lock()
                .expect("children poisoned")
                .retain(|child| !child.same(self));
        }
    }
}

impl Handler for Context {
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
        // Dispatch keeps working while ending and after the end; scoped
        // lifestyles are the ones that refuse inactive contexts.
        // A context satisfies a resolution request for itself directly.
        let mut result = NOT_HANDLED;
        if let Some(provides) = callback.as_any().downcast_ref::<Provides>() {
            if let Key::Type(token) = provides.requested() {
                if *token == TypeToken::of::<Context>() {
                    result = result.or(callback.receive_result(
                        value(self.clone()),
                        false,
                        composer,
                    ));
                    if result.handled() && !greedy {
                        return result;
                    }
                }
            }
        }
        let handlers: Vec<Arc<dyn Handler>> = self
            .inner
            .handlers
            .lock()
            .expect("handlers poisoned")
            .clone();
        for handler in handlers {
            result = result.or(handler.handle(callback, greedy, Some(composer)));
            if result.stop() || (result.handled() && !greedy) {
                return result;
            }
        }
        if let Some(parent) = self.parent() {
            result = result.or(parent.handle(callback, greedy, Some(composer)));
        }
        result
    }
}

/// Notified before a contextual instance changes context.
pub trait ContextChanging: Send + Sync {
    /// `old` and `new` are the current and proposed contexts.
    fn context_changing(&self, old: Option<&Context>, new: Option<&Context>);
}

/// State for instances owned by a context: the owning scope plus
/// change observers.
#[derive(Default)]
pub struct ContextualBase {
    context: Mutex<Option<Context>>,
    observers: Mutex<Vec<Arc<dyn ContextChanging>>>,
}

impl std::fmt::Debug for ContextualBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextualBase").finish_non_exhaustive()
    }
}

impl ContextualBase {
    /// The owning context.
    pub fn get(&self) -> Option<Context> {
        self.context.lock().expect("context poisoned").clone()
    }

    /// Change the owning context, notifying observers first. Observers
    /// may panic to veto the change.
    pub fn set(&self, new: Option<Context>) {
        let old = self.get();
        match (&old, &new) {
            (Some(a), Some(b)) if a.same(b) => return,
            (None, None) => return,
            _ => {}
        }
        let observers: Vec<Arc<dyn ContextChanging>> = self
            .observers
            .lock()
            .expect("observers poisoned")
            .clone();
        for observer in observers {
            observer.context_changing(old.as_ref(), new.as_ref());
        }
        *self.context.lock().expect("context poisoned") = new;
    }

    /// Observe context changes.
    pub fn observe(&self, observer: Arc<dyn ContextChanging>) {
        self.observers
            .lock()
            .expect("observers poisoned")
            .push(observer);
    }
}

/// An instance owned by a context through a [`ContextualBase`].
pub trait Contextual: Send + Sync + 'static {
    /// The instance's contextual state.
    fn contextual(&self) -> &ContextualBase;
}

/// Closure adapter for ended-only observation.
pub struct EndedObserver<F: Fn(&Context) + Send + Sync>(pub F);

impl<F: Fn(&Context) + Send + Sync> ContextObserver for EndedObserver<F> {
    fn context_ended(&self, ctx: &Context) {
        (self.0)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn lifecycle_transitions() {
        let ctx = Context::new();
        assert_eq!(ctx.state(), ContextState::Active);
        ctx.end();
        assert_eq!(ctx.state(), ContextState::Ended);
    }

    #[test]
    fn ending_detaches_from_parent_and_ends_children() {
        let root = Context::new();
        let child = root.create_child();
        let grandchild = child.create_child();
        assert_eq!(root.children().len(), 1);

        child.end();
        assert!(child.ended());
        assert!(grandchild.ended());
        assert!(root.children().is_empty());
    }

    #[test]
    fn observers_run_in_reverse_registration_order_on_end() {
        let ctx = Context::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            let order = Arc::clone(&order);
            ctx.observe(Arc::new(EndedObserver(move |_: &Context| {
                order.lock().unwrap().push(id);
            })));
        }
        ctx.end();
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn disposed_observers_do_not_fire() {
        let ctx = Context::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        let handle = ctx.observe(Arc::new(EndedObserver(move |_: &Context| {
            fired2.fetch_add(1, Ordering::SeqCst);
        })));
        handle.dispose();
        ctx.end();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn root_walks_to_the_top() {
        let root = Context::new();
        let leaf = root.create_child().create_child();
        assert!(leaf.root().same(&root));
    }

    #[test]
    fn contextual_base_vetoes_via_observer_panic() {
        struct Veto;
        impl ContextChanging for Veto {
            fn context_changing(&self, old: Option<&Context>, new: Option<&Context>) {
                if old.is_some() && new.is_some() {
                    panic!("managed instances cannot change context");
                }
            }
        }
        let base = ContextualBase::default();
        base.observe(Arc::new(Veto));
        let a = Context::new();
        let b = Context::new();
        base.set(Some(a));
        let err = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            base.set(Some(b));
        }));
        assert!(err.is_err());
    }
}
