//! Lifestyles: filter-based instance caching for `Provides` bindings.
//!
//! The singleton lifestyle lives here; the context-scoped variants build
//! on the same single-flight cache entry in the companion crate.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, RwLock};

use crate::binding::{Binding, HandleContext};
use crate::callback::{Callback, ResultVal};
use crate::error::DispatchError;
use crate::filter::{Filter, FilterProvider, Next, PipeOut, Piped, LIFESTYLE_STAGE};
use crate::handler::Handler;
use crate::key::{Key, KeyAtom};
use crate::provides::Provides;

enum EntryState {
    Vacant,
    Building,
    Ready(Vec<ResultVal>),
}

/// A one-shot cache slot: the first caller builds, concurrent callers
/// block on the same attempt, and failure re-arms the slot so the next
/// caller retries.
pub struct CacheEntry {
    state: Mutex<EntryState>,
    cond: Condvar,
}

impl Default for CacheEntry {
    fn default() -> Self {
        CacheEntry {
            state: Mutex::new(EntryState::Vacant),
            cond: Condvar::new(),
        }
    }
}

impl CacheEntry {
    /// A vacant slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached values, if construction completed.
    pub fn ready(&self) -> Option<Vec<ResultVal>> {
        match &*self.state.lock().expect("entry poisoned") {
            EntryState::Ready(values) => Some(values.clone()),
            _ => None,
        }
    }

    /// Evict the cached values.
    pub fn evict(&self) {
        *self.state.lock().expect("entry poisoned") = EntryState::Vacant;
        self.cond.notify_all();
    }

    /// Return the cached values, electing exactly one caller to run
    /// `build` on a miss. Errors, panics and empty products re-arm the
    /// slot.
    pub fn get_or_build(
        &self,
        build: impl FnOnce() -> Result<Vec<ResultVal>, DispatchError>,
    ) -> Result<Vec<ResultVal>, DispatchError> {
        let mut state = self.state.lock().expect("entry poisoned");
        loop {
            match &*state {
                EntryState::Ready(values) => return Ok(values.clone()),
                EntryState::Building => {
                    state = self.cond.wait(state).expect("entry poisoned");
                }
                EntryState::Vacant => {
                    *state = EntryState::Building;
                    break;
                }
            }
        }
        drop(state);

        let built = catch_unwind(AssertUnwindSafe(build));

        let mut state = self.state.lock().expect("entry poisoned");
        let outcome = match built {
            Ok(Ok(values)) if !values.is_empty() => {
                *state = EntryState::Ready(values.clone());
                Ok(values)
            }
            Ok(Ok(values)) => {
                *state = EntryState::Vacant;
                Ok(values)
            }
            Ok(Err(err)) => {
                *state = EntryState::Vacant;
                Err(err)
            }
            Err(panic) => {
                *state = EntryState::Vacant;
                let text = if let Some(s) = panic.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                Err(DispatchError::Panicked(text))
            }
        };
        drop(state);
        self.cond.notify_all();
        outcome
    }
}

type Cache = HashMap<KeyAtom, Arc<CacheEntry>>;

/// Process-wide cache: the same instance satisfies every resolution of
/// the binding for the process lifetime.
pub struct Singleton {
    filter: Arc<SingleFilter>,
}

impl Default for Singleton {
    fn default() -> Self {
        Singleton {
            filter: Arc::new(SingleFilter::default()),
        }
    }
}

impl Singleton {
    /// A fresh singleton lifestyle (one cache per binding).
    pub fn new() -> Self {
        Self::default()
    }
}

impl FilterProvider for Singleton {
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
struct SingleFilter {
    // Copy-on-write: readers clone the Arc, writers clone the map under
    // the write lock and swap.
    cache: RwLock<Arc<Cache>>,
}

impl SingleFilter {
    fn entry(&self, atom: KeyAtom, reuse_any_ready: bool, requested: &Key) -> Arc<CacheEntry> {
        if let Some(found) = self.cache.read().expect("cache poisoned").get(&atom) {
            return Arc::clone(found);
        }
        let mut guard = self.cache.write().expect("cache poisoned");
        if let Some(found) = guard.get(&atom) {
            return Arc::clone(found);
        }
        let mut next: Cache = (**guard).clone();
        // A concrete binding produces one instance no matter which
        // widened key requested it; reuse an entry that already built.
        // A wildcard binding produces per-key instances, so reuse only
        // an instance of the exact requested type.
        let mut entry = None;
        for existing in next.values() {
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
                    entry = Some(Arc::clone(existing));
                    break;
                }
            }
        }
        let entry = entry.unwrap_or_default();
        next.insert(atom, Arc::clone(&entry));
        *guard = Arc::new(next);
        entry
    }
}

impl Filter for SingleFilter {
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
        let reuse_any_ready = !matches!(ctx.binding.key(), Key::Any);
        let entry = self.entry(requested.atom(), reuse_any_ready, &requested);
        let values = entry.get_or_build(|| next.pipe_await(ctx))?;
        Ok(Piped::Sync(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn entry_builds_once() {
        let entry = CacheEntry::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let values = entry
                .get_or_build(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![ResultVal::Value(Some(value(7u32)))])
                })
                .unwrap();
            assert_eq!(values.len(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn entry_rearms_after_failure() {
        let entry = CacheEntry::new();
        let failed = entry.get_or_build(|| Err(DispatchError::Cancelled));
        assert!(failed.is_err());
        let ok = entry.get_or_build(|| Ok(vec![ResultVal::Value(Some(value(1u8)))]));
        assert!(ok.is_ok());
        assert!(entry.ready().is_some());
    }

    #[test]
    fn entry_rearms_after_panic() {
        let entry = CacheEntry::new();
        let panicked = entry.get_or_build(|| panic!("constructor exploded"));
        assert!(matches!(panicked, Err(DispatchError::Panicked(_))));
        let ok = entry.get_or_build(|| Ok(vec![ResultVal::Value(Some(value(2u8)))]));
        assert!(ok.is_ok());
    }

    #[test]
    fn concurrent_misses_elect_one_builder() {
        let entry = Arc::new(CacheEntry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let entry = Arc::clone(&entry);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    entry
                        .get_or_build(|| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok(vec![ResultVal::Value(Some(value(9u32)))])
                        })
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().len(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
