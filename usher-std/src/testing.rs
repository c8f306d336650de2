//! Reusable fixtures for exercising dispatch in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use usher_core::{Filter, FilterProvider, HandleContext, Next, PipeOut};

/// Counts how often something happened.
#[derive(Default, Debug)]
pub struct CallProbe {
    count: AtomicUsize,
}

impl CallProbe {
    /// A zeroed probe.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a hit, returning the new count.
    pub fn bump(&self) -> usize {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The hits recorded so far.
    pub fn hits(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Records labels in the order they occur.
#[derive(Default)]
pub struct OrderLog {
    entries: Mutex<Vec<String>>,
}

impl OrderLog {
    /// An empty log.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append a label.
    pub fn push(&self, label: impl Into<String>) {
        self.entries
            .lock()
            .expect("order log poisoned")
            .push(label.into());
    }

    /// The labels recorded so far.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().expect("order log poisoned").clone()
    }
}

/// A filter that records pipeline entry and exit into an [`OrderLog`].
pub struct TraceFilter {
    log: Arc<OrderLog>,
    label: &'static str,
    order: Option<i32>,
}

impl TraceFilter {
    /// Record as `label` into `log` at the given pipeline order.
    pub fn new(log: Arc<OrderLog>, label: &'static str, order: i32) -> Self {
        TraceFilter {
            log,
            label,
            order: Some(order),
        }
    }
}

impl Filter for TraceFilter {
    fn order(&self) -> Option<i32> {
        self.order
    }

    fn next(
        &self,
        ctx: &mut HandleContext<'_>,
        next: &mut Next<'_>,
        _provider: &dyn FilterProvider,
    ) -> PipeOut {
        self.log.push(format!("{}:enter", self.label));
        let out = next.pipe(ctx);
        self.log.push(format!("{}:exit", self.label));
        out
    }
}
