#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use usher::testing::CallProbe;
use usher::{
    upcast, HandlerSpec, HandlerSpecBuilder, Payload, Promise, Settle, Upcast, Value,
};

// ============================================================================
// Messages
// ============================================================================

#[derive(Clone, Debug)]
pub struct Transfer {
    pub amount: u64,
}

impl Payload for Transfer {}

// A wire transfer is a kind of transfer; handlers of Transfer accept it.
#[derive(Clone, Debug)]
pub struct Wire {
    pub amount: u64,
}

impl Payload for Wire {
    fn widens() -> Vec<Upcast> {
        upcast(|w: Arc<Wire>| Transfer { amount: w.amount })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Receipt {
    pub total: u64,
}

impl Payload for Receipt {}

#[derive(Clone, Debug, PartialEq)]
pub struct Answer(pub u64);

impl Payload for Answer {}

// ============================================================================
// Handlers
// ============================================================================

// Books transfers; counts invocations.
pub struct Ledger {
    pub booked: Arc<CallProbe>,
}

impl Payload for Ledger {}

impl HandlerSpec for Ledger {
    fn describe(b: &mut HandlerSpecBuilder<Self>) {
        b.no_constructor();
        b.handles(|h: &Ledger, t: &Transfer| {
            h.booked.bump();
            Receipt { total: t.amount }
        });
    }
}

// Audits everything; a wildcard-free second handler for greedy tests.
pub struct Auditor {
    pub seen: Arc<Mutex<Vec<u64>>>,
}

impl Payload for Auditor {}

impl HandlerSpec for Auditor {
    fn describe(b: &mut HandlerSpecBuilder<Self>) {
        b.no_constructor();
        b.handles(|h: &Auditor, t: &Transfer| {
            h.seen.lock().unwrap().push(t.amount);
        });
    }
}

// ============================================================================
// Services
// ============================================================================

pub struct Motor {
    pub serial: u64,
}

impl Payload for Motor {}

// Provides motors under the singleton lifestyle; counts builds.
pub struct Garage {
    pub built: Arc<CallProbe>,
}

impl Payload for Garage {}

impl HandlerSpec for Garage {
    fn describe(b: &mut HandlerSpecBuilder<Self>) {
        b.no_constructor();
        b.provides(|h: &Garage| Motor {
            serial: h.built.bump() as u64,
        })
        .singleton();
    }
}

// ============================================================================
// Batching
// ============================================================================

#[derive(Clone, Debug)]
pub struct Routed {
    pub message: String,
    pub route: String,
}

impl Payload for Routed {}

// Accumulates routed messages per batch; flushing settles every pending
// promise with the concatenated group so tests can observe the single
// outbound call.
#[derive(Default)]
pub struct RouteBatcher {
    pending: Mutex<Vec<(Routed, Settle<Value>)>>,
    pub handed_out: Mutex<Vec<Promise<Value>>>,
}

impl Payload for RouteBatcher {}

impl HandlerSpec for RouteBatcher {
    fn describe(b: &mut HandlerSpecBuilder<Self>) {
        b.no_constructor();
        b.handles(|h: &RouteBatcher, r: &Routed| {
            let (promise, settle) = Promise::pending();
            h.pending.lock().unwrap().push((r.clone(), settle));
            h.handed_out.lock().unwrap().push(promise);
        });
    }
}

impl usher::Batching for RouteBatcher {
    fn complete_batch(
        &self,
        _composer: &dyn usher::Handler,
    ) -> Result<(Value, Option<Promise<Value>>), usher::DispatchError> {
        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        let group: Vec<String> = pending.iter().map(|(r, _)| r.message.clone()).collect();
        let group = group.join("+");
        for (routed, settle) in &pending {
            settle.resolve(usher::value(format!("{}@{}", routed.route, group)));
        }
        Ok((usher::value(pending.len()), None))
    }
}
