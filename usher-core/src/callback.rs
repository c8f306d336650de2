//! The callback contract and its shared state.

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::sync::Arc;

use crate::constraint::Constraint;
use crate::error::DispatchError;
use crate::handler::Handler;
use crate::key::{Key, Upcast, Value};
use crate::policy::Policy;
use crate::promise::Promise;
use crate::result::{HandleResult, HANDLED, NOT_HANDLED};

/// Identity of a handler instance participating in dispatch.
pub type InstanceId = usize;

/// Saved guard state to restore after a candidate binding completes.
#[derive(Default)]
pub struct GuardFrame {
    pub(crate) prev: Option<(InstanceId, Arc<crate::binding::Binding>)>,
}

/// A value produced by invoking a binding, before policy acceptance.
#[derive(Clone)]
pub enum ResultVal {
    /// A single produced value; `None` models an absent value.
    Value(Option<Value>),
    /// The elements of a collection-returning binding, plus the whole
    /// collection for strict delivery.
    Many {
        /// Each element, individually boxed.
        items: Vec<Value>,
        /// The collection itself.
        whole: Value,
    },
    /// An explicit [`HandleResult`] return.
    Result(HandleResult),
    /// A domain error return.
    Error(DispatchError),
}

/// An in-flight request: key, payload, policy and growing results.
///
/// Callbacks live for one dispatch call and are mutated only by the
/// dispatch engine that owns them.
pub trait Callback: Any + Send {
    /// The key bindings are selected by.
    fn key(&self) -> Key;

    /// The policy governing selection and acceptance.
    fn policy(&self) -> Policy;

    /// The payload, when the callback carries one.
    fn source(&self) -> Option<&Value> {
        None
    }

    /// Widening edges of the callback key (contravariant matching).
    fn upcasts(&self) -> &[Upcast] {
        &[]
    }

    /// Shared result state.
    fn base(&self) -> &CallbackBase;

    /// Shared result state, mutable.
    fn base_mut(&mut self) -> &mut CallbackBase;

    /// Whether a batch scope may claim this callback.
    fn can_batch(&self) -> bool {
        self.base().batchable()
    }

    /// Whether inference may service this callback.
    fn can_infer(&self) -> bool {
        true
    }

    /// Whether the filter pipeline applies to this callback.
    fn can_filter(&self) -> bool {
        true
    }

    /// Approve dispatching `binding` on `handler`, returning guard state
    /// to restore afterwards, or `None` to reject the candidate.
    fn approve_dispatch(
        &mut self,
        handler: InstanceId,
        binding: &Arc<crate::binding::Binding>,
    ) -> Option<GuardFrame> {
        let _ = (handler, binding);
        Some(GuardFrame::default())
    }

    /// Restore guard state saved by
    /// [`approve_dispatch`](Callback::approve_dispatch).
    fn restore_dispatch(&mut self, frame: GuardFrame) {
        let _ = frame;
    }

    /// Deliver an accepted result value.
    fn receive_result(
        &mut self,
        value: Value,
        strict: bool,
        composer: &dyn Handler,
    ) -> HandleResult {
        let _ = (strict, composer);
        self.base_mut().add_result(value)
    }

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;

    /// Downcast support, mutable.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// State shared by every callback kind: accumulated results, pending
/// promised results, constraints and dispatch bookkeeping.
#[derive(Default)]
pub struct CallbackBase {
    many: bool,
    results: Vec<Value>,
    promised: Vec<Promise<Option<Value>>>,
    constraints: Vec<Arc<dyn Constraint>>,
    composed: bool,
    no_batch: bool,
    inferred: HashSet<TypeId>,
}

impl CallbackBase {
    /// Fresh state; `many` marks greedy result collection.
    pub fn new(many: bool) -> Self {
        CallbackBase {
            many,
            ..Default::default()
        }
    }

    /// Whether this callback collects all results.
    pub fn many(&self) -> bool {
        self.many
    }

    /// Attach required constraints.
    pub fn add_constraint(&mut self, constraint: Arc<dyn Constraint>) {
        self.constraints.push(constraint);
    }

    /// The constraints required by the caller.
    pub fn constraints(&self) -> &[Arc<dyn Constraint>] {
        &self.constraints
    }

    /// Append a result. A value holding a promised result is tracked for
    /// later completion instead.
    pub fn add_result(&mut self, value: Value) -> HandleResult {
        if let Some(promise) = value.downcast_ref::<Promise<Option<Value>>>() {
            self.promised.push(promise.clone());
            return HANDLED;
        }
        self.results.push(value);
        HANDLED
    }

    /// Append each element of a collection result.
    pub fn add_results(&mut self, items: Vec<Value>) -> HandleResult {
        if items.is_empty() {
            return NOT_HANDLED;
        }
        self.results.extend(items);
        HANDLED
    }

    /// Number of synchronous results collected so far.
    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    /// Synchronous results in discovery order.
    pub fn results(&self) -> &[Value] {
        &self.results
    }

    /// The first synchronous result.
    pub fn first_result(&self) -> Option<&Value> {
        self.results.first()
    }

    /// Whether any result settled through a promise.
    pub fn has_promised(&self) -> bool {
        !self.promised.is_empty()
    }

    /// Join all promised results into one promise, in discovery order.
    pub fn promised_results(&self) -> Option<Promise<Vec<Option<Value>>>> {
        if self.promised.is_empty() {
            None
        } else {
            Some(Promise::all(self.promised.clone()))
        }
    }

    /// Whether a batch scope may claim the callback.
    pub fn batchable(&self) -> bool {
        !self.no_batch
    }

    /// Veto batching for this callback.
    pub fn set_no_batch(&mut self) {
        self.no_batch = true;
    }

    /// Whether the callback has re-entered dispatch through a composer.
    pub fn composed(&self) -> bool {
        self.composed
    }

    /// Mark the callback as composed.
    pub fn set_composed(&mut self) {
        self.composed = true;
    }

    /// Record an inferred handler type; `false` if already visited.
    pub fn mark_inferred(&mut self, handler: TypeId) -> bool {
        self.inferred.insert(handler)
    }
}
