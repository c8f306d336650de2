//! Policies: variance plus result-acceptance rules.
//!
//! Policies are a closed set, so key matching and result acceptance stay
//! exhaustive. `Handles` and `Validates` select contravariantly (a handler
//! of a wider key accepts narrower payloads); `Provides`, `Creates` and
//! `Maps` select covariantly (a producer of a narrower type satisfies a
//! wider request).

use crate::binding::Binding;
use crate::callback::ResultVal;
use crate::error::DispatchError;
use crate::key::{Key, Upcast, Value};
use crate::result::{HandleResult, HANDLED, NOT_HANDLED};

/// How a policy relates binding keys to callback keys.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Variance {
    /// Candidate satisfies required when assignable *to* it.
    Covariant,
    /// Candidate satisfies required when required is assignable *to* it.
    Contravariant,
}

/// The closed set of dispatch policies.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Policy {
    /// Contravariant command/event handling.
    Handles,
    /// Covariant instance resolution.
    Provides,
    /// Covariant creation requests.
    Creates,
    /// Covariant mapping requests, format-tagged.
    Maps,
    /// Contravariant validation passes.
    Validates,
}

/// A successful key match.
#[derive(Clone, Debug)]
pub struct KeyMatch {
    /// Whether the match was exact (same key).
    pub exact: bool,
    /// The widening edge used by an inexact match; converts values
    /// across the variance boundary.
    pub view: Option<Upcast>,
}

impl KeyMatch {
    fn exact() -> Self {
        KeyMatch {
            exact: true,
            view: None,
        }
    }

    fn wildcard() -> Self {
        KeyMatch {
            exact: false,
            view: None,
        }
    }

    fn widened(view: Upcast) -> Self {
        KeyMatch {
            exact: false,
            view: Some(view),
        }
    }
}

/// A value produced by policy acceptance, ready for delivery.
pub enum Accepted {
    /// Nothing to deliver.
    None,
    /// A single value.
    Value(Value),
    /// A collection: elements plus the whole, chosen by strictness.
    Many {
        /// Each element, individually boxed.
        items: Vec<Value>,
        /// The collection itself.
        whole: Value,
    },
}

impl Policy {
    /// The variance of this policy.
    pub fn variance(self) -> Variance {
        match self {
            Policy::Handles | Policy::Validates => Variance::Contravariant,
            Policy::Provides | Policy::Creates | Policy::Maps => Variance::Covariant,
        }
    }

    /// Whether results always deliver strictly (no collection splat).
    pub fn strict(self) -> bool {
        matches!(self, Policy::Maps)
    }

    /// Classify a key: `(variant, unknown)`. Variant keys sort into the
    /// ordered list; the unknown (wildcard) key gets the trailing bucket.
    pub fn variant_key(self, key: &Key) -> (bool, bool) {
        match key {
            Key::Type(_) => (true, false),
            Key::Any => (true, true),
            Key::Name(_) => (false, false),
        }
    }

    /// Match a candidate binding key against the required callback key.
    ///
    /// `required_up` are the callback key's widening edges (consulted for
    /// contravariant policies); `candidate_up` the binding key's
    /// (consulted for covariant policies).
    pub fn matches_key(
        self,
        required: &Key,
        required_up: &[Upcast],
        candidate: &Key,
        candidate_up: &[Upcast],
        invariant_only: bool,
    ) -> Option<KeyMatch> {
        match (required, candidate) {
            (Key::Name(r), Key::Name(c)) => (r == c).then(KeyMatch::exact),
            (Key::Any, Key::Any) => Some(KeyMatch::exact()),
            (_, Key::Any) | (Key::Any, _) => (!invariant_only).then(KeyMatch::wildcard),
            (Key::Type(r), Key::Type(c)) => {
                if r.id() == c.id() {
                    return Some(KeyMatch::exact());
                }
                if invariant_only {
                    return None;
                }
                match self.variance() {
                    Variance::Contravariant => required_up
                        .iter()
                        .find(|u| u.token().id() == c.id())
                        .cloned()
                        .map(KeyMatch::widened),
                    Variance::Covariant => candidate_up
                        .iter()
                        .find(|u| u.token().id() == r.id())
                        .cloned()
                        .map(KeyMatch::widened),
                }
            }
            _ => None,
        }
    }

    /// Ordering within a policy's variant bindings: `a` sorts before `b`
    /// when `a`'s key is strictly more specific.
    pub fn less(self, a: &Binding, b: &Binding) -> bool {
        let a_key = a.key();
        let b_key = b.key();
        if a_key.atom() == b_key.atom() {
            return false;
        }
        match self.variance() {
            Variance::Contravariant => match b_key {
                Key::Any => true,
                Key::Type(bt) => a.upcasts().iter().any(|u| u.token().id() == bt.id()),
                Key::Name(_) => false,
            },
            Variance::Covariant => match b_key {
                Key::Any => true,
                Key::Type(_) => match a_key.token() {
                    Some(at) => b.upcasts().iter().any(|u| u.token().id() == at.id()),
                    None => false,
                },
                Key::Name(_) => false,
            },
        }
    }

    /// Apply the policy's acceptance table to the values a binding
    /// produced.
    pub fn accept_results(self, results: Vec<ResultVal>) -> (Accepted, HandleResult) {
        match self.variance() {
            Variance::Contravariant => accept_contravariant(results),
            Variance::Covariant => accept_covariant(results),
        }
    }
}

fn accept_contravariant(mut results: Vec<ResultVal>) -> (Accepted, HandleResult) {
    match results.len() {
        0 => (Accepted::None, HANDLED),
        1 => match results.pop().expect("length checked") {
            ResultVal::Error(err) => (Accepted::None, NOT_HANDLED.with_error(err)),
            ResultVal::Result(res) => (Accepted::None, res),
            ResultVal::Value(Some(v)) => (Accepted::Value(v), HANDLED),
            ResultVal::Value(None) => (Accepted::None, HANDLED),
            ResultVal::Many { items, whole } => (Accepted::Many { items, whole }, HANDLED),
        },
        2 => {
            let second = results.pop().expect("length checked");
            let first = accepted_of(results.pop().expect("length checked"));
            match second {
                ResultVal::Error(err) => (first, NOT_HANDLED.with_error(err)),
                ResultVal::Result(res) => (first, res),
                _ => (
                    Accepted::None,
                    NOT_HANDLED.with_error(DispatchError::Binding(
                        crate::error::BindingError::new(
                            "contravariant",
                            "second result must be an error or HandleResult",
                        ),
                    )),
                ),
            }
        }
        _ => (
            Accepted::None,
            NOT_HANDLED.with_error(DispatchError::Binding(crate::error::BindingError::new(
                "contravariant",
                "cannot accept more than 2 results",
            ))),
        ),
    }
}

fn accept_covariant(mut results: Vec<ResultVal>) -> (Accepted, HandleResult) {
    match results.len() {
        0 => (Accepted::None, HANDLED),
        1 => match results.pop().expect("length checked") {
            ResultVal::Value(Some(v)) => (Accepted::Value(v), HANDLED),
            ResultVal::Value(None) => (Accepted::None, NOT_HANDLED),
            ResultVal::Many { items, whole } => (Accepted::Many { items, whole }, HANDLED),
            ResultVal::Result(res) => (Accepted::None, res.and(NOT_HANDLED)),
            ResultVal::Error(err) => (Accepted::None, NOT_HANDLED.with_error(err)),
        },
        2 => {
            let second = results.pop().expect("length checked");
            let first = accepted_of(results.pop().expect("length checked"));
            let empty = matches!(first, Accepted::None);
            match second {
                ResultVal::Error(err) => (first, NOT_HANDLED.with_error(err)),
                ResultVal::Result(res) => {
                    if empty {
                        (Accepted::None, res.and(NOT_HANDLED))
                    } else {
                        (first, res)
                    }
                }
                _ => {
                    if empty {
                        (Accepted::None, NOT_HANDLED)
                    } else {
                        (first, HANDLED)
                    }
                }
            }
        }
        _ => (
            Accepted::None,
            NOT_HANDLED.with_error(DispatchError::Binding(crate::error::BindingError::new(
                "covariant",
                "cannot accept more than 2 results",
            ))),
        ),
    }
}

fn accepted_of(result: ResultVal) -> Accepted {
    match result {
        ResultVal::Value(Some(v)) => Accepted::Value(v),
        ResultVal::Many { items, whole } => Accepted::Many { items, whole },
        ResultVal::Value(None) | ResultVal::Result(_) | ResultVal::Error(_) => Accepted::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{upcast, upcasts_of, value, Payload, TypeToken};
    use std::sync::Arc;

    #[derive(Clone)]
    struct Foo;
    #[derive(Clone)]
    struct Bar;

    impl Payload for Bar {}
    impl Payload for Foo {
        fn widens() -> Vec<Upcast> {
            upcast(|_: Arc<Foo>| Bar)
        }
    }

    #[test]
    fn contravariant_widens_the_required_key() {
        let required = Key::of::<Foo>();
        let required_up = upcasts_of::<Foo>();
        let candidate = Key::of::<Bar>();
        let m = Policy::Handles
            .matches_key(&required, &required_up, &candidate, &[], false)
            .expect("Foo widens to Bar");
        assert!(!m.exact);
        assert!(m.view.is_some());
    }

    #[test]
    fn covariant_widens_the_candidate_key() {
        let required = Key::of::<Bar>();
        let candidate = Key::of::<Foo>();
        let candidate_up = upcasts_of::<Foo>();
        let m = Policy::Provides
            .matches_key(&required, &[], &candidate, &candidate_up, false)
            .expect("Foo provider satisfies Bar");
        assert!(!m.exact);
    }

    #[test]
    fn invariant_only_rejects_widened_matches() {
        let required = Key::of::<Foo>();
        let required_up = upcasts_of::<Foo>();
        let candidate = Key::of::<Bar>();
        assert!(Policy::Handles
            .matches_key(&required, &required_up, &candidate, &[], true)
            .is_none());
    }

    #[test]
    fn wildcard_candidate_matches_everything() {
        let required = Key::of::<Foo>();
        let m = Policy::Handles
            .matches_key(&required, &[], &Key::Any, &[], false)
            .expect("wildcard matches");
        assert!(!m.exact);
    }

    #[test]
    fn name_keys_match_by_equality() {
        let m = Policy::Maps.matches_key(
            &Key::name("application/json"),
            &[],
            &Key::name("application/json"),
            &[],
            false,
        );
        assert!(m.expect("equal names").exact);
        assert!(Policy::Maps
            .matches_key(
                &Key::name("application/json"),
                &[],
                &Key::name("text/plain"),
                &[],
                false,
            )
            .is_none());
    }

    #[test]
    fn contravariant_acceptance_table() {
        let (_, res) = Policy::Handles.accept_results(vec![]);
        assert!(res.handled());

        let (_, res) =
            Policy::Handles.accept_results(vec![ResultVal::Error(DispatchError::Cancelled)]);
        assert!(!res.handled() && res.is_error());

        let (accepted, res) =
            Policy::Handles.accept_results(vec![ResultVal::Value(Some(value(5u8)))]);
        assert!(res.handled());
        assert!(matches!(accepted, Accepted::Value(_)));

        let (accepted, res) = Policy::Handles.accept_results(vec![
            ResultVal::Value(Some(value(5u8))),
            ResultVal::Error(DispatchError::Cancelled),
        ]);
        assert!(!res.handled());
        assert!(matches!(accepted, Accepted::Value(_)));
    }

    #[test]
    fn covariant_nil_is_not_handled() {
        let (accepted, res) = Policy::Provides.accept_results(vec![ResultVal::Value(None)]);
        assert!(!res.handled());
        assert!(matches!(accepted, Accepted::None));
    }

    #[test]
    fn more_than_two_results_is_an_error() {
        let (_, res) = Policy::Provides.accept_results(vec![
            ResultVal::Value(Some(value(1u8))),
            ResultVal::Value(Some(value(2u8))),
            ResultVal::Value(Some(value(3u8))),
        ]);
        assert!(res.is_error());
    }

    #[test]
    fn token_identity_drives_variant_classification() {
        let (variant, unknown) = Policy::Provides.variant_key(&Key::Type(TypeToken::of::<Foo>()));
        assert!(variant && !unknown);
        let (variant, unknown) = Policy::Provides.variant_key(&Key::Any);
        assert!(variant && unknown);
        let (variant, _) = Policy::Maps.variant_key(&Key::name("json"));
        assert!(!variant);
    }
}
