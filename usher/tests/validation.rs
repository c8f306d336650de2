use std::sync::Arc;

use usher::{
    resolve, setup, validate, HandlerSpec, HandlerSpecBuilder, Named, Payload, ProvidesBuilder,
    Callback, Handler, Key,
};

mod common;
use common::{Motor, Transfer};

#[derive(Debug)]
struct Complaint(&'static str);

impl std::fmt::Display for Complaint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for Complaint {}

struct TransferRules;
impl Payload for TransferRules {}
impl HandlerSpec for TransferRules {
    fn describe(b: &mut HandlerSpecBuilder<Self>) {
        b.no_constructor();
        b.validates(|_: &TransferRules, t: &Transfer| -> Result<(), Complaint> {
            if t.amount == 0 {
                Err(Complaint("amount must be positive"))
            } else {
                Ok(())
            }
        });
    }
}

#[test]
fn valid_targets_pass_every_validator() {
    let root = setup().handler(TransferRules).build().unwrap();
    let outcome = validate(&root, Transfer { amount: 10 }).unwrap();
    assert!(outcome.valid());
}

#[test]
fn failures_collect_into_the_outcome() {
    let root = setup().handler(TransferRules).build().unwrap();
    let outcome = validate(&root, Transfer { amount: 0 }).unwrap();
    assert!(!outcome.valid());
    assert!(outcome.failures()[0]
        .to_string()
        .contains("amount must be positive"));
}

// ============================================================================
// Named constraints on providers
// ============================================================================

struct TwoGarages;
impl Payload for TwoGarages {}
impl HandlerSpec for TwoGarages {
    fn describe(b: &mut HandlerSpecBuilder<Self>) {
        b.no_constructor();
        b.provides(|_: &TwoGarages| Motor { serial: 1 }).named("spare");
        b.provides(|_: &TwoGarages| Motor { serial: 2 }).named("main");
    }
}

#[test]
fn named_constraints_select_among_providers() {
    let root = setup().handler(TwoGarages).build().unwrap();

    let mut wanted = ProvidesBuilder::new(Key::of::<Motor>())
        .constraint(Arc::new(Named::new("main")))
        .build();
    let result = root.handle(&mut wanted, false, None);
    assert!(result.handled());
    let motor = wanted
        .base()
        .first_result()
        .and_then(usher::coerce::<Motor>)
        .unwrap();
    assert_eq!(motor.serial, 2);
}

#[test]
fn unconstrained_requests_take_the_first_provider() {
    let root = setup().handler(TwoGarages).build().unwrap();
    let motor = resolve::<Motor>(&root).unwrap().now().unwrap().unwrap();
    assert_eq!(motor.serial, 1);
}
