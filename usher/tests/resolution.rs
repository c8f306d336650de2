use std::sync::Arc;

use usher::testing::CallProbe;
use usher::{
    resolve, resolve_all, setup, HandlerSpec, HandlerSpecBuilder, Payload, Reply,
};

mod common;
use common::{Garage, Motor};

#[test]
fn singleton_provider_constructs_once() {
    let built = CallProbe::new();
    let root = setup()
        .handler(Garage {
            built: Arc::clone(&built),
        })
        .build()
        .unwrap();

    let first = resolve::<Motor>(&root).unwrap().now().unwrap().unwrap();
    let second = resolve::<Motor>(&root).unwrap().now().unwrap().unwrap();
    let third = resolve::<Motor>(&root).unwrap().now().unwrap().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&second, &third));
    assert_eq!(built.hits(), 1);
    assert_eq!(first.serial, 1);
}

#[test]
fn missing_providers_resolve_to_none() {
    let root = setup().build().unwrap();
    let reply = resolve::<Motor>(&root).unwrap();
    assert!(matches!(reply, Reply::Now(None)));
}

#[test]
fn handler_instances_satisfy_their_own_type() {
    let built = CallProbe::new();
    let root = setup()
        .handler(Garage {
            built: Arc::clone(&built),
        })
        .build()
        .unwrap();

    let garage = resolve::<Garage>(&root).unwrap().now().unwrap();
    assert!(garage.is_some(), "the registered instance itself resolves");
    assert_eq!(built.hits(), 0, "self-provision does not run providers");
}

#[test]
fn resolve_all_collects_every_provider() {
    struct FleetA;
    impl Payload for FleetA {}
    impl HandlerSpec for FleetA {
        fn describe(b: &mut HandlerSpecBuilder<Self>) {
            b.no_constructor();
            b.provides(|_: &FleetA| Motor { serial: 1 });
        }
    }
    struct FleetB;
    impl Payload for FleetB {}
    impl HandlerSpec for FleetB {
        fn describe(b: &mut HandlerSpecBuilder<Self>) {
            b.no_constructor();
            b.provides(|_: &FleetB| Motor { serial: 2 });
        }
    }

    let root = setup().handler(FleetA).handler(FleetB).build().unwrap();
    let motors = resolve_all::<Motor>(&root).unwrap().now().unwrap();
    let serials: Vec<u64> = motors.iter().map(|m| m.serial).collect();
    assert_eq!(serials, vec![1, 2]);
}

// ============================================================================
// Cycle detection
// ============================================================================

#[derive(Clone)]
struct Alpha;
impl Payload for Alpha {}

#[derive(Clone)]
struct Beta;
impl Payload for Beta {}

// Alpha needs Beta, Beta needs Alpha: the dispatch guard must break the
// cycle instead of recursing.
struct Tangle;
impl Payload for Tangle {}
impl HandlerSpec for Tangle {
    fn describe(b: &mut HandlerSpecBuilder<Self>) {
        b.no_constructor();
        b.provides(|_: &Tangle, _beta: Arc<Beta>| Alpha);
        b.provides(|_: &Tangle, _alpha: Arc<Alpha>| Beta);
    }
}

// Supplies Beta outright, breaking the dependency knot.
struct BetaSource;
impl Payload for BetaSource {}
impl HandlerSpec for BetaSource {
    fn describe(b: &mut HandlerSpecBuilder<Self>) {
        b.no_constructor();
        b.provides(|_: &BetaSource| Beta);
    }
}

#[test]
fn dependency_cycles_resolve_to_none() {
    let root = setup().handler(Tangle).build().unwrap();
    let reply = resolve::<Alpha>(&root).unwrap();
    assert!(matches!(reply, Reply::Now(None)));

    // The graph stays usable: the same resolution fails identically
    // rather than corrupting guard state.
    let reply = resolve::<Alpha>(&root).unwrap();
    assert!(matches!(reply, Reply::Now(None)));
}

#[test]
fn cycles_break_when_a_dependency_is_supplied() {
    let root = setup().handler(BetaSource).handler(Tangle).build().unwrap();
    let alpha = resolve::<Alpha>(&root).unwrap().now().unwrap();
    assert!(alpha.is_some());
}
