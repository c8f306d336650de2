use std::sync::{Arc, Mutex};

use usher::testing::CallProbe;
use usher::{
    command, execute, publish, setup, DispatchError, HandlerSpec, HandlerSpecBuilder, Reply,
};

mod common;
use common::{Auditor, Ledger, Receipt, Transfer, Wire};

#[test]
fn handles_an_exact_message() {
    let booked = CallProbe::new();
    let root = setup()
        .handler(Ledger {
            booked: Arc::clone(&booked),
        })
        .build()
        .unwrap();

    command(&root, Transfer { amount: 10 }).unwrap();
    assert_eq!(booked.hits(), 1);
}

#[test]
fn handles_a_widened_message() {
    // A handler of Transfer accepts a Wire, which widens to it.
    let booked = CallProbe::new();
    let root = setup()
        .handler(Ledger {
            booked: Arc::clone(&booked),
        })
        .build()
        .unwrap();

    let reply = execute::<Wire, Receipt>(&root, Wire { amount: 25 }).unwrap();
    match reply {
        Reply::Now(Some(receipt)) => assert_eq!(receipt, Receipt { total: 25 }),
        other => panic!("expected a synchronous receipt, got async={}", other.is_async()),
    }
    assert_eq!(booked.hits(), 1);
}

#[test]
fn unmatched_messages_are_not_handled() {
    let root = setup().build().unwrap();
    let err = command(&root, Transfer { amount: 1 }).unwrap_err();
    assert!(matches!(err, DispatchError::NotHandled));
}

#[test]
fn first_match_stops_without_greedy() {
    let booked = CallProbe::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let root = setup()
        .handler(Ledger {
            booked: Arc::clone(&booked),
        })
        .handler(Auditor {
            seen: Arc::clone(&seen),
        })
        .build()
        .unwrap();

    command(&root, Transfer { amount: 3 }).unwrap();
    assert_eq!(booked.hits(), 1);
    assert!(seen.lock().unwrap().is_empty(), "second handler must not run");
}

#[test]
fn publish_reaches_every_handler() {
    let booked = CallProbe::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let root = setup()
        .handler(Ledger {
            booked: Arc::clone(&booked),
        })
        .handler(Auditor {
            seen: Arc::clone(&seen),
        })
        .build()
        .unwrap();

    publish(&root, Transfer { amount: 7 }).unwrap();
    assert_eq!(booked.hits(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![7]);
}

#[test]
fn publish_tolerates_nobody_listening() {
    let root = setup().build().unwrap();
    assert!(publish(&root, Transfer { amount: 1 }).is_ok());
}

#[test]
fn domain_errors_surface_to_the_caller() {
    struct Rejecting;
    impl usher::Payload for Rejecting {}
    impl HandlerSpec for Rejecting {
        fn describe(b: &mut HandlerSpecBuilder<Self>) {
            b.no_constructor();
            b.handles(|_: &Rejecting, _: &Transfer| -> Result<Receipt, std::io::Error> {
                Err(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "insufficient funds",
                ))
            });
        }
    }

    let root = setup().handler(Rejecting).build().unwrap();
    let err = command(&root, Transfer { amount: 10 }).unwrap_err();
    assert!(err.to_string().contains("insufficient funds"));
}

#[test]
fn more_specific_bindings_win() {
    // One handler with bindings for both Wire and Transfer: the Wire
    // binding is more specific and must be consulted first.
    let order = Arc::new(Mutex::new(Vec::new()));

    struct Tiered {
        order: Arc<Mutex<Vec<&'static str>>>,
    }
    impl usher::Payload for Tiered {}
    impl HandlerSpec for Tiered {
        fn describe(b: &mut HandlerSpecBuilder<Self>) {
            b.no_constructor();
            b.handles(|h: &Tiered, _: &Transfer| {
                h.order.lock().unwrap().push("transfer");
            });
            b.handles(|h: &Tiered, _: &Wire| {
                h.order.lock().unwrap().push("wire");
            });
        }
    }

    let root = setup()
        .handler(Tiered {
            order: Arc::clone(&order),
        })
        .build()
        .unwrap();

    command(&root, Wire { amount: 2 }).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["wire"]);
}
