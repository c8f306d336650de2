use std::sync::Arc;

use usher::testing::CallProbe;
use usher::{coerce_cloned, command, setup, NoBatch, Promise, Value};

mod common;
use common::{Ledger, RouteBatcher, Routed, Transfer};

#[test]
fn batched_messages_flush_in_one_grouped_call() {
    let root = setup().build().unwrap();

    let mut handed_out: Vec<Promise<Value>> = Vec::new();
    let completed = root.batch(|scope| {
        let batcher = scope
            .batch_for::<RouteBatcher>(None)
            .expect("batch scope is open");
        for i in 1..=3 {
            command(
                scope,
                Routed {
                    message: format!("m{i}"),
                    route: "http://h".into(),
                },
            )
            .unwrap();
        }
        handed_out = batcher.handed_out.lock().unwrap().clone();
        // Nothing settles until the scope completes.
        assert!(handed_out.iter().all(|p| !p.is_settled()));
    });

    let flushed = completed.wait().unwrap();
    assert_eq!(flushed.len(), 1, "one collector flushed");
    assert_eq!(*flushed[0].downcast_ref::<usize>().unwrap(), 3);

    assert_eq!(handed_out.len(), 3);
    let settled: Vec<String> = handed_out
        .iter()
        .map(|p| coerce_cloned::<String>(&p.clone().wait().unwrap()).unwrap())
        .collect();
    // Every deferred promise observed the same single grouped send, in
    // insertion order.
    assert_eq!(
        settled,
        vec![
            "http://h@m1+m2+m3",
            "http://h@m1+m2+m3",
            "http://h@m1+m2+m3",
        ]
    );
}

#[test]
fn completed_scopes_stop_intercepting() {
    let booked = CallProbe::new();
    let root = setup()
        .handler(Ledger {
            booked: Arc::clone(&booked),
        })
        .build()
        .unwrap();

    root.batch(|scope| {
        // No collector registered: the transfer falls through to the
        // wrapped composition.
        command(scope, Transfer { amount: 5 }).unwrap();
    })
    .wait()
    .unwrap();
    assert_eq!(booked.hits(), 1);
}

#[test]
fn no_batch_exempts_nested_callbacks() {
    let root = setup().build().unwrap();
    let scope = Arc::new(usher::BatchHandler::new(
        root.handler(),
        root.factory(),
        Vec::new(),
    ));
    let batcher = scope.batch_for::<RouteBatcher>(None).unwrap();

    // Dispatched directly, routed messages reach the collector.
    command(
        &*scope,
        Routed {
            message: "queued".into(),
            route: "r".into(),
        },
    )
    .unwrap();
    assert_eq!(batcher.handed_out.lock().unwrap().len(), 1);

    // Through a no-batch wrapper the collector is bypassed, and with no
    // other handler for Routed the command is unhandled.
    let exempt = NoBatch::new(scope.clone() as Arc<dyn usher::Handler>);
    let err = command(
        &exempt,
        Routed {
            message: "direct".into(),
            route: "r".into(),
        },
    )
    .unwrap_err();
    assert!(matches!(err, usher::DispatchError::NotHandled));
    assert_eq!(batcher.handed_out.lock().unwrap().len(), 1);

    scope.complete().wait().unwrap();
}
