use std::sync::Arc;

use usher::{
    create, execute_all, map_as, map_into, resolve_all, setup, HandlerSpec, HandlerSpecBuilder,
    Payload,
};

mod common;
use common::{Answer, Receipt, Transfer};

#[derive(Clone, Debug, PartialEq)]
struct JsonText(String);
impl Payload for JsonText {}

#[derive(Clone, Debug, PartialEq)]
struct CsvText(String);
impl Payload for CsvText {}

struct ReceiptCodec;
impl Payload for ReceiptCodec {}
impl HandlerSpec for ReceiptCodec {
    fn describe(b: &mut HandlerSpecBuilder<Self>) {
        b.no_constructor();
        b.maps(|_: &ReceiptCodec, r: &Receipt| JsonText(format!("{{\"total\":{}}}", r.total)))
            .named("application/json");
        b.maps(|_: &ReceiptCodec, r: &Receipt| CsvText(format!("total,{}", r.total)))
            .named("text/csv");
    }
}

#[test]
fn maps_select_by_target_type_and_format() {
    let root = setup().handler(ReceiptCodec).build().unwrap();

    let json = map_as::<JsonText, Receipt>(&root, Receipt { total: 12 }, "application/json")
        .unwrap()
        .now()
        .unwrap()
        .unwrap();
    assert_eq!(json.0, "{\"total\":12}");

    let csv = map_as::<CsvText, Receipt>(&root, Receipt { total: 9 }, "text/csv")
        .unwrap()
        .now()
        .unwrap()
        .unwrap();
    assert_eq!(csv.0, "total,9");
}

#[test]
fn mismatched_formats_do_not_map() {
    let root = setup().handler(ReceiptCodec).build().unwrap();
    let found = map_as::<JsonText, Receipt>(&root, Receipt { total: 1 }, "text/csv")
        .unwrap()
        .now()
        .unwrap();
    assert!(found.is_none(), "the format tag gates the json mapping");
}

#[test]
fn untagged_requests_accept_any_mapping_of_the_target_type() {
    let root = setup().handler(ReceiptCodec).build().unwrap();
    let json = map_into::<JsonText, Receipt>(&root, Receipt { total: 3 })
        .unwrap()
        .now()
        .unwrap();
    assert!(json.is_some());
}

// ============================================================================
// Creates
// ============================================================================

#[derive(Clone, Debug)]
struct Draft {
    body: String,
}
impl Payload for Draft {}

struct Drafting;
impl Payload for Drafting {}
impl HandlerSpec for Drafting {
    fn describe(b: &mut HandlerSpecBuilder<Self>) {
        b.no_constructor();
        b.creates(|_: &Drafting| Draft {
            body: "empty".into(),
        });
    }
}

#[test]
fn creates_build_fresh_instances() {
    let root = setup().handler(Drafting).build().unwrap();
    let first = create::<Draft>(&root).unwrap().now().unwrap().unwrap();
    let second = create::<Draft>(&root).unwrap().now().unwrap().unwrap();
    assert_eq!(first.body, "empty");
    assert!(
        !Arc::ptr_eq(&first, &second),
        "creation is not lifestyle-cached"
    );
}

// ============================================================================
// Collection returns
// ============================================================================

struct Pricing;
impl Payload for Pricing {}
impl HandlerSpec for Pricing {
    fn describe(b: &mut HandlerSpecBuilder<Self>) {
        b.no_constructor();
        // A collection return satisfies element requests one by one.
        b.provides(|_: &Pricing| vec![Answer(1), Answer(2), Answer(3)]);
    }
}

#[test]
fn collection_returns_splat_into_element_requests() {
    let root = setup().handler(Pricing).build().unwrap();
    let answers = resolve_all::<Answer>(&root).unwrap().now().unwrap();
    let values: Vec<u64> = answers.iter().map(|a| a.0).collect();
    assert_eq!(values, vec![1, 2, 3]);
}

#[test]
fn handlers_with_two_return_slots_propagate_both() {
    struct Audit;
    impl Payload for Audit {}
    impl HandlerSpec for Audit {
        fn describe(b: &mut HandlerSpecBuilder<Self>) {
            b.no_constructor();
            b.handles(|_: &Audit, t: &Transfer| {
                (Answer(t.amount), usher::HANDLED)
            });
        }
    }

    let root = setup().handler(Audit).build().unwrap();
    let replies = execute_all::<Transfer, Answer>(&root, Transfer { amount: 8 }).unwrap();
    assert_eq!(replies.wait().unwrap(), vec![Answer(8)]);
}
