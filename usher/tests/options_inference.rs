use std::sync::Arc;

use usher::{
    command, execute, get_options, resolve, setup, FromOptions, HandlerSpec, HandlerSpecBuilder,
    Opt, Options, Payload, Reply,
};

mod common;
use common::{Answer, Motor, Transfer};

#[derive(Clone, Default, Debug, PartialEq)]
struct RetryOptions {
    attempts: Opt<u32>,
    backends: Vec<String>,
}

impl Options for RetryOptions {
    fn merge_from(&mut self, other: &Self) -> bool {
        let mut changed = self.attempts.merge(&other.attempts);
        if !other.backends.is_empty() {
            self.backends.extend(other.backends.iter().cloned());
            changed = true;
        }
        changed
    }
}

#[test]
fn options_union_across_the_chain() {
    // Disjoint fields: the union is visible.
    let root = setup()
        .options(RetryOptions {
            attempts: Opt::of(3),
            backends: Vec::new(),
        })
        .options(RetryOptions {
            attempts: Opt::default(),
            backends: vec!["primary".into()],
        })
        .build()
        .unwrap();

    let merged = get_options::<RetryOptions>(&root).unwrap();
    assert_eq!(merged.attempts.or(0), 3);
    assert_eq!(merged.backends, vec!["primary".to_string()]);
}

#[test]
fn overlapping_options_first_installed_wins_and_slices_append() {
    let root = setup()
        .options(RetryOptions {
            attempts: Opt::of(2),
            backends: vec!["a".into()],
        })
        .options(RetryOptions {
            attempts: Opt::of(9),
            backends: vec!["b".into()],
        })
        .build()
        .unwrap();

    let merged = get_options::<RetryOptions>(&root).unwrap();
    assert_eq!(merged.attempts.or(0), 2, "first-installed scalar wins");
    assert_eq!(
        merged.backends,
        vec!["a".to_string(), "b".to_string()],
        "slices concatenate"
    );
}

#[test]
fn bindings_receive_merged_options() {
    struct Retrier;
    impl Payload for Retrier {}
    impl HandlerSpec for Retrier {
        fn describe(b: &mut HandlerSpecBuilder<Self>) {
            b.no_constructor();
            b.handles(
                |_: &Retrier, _: &Transfer, opts: FromOptions<RetryOptions>| {
                    Answer(u64::from(opts.0.attempts.or(1)))
                },
            );
        }
    }

    let root = setup()
        .handler(Retrier)
        .options(RetryOptions {
            attempts: Opt::of(5),
            backends: Vec::new(),
        })
        .build()
        .unwrap();

    let reply = execute::<Transfer, Answer>(&root, Transfer { amount: 1 }).unwrap();
    assert_eq!(reply.wait().unwrap().unwrap(), Answer(5));
}

#[test]
fn missing_options_fail_the_dependency() {
    struct Retrier;
    impl Payload for Retrier {}
    impl HandlerSpec for Retrier {
        fn describe(b: &mut HandlerSpecBuilder<Self>) {
            b.no_constructor();
            b.handles(
                |_: &Retrier, _: &Transfer, opts: FromOptions<RetryOptions>| {
                    Answer(u64::from(opts.0.attempts.or(1)))
                },
            );
        }
    }

    let root = setup().handler(Retrier).build().unwrap();
    assert!(command(&root, Transfer { amount: 1 }).is_err());
}

// ============================================================================
// Inference
// ============================================================================

#[derive(Default)]
struct InferredGarage;
impl Payload for InferredGarage {}
impl HandlerSpec for InferredGarage {
    fn construct() -> Option<Self> {
        Some(Self)
    }

    fn describe(b: &mut HandlerSpecBuilder<Self>) {
        b.provides(|_: &InferredGarage| Motor { serial: 40 });
        b.handles(|_: &InferredGarage, t: &Transfer| Answer(t.amount * 2));
    }
}

#[test]
fn inference_materializes_handlers_from_types() {
    // No instances registered; only the type.
    let root = setup().spec::<InferredGarage>().build().unwrap();

    let motor = resolve::<Motor>(&root).unwrap().now().unwrap().unwrap();
    assert_eq!(motor.serial, 40);

    let reply = execute::<Transfer, Answer>(&root, Transfer { amount: 6 }).unwrap();
    assert_eq!(reply.wait().unwrap().unwrap(), Answer(12));
}

#[test]
fn inferred_instances_reuse_the_implicit_singleton() {
    let root = setup().spec::<InferredGarage>().build().unwrap();

    let first = resolve::<InferredGarage>(&root).unwrap().now().unwrap().unwrap();
    let second = resolve::<InferredGarage>(&root)
        .unwrap()
        .now()
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn suppressed_specs_are_skipped() {
    struct Hidden;
    impl Payload for Hidden {}
    impl HandlerSpec for Hidden {
        fn suppressed() -> bool {
            true
        }

        fn describe(b: &mut HandlerSpecBuilder<Self>) {
            b.no_constructor();
            b.provides(|_: &Hidden| Motor { serial: 99 });
        }
    }

    let root = setup().spec::<Hidden>().build().unwrap();
    let reply = resolve::<Motor>(&root).unwrap();
    assert!(matches!(reply, Reply::Now(None)));
}
