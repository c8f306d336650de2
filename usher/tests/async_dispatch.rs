use std::time::Duration;

use usher::{execute, setup, HandlerSpec, HandlerSpecBuilder, Payload, Promise, Reply};

mod common;
use common::{Answer, Transfer};

// Settles off-thread so the caller genuinely awaits.
struct SlowCalc;
impl Payload for SlowCalc {}
impl HandlerSpec for SlowCalc {
    fn describe(b: &mut HandlerSpecBuilder<Self>) {
        b.no_constructor();
        b.handles(|_: &SlowCalc, t: &Transfer| {
            let amount = t.amount;
            Promise::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                Ok(Answer(amount + 1))
            })
        });
    }
}

#[tokio::test]
async fn promised_replies_await_as_futures() {
    let root = setup().handler(SlowCalc).build().unwrap();
    let reply = execute::<Transfer, Answer>(&root, Transfer { amount: 41 }).unwrap();
    match reply {
        Reply::Soon(promise) => {
            let answer = promise.await.unwrap();
            assert_eq!(answer, Some(Answer(42)));
        }
        Reply::Now(_) => panic!("expected an asynchronous reply"),
    }
}

#[tokio::test]
async fn concurrent_dispatch_is_safe() {
    let root = std::sync::Arc::new(setup().handler(SlowCalc).build().unwrap());
    let mut joins = Vec::new();
    for i in 0..8u64 {
        let root = std::sync::Arc::clone(&root);
        joins.push(tokio::task::spawn_blocking(move || {
            let reply = execute::<Transfer, Answer>(&*root, Transfer { amount: i }).unwrap();
            reply.wait().unwrap().unwrap()
        }));
    }
    for (i, join) in joins.into_iter().enumerate() {
        assert_eq!(join.await.unwrap(), Answer(i as u64 + 1));
    }
}
