#![cfg(loom)]
//! Loom model-checked tests for the Detach-TLS enqueue/dequeue protocol
//! (spec.md §8's adversarial-scheduling invariants: no loss, no
//! duplication). Grounded in `examples/other_examples/...debasishg-
//! ringmpsc-rs...`'s `loom = "0.7"` dev-dependency and the
//! `#[cfg(loom)] mod tests { loom::model(...) }` shape of
//! `examples/seanchatmangpt-knhk/tests/hot_path/loom_descriptor_swap.rs`.
//!
//! Only the Detach-TLS engine is exercised here: it is built entirely on
//! the `list`/`node` atomics that `atomics.rs` routes through `loom`'s
//! model-checked types under this cfg (spec.md §9's transient-`next=null`
//! window is exactly the kind of interleaving loom is good at finding).
//! The LL-RCU engine additionally depends on `crossbeam-epoch`'s own
//! internal atomics, which are not loom-instrumented, so model-checking it
//! here would silently skip interleavings inside the gate rather than
//! exhaustively cover them; its protocol-level unit tests in `rcu.rs`
//! cover that engine under real concurrent execution instead.
//!
//! Run with:
//! `RUSTFLAGS="--cfg loom" cargo test --release --features loom --test loom_basic`

use scalable_queue::DetachQueue;
use std::sync::Arc;

#[test]
fn two_producers_each_value_delivered_exactly_once() {
    loom::model(|| {
        let q = Arc::new(DetachQueue::<u64>::init().unwrap());

        let producers: Vec<_> = (0..2u64)
            .map(|p| {
                let q = Arc::clone(&q);
                loom::thread::spawn(move || {
                    q.enqueue(p).unwrap();
                })
            })
            .collect();
        for h in producers {
            h.join().unwrap();
        }

        let mut got = Vec::new();
        while let Some(v) = q.dequeue() {
            got.push(v);
        }
        got.sort_unstable();
        assert_eq!(got, vec![0, 1]);
    });
}

#[test]
fn two_consumers_race_without_duplication_or_loss() {
    loom::model(|| {
        let q = Arc::new(DetachQueue::<u64>::init().unwrap());
        q.enqueue(0).unwrap();
        q.enqueue(1).unwrap();

        let qa = Arc::clone(&q);
        let qb = Arc::clone(&q);
        let ha = loom::thread::spawn(move || {
            let mut got = Vec::new();
            while let Some(v) = qa.dequeue() {
                got.push(v);
            }
            got
        });
        let hb = loom::thread::spawn(move || {
            let mut got = Vec::new();
            while let Some(v) = qb.dequeue() {
                got.push(v);
            }
            got
        });

        let mut all = ha.join().unwrap();
        all.extend(hb.join().unwrap());
        all.sort_unstable();
        assert_eq!(all, vec![0, 1]);
    });
}

#[test]
fn producer_and_consumer_race_on_a_single_value() {
    loom::model(|| {
        let q = Arc::new(DetachQueue::<u64>::init().unwrap());
        let qp = Arc::clone(&q);
        let producer = loom::thread::spawn(move || {
            qp.enqueue(42).unwrap();
        });

        let mut seen = None;
        while seen.is_none() {
            seen = q.dequeue();
        }
        producer.join().unwrap();
        assert_eq!(seen, Some(42));
        assert_eq!(q.dequeue(), None);
    });
}
