//! Benchmarks for the write, diff and notify pipeline
//!
//! Run with: cargo bench -p arbor-core --bench notify

use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arbor_core::{ManualScheduler, Node, Runtime, Subscription};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

/// A chain of nested objects `depth` levels deep, with a listener on every
/// level.
fn deep_chain(runtime: &Runtime, depth: usize) -> (Node, Vec<Subscription>, Arc<AtomicU64>) {
    let mut value = json!(0);
    for _ in 0..depth {
        value = json!({ "next": value });
    }
    let root = runtime.create_root(value);
    let calls = Arc::new(AtomicU64::new(0));

    let mut node = root;
    let mut subs = Vec::with_capacity(depth + 1);
    for level in 0..=depth {
        let calls = calls.clone();
        subs.push(node.on_change(move |_| {
            calls.fetch_add(1, Ordering::Relaxed);
        }));
        if level < depth {
            node = node.child("next");
        }
    }
    (node, subs, calls)
}

fn todo_list(len: usize) -> serde_json::Value {
    let items: Vec<_> = (0..len).map(|id| json!({"id": id, "done": false})).collect();
    json!(items)
}

fn bench_deep_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("notify/deep_write");

    for depth in [4, 16, 64] {
        let runtime = Runtime::new(ManualScheduler::new());
        let (leaf, _subs, calls) = deep_chain(&runtime, depth);
        let mut n = 0u64;
        group.throughput(Throughput::Elements(depth as u64 + 1));
        group.bench_with_input(BenchmarkId::new("set_leaf", depth), &(), |b, _| {
            b.iter(|| {
                n += 1;
                leaf.set(n).ok();
            })
        });
        black_box(calls.load(Ordering::Relaxed));
    }

    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("notify/batch");

    for writes in [10, 100] {
        let runtime = Runtime::new(ManualScheduler::new());
        let state = runtime.create_root(json!({}));
        let _sub = state.on_change(|event| {
            black_box(event.changes().len());
        });
        let keys: Vec<String> = (0..writes).map(|i| format!("k{i}")).collect();
        let mut n = 0u64;
        group.throughput(Throughput::Elements(writes as u64));
        group.bench_with_input(BenchmarkId::new("set_keys", writes), &(), |b, _| {
            b.iter(|| {
                n += 1;
                runtime.batch(|| {
                    for key in &keys {
                        state.set_key(key.as_str(), n).ok();
                    }
                });
            })
        });
    }

    group.finish();
}

fn bench_array_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("notify/array_reconcile");

    for len in [100, 1000] {
        let runtime = Runtime::new(ManualScheduler::new());
        let list = runtime.create_root(todo_list(len));
        // Nodes for every element so moves have something to re-key
        let elements: Vec<_> = (0..len).map(|i| list.index(i)).collect();
        let _sub = list.on_change(|event| {
            black_box(event.changes().len());
        });

        let forward = todo_list(len);
        let mut reversed = forward.clone();
        if let Some(items) = reversed.as_array_mut() {
            items.reverse();
        }

        let mut flip = false;
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("reverse", len), &(), |b, _| {
            b.iter(|| {
                flip = !flip;
                let next = if flip { &reversed } else { &forward };
                list.set(next.clone()).ok();
            })
        });
        black_box(elements.len());
    }

    group.finish();
}

criterion_group!(benches, bench_deep_write, bench_batch, bench_array_reconcile);
criterion_main!(benches);
