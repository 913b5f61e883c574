//! Integration Tests for the Reactive Engine
//!
//! These tests verify that nodes, batches, computed nodes and effects work
//! together through the public API.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arbor_core::reactive::{Resolver, TrackingMode};
use arbor_core::{
    ActivationState, ComputedOptions, Deferred, EngineConfig, FlushMode, Key, LinkedOptions,
    ManualScheduler, PathType, RetryPolicy, Runtime, SubscribeOptions, Value,
};
use parking_lot::Mutex;
use serde_json::json;

fn runtime() -> (Runtime, Arc<ManualScheduler>) {
    let scheduler = ManualScheduler::new();
    (Runtime::new(scheduler.clone()), scheduler)
}

fn counter() -> (Arc<AtomicI32>, impl Fn(&arbor_core::ChangeEvent) + Send + Sync + 'static) {
    let call_count = Arc::new(AtomicI32::new(0));
    let call_count_clone = call_count.clone();
    (call_count, move |_: &arbor_core::ChangeEvent| {
        call_count_clone.fetch_add(1, Ordering::SeqCst);
    })
}

/// Writing a deep-equal value is a no-op, except for arrays, which always
/// notify once.
#[test]
fn idempotent_writes_do_not_notify() {
    let (rt, _) = runtime();
    let state = rt.create_root(json!({"a": {"b": 1}, "list": [1, 2], "n": 1.5}));
    let (call_count, listener) = counter();
    let _sub = state.on_change(listener);

    state.child("a").set(json!({"b": 1})).unwrap();
    state.child("n").set(1.5).unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 0);

    state.child("n").set(f64::NAN).unwrap();
    state.child("n").set(f64::NAN).unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 1);

    state.child("list").set(json!([1, 2])).unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 2);
}

/// Two writes in one batch fire a shared ancestor listener once.
#[test]
fn batch_coalesces_notifications() {
    let (rt, _) = runtime();
    let state = rt.create_root(json!({"a": 1, "b": 1}));
    let events = Arc::new(Mutex::new(Vec::new()));

    let events_clone = events.clone();
    let _sub = state.on_change(move |event| events_clone.lock().push(event.changes().to_vec()));

    rt.batch(|| {
        state.set_key("a", 2).unwrap();
        state.set_key("b", 2).unwrap();
    });

    let events = events.lock();
    assert_eq!(events.len(), 1);
    let paths: Vec<_> = events[0].iter().map(|c| c.path.clone()).collect();
    assert_eq!(paths, vec![vec![Key::from("a")], vec![Key::from("b")]]);
}

/// A node attached to an array element follows the element's identity when
/// the array is reordered.
#[test]
fn node_identity_survives_array_moves() {
    let (rt, _) = runtime();
    let state = rt.create_root(json!({"items": [{"id": 1}, {"id": 2}, {"id": 3}]}));
    let items = state.child("items");
    let second = items.index(1);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    let _sub = second.on_change(move |event| seen_clone.lock().push(event.value().clone()));

    items
        .set(json!([{"id": 1}, {"id": 3}, {"id": 2}]))
        .unwrap();

    assert_eq!(second.get(), Value::from(json!({"id": 2})));
    assert_eq!(second.key(), Some(Key::Index(2)));
    // The element itself did not change
    assert!(seen.lock().is_empty());

    items
        .set(json!([{"id": 1}, {"id": 3}, {"id": 2, "done": true}]))
        .unwrap();
    assert_eq!(*seen.lock(), vec![Value::from(json!({"id": 2, "done": true}))]);
}

/// A node displaced by a moved element is detached and reads as undefined.
#[test]
fn displaced_nodes_are_detached() {
    let (rt, _) = runtime();
    let list = rt.create_root(json!([{"id": 1}, {"id": 2}]));
    let first = list.index(0);
    let second = list.index(1);

    list.set(json!([{"id": 2}])).unwrap();

    assert_eq!(second.get(), Value::from(json!({"id": 2})));
    assert_eq!(second.key(), Some(Key::Index(0)));
    assert!(first.get().is_undefined());
    assert!(first.parent().is_none());
}

/// Shallow listeners ignore leaf changes but see key additions and removals.
#[test]
fn shallow_listeners_only_see_key_changes() {
    let (rt, _) = runtime();
    let state = rt.create_root(json!({"user": {"name": "ada"}}));
    let user = state.child("user");
    let (call_count, listener) = counter();
    let _sub = user.subscribe(listener, SubscribeOptions::shallow());

    user.set_key("name", "grace").unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 0);

    user.set_key("age", 36).unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 1);

    user.remove_key("age").unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 2);

    // Replacing the node's own value counts too
    user.set(7).unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 3);
}

/// Optimized listeners only fire for length, key-set or order changes.
#[test]
fn optimized_listeners_need_structural_changes() {
    let (rt, _) = runtime();
    let list = rt.create_root(json!([{"id": "a", "n": 1}, {"id": "b", "n": 1}]));
    let (call_count, listener) = counter();
    let _sub = list.subscribe(listener, SubscribeOptions::optimized());

    list.index(0).set_key("n", 2).unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 0);

    list.index(2).set(json!({"id": "c"})).unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 1);

    list.set(json!([{"id": "b", "n": 1}, {"id": "a", "n": 2}, {"id": "c"}]))
        .unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 2);
}

/// A leaf write reaches every ancestor with the suffix of its path, deepest
/// listener first.
#[test]
fn deep_paths_propagate_to_every_ancestor() {
    let (rt, _) = runtime();
    let state = rt.create_root(json!({"a": {"b": {"c": 1}}}));
    let a = state.child("a");
    let b = a.child("b");
    let c = b.child("c");
    let log = Arc::new(Mutex::new(Vec::new()));

    let subs: Vec<_> = [("root", &state), ("a", &a), ("b", &b), ("c", &c)]
        .into_iter()
        .map(|(name, node)| {
            let log = log.clone();
            node.on_change(move |event| {
                log.lock().push((name, event.changes()[0].path.clone()));
            })
        })
        .collect();

    c.set(2).unwrap();

    let k = |keys: &[&str]| keys.iter().map(|k| Key::from(*k)).collect::<Vec<_>>();
    assert_eq!(
        *log.lock(),
        vec![
            ("c", k(&[])),
            ("b", k(&["c"])),
            ("a", k(&["b", "c"])),
            ("root", k(&["a", "b", "c"])),
        ]
    );
    drop(subs);
}

/// Records from separate writes in one batch still reach deeper listeners
/// first.
#[test]
fn batched_writes_notify_deepest_listener_first() {
    let (rt, _) = runtime();
    let state = rt.create_root(json!({"a": 1, "b": {"c": 1}}));
    let c = state.child("b").child("c");
    let log = Arc::new(Mutex::new(Vec::new()));

    let subs: Vec<_> = [("root", &state), ("c", &c)]
        .into_iter()
        .map(|(name, node)| {
            let log = log.clone();
            node.on_change(move |_| log.lock().push(name))
        })
        .collect();

    rt.batch(|| {
        state.set_key("a", 2).unwrap();
        c.set(2).unwrap();
    });

    assert_eq!(*log.lock(), vec!["c", "root"]);
    drop(subs);
}

fn map_of(entries: &[(&str, i32)]) -> Value {
    Value::Map(
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), Value::from(*value)))
            .collect(),
    )
}

/// Map roots address entries like objects but report `Map` path types.
#[test]
fn map_roots_report_map_path_types() {
    let (rt, _) = runtime();
    let scores = rt.create_root(map_of(&[("ada", 1)]));
    let types = Arc::new(Mutex::new(Vec::new()));

    let types_clone = types.clone();
    let _sub = scores.on_change(move |event| {
        types_clone.lock().push(event.changes()[0].path_types.clone());
    });

    scores.child("ada").set(2).unwrap();
    assert_eq!(*types.lock(), vec![vec![PathType::Map]]);
    assert_eq!(scores.get(), map_of(&[("ada", 2)]));
}

/// Shallow listeners on a map see entries come and go but not entry updates.
#[test]
fn shallow_map_listeners_see_entry_changes() {
    let (rt, _) = runtime();
    let scores = rt.create_root(map_of(&[("ada", 1)]));
    let (call_count, listener) = counter();
    let _sub = scores.subscribe(listener, SubscribeOptions::shallow());

    scores.set_key("ada", 2).unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 0);

    scores.set_key("grace", 1).unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 1);

    scores.remove_key("ada").unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 2);
    assert_eq!(scores.get(), map_of(&[("grace", 1)]));
}

/// Sets compare by membership, and replacing one with different members is a
/// structural change.
#[test]
fn set_replacement_reaches_optimized_listeners() {
    let (rt, _) = runtime();
    let state = rt.create_root(json!({"tags": null}));
    let tags = state.child("tags");
    tags.set(Value::Set(vec!["a".into(), "b".into()])).unwrap();

    let (call_count, listener) = counter();
    let _sub = tags.subscribe(listener, SubscribeOptions::optimized());

    tags.set(Value::Set(vec!["b".into(), "a".into()])).unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 0);

    tags.set(Value::Set(vec!["a".into(), "c".into()])).unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 1);
}

/// A replaced subtree notifies listeners on existing descendants whose slice
/// changed.
#[test]
fn replacing_a_subtree_reaches_descendant_listeners() {
    let (rt, _) = runtime();
    let state = rt.create_root(json!({"user": {"name": "ada", "age": 36}}));
    let name = state.child("user").child("name");
    let age = state.child("user").child("age");
    let (name_calls, name_listener) = counter();
    let (age_calls, age_listener) = counter();
    let _name_sub = name.on_change(name_listener);
    let _age_sub = age.on_change(age_listener);

    state.set(json!({"user": {"name": "grace", "age": 36}})).unwrap();
    assert_eq!(name_calls.load(Ordering::SeqCst), 1);
    assert_eq!(age_calls.load(Ordering::SeqCst), 0);

    state.set(json!({"user": 5})).unwrap();
    assert_eq!(name_calls.load(Ordering::SeqCst), 2);
    assert_eq!(age_calls.load(Ordering::SeqCst), 1);
}

/// A computed node runs only when first read, then once per dependency
/// change.
#[test]
fn computed_nodes_are_lazy() {
    let (rt, _) = runtime();
    let count = rt.create_root(1);
    let run_count = Arc::new(AtomicI32::new(0));

    let count_clone = count.clone();
    let run_count_clone = run_count.clone();
    let doubled = rt.computed(move || {
        run_count_clone.fetch_add(1, Ordering::SeqCst);
        count_clone.get().as_f64().unwrap_or(0.0) * 2.0
    });

    count.set(2).unwrap();
    assert_eq!(run_count.load(Ordering::SeqCst), 0);

    assert_eq!(doubled.get(), Value::from(4));
    assert_eq!(run_count.load(Ordering::SeqCst), 1);

    count.set(3).unwrap();
    assert_eq!(run_count.load(Ordering::SeqCst), 2);

    rt.batch(|| {
        count.set(4).unwrap();
        count.set(5).unwrap();
    });
    assert_eq!(run_count.load(Ordering::SeqCst), 3);
    assert_eq!(doubled.get(), Value::from(10));
}

/// Subscribing activates a computed node.
#[test]
fn first_listener_activates_computed_nodes() {
    let (rt, _) = runtime();
    let run_count = Arc::new(AtomicI32::new(0));

    let run_count_clone = run_count.clone();
    let computed = rt.computed(move || {
        run_count_clone.fetch_add(1, Ordering::SeqCst);
        "ready"
    });

    let _sub = computed.on_change(|_| {});
    assert_eq!(run_count.load(Ordering::SeqCst), 1);
    assert_eq!(computed.peek(), Value::from("ready"));
}

/// Listeners on a computed node see its value change when a dependency does.
#[test]
fn computed_changes_reach_listeners() {
    let (rt, _) = runtime();
    let count = rt.create_root(1);

    let count_clone = count.clone();
    let doubled = rt.computed(move || count_clone.get().as_f64().unwrap_or(0.0) * 2.0);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    let _sub = doubled.on_change(move |event| {
        seen_clone.lock().push((event.previous().clone(), event.value().clone()));
    });

    count.set(4).unwrap();
    assert_eq!(*seen.lock(), vec![(Value::from(2), Value::from(8))]);
}

/// Scenario: two writes to `count` in one batch fire its listener once with
/// the first previous value and the last value.
#[test]
fn batched_count_writes_fire_once() {
    let (rt, _) = runtime();
    let state = rt.create_root(json!({"count": 0}));
    let count = state.child("count");
    let events = Arc::new(Mutex::new(Vec::new()));

    let events_clone = events.clone();
    let _sub = count.on_change(move |event| events_clone.lock().push(event.changes().to_vec()));

    rt.batch(|| {
        count.set(1).unwrap();
        count.set(2).unwrap();
    });

    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].len(), 1);
    assert_eq!(events[0][0].prev_at_path, Value::from(0));
    assert_eq!(events[0][0].value_at_path, Value::from(2));
}

/// Scenario: a computed list of sorted keys follows key deletion without
/// manual re-subscription.
#[test]
fn computed_keys_follow_deletions() {
    let (rt, _) = runtime();
    let state = rt.create_root(json!({"items": {"a": {"id": "a"}, "b": {"id": "b"}}}));
    let items = state.child("items");

    let items_clone = items.clone();
    let sorted = rt.computed(move || {
        let mut keys: Vec<String> = items_clone
            .get()
            .as_object()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    });

    assert_eq!(sorted.get(), Value::from(vec!["a", "b"]));

    items.remove_key("a").unwrap();
    assert_eq!(sorted.get(), Value::from(vec!["b"]));
}

/// Scenario: an asynchronous producer rejecting with a constant three-attempt
/// policy stops after the third failure.
#[test]
fn async_failures_stop_after_the_retry_limit() {
    let (rt, scheduler) = runtime();
    let attempts = Arc::new(AtomicI32::new(0));
    let resolvers: Arc<Mutex<Vec<Resolver>>> = Arc::new(Mutex::new(Vec::new()));

    let attempts_clone = attempts.clone();
    let resolvers_clone = resolvers.clone();
    let node = rt.computed_with(
        move || {
            attempts_clone.fetch_add(1, Ordering::SeqCst);
            let (deferred, resolver) = Deferred::new();
            resolvers_clone.lock().push(resolver);
            deferred
        },
        ComputedOptions::default().with_retry(RetryPolicy::constant(Duration::from_millis(10), 3)),
    );

    node.get();
    for attempt in 1..=3 {
        assert_eq!(attempts.load(Ordering::SeqCst), attempt);
        assert_eq!(node.status().unwrap().state, ActivationState::Loading);

        let resolver = resolvers.lock().pop().unwrap();
        resolver.reject("network down");

        let status = node.status().unwrap();
        assert_eq!(status.state, ActivationState::Error);
        assert_eq!(status.failures, attempt as u32);
        assert_eq!(scheduler.pending_timers(), if attempt < 3 { 1 } else { 0 });

        scheduler.advance(Duration::from_millis(10));
    }

    scheduler.advance(Duration::from_secs(10));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(node.status().unwrap().state, ActivationState::Error);
}

/// A successful result after failures clears the error.
#[test]
fn recovery_clears_the_error() {
    let (rt, scheduler) = runtime();
    let attempts = Arc::new(AtomicI32::new(0));

    let attempts_clone = attempts.clone();
    let node = rt.computed_with(
        move || {
            if attempts_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                Deferred::rejected("flaky")
            } else {
                Deferred::resolved("ok")
            }
        },
        ComputedOptions::default().with_retry(RetryPolicy::constant(Duration::from_millis(5), 3)),
    );

    node.get();
    assert_eq!(node.status().unwrap().state, ActivationState::Error);

    scheduler.advance(Duration::from_millis(5));
    let status = node.status().unwrap();
    assert_eq!(status.state, ActivationState::Loaded);
    assert!(status.error.is_none());
    assert_eq!(node.get(), Value::from("ok"));
}

/// A listener panic does not stop delivery to the other listeners; it is
/// re-raised after the flush and leaves the batch state clean.
#[test]
fn listener_panics_are_isolated_then_rethrown() {
    let (rt, _) = runtime();
    let count = rt.create_root(0);
    let (call_count, listener) = counter();

    let _panicking = count.on_change(|event| {
        if event.value() == &Value::from(1) {
            panic!("listener failed");
        }
    });
    let _counting = count.on_change(listener);

    let result = panic::catch_unwind(AssertUnwindSafe(|| count.set(1)));
    assert!(result.is_err());
    assert_eq!(call_count.load(Ordering::SeqCst), 1);
    assert!(!rt.in_batch());

    count.set(2).unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 2);
}

/// Links forward reads, writes and notifications.
#[test]
fn linked_nodes_forward_notifications() {
    let (rt, _) = runtime();
    let users = rt.create_root(json!({"ada": {"age": 36}, "grace": {"age": 45}}));
    let selected_name = rt.create_root("ada");

    let users_clone = users.clone();
    let name_clone = selected_name.clone();
    let selected = rt.computed(move || {
        let name = name_clone.get();
        users_clone.child(name.as_str().unwrap_or_default())
    });
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    let _sub = selected
        .child("age")
        .on_change(move |event| seen_clone.lock().push(event.value().clone()));

    users.child("ada").child("age").set(37).unwrap();
    selected_name.set("grace").unwrap();

    assert_eq!(*seen.lock(), vec![Value::from(37), Value::from(45)]);
    assert_eq!(selected.child("age").get(), Value::from(45));
}

/// A link cycle resolves to undefined instead of looping.
#[test]
fn link_cycles_resolve_to_undefined() {
    let (rt, _) = runtime();
    let slot: Arc<Mutex<Option<arbor_core::Node>>> = Arc::new(Mutex::new(None));

    let slot_clone = slot.clone();
    let a = rt.computed(move || match slot_clone.lock().clone() {
        Some(node) => arbor_core::Produced::Link(node),
        None => arbor_core::Produced::Value(Value::Null),
    });
    let a_clone = a.clone();
    let b = rt.computed(move || a_clone.clone());

    *slot.lock() = Some(b.clone());
    assert!(b.get().is_nullish());
    assert_eq!(a.status().unwrap().state, ActivationState::Active);
}

/// Writes to a two-way node made while it loads are replayed to its setter.
#[test]
fn early_writes_reach_the_setter() {
    let (rt, _) = runtime();
    let (deferred, resolver) = Deferred::new();
    let received = Arc::new(Mutex::new(Vec::new()));

    let received_clone = received.clone();
    let view = rt.linked(
        LinkedOptions::new(move || deferred.clone())
            .with_set(move |args| received_clone.lock().push((args.prev, args.value))),
    );

    view.set(5).unwrap();
    assert!(received.lock().is_empty());
    assert_eq!(view.status().unwrap().state, ActivationState::Loading);

    resolver.resolve(1);
    assert_eq!(*received.lock(), vec![(Value::from(1), Value::from(5))]);
    assert_eq!(view.get(), Value::from(1));
}

/// In deferred flush mode writes outside a batch are delivered by the
/// scheduler.
#[test]
fn deferred_flush_mode_waits_for_the_scheduler() {
    let scheduler = ManualScheduler::new();
    let rt = Runtime::with_config(
        scheduler.clone(),
        EngineConfig::default().with_flush_mode(FlushMode::Deferred),
    );
    let count = rt.create_root(0);
    let events = Arc::new(Mutex::new(Vec::new()));

    let events_clone = events.clone();
    let _sub = count.on_change(move |event| {
        events_clone
            .lock()
            .push((event.previous().clone(), event.value().clone()))
    });

    count.set(1).unwrap();
    count.set(2).unwrap();
    assert!(events.lock().is_empty());

    scheduler.run_pending();
    assert_eq!(*events.lock(), vec![(Value::from(0), Value::from(2))]);
}

/// Effects re-run as their dependencies change, honoring tracking modes.
#[test]
fn effects_follow_their_dependencies() {
    let (rt, _) = runtime();
    let state = rt.create_root(json!({"todos": [{"id": 1, "done": false}]}));
    let todos = state.child("todos");
    let lengths = Arc::new(Mutex::new(Vec::new()));

    let todos_clone = todos.clone();
    let lengths_clone = lengths.clone();
    let effect = rt.effect(move || {
        let todos = todos_clone.get_with(TrackingMode::Shallow);
        lengths_clone.lock().push(todos.len());
    });

    todos.index(0).set_key("done", true).unwrap();
    todos.index(1).set(json!({"id": 2, "done": false})).unwrap();

    assert_eq!(*lengths.lock(), vec![1, 2]);
    assert_eq!(effect.run_count(), 2);
}

/// `when` settles once its predicate turns truthy.
#[test]
fn when_waits_for_a_truthy_value() {
    let (rt, _) = runtime();
    let state = rt.create_root(json!({"user": null}));
    let user = state.child("user");

    let user_clone = user.clone();
    let deferred = rt.when(move || user_clone.get());
    assert!(!deferred.is_settled());

    user.set(json!({"name": "ada"})).unwrap();
    assert_eq!(deferred.result(), Some(Ok(Value::from(json!({"name": "ada"})))));
}

/// Immediate listeners see every write, deferred ones see the batch.
#[test]
fn immediate_listeners_see_every_write() {
    let (rt, _) = runtime();
    let count = rt.create_root(0);
    let (immediate_calls, immediate) = counter();
    let (deferred_calls, deferred) = counter();
    let _immediate = count.subscribe(immediate, SubscribeOptions::default().immediate());
    let _deferred = count.on_change(deferred);

    rt.batch(|| {
        count.set(1).unwrap();
        count.set(2).unwrap();
        count.set(3).unwrap();
    });

    assert_eq!(immediate_calls.load(Ordering::SeqCst), 3);
    assert_eq!(deferred_calls.load(Ordering::SeqCst), 1);
}

/// A write that restores the value a batch started with cancels it.
#[test]
fn reverted_batches_do_not_notify() {
    let (rt, _) = runtime();
    let count = rt.create_root(0);
    let (call_count, listener) = counter();
    let _sub = count.on_change(listener);

    rt.batch(|| {
        count.set(1).unwrap();
        count.set(0).unwrap();
    });
    assert_eq!(call_count.load(Ordering::SeqCst), 0);
}

/// Listeners that write during a flush trigger one more pass, not recursion.
#[test]
fn writes_from_listeners_are_delivered() {
    let (rt, _) = runtime();
    let state = rt.create_root(json!({"celsius": 0, "fahrenheit": 32}));
    let fahrenheit = state.child("fahrenheit");
    let (call_count, listener) = counter();
    let _watch = fahrenheit.on_change(listener);

    let fahrenheit_clone = fahrenheit.clone();
    let _convert = state.child("celsius").on_change(move |event| {
        let celsius = event.value().as_f64().unwrap_or(0.0);
        fahrenheit_clone.set(celsius * 9.0 / 5.0 + 32.0).unwrap();
    });

    state.set_key("celsius", 100).unwrap();
    assert_eq!(fahrenheit.get(), Value::from(212));
    assert_eq!(call_count.load(Ordering::SeqCst), 1);
}

/// Unsubscribing stops delivery.
#[test]
fn unsubscribe_stops_delivery() {
    let (rt, _) = runtime();
    let count = rt.create_root(0);
    let (call_count, listener) = counter();
    let sub = count.on_change(listener);

    count.set(1).unwrap();
    sub.unsubscribe();
    count.set(2).unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 1);
}
