//! Integration tests for the observation engine
//!
//! These tests verify the engine end to end:
//! 1. Computed functions re-run when a property they read is written
//! 2. Dependencies follow the latest run only
//! 3. Cycles converge, runaway cycles abort with a queue overflow
//! 4. Array operations, deep wrapping, method binding and batching

use reinhardt_reactive::{
	computed, computed_method, computed_with, configure, dispose, ignore, observe, process,
	with_runtime, BatchMode, ComputedOptions, Map, Method, ObserveError, ObserveOptions, Observed,
	PropertyFilter, RuntimeConfig, Value,
};
use rstest::rstest;
use serde_json::json;
use serial_test::serial;
use std::cell::RefCell;
use std::rc::Rc;

fn observe_json(value: serde_json::Value) -> Observed {
	observe(value.into(), ObserveOptions::default()).unwrap()
}

fn int(value: Value) -> i64 {
	value.as_i64().unwrap_or(0)
}

/// Scenario: manual run of a sum, then writes to each operand
#[test]
#[serial]
fn test_simple_computation() {
	let obj = observe_json(json!({"a": 1, "b": 2}));
	let result = Rc::new(RefCell::new(0));
	let result_clone = result.clone();

	let handle = obj.clone();
	let sum = computed_with(
		move |_| {
			*result_clone.borrow_mut() = int(handle.get("a")) + int(handle.get("b"));
		},
		ComputedOptions::new().auto_run(false),
	)
	.unwrap();

	assert_eq!(*result.borrow(), 0);
	sum.run().unwrap();
	assert_eq!(*result.borrow(), 3);

	obj.set("a", 2).unwrap();
	assert_eq!(*result.borrow(), 4);

	obj.set("b", 3).unwrap();
	assert_eq!(*result.borrow(), 5);
}

#[test]
#[serial]
fn test_auto_run() {
	let obj = observe_json(json!({"a": 1, "b": 2}));
	let result = Rc::new(RefCell::new(0));
	let result_clone = result.clone();

	let handle = obj.clone();
	computed(move |_| {
		*result_clone.borrow_mut() = int(handle.get("a")) + int(handle.get("b"));
	})
	.unwrap();

	assert_eq!(*result.borrow(), 3);
}

/// Unwatched properties are read and written without tracking
#[test]
#[serial]
fn test_multiple_getters_with_props_filter() {
	let obj = observe(
		json!({"a": 1, "b": 2, "sum": 0}).into(),
		ObserveOptions::new().props(PropertyFilter::names(["a", "b"])),
	)
	.unwrap();

	let handle = obj.clone();
	computed(move |_| -> reinhardt_reactive::Result<()> {
		let a = int(handle.get("a"));
		handle.set("sum", int(handle.get("sum")) + a)?;
		let b = int(handle.get("b"));
		handle.set("sum", int(handle.get("sum")) + b)?;
		let both = int(handle.get("a")) + int(handle.get("b"));
		handle.set("sum", int(handle.get("sum")) + both)
	})
	.unwrap();

	// 1 + 2 + 3
	assert_eq!(obj.get("sum"), 6);
	assert_eq!(obj.dependent_count("sum"), 0);

	obj.set("a", 2).unwrap();

	// 6 + 2 + 2 + 4
	assert_eq!(obj.get("sum"), 14);
}

#[test]
#[serial]
fn test_nested_function_calls_are_tracked() {
	let obj = observe_json(json!({"a": 1, "b": 2, "c": 3, "d": 4}));
	let result = Rc::new(RefCell::new(0));
	let result_clone = result.clone();

	let handle = obj.clone();
	computed(move |_| {
		let a_plus_b = |o: &Observed| int(o.get("a")) + int(o.get("b"));
		let c_plus_d = |o: &Observed| int(o.get("c")) + int(o.get("d"));
		*result_clone.borrow_mut() = a_plus_b(&handle) + c_plus_d(&handle);
	})
	.unwrap();

	assert_eq!(*result.borrow(), 10);
	obj.set("a", 2).unwrap();
	assert_eq!(*result.borrow(), 11);
	obj.set("d", 5).unwrap();
	assert_eq!(*result.borrow(), 12);
}

#[test]
#[serial]
fn test_multiple_observed_objects() {
	let objects: Vec<Observed> = (1..=3).map(|a| observe_json(json!({ "a": a }))).collect();
	let result = Rc::new(RefCell::new(0));
	let result_clone = result.clone();

	let handles = objects.clone();
	computed(move |_| {
		*result_clone.borrow_mut() = handles.iter().map(|o| int(o.get("a"))).sum::<i64>();
	})
	.unwrap();

	assert_eq!(*result.borrow(), 6);
	objects[0].set("a", 0).unwrap();
	assert_eq!(*result.borrow(), 5);
	objects[1].set("a", 0).unwrap();
	assert_eq!(*result.borrow(), 3);
	objects[2].set("a", 0).unwrap();
	assert_eq!(*result.borrow(), 0);
}

/// A function writing a property it reads converges in one pass
#[test]
#[serial]
fn test_circular_computed_function() {
	let obj = observe_json(json!({"a": 1, "b": 1}));

	let handle = obj.clone();
	computed(move |_| handle.set("a", int(handle.get("a")) + int(handle.get("b")))).unwrap();

	assert_eq!(obj.get("a"), 2);
	obj.set("b", 2).unwrap();
	assert_eq!(obj.get("a"), 4);
	obj.set("a", 3).unwrap();
	assert_eq!(obj.get("a"), 5);
}

#[test]
#[serial]
fn test_chain_of_computations() {
	let obj = observe_json(json!({"a": 0, "b": 0, "c": 0, "d": 0}));

	for (from, to) in [("a", "b"), ("b", "c"), ("c", "d")] {
		let handle = obj.clone();
		computed(move |_| handle.set(to, int(handle.get(from)) * 2)).unwrap();
	}

	assert_eq!(obj.get("d"), 0);
	obj.set("a", 5).unwrap();
	assert_eq!(obj.get("d"), 40);
}

/// Scenario: array of objects summed with reduce, then every structural operation
#[test]
#[serial]
fn test_array_methods() {
	let arr = observe_json(json!([{"val": 1}, {"val": 2}, {"val": 3}]));
	let sum = Rc::new(RefCell::new(0));
	let sum_clone = sum.clone();

	let handle = arr.clone();
	computed(move |_| {
		*sum_clone.borrow_mut() = handle.reduce(0, |acc, item| {
			acc + item.as_observed().map_or(0, |o| int(o.get("val")))
		});
	})
	.unwrap();
	assert_eq!(*sum.borrow(), 6);

	arr.push([Value::from(json!({"val": 4}))]).unwrap();
	assert_eq!(*sum.borrow(), 10);

	arr.pop().unwrap();
	assert_eq!(*sum.borrow(), 6);

	arr.unshift([Value::from(json!({"val": 5})), Value::from(json!({"val": 4}))])
		.unwrap();
	assert_eq!(*sum.borrow(), 15);

	arr.shift().unwrap();
	assert_eq!(*sum.borrow(), 10);

	arr.splice(1, 3, Vec::<Value>::new()).unwrap();
	assert_eq!(*sum.borrow(), 4);
}

#[test]
#[serial]
fn test_observe_arrays_of_numbers() {
	let arr = observe_json(json!([1, 2, 3]));
	let sum = Rc::new(RefCell::new(0));
	let sum_clone = sum.clone();

	let handle = arr.clone();
	computed(move |_| {
		*sum_clone.borrow_mut() = handle.reduce(0, |acc, item| acc + int(item));
	})
	.unwrap();
	assert_eq!(*sum.borrow(), 6);

	arr.set_index(0, 2).unwrap();
	assert_eq!(*sum.borrow(), 7);

	arr.push([3]).unwrap();
	assert_eq!(*sum.borrow(), 10);
}

#[test]
#[serial]
fn test_dispose_computed_functions() {
	let obj = observe_json(json!({"a": 0}));
	let result = Rc::new(RefCell::new(0));
	let result2 = Rc::new(RefCell::new(0));

	let (handle, result2_clone) = (obj.clone(), result2.clone());
	let minus_one = computed(move |_| {
		*result2_clone.borrow_mut() = int(handle.get("a")) - 1;
	})
	.unwrap();
	let (handle, result_clone) = (obj.clone(), result.clone());
	computed(move |_| {
		*result_clone.borrow_mut() = int(handle.get("a")) + 1;
	})
	.unwrap();

	obj.set("a", 1).unwrap();
	assert_eq!(*result.borrow(), 2);
	assert_eq!(*result2.borrow(), 0);

	dispose(&minus_one);

	obj.set("a", 10).unwrap();
	assert_eq!(*result.borrow(), 11);
	assert_eq!(*result2.borrow(), 0);
	// The disposed function was pruned lazily by the write
	assert_eq!(obj.dependent_count("a"), 1);
}

/// Dependents follow the latest run only
#[test]
#[serial]
fn test_retracking_after_branch_change() {
	let obj = observe_json(json!({"flag": true, "a": 1, "b": 2}));
	let runs = Rc::new(RefCell::new(0));
	let runs_clone = runs.clone();

	let handle = obj.clone();
	computed(move |_| {
		*runs_clone.borrow_mut() += 1;
		if handle.get("flag").as_bool().unwrap_or(false) {
			handle.get("a");
		} else {
			handle.get("b");
		}
	})
	.unwrap();
	assert_eq!(*runs.borrow(), 1);

	obj.set("flag", false).unwrap();
	assert_eq!(*runs.borrow(), 2);

	// `a` is no longer read: the write prunes the stale dependent
	obj.set("a", 5).unwrap();
	assert_eq!(*runs.borrow(), 2);
	assert_eq!(obj.dependent_count("a"), 0);

	obj.set("b", 5).unwrap();
	assert_eq!(*runs.borrow(), 3);
}

#[rstest]
#[case(json!(1), json!(1), 1)]
#[case(json!(1), json!(2), 2)]
#[case(json!("x"), json!("x"), 1)]
#[case(json!({"k": 1}), json!({"k": 1}), 2)]
#[serial]
fn test_strict_equality_on_write(
	#[case] initial: serde_json::Value,
	#[case] next: serde_json::Value,
	#[case] expected_runs: usize,
) {
	let obj = observe_json(json!({ "p": initial }));
	let runs = Rc::new(RefCell::new(0));
	let runs_clone = runs.clone();

	let handle = obj.clone();
	computed(move |_| {
		*runs_clone.borrow_mut() += 1;
		handle.get("p");
	})
	.unwrap();
	obj.set("p", Value::from(next)).unwrap();

	// A fresh object is a new identity even with the same content
	assert_eq!(*runs.borrow(), expected_runs);
}

/// Assigned plain objects become tracked, old references go stale
#[test]
#[serial]
fn test_deep_assignment() {
	let obj = observe_json(json!({"nested": {"x": 1}}));
	let seen = Rc::new(RefCell::new(Vec::new()));
	let seen_clone = seen.clone();

	let handle = obj.clone();
	computed(move |_| {
		let nested = handle.get("nested");
		let x = nested.as_observed().map_or(0, |n| int(n.get("x")));
		seen_clone.borrow_mut().push(x);
	})
	.unwrap();

	let old = obj.get("nested").as_observed().cloned().unwrap();
	old.set("x", 2).unwrap();
	assert_eq!(*seen.borrow(), vec![1, 2]);

	obj.set("nested", Value::from(json!({"x": 5}))).unwrap();
	assert_eq!(*seen.borrow(), vec![1, 2, 5]);

	// Writes through the retained old reference never trigger
	old.set("x", 10).unwrap();
	assert_eq!(*seen.borrow(), vec![1, 2, 5]);

	let current = obj.get("nested").as_observed().cloned().unwrap();
	current.set("x", 6).unwrap();
	assert_eq!(*seen.borrow(), vec![1, 2, 5, 6]);
}

#[test]
#[serial]
fn test_ignored_property_is_not_tracked() {
	let obj = observe(
		json!({"a": 1, "secret": 1}).into(),
		ObserveOptions::new().ignore(PropertyFilter::names(["secret"])),
	)
	.unwrap();
	let runs = Rc::new(RefCell::new(0));
	let runs_clone = runs.clone();

	let handle = obj.clone();
	computed(move |_| {
		*runs_clone.borrow_mut() += 1;
		handle.get("a");
		handle.get("secret");
	})
	.unwrap();

	obj.set("secret", 2).unwrap();
	assert_eq!(*runs.borrow(), 1);
	assert_eq!(obj.get("secret"), 2);

	obj.set("a", 2).unwrap();
	assert_eq!(*runs.borrow(), 2);
}

#[test]
#[serial]
fn test_ignored_object_is_not_tracked() {
	let obj = ignore(observe_json(json!({"a": 1}))).unwrap();
	let runs = Rc::new(RefCell::new(0));
	let runs_clone = runs.clone();

	let handle = obj.clone();
	computed(move |_| {
		*runs_clone.borrow_mut() += 1;
		handle.get("a");
	})
	.unwrap();
	obj.set("a", 2).unwrap();

	assert_eq!(*runs.borrow(), 1);
}

#[test]
#[serial]
fn test_ignored_computed_does_not_track() {
	let obj = observe_json(json!({"a": 1}));
	let runs = Rc::new(RefCell::new(0));
	let runs_clone = runs.clone();

	let handle = obj.clone();
	let tracked = computed_with(
		move |_| {
			*runs_clone.borrow_mut() += 1;
			handle.get("a");
		},
		ComputedOptions::new().auto_run(false),
	)
	.unwrap();
	let tracked = ignore(tracked).unwrap();
	tracked.run().unwrap();
	obj.set("a", 2).unwrap();

	assert_eq!(*runs.borrow(), 1);
}

/// Usage with `this`: a bound method registered as computed function
#[test]
#[serial]
fn test_bound_method_as_computed() {
	let mut data = Map::new();
	data.insert("a".into(), 1.into());
	data.insert("b".into(), 2.into());
	data.insert(
		"do_sum".into(),
		Method::new(|this, _| {
			this.set("sum", int(this.get("a")) + int(this.get("b")))?;
			Ok(Value::Null)
		})
		.into(),
	);
	let obj = observe(Value::Object(data), ObserveOptions::new().bind(true)).unwrap();

	computed_method(obj.get("do_sum"), ComputedOptions::default()).unwrap();
	assert_eq!(obj.get("sum"), 3);

	obj.set("a", 2).unwrap();
	assert_eq!(obj.get("sum"), 4);
}

#[test]
#[serial]
fn test_unbound_method_is_rejected() {
	let mut data = Map::new();
	data.insert("noop".into(), Method::new(|_, _| Ok(Value::Null)).into());
	let obj = observe(Value::Object(data), ObserveOptions::default()).unwrap();

	let result = computed_method(obj.get("noop"), ComputedOptions::default());

	assert!(matches!(result, Err(ObserveError::InvalidArgument(_))));
}

/// Two functions feeding each other forever
#[test]
#[serial]
fn test_queue_overflow() {
	let obj = observe_json(json!({"a": 0, "b": 0}));

	let handle = obj.clone();
	computed_with(
		move |_| handle.set("b", int(handle.get("a")) + 1),
		ComputedOptions::new().name("ping"),
	)
	.unwrap();
	let handle = obj.clone();
	let result = computed_with(
		move |_| handle.set("a", int(handle.get("b")) + 1),
		ComputedOptions::new().name("pong"),
	);

	let Err(ObserveError::QueueOverflow { limit, tail }) = result else {
		panic!("expected overflow, got {:?}", result);
	};
	assert_eq!(limit, 2000);
	assert_eq!(tail.len(), 10);
	assert!(tail.windows(2).all(|w| w[1].0 == w[0].0 + 1));
	assert!(tail.windows(2).all(|w| w[0].1 != w[1].1));
	assert!(tail.iter().all(|(_, name)| name == "ping" || name == "pong"));
	assert!(!with_runtime(|rt| rt.is_locked()));
}

#[test]
#[serial]
fn test_configured_queue_limit() {
	configure(RuntimeConfig::new().with_max_queue(10).with_overflow_tail(3));
	let obj = observe_json(json!({"a": 0}));

	let handle = obj.clone();
	let result = computed(move |_| {
		let a = int(handle.get("a"));
		handle.set("b", a + 1)
	});
	assert!(result.is_ok());

	let handle = obj.clone();
	let result = computed(move |_| handle.set("a", int(handle.get("b")) + 1));

	assert!(matches!(
		result,
		Err(ObserveError::QueueOverflow { limit: 10, ref tail }) if tail.len() == 3
	));
	configure(RuntimeConfig::default());
}

/// Batched writes coalesce into one flush
#[test]
#[serial]
fn test_batched_writes() {
	let obj = observe(json!({"a": 1, "b": 2}).into(), ObserveOptions::new().batch(true)).unwrap();
	let log = Rc::new(RefCell::new(Vec::new()));
	let log_clone = log.clone();

	let handle = obj.clone();
	computed(move |_| {
		log_clone
			.borrow_mut()
			.push(int(handle.get("a")) + int(handle.get("b")));
	})
	.unwrap();
	assert_eq!(*log.borrow(), vec![3]);

	obj.set("a", 10).unwrap();
	obj.set("b", 20).unwrap();
	obj.set("a", 100).unwrap();
	assert_eq!(*log.borrow(), vec![3]);
	assert_eq!(with_runtime(|rt| rt.pending_batch_len()), 1);

	process().unwrap();
	assert_eq!(*log.borrow(), vec![3, 120]);

	// Nothing left to flush
	process().unwrap();
	assert_eq!(*log.borrow(), vec![3, 120]);
}

/// Writes to different properties re-run each of their readers once per flush
#[test]
#[serial]
fn test_batched_writes_to_several_dependents() {
	// Arrange
	let obj = observe(
		json!({"a": 1, "b": 2, "c": 3}).into(),
		ObserveOptions::new().batch(true),
	)
	.unwrap();
	let log = Rc::new(RefCell::new(Vec::new()));
	for key in ["a", "b", "c"] {
		let handle = obj.clone();
		let log = log.clone();
		computed(move |_| log.borrow_mut().push((key, int(handle.get(key))))).unwrap();
	}
	log.borrow_mut().clear();

	// Act
	obj.set("c", 30).unwrap();
	obj.set("a", 10).unwrap();
	obj.set("b", 20).unwrap();
	obj.set("a", 100).unwrap();
	obj.set("c", 300).unwrap();

	// Assert
	assert!(log.borrow().is_empty());
	assert_eq!(with_runtime(|rt| rt.pending_batch_len()), 3);
	process().unwrap();
	assert_eq!(*log.borrow(), vec![("c", 300), ("a", 100), ("b", 20)]);
	assert_eq!(with_runtime(|rt| rt.pending_batch_len()), 0);
}

#[rstest]
#[case(BatchMode::Microtask)]
#[case(BatchMode::Timer(25))]
#[serial]
fn test_batch_flush_is_scheduled_on_executor(#[case] batch: BatchMode) {
	let obj = observe(json!({"a": 1}).into(), ObserveOptions::new().batch(batch)).unwrap();
	let runs = Rc::new(RefCell::new(0));
	let runs_clone = runs.clone();

	let handle = obj.clone();
	computed(move |_| {
		*runs_clone.borrow_mut() += 1;
		handle.get("a");
	})
	.unwrap();
	obj.set("a", 2).unwrap();
	obj.set("a", 3).unwrap();
	assert_eq!(*runs.borrow(), 1);

	// Pump the executor only: the flush scheduled by the first write runs
	with_runtime(|rt| rt.executor().run_pending());

	assert_eq!(*runs.borrow(), 2);
	assert_eq!(with_runtime(|rt| rt.pending_batch_len()), 0);
}
