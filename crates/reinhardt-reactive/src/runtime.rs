//! Reactive Runtime
//!
//! This module provides the runtime that ties observed objects and computed
//! functions together: the observer stack used for dependency tracking, the
//! side-table of per-function hints, and the computed queue.
//!
//! ## Architecture
//!
//! 1. **Observer Stack**: tracks the computed function currently executing.
//!    Reads made through [`crate::Observed::get`] are recorded against its top.
//! 2. **Computed Queue**: a FIFO queue with an advancing cursor. The first
//!    notification that finds the queue unlocked drains it, later
//!    notifications only append. A function already pending at or after the
//!    cursor is not queued twice, which is what makes cycles terminate.
//! 3. **Batch Queue**: see [`crate::batcher`].
//!
//! One runtime lives in a thread-local, so every thread (and every test
//! thread) gets an isolated engine.
//!
//! ## Example
//!
//! ```ignore
//! use reinhardt_reactive::{computed, observe, Value};
//! use serde_json::json;
//!
//! let obj = observe(json!({"a": 1, "b": 2}).into(), Default::default())?;
//! let reader = obj.clone();
//! computed(move |_| {
//!     println!("sum is {:?}", reader.get("a").as_i64().zip(reader.get("b").as_i64()));
//! })?;
//!
//! // The computed function re-runs
//! obj.set("a", 10.into())?;
//! ```

use core::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use scopeguard::defer;
use serde::Deserialize;
use tracing::{debug, error, trace, warn};

use crate::computed::ComputeContext;
use crate::error::{ObserveError, Result};
use crate::executor::{Executor, LocalPoolExecutor};
use crate::hints::{ComputedId, HintStore, ObjectId};

/// Boxed computed function as stored by the runtime.
pub(crate) type ComputedFn = dyn FnMut(&ComputeContext) -> Result<()>;

/// Tunables of the computed scheduler.
///
/// Deserializable so it can be loaded from application settings; missing
/// fields fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
	/// Cursor position past which a flush is aborted as an overflow.
	pub max_queue: usize,
	/// Number of queue entries reported in an overflow error.
	pub overflow_tail: usize,
}

impl RuntimeConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_max_queue(mut self, max_queue: usize) -> Self {
		self.max_queue = max_queue;
		self
	}

	pub fn with_overflow_tail(mut self, overflow_tail: usize) -> Self {
		self.overflow_tail = overflow_tail;
		self
	}
}

impl Default for RuntimeConfig {
	fn default() -> Self {
		Self {
			max_queue: 2000,
			overflow_tail: 10,
		}
	}
}

/// Reactive runtime
///
/// Owns all scheduler state. Accessed through [`with_runtime`]; there is no
/// need to create one directly outside of tests.
pub struct Runtime {
	config: RefCell<RuntimeConfig>,
	/// Observer stack, innermost computed function last
	observer_stack: RefCell<Vec<ComputedId>>,
	pub(crate) hints: RefCell<HintStore>,
	functions: RefCell<BTreeMap<ComputedId, Rc<RefCell<Box<ComputedFn>>>>>,
	/// Computed queue and its cursor
	queue: RefCell<Vec<ComputedId>>,
	cursor: Cell<usize>,
	/// Whether a drain is in progress
	locked: Cell<bool>,
	/// Pending batch, `None` when no flush is scheduled
	pub(crate) batch_queue: RefCell<Option<Vec<ComputedId>>>,
	executor: RefCell<Rc<dyn Executor>>,
}

impl Runtime {
	/// Create a new Runtime instance with a [`LocalPoolExecutor`]
	pub fn new() -> Self {
		Self::with_config(RuntimeConfig::default())
	}

	pub fn with_config(config: RuntimeConfig) -> Self {
		Self {
			config: RefCell::new(config),
			observer_stack: RefCell::new(Vec::new()),
			hints: RefCell::new(HintStore::default()),
			functions: RefCell::new(BTreeMap::new()),
			queue: RefCell::new(Vec::new()),
			cursor: Cell::new(0),
			locked: Cell::new(false),
			batch_queue: RefCell::new(None),
			executor: RefCell::new(Rc::new(LocalPoolExecutor::new())),
		}
	}

	pub fn config(&self) -> RuntimeConfig {
		self.config.borrow().clone()
	}

	pub fn configure(&self, config: RuntimeConfig) {
		*self.config.borrow_mut() = config;
	}

	pub fn executor(&self) -> Rc<dyn Executor> {
		Rc::clone(&self.executor.borrow())
	}

	pub fn set_executor(&self, executor: Rc<dyn Executor>) {
		*self.executor.borrow_mut() = executor;
	}

	pub(crate) fn spawn(&self, task: futures::future::LocalBoxFuture<'static, ()>) {
		self.executor().spawn(task);
	}

	/// Get the computed function currently executing, if any
	pub fn current_computed(&self) -> Option<ComputedId> {
		self.observer_stack.borrow().last().copied()
	}

	pub(crate) fn push_observer(&self, id: ComputedId) {
		self.observer_stack.borrow_mut().push(id);
	}

	pub(crate) fn pop_observer(&self) -> Option<ComputedId> {
		self.observer_stack.borrow_mut().pop()
	}

	/// Record a read of `key` on `object` by the current computed function.
	///
	/// Returns the function that should be added to the property's dependents,
	/// or `None` when nothing is executing or the read is not tracked.
	pub(crate) fn track(&self, object: ObjectId, key: &str) -> Option<ComputedId> {
		let id = self.current_computed()?;
		let mut hints = self.hints.borrow_mut();
		if hints.is_object_ignored(object) {
			return None;
		}
		hints.track(id, object, key).then_some(id)
	}

	pub(crate) fn should_prune(&self, id: ComputedId, object: ObjectId, key: &str) -> bool {
		self.hints.borrow().should_prune(id, object, key)
	}

	pub(crate) fn register(&self, name: String, function: Box<ComputedFn>) -> ComputedId {
		let id = ComputedId::new();
		trace!(computed = ?id, name = %name, "registering computed function");
		self.hints.borrow_mut().insert(id, name);
		self.functions
			.borrow_mut()
			.insert(id, Rc::new(RefCell::new(function)));
		id
	}

	/// Permanently deactivate a computed function.
	///
	/// Dependents sets still holding the id drop it the next time they are
	/// notified.
	pub fn dispose(&self, id: ComputedId) {
		let removed = self.functions.borrow_mut().remove(&id);
		let hints = self.hints.borrow_mut().remove(id);
		if removed.is_some() {
			debug!(
				computed = ?id,
				name = hints.as_ref().map(|h| h.name.as_str()).unwrap_or_default(),
				"disposed computed function"
			);
		}
	}

	pub fn is_disposed(&self, id: ComputedId) -> bool {
		self.hints.borrow().is_disposed(id)
	}

	pub(crate) fn computed_name(&self, id: ComputedId) -> Option<String> {
		self.hints.borrow().name(id).map(str::to_owned)
	}

	/// Queue a computed function and drain the queue unless a drain is
	/// already in progress further up the stack.
	pub(crate) fn notify(&self, id: ComputedId) -> Result<()> {
		if self.is_disposed(id) {
			return Ok(());
		}

		{
			let mut queue = self.queue.borrow_mut();
			let cursor = self.cursor.get();
			if queue.iter().skip(cursor).any(|&pending| pending == id) {
				return Ok(());
			}
			queue.push(id);
		}

		self.hints.borrow_mut().ensure_tracker(id);

		if self.locked.get() {
			return Ok(());
		}
		self.drain()
	}

	fn drain(&self) -> Result<()> {
		self.locked.set(true);
		defer! {
			self.locked.set(false);
			self.queue.borrow_mut().clear();
			self.cursor.set(0);
		}

		loop {
			let next = self.queue.borrow().get(self.cursor.get()).copied();
			let Some(id) = next else {
				break;
			};
			self.run_computed(id)?;
			if self.cursor.get() > self.config.borrow().max_queue {
				return Err(self.overflow());
			}
			self.cursor.set(self.cursor.get() + 1);
		}

		trace!(runs = self.cursor.get(), "drained computed queue");
		Ok(())
	}

	fn overflow(&self) -> ObserveError {
		let config = self.config.borrow();
		let queue = self.queue.borrow();
		let hints = self.hints.borrow();
		let start = queue.len().saturating_sub(config.overflow_tail);
		let tail: Vec<(usize, String)> = queue[start..]
			.iter()
			.enumerate()
			.map(|(offset, id)| {
				(
					start + offset + 1,
					hints.name(*id).unwrap_or("anonymous").to_owned(),
				)
			})
			.collect();

		let err = ObserveError::QueueOverflow {
			limit: config.max_queue,
			tail,
		};
		error!("{}", err);
		err
	}

	/// Run a computed function once with a fresh tracking set.
	pub(crate) fn run_computed(&self, id: ComputedId) -> Result<()> {
		let Some(cell) = self.functions.borrow().get(&id).cloned() else {
			return Ok(());
		};
		let Ok(mut function) = cell.try_borrow_mut() else {
			warn!(computed = ?id, "computed function is already running, skipping reentrant run");
			return Ok(());
		};

		self.hints.borrow_mut().reset_tracker(id);
		self.push_observer(id);
		defer! {
			self.pop_observer();
		}

		(*function)(&ComputeContext::new(id))
	}

	/// Whether a drain is in progress (for testing)
	pub fn is_locked(&self) -> bool {
		self.locked.get()
	}

	/// Number of registered computed functions (for testing)
	pub fn computed_count(&self) -> usize {
		self.functions.borrow().len()
	}
}

impl Default for Runtime {
	fn default() -> Self {
		Self::new()
	}
}

// Thread-local runtime instance
//
// Each thread gets its own runtime, observed objects and computed functions
// must stay on the thread that created them.
thread_local! {
	static RUNTIME: Runtime = Runtime::new();
}

/// Get a reference to the thread's runtime
pub fn with_runtime<F, R>(f: F) -> R
where
	F: FnOnce(&Runtime) -> R,
{
	RUNTIME.with(f)
}

/// Try to access the thread's runtime
///
/// Returns None if the thread-local storage has been destroyed.
pub(crate) fn try_with_runtime<F, R>(f: F) -> Option<R>
where
	F: FnOnce(&Runtime) -> R,
{
	RUNTIME.try_with(f).ok()
}
