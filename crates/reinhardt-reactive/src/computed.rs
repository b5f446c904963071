//! Computed functions
//!
//! A computed function is a closure that re-runs whenever a watched property
//! it read during its latest run is written. Registration runs it once (unless
//! `auto_run` is off) so that its first set of dependencies is recorded.
//!
//! ```ignore
//! use reinhardt_reactive::{computed, observe, ObserveOptions, Value};
//! use serde_json::json;
//!
//! let obj = observe(json!({"a": 1, "b": 2, "sum": 0}).into(), ObserveOptions::default())?;
//! let handle = obj.clone();
//! computed(move |_| {
//!     let sum = handle.get("a").as_i64().unwrap_or(0) + handle.get("b").as_i64().unwrap_or(0);
//!     handle.set("sum", sum)
//! })?;
//! ```
//!
//! ## Asynchronous functions
//!
//! Reads made after a suspension point happen outside of the function's run
//! and would not be tracked. [`ComputeContext::compute_async`] re-enters
//! tracking for the originating function:
//!
//! ```ignore
//! computed(move |ctx| {
//!     let task = ctx.clone();
//!     let obj = obj.clone();
//!     ctx.spawn(async move {
//!         task.sleep(Duration::from_millis(20)).await;
//!         let _ = task.compute_async(|| obj.set("b", obj.get("a")));
//!     });
//! })?;
//! ```

use core::future::Future;
use core::time::Duration;

use futures::future::LocalBoxFuture;
use scopeguard::defer;

use crate::error::{ObserveError, Result};
use crate::hints::ComputedId;
use crate::runtime::with_runtime;
use crate::value::Value;

/// Return types accepted from computed closures.
pub trait ComputeResult {
	fn into_result(self) -> Result<()>;
}

impl ComputeResult for () {
	fn into_result(self) -> Result<()> {
		Ok(())
	}
}

impl ComputeResult for Result<()> {
	fn into_result(self) -> Result<()> {
		self
	}
}

/// Options of [`computed_with`].
#[derive(Debug, Clone)]
pub struct ComputedOptions {
	/// Run once at registration (default true)
	pub auto_run: bool,
	/// Name reported in overflow errors, defaults to the closure's type name
	pub name: Option<String>,
}

impl ComputedOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn auto_run(mut self, auto_run: bool) -> Self {
		self.auto_run = auto_run;
		self
	}

	pub fn name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}
}

impl Default for ComputedOptions {
	fn default() -> Self {
		Self {
			auto_run: true,
			name: None,
		}
	}
}

/// Handle to a registered computed function.
///
/// Dropping the handle does not dispose the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Computed {
	id: ComputedId,
}

impl Computed {
	pub fn id(&self) -> ComputedId {
		self.id
	}

	/// Run the function now, through the computed queue.
	pub fn run(&self) -> Result<()> {
		with_runtime(|rt| rt.notify(self.id))
	}

	/// Permanently deactivate the function.
	pub fn dispose(&self) {
		with_runtime(|rt| rt.dispose(self.id));
	}

	pub fn is_disposed(&self) -> bool {
		with_runtime(|rt| rt.is_disposed(self.id))
	}

	/// Diagnostic name, `None` once disposed.
	pub fn name(&self) -> Option<String> {
		with_runtime(|rt| rt.computed_name(self.id))
	}

	/// Stop tracking reads made by this function.
	pub(crate) fn stop_tracking(&self) {
		with_runtime(|rt| rt.hints.borrow_mut().ignore_computed(self.id));
	}
}

/// Register a computed function and run it once.
pub fn computed<F, R>(f: F) -> Result<Computed>
where
	F: FnMut(&ComputeContext) -> R + 'static,
	R: ComputeResult,
{
	computed_with(f, ComputedOptions::default())
}

/// Register a computed function with explicit options.
pub fn computed_with<F, R>(mut f: F, options: ComputedOptions) -> Result<Computed>
where
	F: FnMut(&ComputeContext) -> R + 'static,
	R: ComputeResult,
{
	let name = options
		.name
		.unwrap_or_else(|| std::any::type_name::<F>().to_owned());
	let id = with_runtime(|rt| rt.register(name, Box::new(move |ctx| f(ctx).into_result())));
	let computed = Computed { id };

	if options.auto_run {
		computed.run()?;
	}
	Ok(computed)
}

/// Register a bound method as a computed function.
pub fn computed_method(value: Value, options: ComputedOptions) -> Result<Computed> {
	match value {
		Value::Method(method) if method.is_bound() => {
			let options = ComputedOptions {
				name: options.name.or_else(|| Some("method".to_owned())),
				..options
			};
			computed_with(move |_| method.invoke(&[]).map(drop), options)
		}
		Value::Method(_) => Err(ObserveError::InvalidArgument(
			"computed method must be bound to an observed object".to_owned(),
		)),
		other => Err(ObserveError::InvalidArgument(format!(
			"computed expects a function, got {}",
			other.kind()
		))),
	}
}

/// Permanently deactivate a computed function.
pub fn dispose(computed: &Computed) {
	computed.dispose();
}

/// Handle passed to every run of a computed function.
///
/// It is `'static`, so it can be moved into tasks spawned from the run.
#[derive(Debug, Clone)]
pub struct ComputeContext {
	computed: ComputedId,
}

impl ComputeContext {
	pub(crate) fn new(computed: ComputedId) -> Self {
		Self { computed }
	}

	/// The function this context belongs to.
	pub fn computed(&self) -> Computed {
		Computed { id: self.computed }
	}

	/// Run `f` with reads tracked for the originating function.
	///
	/// Reads add to the set recorded by the latest run.
	pub fn compute_async<F, T>(&self, f: F) -> T
	where
		F: FnOnce() -> T,
	{
		with_runtime(|rt| rt.push_observer(self.computed));
		defer! {
			with_runtime(|rt| rt.pop_observer());
		}
		f()
	}

	/// Spawn a task on the runtime executor.
	pub fn spawn<Fut>(&self, task: Fut)
	where
		Fut: Future<Output = ()> + 'static,
	{
		with_runtime(|rt| rt.spawn(Box::pin(task)));
	}

	/// Sleep on the runtime executor.
	pub fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
		with_runtime(|rt| rt.executor().sleep(duration))
	}
}
