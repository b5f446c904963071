//! # Reinhardt Reactive
//!
//! Property-level dependency tracking for plain data.
//!
//! Data is wrapped with [`observe`] into an [`Observed`] handle. Functions
//! registered with [`computed`] re-run whenever a property they read during
//! their latest run is written.
//!
//! ## Features
//!
//! - **Observation**: deep wrapping of nested objects and arrays, allow/deny
//!   property filters, method binding
//! - **Computed scheduling**: a breadth-first queue that lets cyclic
//!   computations converge and aborts runaway ones with
//!   [`ObserveError::QueueOverflow`]
//! - **Batching**: coalesce re-runs into one flush per executor turn or timer
//! - **Change subscriptions**: `"__changed__"` events per object, optionally
//!   bubbled to owning objects
//! - **Asynchronous computations**: [`ComputeContext::compute_async`] re-enters
//!   tracking after a suspension point
//!
//! ## Example
//!
//! ```ignore
//! use reinhardt_reactive::{computed, observe, ObserveOptions};
//! use serde_json::json;
//!
//! let obj = observe(json!({"a": 1, "b": 2, "sum": 0}).into(), ObserveOptions::default())?;
//! let handle = obj.clone();
//! computed(move |_| {
//!     let sum = handle.get("a").as_i64().unwrap_or(0) + handle.get("b").as_i64().unwrap_or(0);
//!     handle.set("sum", sum)
//! })?;
//!
//! obj.set("a", 10)?;
//! assert_eq!(obj.get("sum"), 12);
//! ```
//!
//! ## Threading
//!
//! Everything is single-threaded. The runtime lives in a thread-local, and
//! observed objects and computed functions belong to the thread that created
//! them.

pub mod array;
pub mod batcher;
pub mod computed;
pub mod error;
pub mod executor;
pub mod hints;
pub mod ignore;
pub mod observable;
pub mod observe;
pub mod runtime;
pub mod subscription;
pub mod value;

use std::rc::Rc;

pub use batcher::BatchMode;
pub use computed::{
	computed, computed_method, computed_with, dispose, ComputeContext, ComputeResult, Computed,
	ComputedOptions,
};
pub use error::{ObserveError, Result};
#[cfg(feature = "tokio")]
pub use executor::TokioExecutor;
pub use executor::{Executor, LocalPoolExecutor};
pub use hints::{ComputedId, ObjectId};
pub use ignore::{ignore, Ignorable};
pub use observable::Observable;
pub use observe::{observe, ObserveConfig, ObserveOptions, Observed, PropertyFilter, CHANGED_EVENT, LENGTH};
pub use runtime::{with_runtime, Runtime, RuntimeConfig};
pub use subscription::{Emission, Subscription, SubscriptionId};
pub use value::{ChangeEvent, Map, Method, Value};

/// Run pending batched functions now and drive deferred work on the
/// thread's executor.
pub fn process() -> Result<()> {
	with_runtime(Runtime::process)
}

/// Replace the thread's executor.
pub fn set_executor<E>(executor: E)
where
	E: Executor + 'static,
{
	with_runtime(|rt| rt.set_executor(Rc::new(executor)));
}

/// Replace the thread's scheduler configuration.
pub fn configure(config: RuntimeConfig) {
	with_runtime(|rt| rt.configure(config));
}
