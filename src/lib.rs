//! # Reinhardt Observe
//!
//! Reactive observation of plain data with property-level dependency tracking.
//!
//! This crate is the facade over `reinhardt-reactive`. It re-exports the
//! engine and provides a [`prelude`].
//!
//! ## Core Principles
//!
//! - **Explicit handles**: observed data is only reachable through
//!   [`Observed`], so every read and write is intercepted
//! - **Latest-run dependencies**: a function depends on exactly what it read
//!   during its latest run
//! - **Single-threaded**: one runtime per thread, no locks
//!
//! ## Feature Flags
//!
//! - `tokio` (default) - `TokioExecutor`, which runs deferred work on a Tokio
//!   `LocalSet` with real timers
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use reinhardt_observe::prelude::*;
//! use serde_json::json;
//!
//! let todos = Observable::new(json!({"items": [], "count": 0}))?;
//!
//! todos.computed(|this, _| {
//!     let items = this.get("items");
//!     let count = items.as_observed().map_or(0, |items| items.len());
//!     this.set("count", count)
//! })?;
//!
//! let items = todos.get("items");
//! items.as_observed().unwrap().push([json!({"title": "write docs"})])?;
//! assert_eq!(todos.get("count"), 1);
//! ```

pub use reinhardt_reactive as reactive;

pub use reinhardt_reactive::{
	computed, computed_method, computed_with, configure, dispose, ignore, observe, process,
	set_executor, BatchMode, ChangeEvent, ComputeContext, Computed, ComputedOptions, Emission,
	Executor, Ignorable, LocalPoolExecutor, Method, ObserveConfig, ObserveError, ObserveOptions,
	Observable, Observed, PropertyFilter, Result, Runtime, RuntimeConfig, Subscription,
	SubscriptionId, Value,
};

#[cfg(feature = "tokio")]
pub use reinhardt_reactive::TokioExecutor;

/// Commonly used items
pub mod prelude {
	pub use crate::{
		computed, computed_with, dispose, ignore, observe, process, BatchMode, ChangeEvent,
		ComputeContext, Computed, ComputedOptions, Method, ObserveError, ObserveOptions,
		Observable, Observed, PropertyFilter, Value,
	};
}
