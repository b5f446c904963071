//! Deferred execution
//!
//! Batch flushes, change notifications and asynchronous computed functions all
//! run "on a later turn". The [`Executor`] trait is the seam that decides what a
//! turn is. Each runtime holds one executor, replaceable with
//! [`crate::set_executor`].
//!
//! - [`LocalPoolExecutor`] (default): work queues up in a
//!   `futures::executor::LocalPool` and runs when [`crate::process`] (or
//!   [`Executor::run_pending`]) pumps it. Delays collapse to the next pump, so
//!   tests stay deterministic.
//! - [`TokioExecutor`] (feature `tokio`): work is spawned with
//!   `tokio::task::spawn_local` and delays are real `tokio::time` sleeps. Must
//!   be used from inside a `tokio::task::LocalSet`.

use core::cell::RefCell;
use core::time::Duration;

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::{self, LocalBoxFuture};
use futures::task::LocalSpawnExt;
use tracing::warn;

/// Single-threaded task executor used for deferred work.
pub trait Executor {
	/// Schedule a task to run on a later turn.
	fn spawn(&self, task: LocalBoxFuture<'static, ()>);

	/// Future that completes after `duration`. A zero duration means "next turn".
	fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;

	/// Drive queued work until nothing can make progress.
	///
	/// Executors driven by an outer runtime leave this as a no-op.
	fn run_pending(&self) {}
}

/// Executor backed by a `futures` local pool that is pumped manually.
pub struct LocalPoolExecutor {
	pool: RefCell<LocalPool>,
	spawner: LocalSpawner,
}

impl LocalPoolExecutor {
	pub fn new() -> Self {
		let pool = LocalPool::new();
		let spawner = pool.spawner();
		Self {
			pool: RefCell::new(pool),
			spawner,
		}
	}
}

impl Default for LocalPoolExecutor {
	fn default() -> Self {
		Self::new()
	}
}

impl Executor for LocalPoolExecutor {
	fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
		if let Err(err) = self.spawner.spawn_local(task) {
			warn!("local pool rejected a task: {}", err);
		}
	}

	fn sleep(&self, _duration: Duration) -> LocalBoxFuture<'static, ()> {
		Box::pin(future::ready(()))
	}

	fn run_pending(&self) {
		// Already pumping: work spawned by a running task joins the current pump.
		if let Ok(mut pool) = self.pool.try_borrow_mut() {
			pool.run_until_stalled();
		}
	}
}

/// Executor that spawns onto the current Tokio `LocalSet`.
#[cfg(feature = "tokio")]
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioExecutor;

#[cfg(feature = "tokio")]
impl TokioExecutor {
	pub fn new() -> Self {
		Self
	}
}

#[cfg(feature = "tokio")]
impl Executor for TokioExecutor {
	fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
		tokio::task::spawn_local(task);
	}

	fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
		if duration.is_zero() {
			Box::pin(tokio::task::yield_now())
		} else {
			Box::pin(tokio::time::sleep(duration))
		}
	}
}
