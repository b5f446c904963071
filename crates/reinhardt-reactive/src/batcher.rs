//! Change batching
//!
//! Objects observed with a batch mode do not re-run their dependents on every
//! write. Dependents are appended to a single pending batch instead, and one
//! flush is scheduled on the executor when the batch goes from empty to
//! non-empty. Every write made before the flush runs coalesces into it, so
//! each function runs at most once per flush.

use core::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::error::Result;
use crate::hints::ComputedId;
use crate::runtime::{try_with_runtime, Runtime};

/// When dependents of a write are re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
	/// Synchronously, through the computed queue
	#[default]
	Immediate,
	/// In a flush scheduled for the next executor turn
	Microtask,
	/// In a flush scheduled after the given number of milliseconds
	Timer(u64),
}

impl BatchMode {
	pub fn is_batched(self) -> bool {
		!matches!(self, BatchMode::Immediate)
	}

	fn delay(self) -> Duration {
		match self {
			BatchMode::Timer(ms) => Duration::from_millis(ms),
			_ => Duration::ZERO,
		}
	}
}

impl From<bool> for BatchMode {
	fn from(batch: bool) -> Self {
		if batch {
			BatchMode::Microtask
		} else {
			BatchMode::Immediate
		}
	}
}

impl From<u64> for BatchMode {
	fn from(ms: u64) -> Self {
		BatchMode::Timer(ms)
	}
}

impl Runtime {
	/// Append a computed function to the pending batch.
	pub(crate) fn enqueue(&self, id: ComputedId, mode: BatchMode) {
		if self.hints.borrow().is_batched(id) {
			return;
		}

		let schedule = {
			let mut batch = self.batch_queue.borrow_mut();
			let schedule = batch.is_none();
			batch.get_or_insert_with(Vec::new).push(id);
			schedule
		};
		self.hints.borrow_mut().set_batched(id, true);

		if schedule {
			self.schedule_flush(mode.delay());
		}
	}

	fn schedule_flush(&self, delay: Duration) {
		trace!(delay_ms = delay.as_millis() as u64, "scheduling batch flush");
		let sleep = self.executor().sleep(delay);
		self.spawn(Box::pin(async move {
			sleep.await;
			if let Some(Err(err)) = try_with_runtime(Runtime::flush_batch) {
				warn!("batched computation failed: {}", err);
			}
		}));
	}

	/// Run every batched function in insertion order.
	///
	/// Functions enqueued while the flush runs start a new batch.
	pub(crate) fn flush_batch(&self) -> Result<()> {
		let Some(batch) = self.batch_queue.borrow_mut().take() else {
			return Ok(());
		};
		trace!(functions = batch.len(), "flushing batch");

		for (position, id) in batch.iter().enumerate() {
			let result = self.notify(*id);
			self.hints.borrow_mut().set_batched(*id, false);
			if let Err(err) = result {
				// Functions left behind may be enqueued again later
				for rest in &batch[position + 1..] {
					self.hints.borrow_mut().set_batched(*rest, false);
				}
				return Err(err);
			}
		}
		Ok(())
	}

	/// Flush the pending batch now and drive any deferred work.
	pub fn process(&self) -> Result<()> {
		let result = self.flush_batch();
		self.executor().run_pending();
		result
	}

	/// Number of functions waiting in the batch (for testing)
	pub fn pending_batch_len(&self) -> usize {
		self.batch_queue.borrow().as_ref().map_or(0, Vec::len)
	}
}
