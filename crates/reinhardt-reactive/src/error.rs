//! Error types for the reactive engine.

use thiserror::Error;

/// Result type for reactive operations.
pub type Result<T> = std::result::Result<T, ObserveError>;

/// Errors raised by observation, computed scheduling and subscriptions.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ObserveError {
	/// A value of the wrong kind was passed to an operation.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// The computed queue never stabilized within one flush.
	///
	/// `tail` holds `(queue position, function name)` pairs for the last
	/// functions that were enqueued before the flush was aborted.
	#[error("Computed queue overflow (limit {limit})! Last {} functions in the queue:{}", .tail.len(), render_tail(.tail))]
	QueueOverflow {
		/// Ceiling that was exceeded.
		limit: usize,
		/// Last queued functions, oldest first.
		tail: Vec<(usize, String)>,
	},

	/// A detached method was invoked without a receiver.
	#[error("method is not bound to an observed object")]
	UnboundMethod,

	/// The property addressed by a call does not hold a method.
	#[error("property '{0}' is not a method")]
	NotAMethod(String),

	/// A subscription callback rejected its deferred result.
	#[error("subscription callback rejected: {0}")]
	Rejected(String),

	/// The task driving an emission was dropped before it settled.
	#[error("emission was dropped before it settled")]
	EmissionDropped,
}

fn render_tail(tail: &[(usize, String)]) -> String {
	tail.iter()
		.map(|(position, name)| format!("\n{}: {}", position, name))
		.collect()
}
