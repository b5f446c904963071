//! Subscription registry
//!
//! A small named-event channel, independent of the computed graph. Every
//! observed object owns one (or shares one passed through
//! [`crate::ObserveOptions::subscription`]) and publishes `"__changed__"`
//! events on it.
//!
//! Emission never runs callbacks synchronously: [`Subscription::emit`] spawns
//! a task on the runtime executor that fires after the requested delay, calls
//! the callbacks registered at that moment and settles once every deferred
//! callback result has settled.

use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use core::time::Duration;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use futures::channel::oneshot;
use futures::future::{self, LocalBoxFuture};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{ObserveError, Result};
use crate::runtime::with_runtime;
use crate::value::Value;

/// Handle returned by [`Subscription::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for SubscriptionId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for SubscriptionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&self.0, f)
	}
}

type Callback<P> = Rc<dyn Fn(&P) -> Option<LocalBoxFuture<'static, Result<Value>>>>;

struct Entry<P> {
	id: SubscriptionId,
	callback: Callback<P>,
}

/// Registry of callbacks keyed by event name.
///
/// Cloning yields another handle to the same registry.
pub struct Subscription<P> {
	events: Rc<RefCell<HashMap<String, Vec<Entry<P>>>>>,
}

impl<P: 'static> Subscription<P> {
	pub fn new() -> Self {
		Self {
			events: Rc::new(RefCell::new(HashMap::new())),
		}
	}

	/// Register a callback for `name`.
	pub fn on<F>(&self, name: &str, callback: F) -> SubscriptionId
	where
		F: Fn(&P) + 'static,
	{
		self.insert(
			name,
			Rc::new(move |params: &P| {
				callback(params);
				None
			}),
		)
	}

	/// Register a callback whose result settles later.
	///
	/// The emission resolves with the results of all deferred callbacks, or
	/// rejects with the first error.
	pub fn on_deferred<F, Fut>(&self, name: &str, callback: F) -> SubscriptionId
	where
		F: Fn(&P) -> Fut + 'static,
		Fut: Future<Output = Result<Value>> + 'static,
	{
		self.insert(
			name,
			Rc::new(move |params: &P| {
				let pending: LocalBoxFuture<'static, Result<Value>> = Box::pin(callback(params));
				Some(pending)
			}),
		)
	}

	fn insert(&self, name: &str, callback: Callback<P>) -> SubscriptionId {
		let id = SubscriptionId::new();
		self.events
			.borrow_mut()
			.entry(name.to_owned())
			.or_default()
			.push(Entry { id, callback });
		id
	}

	/// Remove a callback. Returns false when `id` is not registered under `name`.
	pub fn off(&self, name: &str, id: SubscriptionId) -> bool {
		let mut events = self.events.borrow_mut();
		let Some(entries) = events.get_mut(name) else {
			return false;
		};
		match entries.iter().position(|entry| entry.id == id) {
			Some(index) => {
				entries.remove(index);
				true
			}
			None => false,
		}
	}

	/// Whether both handles refer to the same registry.
	pub fn ptr_eq(&self, other: &Subscription<P>) -> bool {
		Rc::ptr_eq(&self.events, &other.events)
	}

	pub fn listener_count(&self, name: &str) -> usize {
		self.events.borrow().get(name).map_or(0, Vec::len)
	}

	/// Fire `name` with `params` after `delay` (zero means the next turn).
	///
	/// The task is spawned even if the returned [`Emission`] is dropped.
	pub fn emit(&self, name: &str, params: P, delay: Duration) -> Emission {
		if self.listener_count(name) == 0 {
			return Emission::ready(Ok(Vec::new()));
		}

		let events = Rc::clone(&self.events);
		let name = name.to_owned();
		let (tx, rx) = oneshot::channel();

		with_runtime(|rt| {
			let sleep = rt.executor().sleep(delay);
			rt.spawn(Box::pin(async move {
				sleep.await;
				let callbacks: Vec<Callback<P>> = events
					.borrow()
					.get(&name)
					.map(|entries| entries.iter().map(|e| Rc::clone(&e.callback)).collect())
					.unwrap_or_default();
				let pending: Vec<_> = callbacks
					.iter()
					.filter_map(|callback| callback(&params))
					.collect();

				let result = future::try_join_all(pending).await;
				if let Err(Err(err)) = tx.send(result) {
					warn!(event = %name, "unobserved subscription rejection: {}", err);
				}
			}));
		});

		Emission::pending(rx)
	}
}

impl<P: 'static> Default for Subscription<P> {
	fn default() -> Self {
		Self::new()
	}
}

impl<P> Clone for Subscription<P> {
	fn clone(&self) -> Self {
		Self {
			events: Rc::clone(&self.events),
		}
	}
}

impl<P> fmt::Debug for Subscription<P> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let events = self.events.borrow();
		let mut names: Vec<&String> = events.keys().collect();
		names.sort();
		f.debug_struct("Subscription").field("events", &names).finish()
	}
}

/// Outcome of [`Subscription::emit`]: the results of deferred callbacks.
#[must_use = "emissions run regardless, await them to observe rejections"]
pub struct Emission {
	state: EmissionState,
}

enum EmissionState {
	Ready(Option<Result<Vec<Value>>>),
	Pending(oneshot::Receiver<Result<Vec<Value>>>),
}

impl Emission {
	fn ready(result: Result<Vec<Value>>) -> Self {
		Self {
			state: EmissionState::Ready(Some(result)),
		}
	}

	fn pending(rx: oneshot::Receiver<Result<Vec<Value>>>) -> Self {
		Self {
			state: EmissionState::Pending(rx),
		}
	}
}

impl Future for Emission {
	type Output = Result<Vec<Value>>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match &mut self.state {
			EmissionState::Ready(result) => {
				Poll::Ready(result.take().unwrap_or(Err(ObserveError::EmissionDropped)))
			}
			EmissionState::Pending(rx) => Pin::new(rx)
				.poll(cx)
				.map(|settled| settled.unwrap_or(Err(ObserveError::EmissionDropped))),
		}
	}
}

impl fmt::Debug for Emission {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = match self.state {
			EmissionState::Ready(_) => "ready",
			EmissionState::Pending(_) => "pending",
		};
		f.debug_struct("Emission").field("state", &state).finish()
	}
}
