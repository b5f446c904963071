//! Observation proxy
//!
//! [`observe`] wraps a plain object or array into an [`Observed`] handle. All
//! access goes through the handle:
//!
//! - [`Observed::get`] records the read against the computed function that is
//!   currently executing, if any.
//! - [`Observed::set`] detects effective changes, wraps nested data, publishes
//!   a `"__changed__"` event and re-runs (or batches) the functions that read
//!   the property during their latest run.
//!
//! The wrapped data is never handed out unwrapped: nested objects come back as
//! further `Observed` handles and everything else as owned [`Value`]s.

use core::fmt;
use core::time::Duration;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::batcher::BatchMode;
use crate::error::{ObserveError, Result};
use crate::hints::{ComputedId, ObjectId};
use crate::runtime::{try_with_runtime, with_runtime};
use crate::subscription::{Subscription, SubscriptionId};
use crate::value::{ChangeEvent, Map, Value};

/// Event published on an object's registry after every effective write.
pub const CHANGED_EVENT: &str = "__changed__";

/// Pseudo-property holding the length of an observed array.
pub const LENGTH: &str = "length";

/// Selects properties by name or by predicate.
#[derive(Clone)]
pub enum PropertyFilter {
	/// Matches the listed property names.
	Names(Vec<String>),
	/// Matches when the predicate returns true for `(name, current value)`.
	Predicate(Rc<dyn Fn(&str, &Value) -> bool>),
}

impl PropertyFilter {
	pub fn names<I, S>(names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		PropertyFilter::Names(names.into_iter().map(Into::into).collect())
	}

	pub fn predicate<F>(predicate: F) -> Self
	where
		F: Fn(&str, &Value) -> bool + 'static,
	{
		PropertyFilter::Predicate(Rc::new(predicate))
	}

	pub fn matches(&self, key: &str, value: &Value) -> bool {
		match self {
			PropertyFilter::Names(names) => names.iter().any(|name| name == key),
			PropertyFilter::Predicate(predicate) => predicate(key, value),
		}
	}
}

impl fmt::Debug for PropertyFilter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PropertyFilter::Names(names) => f.debug_tuple("Names").field(names).finish(),
			PropertyFilter::Predicate(_) => f.write_str("Predicate(..)"),
		}
	}
}

/// Options of [`observe`]. Nested objects are wrapped with the same options.
#[derive(Debug, Clone)]
pub struct ObserveOptions {
	/// Only these properties are watched
	pub props: Option<PropertyFilter>,
	/// These properties are never watched
	pub ignore: Option<PropertyFilter>,
	/// Wrap nested objects and arrays, including ones assigned later
	pub deep: bool,
	/// Tag nested objects with their key and parent and forward their change
	/// events upward
	pub bubble: bool,
	/// Bind method properties to the observed handle
	pub bind: bool,
	/// How dependents of a write are re-run
	pub batch: BatchMode,
	/// Registry to publish change events on instead of a fresh one
	pub subscription: Option<Subscription<ChangeEvent>>,
}

impl ObserveOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn props(mut self, filter: PropertyFilter) -> Self {
		self.props = Some(filter);
		self
	}

	pub fn ignore(mut self, filter: PropertyFilter) -> Self {
		self.ignore = Some(filter);
		self
	}

	pub fn deep(mut self, deep: bool) -> Self {
		self.deep = deep;
		self
	}

	pub fn bubble(mut self, bubble: bool) -> Self {
		self.bubble = bubble;
		self
	}

	pub fn bind(mut self, bind: bool) -> Self {
		self.bind = bind;
		self
	}

	pub fn batch(mut self, batch: impl Into<BatchMode>) -> Self {
		self.batch = batch.into();
		self
	}

	pub fn subscription(mut self, subscription: Subscription<ChangeEvent>) -> Self {
		self.subscription = Some(subscription);
		self
	}

	/// Whether reads and writes of `key` are intercepted.
	pub fn is_watched(&self, key: &str, value: &Value) -> bool {
		self.props
			.as_ref()
			.is_none_or(|filter| filter.matches(key, value))
			&& !self
				.ignore
				.as_ref()
				.is_some_and(|filter| filter.matches(key, value))
	}
}

impl Default for ObserveOptions {
	fn default() -> Self {
		Self {
			props: None,
			ignore: None,
			deep: true,
			bubble: false,
			bind: false,
			batch: BatchMode::Immediate,
			subscription: None,
		}
	}
}

/// Declarative subset of [`ObserveOptions`], loadable from settings files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserveConfig {
	pub props: Option<Vec<String>>,
	pub ignore: Option<Vec<String>>,
	pub deep: bool,
	pub bubble: bool,
	pub bind: bool,
	pub batch: BatchMode,
}

impl Default for ObserveConfig {
	fn default() -> Self {
		Self {
			props: None,
			ignore: None,
			deep: true,
			bubble: false,
			bind: false,
			batch: BatchMode::Immediate,
		}
	}
}

impl From<ObserveConfig> for ObserveOptions {
	fn from(config: ObserveConfig) -> Self {
		Self {
			props: config.props.map(PropertyFilter::Names),
			ignore: config.ignore.map(PropertyFilter::Names),
			deep: config.deep,
			bubble: config.bubble,
			bind: config.bind,
			batch: config.batch,
			subscription: None,
		}
	}
}

/// Storage behind an observed handle.
enum Target {
	Object(Map),
	/// Elements, plus any non-index properties set on the array
	Array { items: Vec<Value>, extra: Map },
}

/// Largest array length. Lengths past it are rejected.
const MAX_LENGTH: usize = u32::MAX as usize;

/// Canonical array index: decimal without sign or leading zeros, below
/// [`MAX_LENGTH`]. Any other key is a plain property of the array.
fn array_index(key: &str) -> Option<usize> {
	if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
		return None;
	}
	if !key.bytes().all(|b| b.is_ascii_digit()) {
		return None;
	}
	key.parse::<u32>()
		.ok()
		.map(|index| index as usize)
		.filter(|&index| index < MAX_LENGTH)
}

fn invalid_length(value: &Value) -> ObserveError {
	ObserveError::InvalidArgument(format!("invalid array length: {:?}", value))
}

fn parse_length(value: &Value) -> Result<usize> {
	value
		.as_i64()
		.and_then(|n| usize::try_from(n).ok())
		.filter(|&len| len <= MAX_LENGTH)
		.ok_or_else(|| invalid_length(value))
}

/// Pad `items` with nulls up to `len`, failing instead of aborting when the
/// allocation cannot be made.
fn grow(items: &mut Vec<Value>, len: usize) -> Result<()> {
	let additional = len.saturating_sub(items.len());
	items
		.try_reserve_exact(additional)
		.map_err(|_| invalid_length(&Value::from(len)))?;
	items.resize(len, Value::Null);
	Ok(())
}

impl Target {
	fn peek(&self, key: &str) -> Value {
		match self {
			Target::Object(map) => map.get(key).cloned().unwrap_or_default(),
			Target::Array { items, extra } => {
				if key == LENGTH {
					Value::from(items.len())
				} else if let Some(index) = array_index(key) {
					items.get(index).cloned().unwrap_or_default()
				} else {
					extra.get(key).cloned().unwrap_or_default()
				}
			}
		}
	}

	/// Store a value. Returns the `(index, value)` pairs dropped by a length
	/// truncation.
	fn store(&mut self, key: &str, value: Value) -> Result<Vec<(usize, Value)>> {
		match self {
			Target::Object(map) => {
				map.insert(key.to_owned(), value);
			}
			Target::Array { items, extra } => {
				if key == LENGTH {
					let len = parse_length(&value)?;
					if len < items.len() {
						let dropped = items.split_off(len);
						return Ok(dropped
							.into_iter()
							.enumerate()
							.map(|(offset, value)| (len + offset, value))
							.collect());
					}
					grow(items, len)?;
				} else if let Some(index) = array_index(key) {
					if index >= items.len() {
						let len = index.checked_add(1).ok_or_else(|| invalid_length(&value))?;
						grow(items, len)?;
					}
					items[index] = value;
				} else {
					extra.insert(key.to_owned(), value);
				}
			}
		}
		Ok(Vec::new())
	}

	fn keys(&self) -> Vec<String> {
		match self {
			Target::Object(map) => map.keys().cloned().collect(),
			Target::Array { items, extra } => (0..items.len())
				.map(|index| index.to_string())
				.chain(extra.keys().cloned())
				.collect(),
		}
	}

	fn entries(&self) -> Vec<(String, Value)> {
		self.keys()
			.into_iter()
			.map(|key| {
				let value = self.peek(&key);
				(key, value)
			})
			.collect()
	}
}

/// Weak bubbling link to the owning object.
struct ParentLink {
	key: String,
	parent: Weak<ObservedInner>,
}

pub(crate) struct ObservedInner {
	id: ObjectId,
	target: RefCell<Target>,
	/// Property name -> computed functions that read it, in first-read order
	dependents: RefCell<HashMap<String, Vec<ComputedId>>>,
	options: ObserveOptions,
	subscription: Subscription<ChangeEvent>,
	parent: RefCell<Option<ParentLink>>,
}

impl Drop for ObservedInner {
	fn drop(&mut self) {
		let id = self.id;
		try_with_runtime(|rt| {
			if let Ok(mut hints) = rt.hints.try_borrow_mut() {
				hints.forget_object(id);
			}
		});
	}
}

/// Handle to an observed object or array.
///
/// Cloning yields another handle to the same object.
#[derive(Clone)]
pub struct Observed {
	inner: Rc<ObservedInner>,
}

/// Wrap a plain object or array.
///
/// Observing an already observed value returns the same handle. Any other
/// kind of value is rejected.
pub fn observe(value: Value, options: ObserveOptions) -> Result<Observed> {
	match value {
		Value::Observed(observed) => Ok(observed),
		Value::Object(map) => Observed::wrap(Target::Object(map), options),
		Value::Array(items) => Observed::wrap(
			Target::Array {
				items,
				extra: Map::new(),
			},
			options,
		),
		other => Err(ObserveError::InvalidArgument(format!(
			"only objects and arrays can be observed, got {}",
			other.kind()
		))),
	}
}

impl Observed {
	fn wrap(target: Target, options: ObserveOptions) -> Result<Self> {
		let subscription = options.subscription.clone().unwrap_or_default();
		let observed = Self {
			inner: Rc::new(ObservedInner {
				id: ObjectId::new(),
				target: RefCell::new(target),
				dependents: RefCell::new(HashMap::new()),
				options,
				subscription,
				parent: RefCell::new(None),
			}),
		};

		let options = &observed.inner.options;
		let entries = observed.inner.target.borrow().entries();
		for (key, value) in entries {
			let replacement = match value {
				Value::Array(_) | Value::Object(_) | Value::Observed(_)
					if options.deep && options.is_watched(&key, &value) =>
				{
					let child = observe(value, options.clone())?;
					if options.bubble {
						child.attach_to(&observed, &key);
					}
					Value::Observed(child)
				}
				Value::Method(method) if options.bind && !method.is_ignored() => {
					Value::Method(method.bound_to(&observed))
				}
				_ => continue,
			};
			observed.inner.target.borrow_mut().store(&key, replacement)?;
		}

		debug!(
			object = ?observed.inner.id,
			array = observed.is_array(),
			"observing"
		);
		Ok(observed)
	}

	pub(crate) fn from_inner(inner: Rc<ObservedInner>) -> Self {
		Self { inner }
	}

	pub(crate) fn downgrade(&self) -> Weak<ObservedInner> {
		Rc::downgrade(&self.inner)
	}

	pub fn id(&self) -> ObjectId {
		self.inner.id
	}

	/// Whether both handles refer to the same object.
	pub fn ptr_eq(&self, other: &Observed) -> bool {
		Rc::ptr_eq(&self.inner, &other.inner)
	}

	pub fn is_array(&self) -> bool {
		matches!(*self.inner.target.borrow(), Target::Array { .. })
	}

	pub fn options(&self) -> &ObserveOptions {
		&self.inner.options
	}

	/// Read a property, tracking it when a computed function is executing.
	///
	/// Missing properties read as [`Value::Null`].
	pub fn get(&self, key: &str) -> Value {
		let value = self.get_untracked(key);
		if self.inner.options.is_watched(key, &value) {
			self.track(key);
		}
		value
	}

	/// Read a property without recording a dependency.
	pub fn get_untracked(&self, key: &str) -> Value {
		self.inner.target.borrow().peek(key)
	}

	pub fn get_index(&self, index: usize) -> Value {
		self.get(&index.to_string())
	}

	fn track(&self, key: &str) {
		let Some(id) = with_runtime(|rt| rt.track(self.inner.id, key)) else {
			return;
		};
		let mut dependents = self.inner.dependents.borrow_mut();
		let set = dependents.entry(key.to_owned()).or_default();
		if !set.contains(&id) {
			set.push(id);
		}
	}

	/// Write a property.
	///
	/// Unwatched properties are stored as-is. Watched ones only count as a
	/// change when the new value is not strictly equal to the old one, except
	/// `length` on arrays which always does. A change publishes a
	/// [`CHANGED_EVENT`] and re-runs the functions that read the property.
	///
	/// Errors from re-run functions (including queue overflow) are returned
	/// here; the write itself has already been applied.
	pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
		let value = value.into();
		let options = &self.inner.options;

		if !options.is_watched(key, &value) {
			self.inner.target.borrow_mut().store(key, value)?;
			return Ok(());
		}

		let is_length = key == LENGTH && self.is_array();
		let old = self.get_untracked(key);
		if !is_length && old.same_as(&value) {
			return Ok(());
		}

		let stored = match value {
			Value::Array(_) | Value::Object(_) | Value::Observed(_) if options.deep => {
				let child = observe(value, options.clone())?;
				if options.bubble {
					child.attach_to(self, key);
				}
				Value::Observed(child)
			}
			other => other,
		};

		let dropped = self.inner.target.borrow_mut().store(key, stored.clone())?;

		if let Value::Observed(previous) = &old {
			if !matches!(&stored, Value::Observed(current) if current.ptr_eq(previous)) {
				previous.detach_from(self, key);
			}
		}
		for (index, value) in dropped {
			if let Value::Observed(child) = value {
				child.detach_from(self, &index.to_string());
			}
		}

		self.publish(ChangeEvent::new(key, stored));
		self.notify_dependents(key)
	}

	pub fn set_index(&self, index: usize, value: impl Into<Value>) -> Result<()> {
		self.set(&index.to_string(), value)
	}

	/// Property names in storage order, without tracking.
	pub fn keys(&self) -> Vec<String> {
		self.inner.target.borrow().keys()
	}

	/// Invoke the method stored under `name` with this object as receiver.
	pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
		match self.get(name) {
			Value::Method(method) => method.call_with(self, args),
			_ => Err(ObserveError::NotAMethod(name.to_owned())),
		}
	}

	fn publish(&self, event: ChangeEvent) {
		let _ = self
			.inner
			.subscription
			.emit(CHANGED_EVENT, event.clone(), Duration::ZERO);
		if !self.inner.options.bubble {
			return;
		}

		let mut visited = vec![self.inner.id];
		let mut notified = vec![self.inner.subscription.clone()];
		let mut current = self.clone();
		let mut event = event;
		while let Some((key, parent)) = current.parent() {
			if visited.contains(&parent.inner.id) {
				break;
			}
			visited.push(parent.inner.id);
			event = event.nested_under(&key);
			if !notified.iter().any(|s| s.ptr_eq(&parent.inner.subscription)) {
				let _ = parent
					.inner
					.subscription
					.emit(CHANGED_EVENT, event.clone(), Duration::ZERO);
				notified.push(parent.inner.subscription.clone());
			}
			current = parent;
		}
	}

	fn notify_dependents(&self, key: &str) -> Result<()> {
		let snapshot = match self.inner.dependents.borrow().get(key) {
			Some(set) if !set.is_empty() => set.clone(),
			_ => return Ok(()),
		};
		let batch = self.inner.options.batch;

		with_runtime(|rt| -> Result<()> {
			let current = rt.current_computed();
			for id in snapshot {
				if rt.should_prune(id, self.inner.id, key) {
					self.remove_dependent(key, id);
				} else if Some(id) != current {
					if batch.is_batched() {
						rt.enqueue(id, batch);
					} else {
						rt.notify(id)?;
					}
				}
			}
			Ok(())
		})
	}

	fn remove_dependent(&self, key: &str, id: ComputedId) {
		let mut dependents = self.inner.dependents.borrow_mut();
		if let Some(set) = dependents.get_mut(key) {
			set.retain(|&dependent| dependent != id);
			if set.is_empty() {
				dependents.remove(key);
			}
		}
	}

	/// Number of functions currently registered as dependents of `key`.
	///
	/// Stale entries are only dropped when `key` is next written.
	pub fn dependent_count(&self, key: &str) -> usize {
		self.inner.dependents.borrow().get(key).map_or(0, Vec::len)
	}

	fn attach_to(&self, parent: &Observed, key: &str) {
		*self.inner.parent.borrow_mut() = Some(ParentLink {
			key: key.to_owned(),
			parent: parent.downgrade(),
		});
	}

	/// Clear the bubbling link if it still points at `parent.key`.
	fn detach_from(&self, parent: &Observed, key: &str) {
		let mut link = self.inner.parent.borrow_mut();
		let linked_here = link
			.as_ref()
			.is_some_and(|l| l.key == key && l.parent.ptr_eq(&parent.downgrade()));
		if linked_here {
			*link = None;
		}
	}

	/// Owning object and the key this object is stored under, when bubbling.
	pub fn parent(&self) -> Option<(String, Observed)> {
		let link = self.inner.parent.borrow();
		let link = link.as_ref()?;
		let parent = link.parent.upgrade()?;
		Some((link.key.clone(), Observed::from_inner(parent)))
	}

	/// Registry this object publishes its change events on.
	pub fn subscription(&self) -> Subscription<ChangeEvent> {
		self.inner.subscription.clone()
	}

	pub fn subscribe_to_changes<F>(&self, callback: F) -> SubscriptionId
	where
		F: Fn(&ChangeEvent) + 'static,
	{
		self.inner.subscription.on(CHANGED_EVENT, callback)
	}

	pub fn unsubscribe_to_changes(&self, id: SubscriptionId) -> bool {
		self.inner.subscription.off(CHANGED_EVENT, id)
	}

	/// Untracked JSON snapshot of the object.
	pub fn to_json(&self) -> serde_json::Value {
		self.to_json_inner(&mut Vec::new())
	}

	pub(crate) fn to_json_inner(&self, seen: &mut Vec<ObjectId>) -> serde_json::Value {
		if seen.contains(&self.inner.id) {
			return serde_json::Value::Null;
		}
		seen.push(self.inner.id);
		let json = match &*self.inner.target.borrow() {
			Target::Object(map) => serde_json::Value::Object(
				map.iter()
					.map(|(key, value)| (key.clone(), value.to_json_inner(seen)))
					.collect(),
			),
			Target::Array { items, .. } => {
				serde_json::Value::Array(items.iter().map(|v| v.to_json_inner(seen)).collect())
			}
		};
		seen.pop();
		json
	}
}

impl fmt::Debug for Observed {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Observed")
			.field("id", &self.inner.id)
			.field("array", &self.is_array())
			.field("keys", &self.keys())
			.finish()
	}
}

impl Serialize for Observed {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		self.to_json().serialize(serializer)
	}
}
