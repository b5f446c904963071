//! Side-table metadata for observed objects and computed functions.
//!
//! Nothing here is stored on the objects or closures themselves. Every record
//! is keyed by identity, and removing a computed record is what disposal means:
//! a missing record reads as "disposed".

use core::sync::atomic::{AtomicUsize, Ordering};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Unique identifier of a registered computed function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComputedId(usize);

impl ComputedId {
	/// Create a new unique ComputedId
	pub fn new() -> Self {
		static COUNTER: AtomicUsize = AtomicUsize::new(0);
		Self(COUNTER.fetch_add(1, Ordering::Relaxed))
	}
}

impl Default for ComputedId {
	fn default() -> Self {
		Self::new()
	}
}

/// Unique identifier of an observed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(usize);

impl ObjectId {
	/// Create a new unique ObjectId
	pub fn new() -> Self {
		static COUNTER: AtomicUsize = AtomicUsize::new(0);
		Self(COUNTER.fetch_add(1, Ordering::Relaxed))
	}
}

impl Default for ObjectId {
	fn default() -> Self {
		Self::new()
	}
}

/// Per-function record.
#[derive(Debug, Default)]
pub(crate) struct ComputedHints {
	/// Diagnostic name used in overflow reports
	pub(crate) name: String,
	/// Properties read during the latest run, per object.
	///
	/// `None` until the function is first notified.
	pub(crate) tracker: Option<HashMap<ObjectId, HashSet<String>>>,
	/// Currently sitting in the batch queue
	pub(crate) batched: bool,
	/// Reads made by this function are not tracked
	pub(crate) ignored: bool,
}

impl ComputedHints {
	fn has_read(&self, object: ObjectId, key: &str) -> bool {
		self.tracker
			.as_ref()
			.and_then(|tracker| tracker.get(&object))
			.is_some_and(|keys| keys.contains(key))
	}
}

#[derive(Debug, Default)]
pub(crate) struct HintStore {
	computed: BTreeMap<ComputedId, ComputedHints>,
	ignored_objects: HashSet<ObjectId>,
}

impl HintStore {
	pub(crate) fn insert(&mut self, id: ComputedId, name: String) {
		self.computed.insert(
			id,
			ComputedHints {
				name,
				..ComputedHints::default()
			},
		);
	}

	pub(crate) fn remove(&mut self, id: ComputedId) -> Option<ComputedHints> {
		self.computed.remove(&id)
	}

	pub(crate) fn is_disposed(&self, id: ComputedId) -> bool {
		!self.computed.contains_key(&id)
	}

	pub(crate) fn name(&self, id: ComputedId) -> Option<&str> {
		self.computed.get(&id).map(|hints| hints.name.as_str())
	}

	pub(crate) fn ensure_tracker(&mut self, id: ComputedId) {
		if let Some(hints) = self.computed.get_mut(&id) {
			hints.tracker.get_or_insert_with(HashMap::new);
		}
	}

	/// Starts a fresh tracking set for a new run.
	pub(crate) fn reset_tracker(&mut self, id: ComputedId) {
		if let Some(hints) = self.computed.get_mut(&id) {
			hints.tracker = Some(HashMap::new());
		}
	}

	/// Records a read. Returns false when the function does not track reads.
	pub(crate) fn track(&mut self, id: ComputedId, object: ObjectId, key: &str) -> bool {
		let Some(hints) = self.computed.get_mut(&id) else {
			return false;
		};
		if hints.ignored {
			return false;
		}
		hints
			.tracker
			.get_or_insert_with(HashMap::new)
			.entry(object)
			.or_default()
			.insert(key.to_owned());
		true
	}

	/// A dependent is stale when it was disposed, or when it has run since it
	/// was registered on `(object, key)` and did not read that property.
	pub(crate) fn should_prune(&self, id: ComputedId, object: ObjectId, key: &str) -> bool {
		match self.computed.get(&id) {
			None => true,
			Some(hints) => hints.tracker.is_some() && !hints.has_read(object, key),
		}
	}

	pub(crate) fn is_batched(&self, id: ComputedId) -> bool {
		self.computed.get(&id).is_some_and(|hints| hints.batched)
	}

	pub(crate) fn set_batched(&mut self, id: ComputedId, batched: bool) {
		if let Some(hints) = self.computed.get_mut(&id) {
			hints.batched = batched;
		}
	}

	pub(crate) fn ignore_computed(&mut self, id: ComputedId) {
		if let Some(hints) = self.computed.get_mut(&id) {
			hints.ignored = true;
		}
	}

	pub(crate) fn ignore_object(&mut self, object: ObjectId) {
		self.ignored_objects.insert(object);
	}

	pub(crate) fn is_object_ignored(&self, object: ObjectId) -> bool {
		self.ignored_objects.contains(&object)
	}

	/// Drops the records of an object that no longer exists.
	pub(crate) fn forget_object(&mut self, object: ObjectId) {
		self.ignored_objects.remove(&object);
	}

	/// Properties of `object` read by `id` during its latest run (for testing)
	#[cfg(test)]
	pub(crate) fn tracked_keys(&self, id: ComputedId, object: ObjectId) -> Vec<String> {
		let mut keys: Vec<String> = self
			.computed
			.get(&id)
			.and_then(|hints| hints.tracker.as_ref())
			.and_then(|tracker| tracker.get(&object))
			.map(|keys| keys.iter().cloned().collect())
			.unwrap_or_default();
		keys.sort();
		keys
	}
}
