//! Array operations on observed arrays.
//!
//! Every operation is composed from tracked reads and intercepted writes the
//! same way the standard array algorithms are specified: elements are moved
//! with index writes and the operation finishes with a `length` write, which
//! always counts as a change. Dependents of `length` therefore re-run after
//! every structural change.

use crate::error::{ObserveError, Result};
use crate::observe::{Observed, LENGTH};
use crate::value::Value;

impl Observed {
	fn ensure_array(&self, operation: &str) -> Result<()> {
		if self.is_array() {
			Ok(())
		} else {
			Err(ObserveError::InvalidArgument(format!(
				"{} requires an observed array",
				operation
			)))
		}
	}

	/// Tracked element count. Reads `length`.
	pub fn len(&self) -> usize {
		self.get(LENGTH)
			.as_i64()
			.and_then(|n| usize::try_from(n).ok())
			.unwrap_or(0)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Append elements. Returns the new length.
	pub fn push<I>(&self, items: I) -> Result<usize>
	where
		I: IntoIterator,
		I::Item: Into<Value>,
	{
		self.ensure_array("push")?;
		let mut len = self.len();
		for item in items {
			self.set_index(len, item)?;
			len += 1;
		}
		self.set(LENGTH, len)?;
		Ok(len)
	}

	/// Remove and return the last element, [`Value::Null`] when empty.
	pub fn pop(&self) -> Result<Value> {
		self.ensure_array("pop")?;
		let len = self.len();
		if len == 0 {
			self.set(LENGTH, 0)?;
			return Ok(Value::Null);
		}
		let last = self.get_index(len - 1);
		self.set(LENGTH, len - 1)?;
		Ok(last)
	}

	/// Remove and return the first element, [`Value::Null`] when empty.
	pub fn shift(&self) -> Result<Value> {
		self.ensure_array("shift")?;
		let len = self.len();
		if len == 0 {
			self.set(LENGTH, 0)?;
			return Ok(Value::Null);
		}
		let first = self.get_index(0);
		for from in 1..len {
			self.set_index(from - 1, self.get_index(from))?;
		}
		self.set(LENGTH, len - 1)?;
		Ok(first)
	}

	/// Prepend elements, keeping their order. Returns the new length.
	pub fn unshift<I>(&self, items: I) -> Result<usize>
	where
		I: IntoIterator,
		I::Item: Into<Value>,
	{
		self.ensure_array("unshift")?;
		let items: Vec<Value> = items.into_iter().map(Into::into).collect();
		let len = self.len();
		let count = items.len();
		if count > 0 {
			for from in (0..len).rev() {
				self.set_index(from + count, self.get_index(from))?;
			}
			for (index, item) in items.into_iter().enumerate() {
				self.set_index(index, item)?;
			}
		}
		self.set(LENGTH, len + count)?;
		Ok(len + count)
	}

	/// Remove `delete_count` elements starting at `start` and insert `items`
	/// in their place. Returns the removed elements.
	///
	/// A negative `start` counts from the end. Both bounds are clamped to the
	/// array.
	pub fn splice<I>(&self, start: i64, delete_count: usize, items: I) -> Result<Vec<Value>>
	where
		I: IntoIterator,
		I::Item: Into<Value>,
	{
		self.ensure_array("splice")?;
		let items: Vec<Value> = items.into_iter().map(Into::into).collect();
		let len = self.len();
		let start = if start < 0 {
			len.saturating_sub(start.unsigned_abs() as usize)
		} else {
			(start as usize).min(len)
		};
		let delete_count = delete_count.min(len - start);
		let item_count = items.len();

		let removed: Vec<Value> = (start..start + delete_count)
			.map(|index| self.get_index(index))
			.collect();

		if item_count < delete_count {
			for from in (start + delete_count)..len {
				self.set_index(from - delete_count + item_count, self.get_index(from))?;
			}
		} else if item_count > delete_count {
			for from in ((start + delete_count)..len).rev() {
				self.set_index(from - delete_count + item_count, self.get_index(from))?;
			}
		}

		for (offset, item) in items.into_iter().enumerate() {
			self.set_index(start + offset, item)?;
		}
		self.set(LENGTH, len - delete_count + item_count)?;
		Ok(removed)
	}

	/// Fold over the elements with tracked reads.
	pub fn reduce<T, F>(&self, init: T, mut f: F) -> T
	where
		F: FnMut(T, Value) -> T,
	{
		let len = self.len();
		(0..len).fold(init, |acc, index| f(acc, self.get_index(index)))
	}

	/// Elements, read with tracking.
	pub fn values(&self) -> Vec<Value> {
		(0..self.len()).map(|index| self.get_index(index)).collect()
	}
}
