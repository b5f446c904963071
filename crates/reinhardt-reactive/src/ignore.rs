//! Opting values out of observation.

use std::rc::Rc;

use crate::computed::Computed;
use crate::error::{ObserveError, Result};
use crate::observe::Observed;
use crate::runtime::with_runtime;
use crate::value::Value;

/// Values that can be excluded from tracking or wrapping.
pub trait Ignorable: Sized {
	fn ignore(self) -> Result<Self>;
}

impl Ignorable for Value {
	/// Plain objects and arrays become [`Value::Ignored`] and are stored
	/// unwrapped, methods are skipped by `bind`. Scalars are rejected.
	fn ignore(self) -> Result<Self> {
		match self {
			Value::Object(_) | Value::Array(_) => Ok(Value::Ignored(Rc::new(self))),
			Value::Ignored(_) => Ok(self),
			Value::Method(method) => Ok(Value::Method(method.into_ignored())),
			Value::Observed(observed) => observed.ignore().map(Value::Observed),
			other => Err(ObserveError::InvalidArgument(format!(
				"only objects and functions can be ignored, got {}",
				other.kind()
			))),
		}
	}
}

impl Ignorable for Observed {
	/// Reads of this object are no longer tracked.
	fn ignore(self) -> Result<Self> {
		with_runtime(|rt| rt.hints.borrow_mut().ignore_object(self.id()));
		Ok(self)
	}
}

impl Ignorable for Computed {
	/// Reads made by this function are no longer tracked.
	fn ignore(self) -> Result<Self> {
		self.stop_tracking();
		Ok(self)
	}
}

/// Exclude `target` from tracking or wrapping.
pub fn ignore<T: Ignorable>(target: T) -> Result<T> {
	target.ignore()
}
