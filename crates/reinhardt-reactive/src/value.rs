//! Dynamic values stored in observed objects.
//!
//! `Value` is the data model behind [`Observed`]: plain data (scalars, plain
//! arrays and plain objects), handles to other observed objects, callable
//! [`Method`]s and [`Value::Ignored`] payloads that opt out of wrapping.
//!
//! Plain `Array`/`Object` values are owned data. When they are stored into a
//! deep-observed object they are wrapped into a fresh [`Observed`] handle, so
//! the caller never keeps a live, untracked alias to observed state.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Serialize, Serializer};

use crate::error::{ObserveError, Result};
use crate::hints::ObjectId;
use crate::observe::{Observed, ObservedInner};

/// Field map of a plain object.
pub type Map = BTreeMap<String, Value>;

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
	/// Absent or empty value.
	#[default]
	Null,
	/// Boolean.
	Bool(bool),
	/// Integral number.
	Int(i64),
	/// Floating point number.
	Float(f64),
	/// Text.
	String(String),
	/// Plain, unobserved array.
	Array(Vec<Value>),
	/// Plain, unobserved object.
	Object(Map),
	/// Handle to an observed object or array.
	Observed(Observed),
	/// Callable property.
	Method(Method),
	/// Payload excluded from deep wrapping by [`crate::ignore`].
	Ignored(Rc<Value>),
}

impl Value {
	/// Short name of the variant, used in error messages.
	pub fn kind(&self) -> &'static str {
		match self {
			Value::Null => "null",
			Value::Bool(_) => "boolean",
			Value::Int(_) => "integer",
			Value::Float(_) => "float",
			Value::String(_) => "string",
			Value::Array(_) => "array",
			Value::Object(_) => "object",
			Value::Observed(_) => "observed object",
			Value::Method(_) => "method",
			Value::Ignored(_) => "ignored value",
		}
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	/// Whether this is a plain array or object that deep observation would wrap.
	pub fn is_plain_compound(&self) -> bool {
		matches!(self, Value::Array(_) | Value::Object(_))
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Value::Bool(b) => Some(*b),
			_ => None,
		}
	}

	/// Integral view of a number. Floats convert only when they have no
	/// fractional part.
	pub fn as_i64(&self) -> Option<i64> {
		match self {
			Value::Int(i) => Some(*i),
			Value::Float(f) if f.is_finite() && f.fract() == 0.0 => {
				if *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
					Some(*f as i64)
				} else {
					None
				}
			}
			_ => None,
		}
	}

	pub fn as_f64(&self) -> Option<f64> {
		match self {
			Value::Int(i) => Some(*i as f64),
			Value::Float(f) => Some(*f),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::String(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_observed(&self) -> Option<&Observed> {
		match self {
			Value::Observed(observed) => Some(observed),
			_ => None,
		}
	}

	pub fn as_method(&self) -> Option<&Method> {
		match self {
			Value::Method(method) => Some(method),
			_ => None,
		}
	}

	/// Strict equality used by write interception.
	///
	/// Scalars compare by value, handles and methods by identity. Plain arrays
	/// and objects are fresh identities and never compare equal, so assigning
	/// one always counts as a change.
	pub fn same_as(&self, other: &Value) -> bool {
		match (self, other) {
			(Value::Null, Value::Null) => true,
			(Value::Bool(a), Value::Bool(b)) => a == b,
			(Value::String(a), Value::String(b)) => a == b,
			(Value::Observed(a), Value::Observed(b)) => a.ptr_eq(b),
			(Value::Method(a), Value::Method(b)) => a.ptr_eq(b),
			(Value::Ignored(a), Value::Ignored(b)) => Rc::ptr_eq(a, b),
			(a, b) => match (a.as_number(), b.as_number()) {
				(Some(x), Some(y)) => x == y,
				_ => false,
			},
		}
	}

	fn as_number(&self) -> Option<f64> {
		match self {
			Value::Int(_) | Value::Float(_) => self.as_f64(),
			_ => None,
		}
	}

	/// Untracked JSON snapshot. Methods become `null`, and so do references
	/// back to an object that is already being serialized.
	pub fn to_json(&self) -> serde_json::Value {
		self.to_json_inner(&mut Vec::new())
	}

	pub(crate) fn to_json_inner(&self, seen: &mut Vec<ObjectId>) -> serde_json::Value {
		match self {
			Value::Null | Value::Method(_) => serde_json::Value::Null,
			Value::Bool(b) => serde_json::Value::Bool(*b),
			Value::Int(i) => serde_json::Value::from(*i),
			Value::Float(f) => serde_json::Number::from_f64(*f)
				.map(serde_json::Value::Number)
				.unwrap_or(serde_json::Value::Null),
			Value::String(s) => serde_json::Value::String(s.clone()),
			Value::Array(items) => {
				serde_json::Value::Array(items.iter().map(|v| v.to_json_inner(seen)).collect())
			}
			Value::Object(map) => serde_json::Value::Object(
				map.iter()
					.map(|(k, v)| (k.clone(), v.to_json_inner(seen)))
					.collect(),
			),
			Value::Observed(observed) => observed.to_json_inner(seen),
			Value::Ignored(inner) => inner.to_json_inner(seen),
		}
	}
}

impl fmt::Debug for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Value::Null => f.write_str("Null"),
			Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
			Value::Int(i) => f.debug_tuple("Int").field(i).finish(),
			Value::Float(x) => f.debug_tuple("Float").field(x).finish(),
			Value::String(s) => f.debug_tuple("String").field(s).finish(),
			Value::Array(items) => f.debug_tuple("Array").field(items).finish(),
			Value::Object(map) => f.debug_tuple("Object").field(map).finish(),
			Value::Observed(observed) => fmt::Debug::fmt(observed, f),
			Value::Method(method) => fmt::Debug::fmt(method, f),
			Value::Ignored(inner) => f.debug_tuple("Ignored").field(inner).finish(),
		}
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Value::Array(a), Value::Array(b)) => a == b,
			(Value::Object(a), Value::Object(b)) => a == b,
			(Value::Ignored(a), Value::Ignored(b)) => a == b,
			_ => self.same_as(other),
		}
	}
}

impl PartialEq<i64> for Value {
	fn eq(&self, other: &i64) -> bool {
		self.same_as(&Value::Int(*other))
	}
}

impl PartialEq<i32> for Value {
	fn eq(&self, other: &i32) -> bool {
		self.same_as(&Value::Int(i64::from(*other)))
	}
}

impl PartialEq<f64> for Value {
	fn eq(&self, other: &f64) -> bool {
		self.same_as(&Value::Float(*other))
	}
}

impl PartialEq<bool> for Value {
	fn eq(&self, other: &bool) -> bool {
		matches!(self, Value::Bool(b) if b == other)
	}
}

impl PartialEq<&str> for Value {
	fn eq(&self, other: &&str) -> bool {
		matches!(self, Value::String(s) if s == other)
	}
}

impl Serialize for Value {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		self.to_json().serialize(serializer)
	}
}

impl From<bool> for Value {
	fn from(value: bool) -> Self {
		Value::Bool(value)
	}
}

impl From<i32> for Value {
	fn from(value: i32) -> Self {
		Value::Int(i64::from(value))
	}
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Value::Int(value)
	}
}

impl From<u32> for Value {
	fn from(value: u32) -> Self {
		Value::Int(i64::from(value))
	}
}

impl From<usize> for Value {
	fn from(value: usize) -> Self {
		i64::try_from(value)
			.map(Value::Int)
			.unwrap_or(Value::Float(value as f64))
	}
}

impl From<f64> for Value {
	fn from(value: f64) -> Self {
		Value::Float(value)
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Value::String(value.to_owned())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Value::String(value)
	}
}

impl From<Vec<Value>> for Value {
	fn from(value: Vec<Value>) -> Self {
		Value::Array(value)
	}
}

impl From<Map> for Value {
	fn from(value: Map) -> Self {
		Value::Object(value)
	}
}

impl From<Observed> for Value {
	fn from(value: Observed) -> Self {
		Value::Observed(value)
	}
}

impl From<Method> for Value {
	fn from(value: Method) -> Self {
		Value::Method(value)
	}
}

impl<T: Into<Value>> From<Option<T>> for Value {
	fn from(value: Option<T>) -> Self {
		value.map(Into::into).unwrap_or(Value::Null)
	}
}

impl From<serde_json::Value> for Value {
	fn from(value: serde_json::Value) -> Self {
		match value {
			serde_json::Value::Null => Value::Null,
			serde_json::Value::Bool(b) => Value::Bool(b),
			serde_json::Value::Number(n) => match n.as_i64() {
				Some(i) => Value::Int(i),
				None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
			},
			serde_json::Value::String(s) => Value::String(s),
			serde_json::Value::Array(items) => {
				Value::Array(items.into_iter().map(Value::from).collect())
			}
			serde_json::Value::Object(map) => Value::Object(
				map.into_iter()
					.map(|(k, v)| (k, Value::from(v)))
					.collect(),
			),
		}
	}
}

/// Function stored as a property of an observed object.
pub type MethodFn = dyn Fn(&Observed, &[Value]) -> Result<Value>;

/// A callable property.
///
/// The function receives its receiver (`this`) explicitly. Objects observed
/// with `bind` rebind their methods to the observed handle, so a method
/// taken out of the object can still be invoked with [`Method::invoke`].
#[derive(Clone)]
pub struct Method {
	func: Rc<MethodFn>,
	receiver: Option<Weak<ObservedInner>>,
	ignored: bool,
}

impl Method {
	pub fn new<F>(func: F) -> Self
	where
		F: Fn(&Observed, &[Value]) -> Result<Value> + 'static,
	{
		Self {
			func: Rc::new(func),
			receiver: None,
			ignored: false,
		}
	}

	/// Calls the method with an explicit receiver.
	pub fn call_with(&self, this: &Observed, args: &[Value]) -> Result<Value> {
		(self.func)(this, args)
	}

	/// Calls a bound method on the receiver it was bound to.
	pub fn invoke(&self, args: &[Value]) -> Result<Value> {
		let this = self
			.receiver
			.as_ref()
			.and_then(Weak::upgrade)
			.map(Observed::from_inner)
			.ok_or(ObserveError::UnboundMethod)?;
		self.call_with(&this, args)
	}

	pub fn is_bound(&self) -> bool {
		self.receiver
			.as_ref()
			.is_some_and(|receiver| receiver.strong_count() > 0)
	}

	pub fn is_ignored(&self) -> bool {
		self.ignored
	}

	/// Same function and same receiver.
	pub fn ptr_eq(&self, other: &Method) -> bool {
		Rc::ptr_eq(&self.func, &other.func)
			&& match (&self.receiver, &other.receiver) {
				(Some(a), Some(b)) => a.ptr_eq(b),
				(None, None) => true,
				_ => false,
			}
	}

	pub(crate) fn bound_to(&self, receiver: &Observed) -> Self {
		Self {
			func: Rc::clone(&self.func),
			receiver: Some(receiver.downgrade()),
			ignored: self.ignored,
		}
	}

	pub(crate) fn into_ignored(mut self) -> Self {
		self.ignored = true;
		self
	}
}

impl fmt::Debug for Method {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Method")
			.field("bound", &self.is_bound())
			.field("ignored", &self.ignored)
			.finish()
	}
}

/// Payload of the `"__changed__"` event.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
	/// Property of the receiving object that changed, or that leads to the
	/// nested object that changed.
	pub key: String,
	/// New value of the changed property.
	pub value: Value,
	/// Key path from the receiving object down to the changed property.
	pub path: Vec<String>,
}

impl ChangeEvent {
	pub fn new(key: impl Into<String>, value: Value) -> Self {
		let key = key.into();
		Self {
			path: vec![key.clone()],
			key,
			value,
		}
	}

	/// Whether the change happened in a nested object.
	pub fn is_bubbled(&self) -> bool {
		self.path.len() > 1
	}

	pub(crate) fn nested_under(&self, parent_key: &str) -> Self {
		let mut path = Vec::with_capacity(self.path.len() + 1);
		path.push(parent_key.to_owned());
		path.extend(self.path.iter().cloned());
		Self {
			key: parent_key.to_owned(),
			value: self.value.clone(),
			path,
		}
	}
}
