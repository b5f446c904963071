//! Observable owner
//!
//! [`Observable`] observes its data with bubbling enabled and keeps the
//! computed functions registered through it, so they can be re-run or
//! disposed together.

use core::ops::Deref;
use std::cell::RefCell;

use crate::computed::{computed_with, ComputeContext, ComputeResult, Computed, ComputedOptions};
use crate::error::Result;
use crate::observe::{observe, ObserveOptions, Observed};
use crate::value::Value;

pub struct Observable {
	observed: Observed,
	computed: RefCell<Vec<Computed>>,
}

impl Observable {
	/// Observe `data` with bubbling enabled.
	pub fn new(data: impl Into<Value>) -> Result<Self> {
		Self::with_options(data, ObserveOptions::default().bubble(true))
	}

	pub fn with_options(data: impl Into<Value>, options: ObserveOptions) -> Result<Self> {
		Ok(Self {
			observed: observe(data.into(), options)?,
			computed: RefCell::new(Vec::new()),
		})
	}

	pub fn observed(&self) -> &Observed {
		&self.observed
	}

	/// Register a computed function owned by this observable. The closure
	/// receives the observed data as its receiver.
	pub fn computed<F, R>(&self, f: F) -> Result<Computed>
	where
		F: FnMut(&Observed, &ComputeContext) -> R + 'static,
		R: ComputeResult,
	{
		self.computed_with(f, ComputedOptions::default())
	}

	pub fn computed_with<F, R>(&self, mut f: F, options: ComputedOptions) -> Result<Computed>
	where
		F: FnMut(&Observed, &ComputeContext) -> R + 'static,
		R: ComputeResult,
	{
		let this = self.observed.clone();
		let options = ComputedOptions {
			name: options
				.name
				.or_else(|| Some(std::any::type_name::<F>().to_owned())),
			..options
		};
		let computed = computed_with(move |ctx| f(&this, ctx), options)?;
		self.computed.borrow_mut().push(computed);
		Ok(computed)
	}

	/// Computed functions owned by this observable, in registration order.
	pub fn computed_functions(&self) -> Vec<Computed> {
		self.computed.borrow().clone()
	}

	/// Dispose every owned computed function.
	pub fn dispose(&self) {
		let owned = std::mem::take(&mut *self.computed.borrow_mut());
		for computed in owned.into_iter().rev() {
			computed.dispose();
		}
	}

	/// Re-run every owned computed function once, in registration order.
	pub fn process(&self) -> Result<()> {
		let owned = self.computed_functions();
		for computed in owned {
			computed.run()?;
		}
		Ok(())
	}
}

impl Deref for Observable {
	type Target = Observed;

	fn deref(&self) -> &Self::Target {
		&self.observed
	}
}

impl std::fmt::Debug for Observable {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Observable")
			.field("observed", &self.observed)
			.field("computed", &self.computed.borrow().len())
			.finish()
	}
}
