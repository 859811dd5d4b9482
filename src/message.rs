//! Type-erased values that flow between processes, effect managers and the view.

use core::{
	any::{type_name, Any},
	fmt::{self, Debug, Formatter},
};
use std::rc::Rc;
use tracing::error;

/// A message, task result or effect payload whose concrete type is only known at its endpoints.
pub type Value = Box<dyn Any>;

/// Entry point into the application's update loop.
///
/// The flag is `true` for updates that must be painted synchronously.
pub type Sink = Rc<dyn Fn(Value, bool)>;

/// A shared message mapper.
///
/// Taggers are compared by identity only: two taggers built from equal closures are still different.
#[derive(Clone)]
pub struct Tagger(Rc<dyn Fn(Value) -> Value>);
impl Tagger {
	/// Wraps a typed mapping function.
	///
	/// A value of any other type than `A` is passed through unchanged (and logged as an error),
	/// since the mismatch can only come from an inconsistently typed tree.
	pub fn new<A: Any, B: Any>(f: impl Fn(A) -> B + 'static) -> Self {
		Self(Rc::new(move |value: Value| match value.downcast::<A>() {
			Ok(a) => Box::new(f(*a)) as Value,
			Err(value) => {
				error!("Tagger expected a message of type `{}`. Passing it through unchanged.", type_name::<A>());
				value
			}
		}))
	}

	/// Wraps an untyped mapping function.
	pub fn from_fn(f: impl Fn(Value) -> Value + 'static) -> Self {
		Self(Rc::new(f))
	}

	#[must_use]
	pub fn call(&self, value: Value) -> Value {
		(self.0)(value)
	}

	/// Identity comparison.
	#[must_use]
	pub fn same(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}

	/// Whether two tagger chains are pairwise identical.
	#[must_use]
	pub fn same_chain(a: &[Self], b: &[Self]) -> bool {
		a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.same(b))
	}
}

impl Debug for Tagger {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "Tagger({:p})", Rc::as_ptr(&self.0).cast::<()>())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn typed_tagger_maps_and_passes_through_mismatches() {
		let double = Tagger::new(|n: i32| n * 2);
		let mapped = double.call(Box::new(21_i32));
		assert_eq!(*mapped.downcast::<i32>().unwrap(), 42);

		let untouched = double.call(Box::new("text"));
		assert_eq!(*untouched.downcast::<&str>().unwrap(), "text");
	}

	#[test]
	fn identity_not_structure() {
		let a = Tagger::new(|n: i32| n);
		let b = Tagger::new(|n: i32| n);
		assert!(a.same(&a.clone()));
		assert!(!a.same(&b));
		assert!(Tagger::same_chain(&[a.clone(), b.clone()], &[a.clone(), b.clone()]));
		assert!(!Tagger::same_chain(&[a.clone()], &[a, b]));
	}
}
