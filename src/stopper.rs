//! One-shot cancellable lifetimes.
//!
//! A [`Stopper`] is live until it is destroyed, which happens exactly once.
//! Everything created "under" a stopper (subscriptions, resource claims, listeners, timers)
//! registers a teardown with it, so that destroying the stopper cascades through all of them.

use crate::{
	report::{self, panic_message, WatchError},
	stream::{noop_teardown, EventStream},
};
use core::{
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
	mem,
};
use std::{
	panic::{catch_unwind, AssertUnwindSafe},
	rc::{Rc, Weak},
};
use tracing::trace;

/// Identifies one teardown registration on a [`Stopper`], for [`Stopper::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TeardownKey(u64);

/// A single-fire, idempotent cancellation token with ordered teardown callbacks.
///
/// Clones share identity: destroying any clone destroys all of them.
#[derive(Clone)]
pub struct Stopper {
	inner: Rc<Inner>,
}

struct Inner {
	destroyed: Cell<bool>,
	/// Merged stoppers are only destroyed through their parents.
	derived: bool,
	next_key: Cell<u64>,
	teardowns: RefCell<Vec<(TeardownKey, Box<dyn FnOnce()>)>>,
	/// Registrations on parents, cancelled once this fires or is dropped.
	links: RefCell<Vec<(Stopper, TeardownKey)>>,
}

impl Inner {
	fn new(derived: bool) -> Self {
		Self {
			destroyed: Cell::new(false),
			derived,
			next_key: Cell::new(0),
			teardowns: RefCell::new(Vec::new()),
			links: RefCell::new(Vec::new()),
		}
	}

	fn unlink(&self) {
		for (parent, key) in mem::take(&mut *self.links.borrow_mut()) {
			parent.cancel(key);
		}
	}

	fn fire(&self) {
		if self.destroyed.replace(true) {
			return;
		}
		self.unlink();

		// Anything registered from here on runs immediately, so a single take suffices.
		let teardowns = mem::take(&mut *self.teardowns.borrow_mut());
		trace!("Stopper destroyed. Running {} teardown(s).", teardowns.len());
		for (_, teardown) in teardowns {
			run_teardown(teardown);
		}
	}
}

impl Drop for Inner {
	fn drop(&mut self) {
		self.unlink();
	}
}

/// Runs `teardown`, reporting rather than propagating a panic.
fn run_teardown(teardown: impl FnOnce()) {
	if let Err(payload) = catch_unwind(AssertUnwindSafe(teardown)) {
		report::report(&WatchError::TeardownPanicked {
			message: panic_message(payload.as_ref()),
		});
	}
}

impl Default for Stopper {
	fn default() -> Self {
		Self::new()
	}
}

impl Stopper {
	#[must_use]
	pub fn new() -> Self {
		Self { inner: Rc::new(Inner::new(false)) }
	}

	/// Destroys this stopper, running all registered teardowns in registration order.
	///
	/// Repeated calls are no-ops. On a [merged](`Stopper::merge`) stopper this is always a no-op,
	/// since propagation only runs from parents to derived stoppers.
	pub fn destroy(&self) {
		if self.inner.derived {
			return report::lifecycle_noop("destroying a merged stopper directly");
		}
		self.inner.fire();
	}

	#[must_use]
	pub fn is_destroyed(&self) -> bool {
		self.inner.destroyed.get()
	}

	/// Registers `teardown` to run when this stopper is destroyed.
	///
	/// If it already is, `teardown` runs right away and [`None`] is returned.
	pub fn on_destroy(&self, teardown: impl FnOnce() + 'static) -> Option<TeardownKey> {
		if self.is_destroyed() {
			run_teardown(teardown);
			return None;
		}

		let key = TeardownKey(self.inner.next_key.get());
		self.inner.next_key.set(key.0 + 1);
		self.inner.teardowns.borrow_mut().push((key, Box::new(teardown)));
		Some(key)
	}

	/// Drops a pending teardown registration without running it.
	///
	/// Returns whether the registration was still pending.
	pub fn cancel(&self, key: TeardownKey) -> bool {
		let mut teardowns = self.inner.teardowns.borrow_mut();
		match teardowns.iter().position(|(k, _)| *k == key) {
			Some(index) => {
				// Dropped outside the borrow, since captured values may hold other stoppers.
				let removed = teardowns.remove(index);
				drop(teardowns);
				drop(removed);
				true
			}
			None => false,
		}
	}

	/// Creates a stopper that is destroyed as soon as any of `parents` is.
	///
	/// [`destroy`](`Stopper::destroy`) on the result is a no-op.
	///
	/// The parents' registrations are cancelled as soon as the result fires or its last clone is dropped.
	#[must_use]
	pub fn merge(parents: &[&Stopper]) -> Stopper {
		let merged = Stopper { inner: Rc::new(Inner::new(true)) };
		if parents.iter().any(|parent| parent.is_destroyed()) {
			merged.inner.fire();
			return merged;
		}

		for &parent in parents {
			let weak: Weak<Inner> = Rc::downgrade(&merged.inner);
			if let Some(key) = parent.on_destroy(move || {
				if let Some(inner) = weak.upgrade() {
					inner.fire()
				}
			}) {
				merged.inner.links.borrow_mut().push((parent.clone(), key));
			}
		}
		merged
	}

	/// Whether `self` and `other` are the same stopper.
	#[must_use]
	pub fn ptr_eq(&self, other: &Stopper) -> bool {
		Rc::ptr_eq(&self.inner, &other.inner)
	}

	/// A stream that emits `()` once when this stopper is destroyed, then ends.
	///
	/// Subscribing to it after destruction emits and ends immediately.
	#[must_use]
	pub fn stream(&self) -> EventStream<()> {
		let stopper = self.clone();
		EventStream::from_binder(move |emitter| {
			let signal = emitter.clone();
			match stopper.on_destroy(move || {
				signal.emit(());
				signal.end();
			}) {
				Some(key) => {
					let stopper = stopper.clone();
					Box::new(move || {
						stopper.cancel(key);
					})
				}
				None => noop_teardown(),
			}
		})
	}
}

impl PartialEq for Stopper {
	fn eq(&self, other: &Self) -> bool {
		self.ptr_eq(other)
	}
}
impl Eq for Stopper {}

impl Debug for Stopper {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Stopper")
			.field("destroyed", &self.inner.destroyed.get())
			.field("derived", &self.inner.derived)
			.field("pending_teardowns", &self.inner.teardowns.try_borrow().map(|t| t.len()).ok())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cancelled_teardowns_do_not_run() {
		let ran = Rc::new(Cell::new(false));
		let stopper = Stopper::new();
		let key = {
			let ran = ran.clone();
			stopper.on_destroy(move || ran.set(true)).unwrap()
		};
		assert!(stopper.cancel(key));
		assert!(!stopper.cancel(key));
		stopper.destroy();
		assert!(!ran.get());
	}

	#[test]
	fn merged_stopper_cleans_up_sibling_registrations() {
		let a = Stopper::new();
		let b = Stopper::new();
		let merged = Stopper::merge(&[&a, &b]);
		assert_eq!(b.inner.teardowns.borrow().len(), 1);
		a.destroy();
		assert!(merged.is_destroyed());
		assert!(b.inner.teardowns.borrow().is_empty());
	}
}
