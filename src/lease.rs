//! Reference-counted shared resources, such as one dimming backdrop per target root.

use crate::{
	rc_hash_map::{CountSaturatedError, RcHashMap},
	report::{self, HostError},
	stopper::Stopper,
};
use core::{
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
	hash::Hash,
};
use std::rc::Rc;
use tracing::{debug, trace};

impl From<CountSaturatedError> for HostError {
	fn from(error: CountSaturatedError) -> Self {
		HostError::Operation {
			operation: "lease",
			message: error.to_string(),
		}
	}
}

struct Shared<R> {
	resource: R,
	stopper: Stopper,
}

/// A registry of shared resources, created on first acquisition and torn down after the last release.
///
/// Each resource lives under its own [`Stopper`], which is destroyed when the last [`Lease`] is released.
/// Destroying that stopper from elsewhere retires the resource early: Its leases observe this through
/// [`Lease::stopper`] and the next acquisition creates a fresh resource.
pub struct SharedLeases<K: Hash + Eq, R> {
	entries: Rc<RefCell<RcHashMap<K, u16, Shared<R>>>>,
}

impl<K: Hash + Eq, R> Clone for SharedLeases<K, R> {
	fn clone(&self) -> Self {
		Self { entries: self.entries.clone() }
	}
}

impl<K: Hash + Eq, R> Default for SharedLeases<K, R> {
	fn default() -> Self {
		Self { entries: Rc::default() }
	}
}

impl<K: Hash + Eq, R> Debug for SharedLeases<K, R> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("SharedLeases").field("resources", &self.entries.try_borrow().map(|e| e.len()).ok()).finish()
	}
}

impl<K: Hash + Eq + Clone + Debug + 'static, R: Clone + 'static> SharedLeases<K, R> {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Takes a lease on the resource under `key`, calling `create` if there is no live one.
	///
	/// `create` receives the new resource's stopper and should register the resource's teardown with it.
	/// It may acquire from this registry itself. If that leaves a live resource under `key`,
	/// the one `create` made is torn down again and the existing one is leased instead.
	pub fn acquire<E: From<CountSaturatedError>>(&self, key: K, create: impl FnOnce(&Stopper) -> Result<R, E>) -> Result<Lease<K, R>, E> {
		self.purge();
		if let Some(lease) = self.share(&key)? {
			return Ok(lease);
		}

		// Not borrowed while creating.
		debug!(?key, "Creating shared resource.");
		let stopper = Stopper::new();
		let resource = create(&stopper)?;
		if let Some(lease) = self.share(&key)? {
			debug!(?key, "Resource was created during its own creation. Discarding the duplicate.");
			stopper.destroy();
			return Ok(lease);
		}

		self.entries.borrow_mut().try_increment_or_insert_with(key.clone(), || {
			Ok::<_, CountSaturatedError>(Shared {
				resource: resource.clone(),
				stopper: stopper.clone(),
			})
		})?;
		trace!(?key, "Leased new shared resource.");
		Ok(self.lease(key, resource, stopper))
	}

	/// Leases the existing resource under `key`, if any.
	fn share(&self, key: &K) -> Result<Option<Lease<K, R>>, CountSaturatedError> {
		let existing = self.entries.borrow_mut().try_increment(key)?.map(|shared| (shared.resource.clone(), shared.stopper.clone()));
		Ok(existing.map(|(resource, stopper)| {
			trace!(?key, "Leased shared resource.");
			self.lease(key.clone(), resource, stopper)
		}))
	}

	fn lease(&self, key: K, resource: R, stopper: Stopper) -> Lease<K, R> {
		Lease {
			key,
			resource,
			stopper,
			entries: self.entries.clone(),
			released: Cell::new(false),
		}
	}

	/// The number of outstanding leases on the live resource under `key`.
	#[must_use]
	pub fn lease_count(&self, key: &K) -> u16 {
		match self.entries.borrow().get(key) {
			Some((count, shared)) if !shared.stopper.is_destroyed() => count,
			_ => 0,
		}
	}

	fn purge(&self) {
		let retired = self.entries.borrow_mut().drain_weak(|shared| shared.stopper.is_destroyed());
		for (key, shared) in retired {
			trace!(?key, "Retiring shared resource.");
			shared.stopper.destroy();
		}
	}
}

/// One holder's share of a resource from [`SharedLeases`].
pub struct Lease<K: Hash + Eq, R> {
	key: K,
	resource: R,
	stopper: Stopper,
	entries: Rc<RefCell<RcHashMap<K, u16, Shared<R>>>>,
	released: Cell<bool>,
}

impl<K: Hash + Eq + Debug, R> Debug for Lease<K, R> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Lease").field("key", &self.key).field("released", &self.released.get()).finish_non_exhaustive()
	}
}

impl<K: Hash + Eq + Clone + Debug, R> Lease<K, R> {
	#[must_use]
	pub fn resource(&self) -> &R {
		&self.resource
	}

	/// The stopper of the leased resource. It fires when the resource is torn down, for whatever reason.
	#[must_use]
	pub fn stopper(&self) -> &Stopper {
		&self.stopper
	}

	/// Gives up this lease. The last release tears the resource down. Idempotent.
	pub fn release(&self) {
		if self.released.replace(true) {
			return report::lifecycle_noop("releasing a lease twice");
		}

		let retired = {
			let mut entries = self.entries.borrow_mut();
			// The entry may already belong to a newer resource if this one was retired early.
			let still_current = matches!(entries.get(&self.key), Some((_, shared)) if shared.stopper.ptr_eq(&self.stopper));
			if still_current {
				match entries.weak_decrement(&self.key) {
					Ok(Some(0)) => entries.drain_weak(|_| false),
					Ok(_) => Vec::new(),
					Err(CountSaturatedError) => {
						debug!(key = ?self.key, "Lease count underflow.");
						Vec::new()
					}
				}
			} else {
				Vec::new()
			}
		};

		// Torn down outside the borrow, since teardowns may acquire again.
		for (key, shared) in retired {
			debug!(?key, "Last lease released. Tearing the shared resource down.");
			shared.stopper.destroy();
		}
	}
}
