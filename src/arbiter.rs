//! Arbitration of exclusive claims on shared mutable visual state.
//!
//! Several independently-lived views may need to override the same value, for example the
//! `z-index` of a common ancestor. Claims on one key form a stack: The newest claim is active,
//! and releasing it restores the value the claim found. Releasing a superseded claim never
//! touches the resource. Instead, its saved value is handed to the claim above it, so the
//! original value still comes back once the whole stack is released.

use crate::{
	host::{Host, NodeKey},
	report,
	stopper::{Stopper, TeardownKey},
};
use core::{
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
	hash::{Hash, Hasher},
	sync::atomic::{AtomicU64, Ordering},
};
use hashbrown::HashMap;
use std::rc::Rc;
use tracing::{debug, trace};

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a claimant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

impl OwnerId {
	/// Creates a new unique owner ID.
	#[must_use]
	#[allow(clippy::new_without_default)]
	pub fn new() -> Self {
		Self(NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed))
	}

	#[must_use]
	pub const fn id(self) -> u64 {
		self.0
	}
}

/// Reads and writes the arbitrated resources.
///
/// Writing [`None`] removes the override, rather than writing some default.
pub trait ResourceAccess<K, V> {
	fn read(&self, key: &K) -> Option<V>;
	fn write(&self, key: &K, value: Option<&V>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
	/// The claim's value is the resource's current value.
	Active,
	/// A newer claim on the same key has taken over.
	Superseded,
	/// Released, either explicitly or through its stopper. Inert.
	Released,
}

struct ClaimState<K, V> {
	key: K,
	owner: OwnerId,
	prior: RefCell<Option<V>>,
	value: V,
	status: Cell<ClaimStatus>,
	stopper_registration: RefCell<Option<(Stopper, TeardownKey)>>,
}

/// Mediates exclusive access to keyed shared resources.
///
/// The arbiter is the only writer of arbitrated keys while claims on them exist.
pub struct ResourceArbiter<K, V> {
	inner: Rc<ArbiterInner<K, V>>,
}

struct ArbiterInner<K, V> {
	access: Box<dyn ResourceAccess<K, V>>,
	stacks: RefCell<HashMap<K, Vec<Rc<ClaimState<K, V>>>>>,
}

impl<K, V> Clone for ResourceArbiter<K, V> {
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone() }
	}
}

impl<K: Debug, V> Debug for ResourceArbiter<K, V> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("ResourceArbiter")
			.field("claimed_keys", &self.inner.stacks.try_borrow().map(|stacks| stacks.len()).ok())
			.finish()
	}
}

/// An exclusive, stack-ordered lease on one resource key.
pub struct ResourceClaim<K, V> {
	state: Rc<ClaimState<K, V>>,
	arbiter: ResourceArbiter<K, V>,
}

impl<K: Debug, V: Debug> Debug for ResourceClaim<K, V> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("ResourceClaim")
			.field("key", &self.state.key)
			.field("owner", &self.state.owner)
			.field("prior", &self.state.prior.try_borrow().ok())
			.field("value", &self.state.value)
			.field("status", &self.state.status.get())
			.finish()
	}
}

impl<K, V> ResourceClaim<K, V> {
	#[must_use]
	pub fn key(&self) -> &K {
		&self.state.key
	}

	#[must_use]
	pub fn owner(&self) -> OwnerId {
		self.state.owner
	}

	/// The value this claim applied.
	#[must_use]
	pub fn current_value(&self) -> &V {
		&self.state.value
	}

	#[must_use]
	pub fn status(&self) -> ClaimStatus {
		self.state.status.get()
	}

	#[must_use]
	pub fn is_active(&self) -> bool {
		self.status() == ClaimStatus::Active
	}
}

impl<K: Clone, V: Clone> ResourceClaim<K, V> {
	/// The value that releasing this claim would restore, [`None`] meaning "no explicit value".
	#[must_use]
	pub fn prior_value(&self) -> Option<V> {
		self.state.prior.borrow().clone()
	}
}

impl<K: Hash + Eq + Clone + Debug + 'static, V: Clone + Debug + 'static> ResourceArbiter<K, V> {
	pub fn new(access: impl ResourceAccess<K, V> + 'static) -> Self {
		Self {
			inner: Rc::new(ArbiterInner {
				access: Box::new(access),
				stacks: RefCell::new(HashMap::new()),
			}),
		}
	}

	/// Applies `value` to `key` on behalf of `owner`.
	///
	/// The first claim on a key remembers the externally observed value,
	/// later ones remember the value of the claim they supersede.
	pub fn claim(&self, key: K, owner: OwnerId, value: V) -> ResourceClaim<K, V> {
		let state = {
			let mut stacks = self.inner.stacks.borrow_mut();
			let stack = stacks.entry(key.clone()).or_insert_with(Vec::new);
			let prior = match stack.last() {
				Some(top) => {
					top.status.set(ClaimStatus::Superseded);
					Some(top.value.clone())
				}
				None => self.inner.access.read(&key),
			};
			trace!(?key, owner = owner.id(), ?prior, ?value, "Claiming resource.");

			let state = Rc::new(ClaimState {
				key,
				owner,
				prior: RefCell::new(prior),
				value,
				status: Cell::new(ClaimStatus::Active),
				stopper_registration: RefCell::new(None),
			});
			stack.push(state.clone());
			state
		};

		self.inner.access.write(&state.key, Some(&state.value));
		ResourceClaim { state, arbiter: self.clone() }
	}

	/// [`claim`](`ResourceArbiter::claim`)s `key` and releases the claim when `stopper` is destroyed.
	///
	/// Returns [`None`] without touching the resource if `stopper` is already destroyed.
	pub fn claim_until(&self, key: K, owner: OwnerId, value: V, stopper: &Stopper) -> Option<ResourceClaim<K, V>> {
		if stopper.is_destroyed() {
			report::lifecycle_noop("claiming under a destroyed stopper");
			return None;
		}

		let claim = self.claim(key, owner, value);
		let release = ResourceClaim {
			state: claim.state.clone(),
			arbiter: self.clone(),
		};
		if let Some(registration) = stopper.on_destroy(move || release.release()) {
			*claim.state.stopper_registration.borrow_mut() = Some((stopper.clone(), registration));
		}
		Some(claim)
	}

	/// The active claim's owner for `key`, if any.
	#[must_use]
	pub fn active_owner(&self, key: &K) -> Option<OwnerId> {
		self.inner.stacks.borrow().get(key).and_then(|stack| stack.last()).map(|top| top.owner)
	}

	fn release(&self, claim: &Rc<ClaimState<K, V>>) {
		if claim.status.get() == ClaimStatus::Released {
			return report::lifecycle_noop("releasing a resource claim twice");
		}
		claim.status.set(ClaimStatus::Released);

		let registration = claim.stopper_registration.borrow_mut().take();
		if let Some((stopper, key)) = registration {
			stopper.cancel(key);
		}

		let restore = {
			let mut stacks = self.inner.stacks.borrow_mut();
			let stack = match stacks.get_mut(&claim.key) {
				Some(stack) => stack,
				None => return debug!(key = ?claim.key, "Released a claim on a key without a claim stack."),
			};
			let index = match stack.iter().position(|other| Rc::ptr_eq(other, claim)) {
				Some(index) => index,
				None => return debug!(key = ?claim.key, "Released a claim that isn't on its stack."),
			};

			stack.remove(index);
			if index == stack.len() {
				// Was active.
				if let Some(new_top) = stack.last() {
					new_top.status.set(ClaimStatus::Active)
				} else {
					stacks.remove(&claim.key);
				}
				Some(claim.prior.borrow().clone())
			} else {
				// Was superseded: The claim above now restores what this one would have.
				*stack[index].prior.borrow_mut() = claim.prior.borrow().clone();
				None
			}
		};

		if let Some(restore) = restore {
			trace!(key = ?claim.key, value = ?restore, "Restoring resource.");
			self.inner.access.write(&claim.key, restore.as_ref());
		}
	}
}

impl<K: Hash + Eq + Clone + Debug + 'static, V: Clone + Debug + 'static> ResourceClaim<K, V> {
	/// Gives up this claim.
	///
	/// Restores the prior value only if this claim is still active. Idempotent.
	pub fn release(&self) {
		self.arbiter.release(&self.state)
	}
}

/// Identifies one inline style property of one node.
#[derive(Clone)]
pub struct StyleKey<N> {
	pub node: N,
	node_key: NodeKey,
	pub property: String,
}

impl<N> StyleKey<N> {
	pub fn new<H: Host<Node = N>>(host: &H, node: &N, property: &str) -> Self
	where
		N: Clone,
	{
		Self {
			node: node.clone(),
			node_key: host.node_key(node),
			property: property.to_owned(),
		}
	}
}

impl<N> PartialEq for StyleKey<N> {
	fn eq(&self, other: &Self) -> bool {
		self.node_key == other.node_key && self.property == other.property
	}
}
impl<N> Eq for StyleKey<N> {}
impl<N> Hash for StyleKey<N> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.node_key.hash(state);
		self.property.hash(state);
	}
}
impl<N> Debug for StyleKey<N> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "{}@{:?}", self.property, self.node_key)
	}
}

/// [`ResourceAccess`] to inline styles through a [`Host`].
#[derive(Debug, Clone)]
pub struct InlineStyles<H: Host> {
	host: H,
}

impl<H: Host> InlineStyles<H> {
	#[must_use]
	pub fn new(host: H) -> Self {
		Self { host }
	}
}

impl<H: Host> ResourceAccess<StyleKey<H::Node>, String> for InlineStyles<H> {
	fn read(&self, key: &StyleKey<H::Node>) -> Option<String> {
		self.host.style(&key.node, &key.property)
	}

	fn write(&self, key: &StyleKey<H::Node>, value: Option<&String>) {
		match value {
			Some(value) => self.host.set_style(&key.node, &key.property, value),
			None => self.host.remove_style(&key.node, &key.property),
		}
	}
}

/// The arbiter for inline styles of one host's nodes.
pub type StyleArbiter<H> = ResourceArbiter<StyleKey<<H as Host>::Node>, String>;
