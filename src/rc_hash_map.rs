//! A hash map with a reference count per entry.

use core::{borrow::Borrow, hash::Hash};
use hashbrown::{hash_map::Entry, HashMap};
use num_traits::{CheckedAdd, CheckedSub, One, Zero};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("reference count saturated")]
pub struct CountSaturatedError;

/// A map whose entries carry a reference count of type `C`.
///
/// Entries whose count drops to zero ("weak" entries) stay in place until they are drained.
pub struct RcHashMap<K: Hash + Eq, C, V> {
	entries: HashMap<K, (C, V)>,
}

impl<K: Hash + Eq, C, V> Default for RcHashMap<K, C, V> {
	fn default() -> Self {
		Self { entries: HashMap::new() }
	}
}

impl<K: Hash + Eq, C: CheckedAdd + CheckedSub + One + Zero + Copy, V> RcHashMap<K, C, V> {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Increments the count of `key`'s entry, or inserts `create()` with a count of one.
	///
	/// `create` may fail, in which case nothing is inserted.
	pub fn try_increment_or_insert_with<E: From<CountSaturatedError>>(&mut self, key: K, create: impl FnOnce() -> Result<V, E>) -> Result<&mut V, E> {
		match self.entries.entry(key) {
			Entry::Occupied(occupied) => {
				let (count, value) = occupied.into_mut();
				*count = count.checked_add(&C::one()).ok_or(CountSaturatedError)?;
				Ok(value)
			}
			Entry::Vacant(vacant) => Ok(&mut vacant.insert((C::one(), create()?)).1),
		}
	}

	/// Increments the count of `key`'s entry, if there is one.
	pub fn try_increment<Q: ?Sized + Hash + Eq>(&mut self, key: &Q) -> Result<Option<&mut V>, CountSaturatedError>
	where
		K: Borrow<Q>,
	{
		match self.entries.get_mut(key) {
			Some((count, value)) => {
				*count = count.checked_add(&C::one()).ok_or(CountSaturatedError)?;
				Ok(Some(value))
			}
			None => Ok(None),
		}
	}

	/// Decrements the count of `key`'s entry and returns the remaining count, if there is such an entry.
	pub fn weak_decrement<Q: ?Sized + Hash + Eq>(&mut self, key: &Q) -> Result<Option<C>, CountSaturatedError>
	where
		K: Borrow<Q>,
	{
		let (count, _) = match self.entries.get_mut(key) {
			Some(entry) => entry,
			None => return Ok(None),
		};
		*count = count.checked_sub(&C::one()).ok_or(CountSaturatedError)?;
		Ok(Some(*count))
	}

	pub fn get<Q: ?Sized + Hash + Eq>(&self, key: &Q) -> Option<(C, &V)>
	where
		K: Borrow<Q>,
	{
		self.entries.get(key).map(|(count, value)| (*count, value))
	}

	/// Removes and returns all entries that have a count of zero or that `expired` flags.
	pub fn drain_weak(&mut self, expired: impl Fn(&V) -> bool) -> Vec<(K, V)>
	where
		K: Clone,
	{
		let doomed: Vec<K> = self.entries.iter().filter(|(_, (count, value))| count.is_zero() || expired(value)).map(|(key, _)| key.clone()).collect();
		doomed.into_iter().filter_map(|key| self.entries.remove(&key).map(|(_, value)| (key, value))).collect()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn saturation_is_an_error() {
		let mut map = RcHashMap::<&str, u8, ()>::new();
		for _ in 0..255 {
			map.try_increment_or_insert_with("key", || Ok::<_, CountSaturatedError>(())).unwrap();
		}
		assert_eq!(map.get("key").map(|(count, _)| count), Some(255));
		assert!(map.try_increment_or_insert_with("key", || Ok::<_, CountSaturatedError>(())).is_err());
	}

	#[test]
	fn weak_entries_stay_until_drained() {
		let mut map = RcHashMap::<&str, u8, u8>::new();
		map.try_increment_or_insert_with("a", || Ok::<_, CountSaturatedError>(1)).unwrap();
		map.try_increment_or_insert_with("b", || Ok::<_, CountSaturatedError>(2)).unwrap();
		assert_eq!(map.weak_decrement("a"), Ok(Some(0)));
		assert_eq!(map.weak_decrement("a"), Err(CountSaturatedError));
		assert_eq!(map.len(), 2);

		assert_eq!(map.drain_weak(|_| false), [("a", 1)]);
		assert_eq!(map.drain_weak(|&value| value == 2), [("b", 2)]);
		assert!(map.is_empty());
	}
}
