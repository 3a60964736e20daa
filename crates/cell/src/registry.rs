use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use parking_lot::RwLock;

use crate::Cell;

/// Mapping from key to [`Cell`], creating cells on first access.
///
/// At most one cell exists per key. Concurrent [`get_or_create`] calls for
/// the same key all observe the same cell. Entries are never removed by the
/// registry itself.
///
/// [`get_or_create`]: CellRegistry::get_or_create
pub struct CellRegistry<K, T> {
	cells: RwLock<HashMap<K, Cell<T>>>,
}

impl<K, T> Default for CellRegistry<K, T> {
	fn default() -> Self {
		Self {
			cells: RwLock::new(HashMap::new()),
		}
	}
}

impl<K, T> CellRegistry<K, T>
where
	K: Eq + Hash + Clone,
{
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the cell for `key`, creating an empty one if none exists.
	pub fn get_or_create(&self, key: &K) -> Cell<T> {
		if let Some(cell) = self.cells.read().get(key) {
			return cell.clone();
		}
		// Another caller may have inserted between the read and write locks;
		// `entry` keeps whichever cell got there first.
		self.cells.write().entry(key.clone()).or_default().clone()
	}

	/// Returns the cell for `key` without creating one.
	pub fn get(&self, key: &K) -> Option<Cell<T>> {
		self.cells.read().get(key).cloned()
	}

	pub fn contains(&self, key: &K) -> bool {
		self.cells.read().contains_key(key)
	}

	pub fn len(&self) -> usize {
		self.cells.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.cells.read().is_empty()
	}
}

impl<K, T> fmt::Debug for CellRegistry<K, T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CellRegistry").field("cells", &self.cells.read().len()).finish()
	}
}
