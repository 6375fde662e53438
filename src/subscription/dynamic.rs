use smallvec::SmallVec;

/// Items keyed by insertion id, used by coordinators to track their active
/// inner subscriptions and by composite disposables.
///
/// Stays inline for up to two items, which covers the common
/// `merge_with`/`amb` of two sources without allocating.
pub(crate) struct DynamicSet<U> {
  next_id: usize,
  items: SmallVec<[(usize, U); 2]>,
}

impl<U> Default for DynamicSet<U> {
  fn default() -> Self { Self { next_id: 0, items: SmallVec::new() } }
}

impl<U> DynamicSet<U> {
  /// Adds an item and returns its id.
  pub fn add(&mut self, item: U) -> usize {
    let id = self.reserve_id();
    self.items.push((id, item));
    id
  }

  /// Hands out an id before the item exists; pair with [`insert`](Self::insert).
  pub fn reserve_id(&mut self) -> usize {
    let id = self.next_id;
    self.next_id += 1;
    id
  }

  pub fn insert(&mut self, id: usize, item: U) { self.items.push((id, item)); }

  pub fn remove(&mut self, id: usize) -> Option<U> {
    self.items.iter().position(|(i, _)| *i == id).map(|pos| self.items.remove(pos).1)
  }

  pub fn len(&self) -> usize { self.items.len() }

  pub fn is_empty(&self) -> bool { self.items.is_empty() }

  pub fn drain(&mut self) -> impl Iterator<Item = U> + '_ { self.items.drain(..).map(|(_, u)| u) }

  pub fn iter(&self) -> impl Iterator<Item = &U> { self.items.iter().map(|(_, u)| u) }
}

impl<U: Clone> DynamicSet<U> {
  /// Copies the current items so they can be used after the owning lock is
  /// released.
  pub fn snapshot(&self) -> SmallVec<[U; 4]> { self.iter().cloned().collect() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ids_survive_removal() {
    let mut set = DynamicSet::default();
    let a = set.add("a");
    let b = set.reserve_id();
    set.insert(b, "b");
    let c = set.add("c");
    assert_eq!(set.remove(b), Some("b"));
    assert_eq!(set.remove(b), None);
    assert_eq!(set.snapshot().as_slice(), &["a", "c"]);
    assert!(a < c);
    assert_eq!(set.drain().count(), 2);
    assert!(set.is_empty());
  }
}
