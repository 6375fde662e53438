//! Queues used between a producer and a drain loop.

use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;

use crate::{
  error::Error,
  subscription::{FusedQueue, QueueSubscription},
};

/// A FIFO with an optional capacity.
///
/// One producer offers, one drainer polls. The lock is held only for the
/// push or pop itself.
pub struct SimpleQueue<T> {
  items: Mutex<VecDeque<T>>,
  capacity: Option<usize>,
}

impl<T> SimpleQueue<T> {
  pub fn unbounded() -> Self { SimpleQueue { items: Mutex::new(VecDeque::new()), capacity: None } }

  pub fn bounded(capacity: usize) -> Self {
    SimpleQueue { items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))), capacity: Some(capacity) }
  }

  /// Appends `value`, handing it back when the queue is full.
  pub fn offer(&self, value: T) -> Result<(), T> {
    let mut items = self.items.lock();
    if self.capacity.is_some_and(|cap| items.len() >= cap) {
      return Err(value);
    }
    items.push_back(value);
    Ok(())
  }

  pub fn pop(&self) -> Option<T> { self.items.lock().pop_front() }

  pub fn len(&self) -> usize { self.items.lock().len() }

  pub fn is_empty(&self) -> bool { self.items.lock().is_empty() }

  pub fn clear(&self) {
    let drained = std::mem::take(&mut *self.items.lock());
    drop(drained);
  }
}

impl<T: Send> FusedQueue<T> for SimpleQueue<T> {
  fn poll(&self) -> Result<Option<T>, Error> { Ok(self.pop()) }

  fn is_empty(&self) -> bool { SimpleQueue::is_empty(self) }

  fn clear(&self) { SimpleQueue::clear(self) }

  fn size(&self) -> usize { self.len() }
}

/// Where a consumer reads its buffered values from: its own queue, or the
/// upstream itself when fusion was established.
pub(crate) enum InnerQueue<T> {
  Own(SimpleQueue<T>),
  Fused(Arc<dyn QueueSubscription<T>>),
}

impl<T: Send> InnerQueue<T> {
  pub fn poll(&self) -> Result<Option<T>, Error> {
    match self {
      InnerQueue::Own(q) => Ok(q.pop()),
      InnerQueue::Fused(q) => q.poll(),
    }
  }

  pub fn is_empty(&self) -> bool {
    match self {
      InnerQueue::Own(q) => q.is_empty(),
      InnerQueue::Fused(q) => q.is_empty(),
    }
  }

  pub fn clear(&self) {
    match self {
      InnerQueue::Own(q) => q.clear(),
      InnerQueue::Fused(q) => q.clear(),
    }
  }

  /// Only an own queue accepts values; a fused one is fed by its upstream.
  pub fn offer(&self, value: T) -> Result<(), T> {
    match self {
      InnerQueue::Own(q) => q.offer(value),
      InnerQueue::Fused(_) => Err(value),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bounded_queue_rejects_overflow() {
    let q = SimpleQueue::bounded(2);
    assert!(q.offer(1).is_ok());
    assert!(q.offer(2).is_ok());
    assert_eq!(q.offer(3), Err(3));
    assert_eq!(q.pop(), Some(1));
    assert!(q.offer(3).is_ok());
    assert_eq!(q.len(), 2);
  }

  #[test]
  fn clear_releases_values() {
    let value = Arc::new(());
    let q = SimpleQueue::unbounded();
    let _ = q.offer(value.clone());
    assert_eq!(Arc::strong_count(&value), 2);
    q.clear();
    assert_eq!(Arc::strong_count(&value), 1);
    assert!(q.is_empty());
  }
}
