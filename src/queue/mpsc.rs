use std::{
  cell::UnsafeCell,
  ptr,
  sync::{
    atomic::{AtomicPtr, Ordering},
    Arc,
  },
};

struct Node<T> {
  next: AtomicPtr<Node<T>>,
  value: Option<T>,
}

impl<T> Node<T> {
  fn alloc(value: Option<T>) -> *mut Self {
    Box::into_raw(Box::new(Self { next: AtomicPtr::new(ptr::null_mut()), value }))
  }
}

/// An unbounded multi-producer single-consumer queue.
///
/// Producers swap themselves in at `head` and then link the previous node,
/// the consumer walks from a stub node at `tail`. A push is one allocation and
/// one swap. Between the swap and the link the new item is not yet visible to
/// `poll`; a producer that signals the consumer after `push` returns is
/// always seen.
pub struct MpscQueue<T> {
  head: AtomicPtr<Node<T>>,
  tail: UnsafeCell<*mut Node<T>>,
}

// SAFETY: `head` is only touched atomically, `tail` only by the single
// consumer.
unsafe impl<T: Send> Send for MpscQueue<T> {}
unsafe impl<T: Send> Sync for MpscQueue<T> {}

impl<T> MpscQueue<T> {
  pub fn new() -> (MpscSender<T>, MpscReceiver<T>) {
    let queue = Arc::new(Self::default());
    (MpscSender { queue: queue.clone() }, MpscReceiver { queue })
  }

  pub fn push(&self, value: T) {
    let node = Node::alloc(Some(value));
    let prev = self.head.swap(node, Ordering::AcqRel);
    // SAFETY: `prev` stays alive until the consumer moves past it, which it
    // cannot do before this link is stored.
    unsafe { (*prev).next.store(node, Ordering::Release) };
  }

  /// # Safety
  /// Only one thread may poll at a time.
  pub unsafe fn poll(&self) -> Option<T> {
    let tail = &mut *self.tail.get();
    let next = (**tail).next.load(Ordering::Acquire);
    if next.is_null() {
      return None;
    }
    drop(Box::from_raw(*tail));
    *tail = next;
    (*next).value.take()
  }

  /// # Safety
  /// Only the consumer may call this.
  pub unsafe fn is_empty(&self) -> bool {
    (**self.tail.get()).next.load(Ordering::Acquire).is_null()
  }
}

impl<T> Default for MpscQueue<T> {
  fn default() -> Self {
    let stub = Node::alloc(None);
    Self { head: AtomicPtr::new(stub), tail: UnsafeCell::new(stub) }
  }
}

impl<T> Drop for MpscQueue<T> {
  fn drop(&mut self) {
    let mut node = *self.tail.get_mut();
    while !node.is_null() {
      // SAFETY: `&mut self`, every producer is gone.
      let boxed = unsafe { Box::from_raw(node) };
      node = boxed.next.load(Ordering::Relaxed);
    }
  }
}

/// Cloneable producing handle of an [`MpscQueue`].
pub struct MpscSender<T> {
  queue: Arc<MpscQueue<T>>,
}

impl<T> MpscSender<T> {
  #[inline]
  pub fn push(&self, value: T) { self.queue.push(value) }
}

impl<T> Clone for MpscSender<T> {
  fn clone(&self) -> Self { Self { queue: self.queue.clone() } }
}

/// The single consuming handle of an [`MpscQueue`].
pub struct MpscReceiver<T> {
  queue: Arc<MpscQueue<T>>,
}

impl<T> MpscReceiver<T> {
  #[inline]
  pub fn poll(&mut self) -> Option<T> {
    // SAFETY: the receiver is unique and `poll` takes `&mut self`.
    unsafe { self.queue.poll() }
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    // SAFETY: the receiver is unique; `is_empty` only reads the tail cursor,
    // which `poll` cannot move while `&self` is borrowed.
    unsafe { self.queue.is_empty() }
  }

  pub fn clear(&mut self) { while self.poll().is_some() {} }
}

#[cfg(test)]
mod tests {
  use std::thread;

  use super::*;

  #[rxcore_macro::test]
  fn single_thread_fifo() {
    let (tx, mut rx) = MpscQueue::new();
    assert!(rx.is_empty());
    (0..5).for_each(|i| tx.push(i));
    assert!(!rx.is_empty());
    let got: Vec<_> = std::iter::from_fn(|| rx.poll()).collect();
    assert_eq!(got, vec![0, 1, 2, 3, 4]);
  }

  #[rxcore_macro::test]
  fn many_producers_keep_their_own_order() {
    const PRODUCERS: usize = 4;
    const PER: usize = 10_000;
    let (tx, mut rx) = MpscQueue::new();
    let handles: Vec<_> = (0..PRODUCERS)
      .map(|p| {
        let tx = tx.clone();
        thread::spawn(move || (0..PER).for_each(|i| tx.push((p, i))))
      })
      .collect();
    handles.into_iter().for_each(|h| h.join().unwrap());

    let mut last = [None::<usize>; PRODUCERS];
    let mut count = 0;
    while let Some((p, i)) = rx.poll() {
      assert!(last[p].map_or(true, |l| l < i));
      last[p] = Some(i);
      count += 1;
    }
    assert_eq!(count, PRODUCERS * PER);
  }

  #[rxcore_macro::test]
  fn drop_releases_pending() {
    let token = Arc::new(());
    let (tx, rx) = MpscQueue::new();
    (0..3).for_each(|_| tx.push(token.clone()));
    drop(rx);
    drop(tx);
    assert_eq!(Arc::strong_count(&token), 1);
  }
}
