use std::{
  cell::UnsafeCell,
  fmt,
  mem::MaybeUninit,
  ptr,
  sync::{
    atomic::{AtomicPtr, AtomicUsize, Ordering},
    Arc,
  },
};

struct Segment<T> {
  slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
  next: AtomicPtr<Segment<T>>,
}

impl<T> Segment<T> {
  fn alloc(capacity: usize) -> *mut Self {
    let slots = (0..capacity).map(|_| UnsafeCell::new(MaybeUninit::uninit())).collect();
    Box::into_raw(Box::new(Self { slots, next: AtomicPtr::new(ptr::null_mut()) }))
  }
}

/// An unbounded single-producer single-consumer queue made of linked
/// fixed-capacity segments.
///
/// Both sides track a monotonically increasing index; the slot of an index is
/// `index % capacity` inside the segment the side currently points at. The
/// producer links a fresh segment when it reaches offset 0 of a new lap, the
/// consumer follows the link when it gets there and frees the segment it
/// left. Publication of an item is the `Release` store of the producer index,
/// so no lock is involved.
///
/// The raw `offer`/`poll`/`clear` are `unsafe`: callers promise that at most
/// one thread offers and at most one thread polls at any time. The
/// [`Producer`]/[`Consumer`] halves returned by [`SpscQueue::new`] encode that
/// promise in ownership.
pub struct SpscQueue<T> {
  capacity: usize,
  producer_index: AtomicUsize,
  consumer_index: AtomicUsize,
  producer_segment: UnsafeCell<*mut Segment<T>>,
  consumer_segment: UnsafeCell<*mut Segment<T>>,
}

// SAFETY: items cross from the producer thread to the consumer thread, the
// cursors are only touched by their own side.
unsafe impl<T: Send> Send for SpscQueue<T> {}
unsafe impl<T: Send> Sync for SpscQueue<T> {}

impl<T> SpscQueue<T> {
  /// Creates a queue with `capacity` items per segment and splits it.
  pub fn new(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let queue = Arc::new(Self::with_capacity(capacity));
    (Producer { queue: queue.clone() }, Consumer { queue })
  }

  pub fn with_capacity(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    let first = Segment::alloc(capacity);
    Self {
      capacity,
      producer_index: AtomicUsize::new(0),
      consumer_index: AtomicUsize::new(0),
      producer_segment: UnsafeCell::new(first),
      consumer_segment: UnsafeCell::new(first),
    }
  }

  #[inline]
  pub fn capacity(&self) -> usize { self.capacity }

  /// Appends an item.
  ///
  /// # Safety
  /// Must not run concurrently with another `offer` on the same queue.
  pub unsafe fn offer(&self, item: T) {
    let index = self.producer_index.load(Ordering::Relaxed);
    let offset = index % self.capacity;
    let segment = &mut *self.producer_segment.get();
    if offset == 0 && index != 0 {
      let next = Segment::alloc(self.capacity);
      (**segment).next.store(next, Ordering::Release);
      *segment = next;
    }
    (*(**segment).slots[offset].get()).write(item);
    self.producer_index.store(index + 1, Ordering::Release);
  }

  /// Removes the oldest item.
  ///
  /// # Safety
  /// Must not run concurrently with another `poll` or `clear` on the same
  /// queue.
  pub unsafe fn poll(&self) -> Option<T> {
    let index = self.consumer_index.load(Ordering::Relaxed);
    if index == self.producer_index.load(Ordering::Acquire) {
      return None;
    }
    let offset = index % self.capacity;
    let segment = &mut *self.consumer_segment.get();
    if offset == 0 && index != 0 {
      // The producer linked `next` before publishing `index`.
      let next = (**segment).next.load(Ordering::Acquire);
      drop(Box::from_raw(*segment));
      *segment = next;
    }
    let item = (*(**segment).slots[offset].get()).assume_init_read();
    self.consumer_index.store(index + 1, Ordering::Release);
    Some(item)
  }

  /// Drops every item currently visible to the consumer.
  ///
  /// # Safety
  /// Same contract as [`poll`](Self::poll).
  pub unsafe fn clear(&self) { while self.poll().is_some() {} }

  /// Safe from either side; may be stale by the time it returns.
  pub fn is_empty(&self) -> bool {
    self.consumer_index.load(Ordering::Acquire) == self.producer_index.load(Ordering::Acquire)
  }

  pub fn len(&self) -> usize {
    let consumed = self.consumer_index.load(Ordering::Acquire);
    self.producer_index.load(Ordering::Acquire).saturating_sub(consumed)
  }
}

impl<T> Drop for SpscQueue<T> {
  fn drop(&mut self) {
    // SAFETY: `&mut self` rules out any other producer or consumer.
    unsafe {
      self.clear();
      let mut segment = *self.consumer_segment.get_mut();
      while !segment.is_null() {
        let next = *(*segment).next.get_mut();
        drop(Box::from_raw(segment));
        segment = next;
      }
    }
  }
}

impl<T> fmt::Debug for SpscQueue<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SpscQueue").field("capacity", &self.capacity).field("len", &self.len()).finish()
  }
}

/// The writing half of an [`SpscQueue`].
pub struct Producer<T> {
  queue: Arc<SpscQueue<T>>,
}

impl<T> Producer<T> {
  #[inline]
  pub fn offer(&mut self, item: T) {
    // SAFETY: `Producer` is not `Clone` and `offer` takes `&mut self`.
    unsafe { self.queue.offer(item) }
  }

  #[inline]
  pub fn is_empty(&self) -> bool { self.queue.is_empty() }
}

/// The reading half of an [`SpscQueue`].
pub struct Consumer<T> {
  queue: Arc<SpscQueue<T>>,
}

impl<T> Consumer<T> {
  #[inline]
  pub fn poll(&mut self) -> Option<T> {
    // SAFETY: `Consumer` is not `Clone` and `poll` takes `&mut self`.
    unsafe { self.queue.poll() }
  }

  #[inline]
  pub fn clear(&mut self) {
    // SAFETY: as for `poll`.
    unsafe { self.queue.clear() }
  }

  #[inline]
  pub fn is_empty(&self) -> bool { self.queue.is_empty() }

  #[inline]
  pub fn len(&self) -> usize { self.queue.len() }
}

impl<T> Iterator for Consumer<T> {
  type Item = T;

  fn next(&mut self) -> Option<T> { self.poll() }
}
