//! `flat_map` and its relatives: every source item becomes an inner source
//! and the items of all inners are merged into one serialized stream.
//!
//! Each inner owns an SPSC queue. An inner whose queue is empty tries to
//! emit straight through the drain; everything else is queued and picked up
//! by whichever thread currently drains. Single-value inners never get
//! subscribed, their value goes through the same fast path.
use std::sync::{
  atomic::{AtomicBool, AtomicUsize, Ordering},
  Arc,
};

use crate::{
  config,
  disposable::{CompositeDisposable, Disposable, DisposableSlot},
  drain::Drain,
  error::ErrorComposite,
  error_slot::{ErrorMode, ErrorSlot},
  fusion::{BoxedFusedQueue, FusionMode},
  observable::{from_iter, FromIter, Observable, ObservableExt},
  observer::{Observer, Upstream},
  queue::{Consumer, Handoff, MpscQueue, MpscReceiver, MpscSender, Producer, SpscQueue},
};

/// Merges `sources` into one stream.
pub fn merge<I, S>(sources: I) -> FlatMapOp<FromIter<I::IntoIter, S::Err>, IdentityInner>
where
  I: IntoIterator<Item = S>,
  I::IntoIter: Send + 'static,
  S: Observable + Send,
{
  from_iter(sources).merge_all()
}

// ============================================================================
// Inner mapping
// ============================================================================

/// Turns a source item into the inner source to merge.
pub trait InnerMapper<Item, Err>: Send + 'static {
  type Inner: Observable<Err = Err> + Send;

  fn map_inner(&mut self, item: Item) -> Result<Self::Inner, Err>;
}

pub struct MapInner<F>(pub(crate) F);

impl<Item, Err, F, S> InnerMapper<Item, Err> for MapInner<F>
where
  F: FnMut(Item) -> S + Send + 'static,
  S: Observable<Err = Err> + Send,
{
  type Inner = S;

  #[inline]
  fn map_inner(&mut self, item: Item) -> Result<S, Err> { Ok((self.0)(item)) }
}

pub struct TryMapInner<F>(pub(crate) F);

impl<Item, Err, F, S> InnerMapper<Item, Err> for TryMapInner<F>
where
  F: FnMut(Item) -> Result<S, Err> + Send + 'static,
  S: Observable<Err = Err> + Send,
{
  type Inner = S;

  #[inline]
  fn map_inner(&mut self, item: Item) -> Result<S, Err> { (self.0)(item) }
}

/// The items are the inner sources already.
pub struct IdentityInner;

impl<S: Observable + Send> InnerMapper<S, S::Err> for IdentityInner {
  type Inner = S;

  #[inline]
  fn map_inner(&mut self, item: S) -> Result<S, S::Err> { Ok(item) }
}

// ============================================================================
// Operator
// ============================================================================

pub struct FlatMapOp<S: Observable, M> {
  source: S,
  mapper: M,
  max_concurrency: usize,
  buffer_size: usize,
  error_mode: ErrorMode<S::Err>,
}

impl<S: Observable, M> FlatMapOp<S, M> {
  pub(crate) fn new(source: S, mapper: M) -> Self {
    Self {
      source,
      mapper,
      max_concurrency: usize::MAX,
      buffer_size: config::buffer_size(),
      error_mode: ErrorMode::FirstWins,
    }
  }

  /// Caps the number of inners subscribed at the same time; the rest wait
  /// in arrival order. `0` is treated as `1`.
  pub fn max_concurrency(mut self, max: usize) -> Self {
    self.max_concurrency = max.max(1);
    self
  }

  /// Segment size of the per-inner queues.
  pub fn buffer_size(mut self, size: usize) -> Self {
    self.buffer_size = size.max(1);
    self
  }

  /// Keeps every source running after an error and reports all errors,
  /// composed, once everything finished.
  pub fn delay_errors(mut self) -> Self
  where
    S::Err: ErrorComposite,
  {
    self.error_mode = ErrorMode::delay();
    self
  }
}

impl<S, M> Observable for FlatMapOp<S, M>
where
  S: Observable,
  M: InnerMapper<S::Item, S::Err>,
{
  type Item = <M::Inner as Observable>::Item;
  type Err = S::Err;

  fn actual_subscribe<O>(self, observer: O)
  where
    O: Observer<Self::Item, Self::Err> + 'static,
  {
    let bounded = self.max_concurrency != usize::MAX;
    let (pending_tx, pending_rx) = if bounded {
      let (tx, rx) = SpscQueue::new(self.buffer_size);
      (Some(tx), Some(rx))
    } else {
      (None, None)
    };
    let (scalar_tx, scalar_rx) = SpscQueue::new(self.buffer_size);
    let (registrations, registered) = MpscQueue::new();

    let state = Arc::new(MergeState {
      cancelled: AtomicBool::new(false),
      done: AtomicBool::new(false),
      upstream: DisposableSlot::new(),
      inners: CompositeDisposable::new(),
      errors: ErrorSlot::new(self.error_mode),
      active: AtomicUsize::new(0),
      max_concurrency: self.max_concurrency,
      buffer_size: self.buffer_size,
      registrations,
      drain: Drain::new(DrainState {
        downstream: observer,
        inners: Vec::new(),
        pending: pending_rx,
        scalars: scalar_rx,
        registered,
        terminated: false,
      }),
    });

    let upstream = Upstream::new(state.clone());
    if let Some(((), Some(rest))) = state.drain.try_with(|ds| ds.downstream.on_subscribe(upstream)) {
      state.drain.run(rest, |ds| state.drain_loop(ds));
    }
    if state.cancelled.load(Ordering::Acquire) {
      return;
    }

    self.source.actual_subscribe(OuterObserver {
      state,
      mapper: self.mapper,
      pending: pending_tx,
      scalars: scalar_tx,
      done: false,
    });
  }
}

// ============================================================================
// Shared state
// ============================================================================

enum Pending<I: Observable> {
  Source(I),
  Scalar(I::Item),
}

struct MergeState<O, I: Observable> {
  cancelled: AtomicBool,
  /// The outer source terminated.
  done: AtomicBool,
  upstream: DisposableSlot,
  inners: CompositeDisposable,
  errors: ErrorSlot<I::Err>,
  /// Inners subscribed (or reserved) and not yet reaped by the drainer.
  active: AtomicUsize,
  max_concurrency: usize,
  buffer_size: usize,
  registrations: MpscSender<InnerEntry<I::Item, I::Err>>,
  drain: Drain<DrainState<O, I>>,
}

struct DrainState<O, I: Observable> {
  downstream: O,
  inners: Vec<InnerEntry<I::Item, I::Err>>,
  pending: Option<Consumer<Pending<I>>>,
  scalars: Consumer<I::Item>,
  registered: MpscReceiver<InnerEntry<I::Item, I::Err>>,
  terminated: bool,
}

impl<O, I: Observable> DrainState<O, I> {
  fn purge(&mut self) {
    for mut entry in self.inners.drain(..) {
      if let Some(q) = entry.fused.as_mut() {
        q.clear();
      }
    }
    self.scalars.clear();
    if let Some(pending) = self.pending.as_mut() {
      pending.clear();
    }
    self.registered.clear();
  }
}

impl<O, I> MergeState<O, I>
where
  I: Observable + Send,
  O: Observer<I::Item, I::Err> + 'static,
{
  fn drain(self: &Arc<Self>) { self.drain.drain(|ds| self.drain_loop(ds)) }

  /// Fast path for one item: emits in place when nobody drains.
  fn try_emit(self: &Arc<Self>, value: I::Item) -> Result<(), I::Item> {
    self.drain.try_emit(
      value,
      |ds, v| {
        if !ds.terminated && !self.is_stopped() {
          ds.downstream.next(v)
        }
      },
      |ds| self.drain_loop(ds),
    )
  }

  #[inline]
  fn is_stopped(&self) -> bool {
    self.cancelled.load(Ordering::Acquire) || (!self.errors.is_delayed() && self.errors.has_error())
  }

  fn cancel_sources(&self) {
    self.upstream.dispose();
    self.inners.dispose();
  }

  /// Records an error; in first-wins mode everything else is disposed right
  /// away and the drainer delivers it.
  fn fail(&self, err: I::Err) {
    if self.errors.add(err) && !self.errors.is_delayed() {
      tracing::trace!(target: "rxcore::flat_map", "error, disposing all sources");
      self.cancel_sources();
    }
  }

  /// Reserves one concurrency slot.
  fn try_reserve(&self) -> bool {
    let mut active = self.active.load(Ordering::Acquire);
    loop {
      if active >= self.max_concurrency {
        return false;
      }
      match self.active.compare_exchange_weak(active, active + 1, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => return true,
        Err(now) => active = now,
      }
    }
  }

  #[inline]
  fn release(&self) { self.active.fetch_sub(1, Ordering::AcqRel); }

  /// Subscribes `source`; its slot in `active` is already taken.
  fn subscribe_inner(self: &Arc<Self>, source: I) {
    let shared = Arc::new(InnerShared {
      done: AtomicBool::new(false),
      upstream: DisposableSlot::new(),
      fused: Handoff::empty(),
    });
    let Some(key) = self.inners.add(Box::new(shared.clone())) else {
      self.release();
      return;
    };
    let (queue, consumer) = SpscQueue::new(self.buffer_size);
    // Registered before subscribing, so a completion check that sees the
    // outer done also sees this inner.
    self.registrations.push(InnerEntry {
      shared: shared.clone(),
      key,
      queue: consumer,
      fused: None,
      sync: false,
    });
    tracing::trace!(target: "rxcore::flat_map", key, "subscribing inner");
    source.actual_subscribe(InnerObserver { state: self.clone(), shared, queue });
  }

  /// Stops the loop on cancellation or a first-wins error. Returns whether
  /// the drainer has to bail out.
  fn check_stop(&self, ds: &mut DrainState<O, I>) -> bool {
    if self.cancelled.load(Ordering::Acquire) {
      ds.purge();
      return true;
    }
    if !self.errors.is_delayed() && self.errors.has_error() {
      self.cancel_sources();
      if let Some(err) = self.errors.terminate() {
        ds.terminated = true;
        ds.downstream.error(err);
      }
      ds.purge();
      return true;
    }
    false
  }

  fn next_pending(&self, ds: &mut DrainState<O, I>) -> Option<Pending<I>> {
    let pending = ds.pending.as_mut()?;
    if pending.is_empty() || !self.try_reserve() {
      return None;
    }
    // Nobody else polls, and it was not empty.
    let next = pending.poll();
    if next.is_none() {
      self.release();
    }
    next
  }

  fn drain_loop(self: &Arc<Self>, ds: &mut DrainState<O, I>) {
    if ds.terminated {
      ds.purge();
      return;
    }
    loop {
      if self.check_stop(ds) {
        return;
      }
      // Read before looking at the queues: everything the outer source
      // produced before it terminated is visible after this load.
      let done = self.done.load(Ordering::Acquire);

      while let Some(v) = ds.scalars.poll() {
        ds.downstream.next(v);
        if self.check_stop(ds) {
          return;
        }
      }

      while let Some(next) = self.next_pending(ds) {
        match next {
          Pending::Source(source) => self.subscribe_inner(source),
          Pending::Scalar(v) => {
            // The slot is held until the value is out, so nothing admitted
            // from inside `next` can overtake it.
            ds.downstream.next(v);
            self.release();
            if self.check_stop(ds) {
              return;
            }
          }
        }
      }

      while let Some(entry) = ds.registered.poll() {
        ds.inners.push(entry);
      }

      let mut reaped = 0;
      let mut i = 0;
      while i < ds.inners.len() {
        loop {
          let entry = &mut ds.inners[i];
          match entry.poll() {
            Ok(Some(v)) => ds.downstream.next(v),
            Ok(None) => break,
            Err(err) => {
              entry.abandon();
              self.fail(err);
              break;
            }
          }
          if self.check_stop(ds) {
            return;
          }
        }
        if self.check_stop(ds) {
          return;
        }

        if ds.inners[i].is_finished() {
          let entry = ds.inners.swap_remove(i);
          entry.shared.upstream.weak_dispose();
          self.inners.delete(entry.key);
          self.release();
          reaped += 1;
        } else {
          i += 1;
        }
      }

      if done
        && self.active.load(Ordering::Acquire) == 0
        && ds.inners.is_empty()
        && ds.registered.is_empty()
        && ds.scalars.is_empty()
        && ds.pending.as_ref().map_or(true, |p| p.is_empty())
      {
        ds.terminated = true;
        // Every source finished; drop the references without disposing.
        self.upstream.weak_dispose();
        self.inners.clear();
        match self.errors.terminate() {
          Some(err) => ds.downstream.error(err),
          None => ds.downstream.complete(),
        }
        ds.purge();
        return;
      }

      // A reaped inner frees a slot for the pending ones.
      if reaped == 0 || ds.pending.is_none() {
        return;
      }
    }
  }
}

impl<O, I> Disposable for MergeState<O, I>
where
  I: Observable + Send,
  O: Observer<I::Item, I::Err> + 'static,
{
  fn dispose(&self) {
    if self.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    tracing::trace!(target: "rxcore::flat_map", "disposed");
    self.cancel_sources();
    self.drain.drain(|ds| ds.purge());
  }

  #[inline]
  fn is_disposed(&self) -> bool { self.cancelled.load(Ordering::Acquire) }
}

// ============================================================================
// Outer observer
// ============================================================================

struct OuterObserver<O, I: Observable, M> {
  state: Arc<MergeState<O, I>>,
  mapper: M,
  pending: Option<Producer<Pending<I>>>,
  scalars: Producer<I::Item>,
  done: bool,
}

impl<O, I, M> OuterObserver<O, I, M>
where
  I: Observable + Send,
  O: Observer<I::Item, I::Err> + 'static,
{
  /// Bounded mode: the caller holds a slot. A value that cannot go out now
  /// queues behind the waiting sources.
  fn emit_reserved_scalar(&mut self, value: I::Item) {
    let result = self.state.try_emit(value);
    self.state.release();
    if let (Err(value), Some(pending)) = (result, self.pending.as_mut()) {
      pending.offer(Pending::Scalar(value));
    }
    self.state.drain();
  }

  fn emit_scalar(&mut self, value: I::Item) {
    if self.scalars.is_empty() {
      match self.state.try_emit(value) {
        Ok(()) => return,
        Err(value) => self.scalars.offer(value),
      }
    } else {
      self.scalars.offer(value);
    }
    self.state.drain();
  }

  fn terminate(&mut self) {
    self.done = true;
    self.state.done.store(true, Ordering::Release);
    self.state.drain();
  }
}

impl<O, I, M, Item> Observer<Item, I::Err> for OuterObserver<O, I, M>
where
  I: Observable + Send,
  O: Observer<I::Item, I::Err> + 'static,
  M: InnerMapper<Item, I::Err, Inner = I>,
{
  fn on_subscribe(&mut self, upstream: Upstream<Item, I::Err>) {
    self.state.upstream.set_once(Box::new(upstream.disposable().clone()));
  }

  fn next(&mut self, item: Item) {
    if self.done || self.state.is_stopped() {
      return;
    }
    let inner = match self.mapper.map_inner(item) {
      Ok(inner) => inner,
      Err(err) => {
        self.state.upstream.dispose();
        self.state.fail(err);
        self.terminate();
        return;
      }
    };
    let next = match inner.into_scalar() {
      Ok(None) => return,
      Ok(Some(v)) => Pending::Scalar(v),
      Err(source) => Pending::Source(source),
    };

    if let Some(pending) = self.pending.as_mut() {
      // Waiting sources go first, whatever the slot count says.
      if !pending.is_empty() || !self.state.try_reserve() {
        pending.offer(next);
        self.state.drain();
        return;
      }
    } else if let Pending::Source(_) = next {
      self.state.active.fetch_add(1, Ordering::AcqRel);
    }

    match next {
      Pending::Source(source) => self.state.subscribe_inner(source),
      Pending::Scalar(v) if self.pending.is_some() => self.emit_reserved_scalar(v),
      Pending::Scalar(v) => self.emit_scalar(v),
    }
  }

  fn error(&mut self, err: I::Err) {
    if self.done {
      return;
    }
    self.state.fail(err);
    self.terminate();
  }

  fn complete(&mut self) {
    if !self.done {
      self.terminate();
    }
  }
}

// ============================================================================
// Inner observer
// ============================================================================

struct InnerShared<Item, Err> {
  done: AtomicBool,
  upstream: DisposableSlot,
  fused: Handoff<(BoxedFusedQueue<Item, Err>, FusionMode)>,
}

impl<Item: Send, Err: Send> Disposable for InnerShared<Item, Err> {
  #[inline]
  fn dispose(&self) { self.upstream.dispose() }

  #[inline]
  fn is_disposed(&self) -> bool { self.upstream.is_disposed() }
}

/// The drainer's view of one inner.
struct InnerEntry<Item, Err> {
  shared: Arc<InnerShared<Item, Err>>,
  key: usize,
  queue: Consumer<Item>,
  fused: Option<BoxedFusedQueue<Item, Err>>,
  sync: bool,
}

impl<Item, Err> InnerEntry<Item, Err> {
  fn poll(&mut self) -> Result<Option<Item>, Err> {
    if self.fused.is_none() {
      if let Some((queue, mode)) = self.shared.fused.take() {
        self.sync = mode == FusionMode::SYNC;
        self.fused = Some(queue);
      }
    }
    if let Some(v) = self.queue.poll() {
      return Ok(Some(v));
    }
    let Some(fused) = self.fused.as_mut() else { return Ok(None) };
    let polled = fused.try_poll()?;
    if polled.is_none() && self.sync {
      // A synchronous queue that runs dry is complete.
      self.fused = None;
      self.shared.done.store(true, Ordering::Release);
    }
    Ok(polled)
  }

  /// Drops whatever is left after the inner failed.
  fn abandon(&mut self) {
    if let Some(mut fused) = self.fused.take() {
      fused.clear();
    }
    self.queue.clear();
    self.shared.upstream.dispose();
    self.shared.done.store(true, Ordering::Release);
  }

  fn is_finished(&mut self) -> bool {
    if !self.shared.done.load(Ordering::Acquire) {
      return false;
    }
    self.queue.is_empty() && self.fused.as_mut().map_or(true, |q| q.is_empty())
  }
}

struct InnerObserver<O, I: Observable> {
  state: Arc<MergeState<O, I>>,
  shared: Arc<InnerShared<I::Item, I::Err>>,
  queue: Producer<I::Item>,
}

impl<O, I> Observer<I::Item, I::Err> for InnerObserver<O, I>
where
  I: Observable + Send,
  O: Observer<I::Item, I::Err> + 'static,
{
  fn on_subscribe(&mut self, mut upstream: Upstream<I::Item, I::Err>) {
    let fusion = upstream.take_fusion();
    self.shared.upstream.set_once(Box::new(upstream.disposable().clone()));
    let Some(mut queue) = fusion else { return };
    let mode = queue.request_fusion(FusionMode::ANY | FusionMode::BOUNDARY);
    if mode.is_none() {
      return;
    }
    if self.shared.fused.put((queue, mode)).is_ok() && mode == FusionMode::SYNC {
      self.state.drain();
    }
  }

  fn next(&mut self, value: I::Item) {
    if self.state.is_stopped() {
      return;
    }
    if self.queue.is_empty() {
      match self.state.try_emit(value) {
        Ok(()) => return,
        Err(value) => self.queue.offer(value),
      }
    } else {
      self.queue.offer(value);
    }
    self.state.drain();
  }

  fn error(&mut self, err: I::Err) {
    self.state.fail(err);
    self.shared.done.store(true, Ordering::Release);
    self.state.drain();
  }

  fn complete(&mut self) {
    self.shared.done.store(true, Ordering::Release);
    self.state.drain();
  }

  fn next_available(&mut self) { self.state.drain(); }
}
