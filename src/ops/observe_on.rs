//! Moves delivery onto a [`Scheduler`].
//!
//! Upstream signals land in a queue (or stay in the upstream's fused queue)
//! and a drain task is scheduled whenever the drain goes from idle to busy.
//! The task drains until nothing is left, so at most one task runs per
//! subscription at any time.
use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use crate::{
  config,
  disposable::{Disposable, DisposableSlot},
  drain::{Drain, DrainTicket},
  error::undeliverable,
  fusion::{BoxedFusedQueue, FusedQueue, FusionMode},
  observable::Observable,
  observer::{Observer, Upstream},
  queue::{Consumer, Handoff, Producer, SpscQueue},
  scheduler::Scheduler,
};

pub struct ObserveOnOp<S, Sch> {
  source: S,
  scheduler: Sch,
  buffer_size: usize,
}

impl<S, Sch> ObserveOnOp<S, Sch> {
  #[inline]
  pub(crate) fn new(source: S, scheduler: Sch) -> Self {
    Self { source, scheduler, buffer_size: config::buffer_size() }
  }

  /// Segment size of the hand-off queue.
  pub fn buffer_size(mut self, size: usize) -> Self {
    self.buffer_size = size.max(1);
    self
  }
}

impl<S, Sch> Observable for ObserveOnOp<S, Sch>
where
  S: Observable,
  Sch: Scheduler,
{
  type Item = S::Item;
  type Err = S::Err;

  fn actual_subscribe<O>(self, observer: O)
  where
    O: Observer<S::Item, S::Err> + 'static,
  {
    let state = Arc::new(ObserveOnState {
      scheduler: self.scheduler,
      cancelled: AtomicBool::new(false),
      done: AtomicBool::new(false),
      error: Handoff::empty(),
      upstream: DisposableSlot::new(),
      task: DisposableSlot::new(),
      drain: Drain::new(DrainState {
        downstream: observer,
        source: None,
        output_fused: false,
        terminated: false,
      }),
    });
    self.source.actual_subscribe(ObserveOnObserver { state, queue: None, buffer_size: self.buffer_size })
  }
}

// ==================== Item source ====================

/// Where the drain pulls items from.
enum Source<Item, Err> {
  Queue(Consumer<Item>),
  Fused { queue: BoxedFusedQueue<Item, Err>, sync: bool },
}

impl<Item, Err> Source<Item, Err> {
  #[inline]
  fn poll(&mut self) -> Result<Option<Item>, Err> {
    match self {
      Source::Queue(queue) => Ok(queue.poll()),
      Source::Fused { queue, .. } => queue.try_poll(),
    }
  }

  fn is_sync(&self) -> bool { matches!(self, Source::Fused { sync: true, .. }) }

  fn is_empty(&mut self) -> bool {
    match self {
      Source::Queue(queue) => queue.is_empty(),
      Source::Fused { queue, .. } => queue.is_empty(),
    }
  }

  fn clear(&mut self) {
    match self {
      Source::Queue(queue) => queue.clear(),
      Source::Fused { queue, .. } => queue.clear(),
    }
  }
}

/// Offered downstream. Granting `ASYNC` moves the source out of the drain
/// loop into the consumer; the drain then only signals availability.
struct OutputQueue<Item, Err> {
  offered: Arc<Handoff<Source<Item, Err>>>,
  source: Option<Source<Item, Err>>,
}

impl<Item: Send, Err: Send> FusedQueue<Item, Err> for OutputQueue<Item, Err> {
  fn request_fusion(&mut self, mode: FusionMode) -> FusionMode {
    if !mode.contains(FusionMode::ASYNC) {
      return FusionMode::NONE;
    }
    match self.offered.take() {
      Some(source) => {
        self.source = Some(source);
        FusionMode::ASYNC
      }
      None => FusionMode::NONE,
    }
  }

  fn try_poll(&mut self) -> Result<Option<Item>, Err> {
    match self.source.as_mut() {
      Some(source) => source.poll(),
      None => Ok(None),
    }
  }

  fn is_empty(&mut self) -> bool { self.source.as_mut().map_or(true, Source::is_empty) }

  fn clear(&mut self) {
    if let Some(source) = self.source.as_mut() {
      source.clear();
    }
  }
}

// ==================== State ====================

struct DrainState<O, Item, Err> {
  downstream: O,
  source: Option<Source<Item, Err>>,
  output_fused: bool,
  terminated: bool,
}

impl<O, Item, Err> DrainState<O, Item, Err> {
  fn purge(&mut self) {
    if let Some(source) = self.source.as_mut() {
      source.clear();
    }
  }
}

struct ObserveOnState<O, Item, Err, Sch> {
  scheduler: Sch,
  cancelled: AtomicBool,
  done: AtomicBool,
  error: Handoff<Err>,
  upstream: DisposableSlot,
  task: DisposableSlot,
  drain: Drain<DrainState<O, Item, Err>>,
}

impl<O, Item, Err, Sch> ObserveOnState<O, Item, Err, Sch>
where
  O: Observer<Item, Err> + 'static,
  Item: Send + 'static,
  Err: Send + 'static,
  Sch: Scheduler,
{
  fn schedule(self: &Arc<Self>) {
    if let Some(ticket) = self.drain.enter() {
      self.run_on_scheduler(ticket);
    }
  }

  fn run_on_scheduler(self: &Arc<Self>, ticket: DrainTicket) {
    if self.cancelled.load(Ordering::Acquire) {
      return;
    }
    let state = self.clone();
    let task = self.scheduler.schedule(None, move || state.drain.run(ticket, |ds| state.drain_body(ds)));
    self.task.replace(Box::new(task));
  }

  fn terminate(&self, ds: &mut DrainState<O, Item, Err>, err: Option<Err>) {
    ds.terminated = true;
    self.upstream.weak_dispose();
    match err.or_else(|| self.error.take()) {
      Some(err) => ds.downstream.error(err),
      None => ds.downstream.complete(),
    }
    ds.purge();
  }

  fn drain_body(&self, ds: &mut DrainState<O, Item, Err>) {
    if ds.terminated {
      return;
    }
    if ds.output_fused {
      if self.cancelled.load(Ordering::Acquire) {
        return;
      }
      let done = self.done.load(Ordering::Acquire);
      ds.downstream.next_available();
      if done {
        self.terminate(ds, None);
      }
      return;
    }

    loop {
      if self.cancelled.load(Ordering::Acquire) {
        ds.purge();
        return;
      }
      let done = self.done.load(Ordering::Acquire);
      let Some(source) = ds.source.as_mut() else { return };
      match source.poll() {
        Ok(Some(v)) => ds.downstream.next(v),
        Ok(None) => {
          if done || source.is_sync() {
            self.terminate(ds, None);
          }
          return;
        }
        Err(err) => {
          self.upstream.dispose();
          self.terminate(ds, Some(err));
          return;
        }
      }
    }
  }
}

impl<O, Item, Err, Sch> Disposable for ObserveOnState<O, Item, Err, Sch>
where
  O: Observer<Item, Err> + 'static,
  Item: Send + 'static,
  Err: Send + 'static,
  Sch: Scheduler,
{
  fn dispose(&self) {
    if self.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    self.upstream.dispose();
    self.task.dispose();
    self.drain.drain(|ds| ds.purge());
  }

  #[inline]
  fn is_disposed(&self) -> bool { self.cancelled.load(Ordering::Acquire) }
}

// ==================== Observer ====================

struct ObserveOnObserver<O, Item, Err, Sch> {
  state: Arc<ObserveOnState<O, Item, Err, Sch>>,
  queue: Option<Producer<Item>>,
  buffer_size: usize,
}

impl<O, Item, Err, Sch> Observer<Item, Err> for ObserveOnObserver<O, Item, Err, Sch>
where
  O: Observer<Item, Err> + 'static,
  Item: Send + 'static,
  Err: Send + 'static,
  Sch: Scheduler,
{
  fn on_subscribe(&mut self, mut upstream: Upstream<Item, Err>) {
    let fused = upstream.take_fusion();
    if !self.state.upstream.set_once(Box::new(upstream.disposable().clone())) {
      return;
    }

    let source = match fused {
      Some(mut queue) => {
        let mode = queue.request_fusion(FusionMode::ANY | FusionMode::BOUNDARY);
        if mode.is_none() {
          None
        } else {
          Some(Source::Fused { queue, sync: mode == FusionMode::SYNC })
        }
      }
      None => None,
    };
    let source = source.unwrap_or_else(|| {
      let (producer, consumer) = SpscQueue::new(self.buffer_size);
      self.queue = Some(producer);
      Source::Queue(consumer)
    });

    let sync = source.is_sync();
    let offered = Arc::new(Handoff::new(source));
    let disposable: Arc<dyn Disposable> = self.state.clone();
    let downstream_upstream = if sync {
      Upstream::new(disposable)
    } else {
      Upstream::with_fusion(disposable, OutputQueue { offered: offered.clone(), source: None })
    };

    let state = &self.state;
    let subscribed = state.drain.try_with(|ds| {
      ds.downstream.on_subscribe(downstream_upstream);
      ds.source = offered.take();
      ds.output_fused = ds.source.is_none();
    });
    if let Some(((), Some(rest))) = subscribed {
      state.run_on_scheduler(rest);
    }
    if sync {
      state.schedule();
    }
  }

  fn next(&mut self, value: Item) {
    if let Some(queue) = self.queue.as_mut() {
      queue.offer(value);
      self.state.schedule();
    }
  }

  fn error(&mut self, err: Err) {
    if let Err(err) = self.state.error.put(err) {
      undeliverable(err);
      return;
    }
    self.state.done.store(true, Ordering::Release);
    self.state.schedule();
  }

  fn complete(&mut self) {
    self.state.done.store(true, Ordering::Release);
    self.state.schedule();
  }

  #[inline]
  fn next_available(&mut self) { self.state.schedule(); }
}

#[cfg(test)]
mod tests {
  use std::{thread, time::Duration};

  use super::*;
  use crate::{
    error::RxError,
    observable::{from_iter, range, ObservableExt},
    scheduler::{ImmediateScheduler, TestScheduler},
    subject::Subject,
  };

  #[rxcore_macro::test]
  fn nothing_arrives_before_the_scheduler_runs() {
    let scheduler = TestScheduler::new();
    let test = range::<RxError>(0, 3).observe_on(scheduler.clone()).test();
    test.assert_subscribed().assert_values(&[]).assert_not_complete();
    scheduler.flush();
    test.assert_values(&[0, 1, 2]).assert_complete();
  }

  #[rxcore_macro::test]
  fn one_task_per_busy_period() {
    let scheduler = TestScheduler::new();
    let subject = Subject::<i32, RxError>::new();
    let test = subject.clone().observe_on(scheduler.clone()).test();
    subject.next(1);
    subject.next(2);
    subject.next(3);
    assert_eq!(scheduler.pending_count(), 1);
    scheduler.flush();
    test.assert_values(&[1, 2, 3]);

    subject.complete();
    scheduler.flush();
    test.assert_complete();
  }

  #[rxcore_macro::test]
  fn error_follows_queued_items() {
    let scheduler = TestScheduler::new();
    let subject = Subject::<i32, RxError>::new();
    let test = subject.clone().observe_on(scheduler.clone()).test();
    subject.next(1);
    subject.error(RxError::msg("late"));
    scheduler.flush();
    test.assert_values(&[1]).assert_error(|e| e.to_string() == "late");
  }

  #[rxcore_macro::test]
  fn grants_async_fusion_downstream() {
    let scheduler = TestScheduler::new();
    let subject = Subject::<i32, RxError>::new();
    let test = subject.clone().observe_on(scheduler.clone()).test_fused(FusionMode::ANY);
    test.assert_fusion_mode(FusionMode::ASYNC);

    subject.next(7);
    subject.next(8);
    scheduler.flush();
    test.assert_values(&[7, 8]).assert_not_complete();

    subject.complete();
    scheduler.flush();
    test.assert_complete();
  }

  #[rxcore_macro::test]
  fn sync_upstream_is_not_offered_downstream() {
    let scheduler = TestScheduler::new();
    let test = from_iter::<_, RxError>(vec![1, 2]).observe_on(scheduler.clone()).test_fused(FusionMode::ANY);
    test.assert_fusion_mode(FusionMode::NONE);
    scheduler.flush();
    test.assert_values(&[1, 2]).assert_complete();
  }

  #[rxcore_macro::test]
  fn dispose_cancels_pending_delivery() {
    let scheduler = TestScheduler::new();
    let subject = Subject::<i32, RxError>::new();
    let test = subject.clone().observe_on(scheduler.clone()).test();
    subject.next(1);
    test.dispose();
    scheduler.flush();
    subject.next(2);
    scheduler.flush();
    test.assert_values(&[]).assert_not_complete();
    assert_eq!(subject.observer_count(), 0);
  }

  #[rxcore_macro::test]
  fn completion_releases_subject_subscription() {
    let subject = Subject::<i32, RxError>::new();
    let token = Arc::new(());
    let held = token.clone();
    subject.clone().observe_on(ImmediateScheduler).subscribe(move |_| drop(held.clone()));
    subject.next(1);
    subject.complete();
    assert_eq!(Arc::strong_count(&token), 1);
  }

  #[rxcore_macro::test]
  fn small_buffer_spans_segments() {
    let scheduler = TestScheduler::new();
    let subject = Subject::<i32, RxError>::new();
    let test = subject.clone().observe_on(scheduler.clone()).buffer_size(2).test();
    for i in 0..9 {
      subject.next(i);
    }
    subject.complete();
    scheduler.flush();
    test.assert_values(&[0, 1, 2, 3, 4, 5, 6, 7, 8]).assert_complete();
  }

  #[rxcore_macro::test]
  fn immediate_scheduler_delivers_inline() {
    range::<RxError>(0, 4).observe_on(ImmediateScheduler).test().assert_values(&[0, 1, 2, 3]).assert_complete();
  }

  #[rxcore_macro::test]
  fn producers_on_many_threads() {
    let scheduler = TestScheduler::new();
    let subject = Subject::<usize, RxError>::new();
    let test = subject.clone().observe_on(scheduler.clone()).test();
    let handles: Vec<_> = (0..4)
      .map(|p| {
        let subject = subject.clone();
        thread::spawn(move || {
          for i in 0..100 {
            subject.next(p * 100 + i);
          }
        })
      })
      .collect();
    for h in handles {
      h.join().unwrap();
    }
    subject.complete();
    scheduler.flush();
    test.assert_value_count(400).assert_serialized().assert_complete();
  }

  #[cfg(feature = "tokio-scheduler")]
  #[rxcore_macro::test(shared)]
  async fn delivers_on_runtime_threads() {
    use crate::scheduler::TokioScheduler;

    let caller = thread::current().id();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let s = seen.clone();
    let done = Arc::new(AtomicBool::new(false));
    let d = done.clone();
    range::<RxError>(0, 50).observe_on(TokioScheduler::current()).subscribe_all(
      move |_| s.lock().unwrap().push(thread::current().id()),
      |_| {},
      move || d.store(true, Ordering::SeqCst),
    );
    for _ in 0..500 {
      if done.load(Ordering::SeqCst) {
        break;
      }
      tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(done.load(Ordering::SeqCst));
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 50);
    assert!(seen.iter().all(|id| *id != caller));
  }
}
