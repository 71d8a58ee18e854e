//! A recording observer for tests.
//!
//! [`TestObserver`] is a cloneable handle over shared recorded state; the
//! observer half produced by [`TestObserver::observer`] is what gets
//! subscribed. Both are thread safe, so a test can subscribe on one thread
//! and wait for the terminal signal on another.
use std::{
  fmt::Debug,
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Condvar, Mutex, MutexGuard,
  },
  time::{Duration, Instant},
};

use crate::{
  disposable::{Disposable, DisposableSlot},
  error::protocol_violation,
  fusion::{BoxedFusedQueue, FusionMode},
  observer::{Observer, Upstream},
  util::lock_recover,
};

struct Record<Item, Err> {
  values: Vec<Item>,
  errors: Vec<Err>,
  completions: usize,
  subscriptions: usize,
  fusion_mode: FusionMode,
}

struct Shared<Item, Err> {
  record: Mutex<Record<Item, Err>>,
  terminated: Condvar,
  upstream: DisposableSlot,
  inside: AtomicUsize,
  max_inside: AtomicUsize,
}

impl<Item, Err> Shared<Item, Err> {
  fn record(&self) -> MutexGuard<'_, Record<Item, Err>> { lock_recover(&self.record) }

  fn enter(self: &Arc<Self>) -> EntryGuard<Item, Err> {
    let now = self.inside.fetch_add(1, Ordering::AcqRel) + 1;
    self.max_inside.fetch_max(now, Ordering::AcqRel);
    EntryGuard(self.clone())
  }
}

/// Counts one thread inside an observer method until dropped.
struct EntryGuard<Item, Err>(Arc<Shared<Item, Err>>);

impl<Item, Err> Drop for EntryGuard<Item, Err> {
  fn drop(&mut self) { self.0.inside.fetch_sub(1, Ordering::AcqRel); }
}

/// Handle to the values, errors and completions an observer received.
pub struct TestObserver<Item, Err> {
  shared: Arc<Shared<Item, Err>>,
}

impl<Item, Err> Clone for TestObserver<Item, Err> {
  fn clone(&self) -> Self { Self { shared: self.shared.clone() } }
}

impl<Item, Err> Default for TestObserver<Item, Err> {
  fn default() -> Self { Self::new() }
}

impl<Item, Err> TestObserver<Item, Err> {
  pub fn new() -> Self {
    Self {
      shared: Arc::new(Shared {
        record: Mutex::new(Record {
          values: Vec::new(),
          errors: Vec::new(),
          completions: 0,
          subscriptions: 0,
          fusion_mode: FusionMode::NONE,
        }),
        terminated: Condvar::new(),
        upstream: DisposableSlot::new(),
        inside: AtomicUsize::new(0),
        max_inside: AtomicUsize::new(0),
      }),
    }
  }

  /// The observer to subscribe. It asks its upstream for `mode` fusion and
  /// drives whatever mode it is granted.
  pub fn observer(&self, mode: FusionMode) -> TestSubscriber<Item, Err> {
    TestSubscriber { shared: self.shared.clone(), requested: mode, queue: None, sync: false }
  }

  pub fn dispose(&self) { self.shared.upstream.dispose() }

  pub fn is_disposed(&self) -> bool { self.shared.upstream.is_disposed() }

  pub fn value_count(&self) -> usize { self.shared.record().values.len() }

  pub fn error_count(&self) -> usize { self.shared.record().errors.len() }

  pub fn completions(&self) -> usize { self.shared.record().completions }

  pub fn is_terminated(&self) -> bool {
    let record = self.shared.record();
    record.completions > 0 || !record.errors.is_empty()
  }

  pub fn fusion_mode(&self) -> FusionMode { self.shared.record().fusion_mode }

  /// Most threads ever seen inside observer methods at the same time.
  pub fn max_concurrent_entries(&self) -> usize { self.shared.max_inside.load(Ordering::Acquire) }

  pub fn values(&self) -> Vec<Item>
  where
    Item: Clone,
  {
    self.shared.record().values.clone()
  }

  pub fn errors(&self) -> Vec<Err>
  where
    Err: Clone,
  {
    self.shared.record().errors.clone()
  }

  /// Runs `f` on the recorded values without cloning them.
  pub fn with_values<R>(&self, f: impl FnOnce(&[Item]) -> R) -> R { f(&self.shared.record().values) }

  /// Blocks until a terminal signal arrived or `timeout` elapsed; returns
  /// whether it arrived.
  pub fn await_terminal(&self, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut record = self.shared.record();
    while record.completions == 0 && record.errors.is_empty() {
      let now = Instant::now();
      if now >= deadline {
        return false;
      }
      record = match self.shared.terminated.wait_timeout(record, deadline - now) {
        Ok((guard, _)) => guard,
        Err(poisoned) => poisoned.into_inner().0,
      };
    }
    true
  }

  // ==================== Assertions ====================

  #[track_caller]
  pub fn assert_values(&self, expected: &[Item]) -> &Self
  where
    Item: PartialEq + Debug,
  {
    assert_eq!(self.shared.record().values.as_slice(), expected, "values differ");
    self
  }

  #[track_caller]
  pub fn assert_value_count(&self, expected: usize) -> &Self {
    assert_eq!(self.value_count(), expected, "value count differs");
    self
  }

  #[track_caller]
  pub fn assert_complete(&self) -> &Self {
    let record = self.shared.record();
    assert_eq!(record.completions, 1, "expected exactly one completion");
    assert!(record.errors.is_empty(), "expected no error, got {}", record.errors.len());
    self
  }

  #[track_caller]
  pub fn assert_not_complete(&self) -> &Self {
    assert_eq!(self.completions(), 0, "unexpected completion");
    self
  }

  #[track_caller]
  pub fn assert_error_count(&self, expected: usize) -> &Self {
    assert_eq!(self.error_count(), expected, "error count differs");
    self
  }

  #[track_caller]
  pub fn assert_no_errors(&self) -> &Self { self.assert_error_count(0) }

  /// Exactly one error, accepted by `check`.
  #[track_caller]
  pub fn assert_error(&self, check: impl FnOnce(&Err) -> bool) -> &Self {
    let record = self.shared.record();
    assert_eq!(record.errors.len(), 1, "expected exactly one error");
    assert_eq!(record.completions, 0, "completion after an error");
    assert!(check(&record.errors[0]), "error rejected by the check");
    self
  }

  #[track_caller]
  pub fn assert_subscribed(&self) -> &Self {
    assert_eq!(self.shared.record().subscriptions, 1, "expected exactly one on_subscribe");
    self
  }

  #[track_caller]
  pub fn assert_fusion_mode(&self, expected: FusionMode) -> &Self {
    assert_eq!(self.fusion_mode(), expected, "fusion mode differs");
    self
  }

  /// Observer methods were never entered by two threads at once.
  #[track_caller]
  pub fn assert_serialized(&self) -> &Self {
    assert!(self.max_concurrent_entries() <= 1, "observer entered concurrently");
    self
  }
}

/// The subscribed half of a [`TestObserver`].
pub struct TestSubscriber<Item, Err> {
  shared: Arc<Shared<Item, Err>>,
  requested: FusionMode,
  queue: Option<BoxedFusedQueue<Item, Err>>,
  sync: bool,
}

impl<Item: Send, Err: Send> TestSubscriber<Item, Err> {
  fn push_error(&self, err: Err) {
    self.shared.record().errors.push(err);
    self.shared.terminated.notify_all();
  }

  fn push_complete(&self) {
    self.shared.record().completions += 1;
    self.shared.terminated.notify_all();
  }

  /// Polls the fused queue dry. In `SYNC` mode an empty poll completes.
  fn poll_queue(&mut self) {
    let Some(queue) = self.queue.as_mut() else { return };
    loop {
      if self.shared.upstream.is_disposed() {
        queue.clear();
        return;
      }
      match queue.try_poll() {
        Ok(Some(v)) => self.shared.record().values.push(v),
        Ok(None) => {
          if self.sync {
            self.queue = None;
            self.push_complete();
          }
          return;
        }
        Err(err) => {
          self.queue = None;
          self.push_error(err);
          return;
        }
      }
    }
  }
}

impl<Item: Send, Err: Send> Observer<Item, Err> for TestSubscriber<Item, Err> {
  fn on_subscribe(&mut self, mut upstream: Upstream<Item, Err>) {
    let _entry = self.shared.enter();
    {
      let mut record = self.shared.record();
      record.subscriptions += 1;
      if record.subscriptions > 1 {
        drop(record);
        protocol_violation("on_subscribe called twice");
        upstream.dispose();
        return;
      }
    }
    let fused = if self.requested.is_none() { None } else { upstream.take_fusion() };
    self.shared.upstream.set_once(Box::new(upstream.disposable().clone()));
    if let Some(mut queue) = fused {
      let mode = queue.request_fusion(self.requested);
      self.shared.record().fusion_mode = mode;
      if mode == FusionMode::SYNC {
        self.sync = true;
        self.queue = Some(queue);
        self.poll_queue();
      } else if mode == FusionMode::ASYNC {
        self.queue = Some(queue);
      }
    }
  }

  fn next(&mut self, value: Item) {
    let _entry = self.shared.enter();
    self.shared.record().values.push(value);
  }

  fn next_available(&mut self) {
    let _entry = self.shared.enter();
    self.poll_queue();
  }

  fn error(&mut self, err: Err) {
    let _entry = self.shared.enter();
    self.poll_queue();
    self.queue = None;
    self.push_error(err);
  }

  fn complete(&mut self) {
    let _entry = self.shared.enter();
    self.poll_queue();
    self.queue = None;
    self.push_complete();
  }
}

#[cfg(test)]
mod tests {
  use std::thread;

  use super::*;
  use crate::observable::{create, from_iter, ObservableExt};

  #[rxcore_macro::test]
  fn records_everything() {
    let test = from_iter::<_, ()>(vec!["a", "b"]).test();
    test.assert_subscribed().assert_values(&["a", "b"]).assert_complete().assert_serialized();
    assert!(test.is_terminated());
  }

  #[rxcore_macro::test]
  fn await_terminal_times_out() {
    let test = crate::observable::never::<i32, ()>().test();
    assert!(!test.await_terminal(Duration::from_millis(10)));
  }

  #[rxcore_macro::test]
  fn await_terminal_across_threads() {
    let test = create::<_, i32, ()>(|mut emitter| {
      thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        emitter.next(7);
        emitter.complete();
      });
    })
    .test();
    assert!(test.await_terminal(Duration::from_secs(5)));
    test.assert_values(&[7]).assert_complete();
  }

  #[rxcore_macro::test]
  fn drives_sync_fusion_while_counting_entries() {
    let test = from_iter::<_, ()>(vec![1, 2, 3]).test_fused(FusionMode::SYNC);
    test
      .assert_fusion_mode(FusionMode::SYNC)
      .assert_values(&[1, 2, 3])
      .assert_complete()
      .assert_serialized();
    assert_eq!(test.max_concurrent_entries(), 1);
  }

  #[rxcore_macro::test]
  #[should_panic(expected = "values differ")]
  fn assert_values_mismatch_panics() {
    from_iter::<_, ()>(vec![1]).test().assert_values(&[2]);
  }
}
