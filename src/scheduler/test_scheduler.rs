//! Virtual-time scheduler for deterministic tests.
//!
//! Nothing runs until the test advances time. Tasks run on the thread that
//! calls [`TestScheduler::advance_by`] or [`TestScheduler::flush`], outside
//! the internal lock, so a task may schedule further tasks.
use std::{
  cmp::Ordering,
  collections::BinaryHeap,
  fmt,
  sync::{Arc, Mutex},
  time::Duration,
};

use super::{Scheduler, TaskHandle};
use crate::{disposable::Disposable, util::lock_recover};

// ==================== Internal State ====================

enum Job {
  Once(Box<dyn FnOnce() + Send>),
  Periodic { task: Box<dyn FnMut() + Send>, period: Duration },
}

struct ScheduledTask {
  due: Duration,
  id: usize,
  job: Job,
  handle: TaskHandle,
}

impl PartialEq for ScheduledTask {
  fn eq(&self, other: &Self) -> bool { self.due == other.due && self.id == other.id }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for ScheduledTask {
  fn cmp(&self, other: &Self) -> Ordering {
    // Min-heap: earlier first, then FIFO.
    other.due.cmp(&self.due).then_with(|| other.id.cmp(&self.id))
  }
}

#[derive(Default)]
struct State {
  now: Duration,
  next_id: usize,
  one_shots: usize,
  queue: BinaryHeap<ScheduledTask>,
}

impl State {
  fn push(&mut self, due: Duration, job: Job, handle: TaskHandle) {
    if matches!(job, Job::Once(_)) {
      self.one_shots += 1;
    }
    let id = self.next_id;
    self.next_id += 1;
    self.queue.push(ScheduledTask { due, id, job, handle });
  }

  fn pop_due(&mut self, limit: Option<Duration>) -> Option<ScheduledTask> {
    let due = self.queue.peek()?.due;
    match limit {
      Some(limit) if due > limit => return None,
      // Without a limit only one-shot work keeps the clock moving.
      None if self.one_shots == 0 => return None,
      _ => {}
    }
    let task = self.queue.pop()?;
    if matches!(task.job, Job::Once(_)) {
      self.one_shots -= 1;
    }
    self.now = self.now.max(task.due);
    Some(task)
  }
}

// ==================== TestScheduler ====================

/// Clones share the same clock and queue.
#[derive(Clone, Default)]
pub struct TestScheduler {
  state: Arc<Mutex<State>>,
}

impl TestScheduler {
  pub fn new() -> Self { Self::default() }

  /// Current virtual time, starting at zero.
  pub fn now(&self) -> Duration { lock_recover(&self.state).now }

  /// Tasks waiting to run, cancelled ones included until their turn.
  pub fn pending_count(&self) -> usize { lock_recover(&self.state).queue.len() }

  /// Advances the clock by `duration`, running every task due on the way in
  /// time order.
  pub fn advance_by(&self, duration: Duration) {
    let target = self.now() + duration;
    self.run_until(Some(target));
    let mut state = lock_recover(&self.state);
    state.now = state.now.max(target);
  }

  /// Runs tasks in time order until no one-shot task is left. Periodic tasks
  /// fire along the way but do not keep the clock running on their own.
  pub fn flush(&self) { self.run_until(None) }

  fn run_until(&self, limit: Option<Duration>) {
    loop {
      let Some(ScheduledTask { job, handle, .. }) = lock_recover(&self.state).pop_due(limit) else {
        break;
      };
      if handle.is_disposed() {
        continue;
      }
      match job {
        Job::Once(task) => task(),
        Job::Periodic { mut task, period } => {
          task();
          if !handle.is_disposed() {
            let mut state = lock_recover(&self.state);
            let due = state.now + period;
            state.push(due, Job::Periodic { task, period }, handle);
          }
        }
      }
    }
  }
}

impl Scheduler for TestScheduler {
  fn schedule<F>(&self, delay: Option<Duration>, task: F) -> TaskHandle
  where
    F: FnOnce() + Send + 'static,
  {
    let handle = TaskHandle::new();
    let mut state = lock_recover(&self.state);
    let due = state.now + delay.unwrap_or(Duration::ZERO);
    state.push(due, Job::Once(Box::new(task)), handle.clone());
    handle
  }

  fn schedule_periodic<F>(&self, period: Duration, task: F) -> TaskHandle
  where
    F: FnMut() + Send + 'static,
  {
    let handle = TaskHandle::new();
    let mut state = lock_recover(&self.state);
    let due = state.now + period;
    state.push(due, Job::Periodic { task: Box::new(task), period }, handle.clone());
    handle
  }
}

impl fmt::Debug for TestScheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = lock_recover(&self.state);
    f.debug_struct("TestScheduler")
      .field("now", &state.now)
      .field("pending", &state.queue.len())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce() + Send>)
  {
    let log = Arc::new(Mutex::new(Vec::new()));
    let c = log.clone();
    (log, move |name| {
      let c = c.clone();
      Box::new(move || c.lock().unwrap().push(name))
    })
  }

  #[rxcore_macro::test]
  fn nothing_runs_until_advanced() {
    let scheduler = TestScheduler::new();
    let (log, task) = recorder();
    scheduler.schedule(None, task("a"));
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(scheduler.pending_count(), 1);
    scheduler.flush();
    assert_eq!(*log.lock().unwrap(), vec!["a"]);
  }

  #[rxcore_macro::test]
  fn time_order_then_fifo() {
    let scheduler = TestScheduler::new();
    let (log, task) = recorder();
    scheduler.schedule(Some(Duration::from_millis(20)), task("late"));
    scheduler.schedule(Some(Duration::from_millis(10)), task("first"));
    scheduler.schedule(Some(Duration::from_millis(10)), task("second"));

    scheduler.advance_by(Duration::from_millis(10));
    assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    assert_eq!(scheduler.now(), Duration::from_millis(10));

    scheduler.advance_by(Duration::from_millis(10));
    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "late"]);
  }

  #[rxcore_macro::test]
  fn cancelled_task_is_skipped() {
    let scheduler = TestScheduler::new();
    let (log, task) = recorder();
    let handle = scheduler.schedule(Some(Duration::from_millis(5)), task("never"));
    handle.dispose();
    scheduler.flush();
    assert!(log.lock().unwrap().is_empty());
  }

  #[rxcore_macro::test]
  fn periodic_fires_per_period() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let scheduler = TestScheduler::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let c = hits.clone();
    let handle = scheduler.schedule_periodic(Duration::from_millis(10), move || {
      c.fetch_add(1, Ordering::SeqCst);
    });
    scheduler.advance_by(Duration::from_millis(35));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    handle.dispose();
    scheduler.advance_by(Duration::from_millis(100));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    scheduler.flush();
  }

  #[rxcore_macro::test]
  fn tasks_may_schedule_tasks() {
    let scheduler = TestScheduler::new();
    let (log, task) = recorder();
    let inner = scheduler.clone();
    let follow_up = task("follow-up");
    scheduler.schedule(None, move || {
      inner.schedule(Some(Duration::from_millis(1)), follow_up);
    });
    scheduler.flush();
    assert_eq!(*log.lock().unwrap(), vec!["follow-up"]);
    assert_eq!(scheduler.now(), Duration::from_millis(1));
  }
}
