use std::{thread, time::Duration};

use super::{Scheduler, TaskHandle};
use crate::disposable::Disposable;

/// Runs one-shot tasks on the calling thread, sleeping through any delay.
///
/// Periodic tasks cannot run inline and get a dedicated thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
  fn schedule<F>(&self, delay: Option<Duration>, task: F) -> TaskHandle
  where
    F: FnOnce() + Send + 'static,
  {
    let handle = TaskHandle::new();
    if let Some(delay) = delay {
      thread::sleep(delay);
    }
    if !handle.is_disposed() {
      task();
    }
    handle
  }

  fn schedule_periodic<F>(&self, period: Duration, mut task: F) -> TaskHandle
  where
    F: FnMut() + Send + 'static,
  {
    let handle = TaskHandle::new();
    let guard = handle.clone();
    let spawned = thread::Builder::new().name("rxcore-periodic".into()).spawn(move || loop {
      thread::sleep(period);
      if guard.is_disposed() {
        break;
      }
      task();
    });
    if let Err(err) = spawned {
      tracing::error!(target: "rxcore::scheduler", %err, "failed to spawn periodic task thread");
      handle.dispose();
    }
    handle
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use super::*;

  #[rxcore_macro::test]
  fn runs_inline() {
    let hits = Arc::new(AtomicUsize::new(0));
    let c = hits.clone();
    let handle = ImmediateScheduler.schedule(None, move || {
      c.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(!handle.is_disposed());
  }

  #[rxcore_macro::test]
  fn periodic_stops_after_dispose() {
    let hits = Arc::new(AtomicUsize::new(0));
    let c = hits.clone();
    let handle = ImmediateScheduler.schedule_periodic(Duration::from_millis(5), move || {
      c.fetch_add(1, Ordering::SeqCst);
    });
    while hits.load(Ordering::SeqCst) < 2 {
      thread::sleep(Duration::from_millis(1));
    }
    handle.dispose();
    thread::sleep(Duration::from_millis(20));
    let seen = hits.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(hits.load(Ordering::SeqCst), seen);
  }
}
