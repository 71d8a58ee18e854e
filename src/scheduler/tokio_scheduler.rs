use std::time::Duration;

use futures::future::{AbortHandle, Abortable};
use tokio::runtime::Handle;

use super::{Scheduler, TaskHandle};
use crate::disposable::Disposable;

/// Spawns tasks on a tokio runtime.
///
/// Disposing the returned handle aborts the spawned future, so a pending
/// delay or period never fires.
#[derive(Clone, Debug)]
pub struct TokioScheduler {
  handle: Handle,
}

impl TokioScheduler {
  pub fn new(handle: Handle) -> Self { Self { handle } }

  /// The runtime of the current context.
  ///
  /// # Panics
  /// Outside of a tokio runtime.
  pub fn current() -> Self { Self::new(Handle::current()) }

  pub fn try_current() -> Option<Self> { Handle::try_current().ok().map(Self::new) }
}

impl Scheduler for TokioScheduler {
  fn schedule<F>(&self, delay: Option<Duration>, task: F) -> TaskHandle
  where
    F: FnOnce() + Send + 'static,
  {
    let (abort, registration) = AbortHandle::new_pair();
    let handle = TaskHandle::with_abort(abort);
    let guard = handle.clone();
    let fut = async move {
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      if !guard.is_disposed() {
        task();
      }
    };
    self.handle.spawn(Abortable::new(fut, registration));
    handle
  }

  fn schedule_periodic<F>(&self, period: Duration, mut task: F) -> TaskHandle
  where
    F: FnMut() + Send + 'static,
  {
    let (abort, registration) = AbortHandle::new_pair();
    let handle = TaskHandle::with_abort(abort);
    let guard = handle.clone();
    let fut = async move {
      let start = tokio::time::Instant::now() + period;
      let mut interval = tokio::time::interval_at(start, period);
      loop {
        interval.tick().await;
        if guard.is_disposed() {
          break;
        }
        task();
      }
    };
    self.handle.spawn(Abortable::new(fut, registration));
    handle
  }
}
