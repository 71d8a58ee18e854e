//! Where deferred work runs.
//!
//! The core never spawns threads on its own; operators that hand work to
//! another context (`observe_on`) take a [`Scheduler`].
use std::{
  fmt,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
  time::Duration,
};

use futures::future::AbortHandle;

use crate::disposable::Disposable;

mod immediate;
mod test_scheduler;
#[cfg(feature = "tokio-scheduler")]
mod tokio_scheduler;

pub use immediate::ImmediateScheduler;
pub use test_scheduler::TestScheduler;
#[cfg(feature = "tokio-scheduler")]
pub use tokio_scheduler::TokioScheduler;

pub trait Scheduler: Clone + Send + Sync + 'static {
  /// Runs `task` once, after `delay` if given.
  fn schedule<F>(&self, delay: Option<Duration>, task: F) -> TaskHandle
  where
    F: FnOnce() + Send + 'static;

  /// Runs `task` every `period`, first after one period.
  fn schedule_periodic<F>(&self, period: Duration, task: F) -> TaskHandle
  where
    F: FnMut() + Send + 'static;
}

/// Cancels a scheduled task. After `dispose` returns the task is not invoked
/// again; an invocation already running is not interrupted.
#[derive(Clone, Default)]
pub struct TaskHandle {
  cancelled: Arc<AtomicBool>,
  abort: Option<AbortHandle>,
}

impl TaskHandle {
  pub fn new() -> Self { Self::default() }

  /// A handle that also aborts the future driving the task.
  pub fn with_abort(abort: AbortHandle) -> Self {
    Self { cancelled: Arc::default(), abort: Some(abort) }
  }
}

impl Disposable for TaskHandle {
  fn dispose(&self) {
    self.cancelled.store(true, Ordering::Release);
    if let Some(abort) = &self.abort {
      abort.abort();
    }
  }

  #[inline]
  fn is_disposed(&self) -> bool { self.cancelled.load(Ordering::Acquire) }
}

impl fmt::Debug for TaskHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskHandle").field("cancelled", &self.is_disposed()).finish()
  }
}
