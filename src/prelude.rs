//! Prelude module for convenient imports
//!
//! This module re-exports commonly used types and traits for easy access.

// Resource management
pub use crate::disposable::{
  ActionDisposable, BooleanDisposable, BoxedDisposable, CompositeDisposable, Disposable,
  DisposableSlot,
};
// Errors
pub use crate::error::{CompositeError, ErrorComposite, RxError};
// Fusion
pub use crate::fusion::{FusedQueue, FusionMode};
// Core traits and sources
pub use crate::observable::{
  create, empty, from_iter, never, of, range, throw, using, BoxedObservable, Emitter, Observable,
  ObservableExt,
};
pub use crate::observer::{Observer, Upstream};
// Operators
pub use crate::ops::{merge, FlatMapOp};
// Schedulers
pub use crate::scheduler::{ImmediateScheduler, Scheduler, TaskHandle, TestScheduler};
#[cfg(feature = "tokio-scheduler")]
pub use crate::scheduler::TokioScheduler;
// Subject
pub use crate::subject::Subject;
// Subscription
pub use crate::subscriber::{Subscription, SubscriptionGuard};
// Testing
pub use crate::testing::TestObserver;
