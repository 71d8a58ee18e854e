//! Closure-based subscribers and the handle they return.
use std::{fmt, sync::Arc};

use crate::{
  disposable::{Disposable, DisposableSlot},
  observer::{Observer, Upstream},
};

/// Handle to a subscription made with
/// [`subscribe`](crate::observable::ObservableExt::subscribe).
///
/// Dropping it does not unsubscribe; use
/// [`unsubscribe_when_dropped`](Self::unsubscribe_when_dropped) for that.
#[derive(Clone)]
pub struct Subscription {
  upstream: Arc<DisposableSlot>,
}

impl Subscription {
  pub fn unsubscribe(&self) { self.upstream.dispose() }

  /// True once unsubscribed or once the sequence terminated.
  pub fn is_closed(&self) -> bool { self.upstream.is_disposed() }

  pub fn unsubscribe_when_dropped(self) -> SubscriptionGuard { SubscriptionGuard(self) }
}

impl Disposable for Subscription {
  #[inline]
  fn dispose(&self) { self.unsubscribe() }

  #[inline]
  fn is_disposed(&self) -> bool { self.is_closed() }
}

impl fmt::Debug for Subscription {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subscription").field("closed", &self.is_closed()).finish()
  }
}

/// Unsubscribes when dropped.
#[must_use = "dropping the guard unsubscribes immediately"]
#[derive(Debug)]
pub struct SubscriptionGuard(Subscription);

impl SubscriptionGuard {
  pub fn subscription(&self) -> &Subscription { &self.0 }
}

impl Drop for SubscriptionGuard {
  fn drop(&mut self) { self.0.unsubscribe() }
}

/// Observer built from three closures.
pub struct LambdaObserver<N, E, C> {
  next: N,
  error: E,
  complete: C,
  upstream: Arc<DisposableSlot>,
  done: bool,
}

impl<N, E, C> LambdaObserver<N, E, C> {
  pub fn new(next: N, error: E, complete: C) -> Self {
    Self { next, error, complete, upstream: Arc::new(DisposableSlot::new()), done: false }
  }

  pub fn subscription(&self) -> Subscription { Subscription { upstream: self.upstream.clone() } }

  fn finish(&mut self) -> bool {
    if self.done {
      return false;
    }
    self.done = true;
    // The upstream is finished, nothing left to cancel.
    self.upstream.weak_dispose();
    true
  }
}

impl<Item, Err, N, E, C> Observer<Item, Err> for LambdaObserver<N, E, C>
where
  N: FnMut(Item) + Send,
  E: FnMut(Err) + Send,
  C: FnMut() + Send,
{
  fn on_subscribe(&mut self, upstream: Upstream<Item, Err>) {
    self.upstream.set_once(Box::new(upstream.disposable().clone()));
  }

  fn next(&mut self, value: Item) {
    if !self.done {
      (self.next)(value)
    }
  }

  fn error(&mut self, err: Err) {
    if self.finish() {
      (self.error)(err)
    }
  }

  fn complete(&mut self) {
    if self.finish() {
      (self.complete)()
    }
  }
}
