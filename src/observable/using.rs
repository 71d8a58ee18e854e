use std::{marker::PhantomData, sync::Arc};

use crate::{
  disposable::{Disposable, DisposableSlot},
  error::{undeliverable, ErrorComposite},
  observable::Observable,
  observer::{Observer, Upstream},
  queue::Handoff,
};

/// Ties a resource to the lifetime of a subscription.
///
/// `resource` runs at subscribe time, `source` builds the observable from it
/// and `cleanup` releases it exactly once: before the terminal signal is
/// forwarded, or on dispose. A cleanup failure on completion becomes the
/// error; on error it is composed with the original error; on dispose it is
/// logged as undeliverable.
pub fn using<R, RF, SF, CF, S>(
  resource: RF, source: SF, cleanup: CF,
) -> Using<RF, SF, CF, R, S>
where
  RF: FnOnce() -> Result<R, S::Err>,
  SF: FnOnce(&R) -> Result<S, S::Err>,
  CF: FnOnce(R) -> Result<(), S::Err>,
  S: Observable,
{
  Using { resource, source, cleanup, _p: PhantomData }
}

pub struct Using<RF, SF, CF, R, S> {
  resource: RF,
  source: SF,
  cleanup: CF,
  _p: PhantomData<fn() -> (R, S)>,
}

impl<R, RF, SF, CF, S> Observable for Using<RF, SF, CF, R, S>
where
  RF: FnOnce() -> Result<R, S::Err> + 'static,
  SF: FnOnce(&R) -> Result<S, S::Err> + 'static,
  CF: FnOnce(R) -> Result<(), S::Err> + Send + 'static,
  R: Send + 'static,
  S: Observable,
  S::Err: ErrorComposite,
{
  type Item = S::Item;
  type Err = S::Err;

  fn actual_subscribe<O>(self, mut observer: O)
  where
    O: Observer<S::Item, S::Err> + 'static,
  {
    let resource = match (self.resource)() {
      Ok(resource) => resource,
      Err(err) => {
        observer.on_subscribe(Upstream::new(Arc::new(())));
        observer.error(err);
        return;
      }
    };
    let source = match (self.source)(&resource) {
      Ok(source) => source,
      Err(err) => {
        let err = match (self.cleanup)(resource) {
          Ok(()) => err,
          Err(cleanup_err) => ErrorComposite::compose(vec![err, cleanup_err]),
        };
        observer.on_subscribe(Upstream::new(Arc::new(())));
        observer.error(err);
        return;
      }
    };
    let shared = Arc::new(UsingShared {
      upstream: DisposableSlot::new(),
      resource: Handoff::new((resource, self.cleanup)),
    });
    source.actual_subscribe(UsingObserver { downstream: observer, shared });
  }
}

struct UsingShared<R, CF> {
  upstream: DisposableSlot,
  resource: Handoff<(R, CF)>,
}

impl<R, CF> UsingShared<R, CF> {
  fn release<Err>(&self) -> Result<(), Err>
  where
    CF: FnOnce(R) -> Result<(), Err>,
  {
    match self.resource.take() {
      Some((resource, cleanup)) => cleanup(resource),
      None => Ok(()),
    }
  }
}

impl<R: Send, CF: Send> UsingShared<R, CF> {
  fn dispose_with<Err>(&self)
  where
    CF: FnOnce(R) -> Result<(), Err>,
  {
    if let Err(err) = self.release() {
      undeliverable(err);
    }
    self.upstream.dispose();
  }
}

/// Disposable handed downstream; knows the error type through `CF`.
struct UsingDisposable<R, CF, Err> {
  shared: Arc<UsingShared<R, CF>>,
  _p: PhantomData<fn() -> Err>,
}

impl<R, CF, Err> Disposable for UsingDisposable<R, CF, Err>
where
  R: Send,
  CF: FnOnce(R) -> Result<(), Err> + Send,
{
  fn dispose(&self) { self.shared.dispose_with::<Err>() }

  fn is_disposed(&self) -> bool { self.shared.upstream.is_disposed() }
}

struct UsingObserver<O, R, CF> {
  downstream: O,
  shared: Arc<UsingShared<R, CF>>,
}

impl<O, R, CF, Item, Err> Observer<Item, Err> for UsingObserver<O, R, CF>
where
  O: Observer<Item, Err>,
  R: Send + 'static,
  CF: FnOnce(R) -> Result<(), Err> + Send + 'static,
  Err: ErrorComposite + 'static,
{
  fn on_subscribe(&mut self, upstream: Upstream<Item, Err>) {
    self.shared.upstream.set_once(Box::new(upstream.disposable().clone()));
    let handle = UsingDisposable::<R, CF, Err> { shared: self.shared.clone(), _p: PhantomData };
    self.downstream.on_subscribe(Upstream::new(Arc::new(handle)));
  }

  #[inline]
  fn next(&mut self, value: Item) { self.downstream.next(value) }

  fn error(&mut self, err: Err) {
    let err = match self.shared.release() {
      Ok(()) => err,
      Err(cleanup_err) => ErrorComposite::compose(vec![err, cleanup_err]),
    };
    self.downstream.error(err);
  }

  fn complete(&mut self) {
    match self.shared.release() {
      Ok(()) => self.downstream.complete(),
      Err(cleanup_err) => self.downstream.error(cleanup_err),
    }
  }
}
