use std::{iter::Peekable, marker::PhantomData, ops::Range, sync::Arc};

use crate::{
  disposable::{BooleanDisposable, Disposable},
  fusion::{FusedQueue, FusionMode},
  observable::Observable,
  observer::{Observer, Upstream},
  queue::Handoff,
};

/// Emits every item of `iter`, then completes.
///
/// Grants `SYNC` fusion: a fused consumer pulls from the iterator directly
/// and the push loop does nothing.
pub fn from_iter<I, Err>(iter: I) -> FromIter<I::IntoIter, Err>
where
  I: IntoIterator,
{
  FromIter { iter: iter.into_iter(), _p: PhantomData }
}

/// Emits `count` consecutive integers starting at `start`.
///
/// The end is clamped to `i64::MAX` (exclusive), so a range reaching past it
/// stops early instead of overflowing.
pub fn range<Err>(start: i64, count: usize) -> FromIter<Range<i64>, Err> {
  let end = i64::try_from(count).map_or(i64::MAX, |count| start.saturating_add(count));
  from_iter(start..end)
}

pub struct FromIter<I, Err> {
  iter: I,
  _p: PhantomData<fn() -> Err>,
}

struct IterShared<I> {
  iter: Handoff<I>,
  disposed: BooleanDisposable,
}

impl<I: Send> Disposable for IterShared<I> {
  fn dispose(&self) {
    self.disposed.dispose();
    drop(self.iter.take());
  }

  #[inline]
  fn is_disposed(&self) -> bool { self.disposed.is_disposed() }
}

struct IterQueue<I: Iterator> {
  shared: Arc<IterShared<I>>,
  iter: Option<Peekable<I>>,
}

impl<I, Err> FusedQueue<I::Item, Err> for IterQueue<I>
where
  I: Iterator + Send,
  I::Item: Send,
{
  fn request_fusion(&mut self, mode: FusionMode) -> FusionMode {
    if !mode.contains(FusionMode::SYNC) {
      return FusionMode::NONE;
    }
    match self.shared.iter.take() {
      Some(iter) => {
        self.iter = Some(iter.peekable());
        FusionMode::SYNC
      }
      None => FusionMode::NONE,
    }
  }

  fn try_poll(&mut self) -> Result<Option<I::Item>, Err> {
    if self.shared.is_disposed() {
      self.iter = None;
      return Ok(None);
    }
    Ok(self.iter.as_mut().and_then(Iterator::next))
  }

  fn is_empty(&mut self) -> bool { self.iter.as_mut().map_or(true, |it| it.peek().is_none()) }

  fn clear(&mut self) { self.iter = None; }
}

impl<I, Err> Observable for FromIter<I, Err>
where
  I: Iterator + Send + 'static,
  I::Item: Send + 'static,
  Err: Send + 'static,
{
  type Item = I::Item;
  type Err = Err;

  fn actual_subscribe<O>(self, mut observer: O)
  where
    O: Observer<I::Item, Err> + 'static,
  {
    let shared =
      Arc::new(IterShared { iter: Handoff::new(self.iter), disposed: BooleanDisposable::new() });
    let queue = IterQueue { shared: shared.clone(), iter: None };
    observer.on_subscribe(Upstream::with_fusion(shared.clone(), queue));

    // Gone when a fused consumer took it, or when disposed already.
    let Some(iter) = shared.iter.take() else { return };
    for item in iter {
      if shared.is_disposed() {
        return;
      }
      observer.next(item);
    }
    if !shared.is_disposed() {
      observer.complete();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::observable::ObservableExt;

  #[rxcore_macro::test]
  fn push_mode() {
    from_iter::<_, ()>(vec![1, 2, 3]).test().assert_values(&[1, 2, 3]).assert_complete();
    range::<()>(5, 0).test().assert_values(&[]).assert_complete();
  }

  #[rxcore_macro::test]
  fn range_near_the_top_is_clamped() {
    range::<()>(i64::MAX - 2, 10).test().assert_values(&[i64::MAX - 2, i64::MAX - 1]).assert_complete();
    let huge = range::<()>(-1, usize::MAX);
    assert_eq!(huge.iter, -1..i64::MAX);
    range::<()>(i64::MIN, 2).test().assert_values(&[i64::MIN, i64::MIN + 1]).assert_complete();
  }

  #[rxcore_macro::test]
  fn sync_fused_pull() {
    let test = range::<()>(0, 5).test_fused(FusionMode::ANY);
    test.assert_fusion_mode(FusionMode::SYNC).assert_values(&[0, 1, 2, 3, 4]).assert_complete();
  }

  #[rxcore_macro::test]
  fn async_only_request_is_refused() {
    let test = range::<()>(0, 3).test_fused(FusionMode::ASYNC);
    test.assert_fusion_mode(FusionMode::NONE).assert_values(&[0, 1, 2]).assert_complete();
  }

  struct StopAt {
    upstream: Option<Upstream<i32, ()>>,
    seen: Vec<i32>,
    completed: bool,
    out: std::sync::mpsc::Sender<(Vec<i32>, bool)>,
  }

  impl Observer<i32, ()> for StopAt {
    fn on_subscribe(&mut self, upstream: Upstream<i32, ()>) { self.upstream = Some(upstream); }

    fn next(&mut self, value: i32) {
      self.seen.push(value);
      if value == 3 {
        self.upstream.as_ref().unwrap().dispose();
      }
    }

    fn error(&mut self, _: ()) {}

    fn complete(&mut self) { self.completed = true; }
  }

  impl Drop for StopAt {
    fn drop(&mut self) { let _ = self.out.send((std::mem::take(&mut self.seen), self.completed)); }
  }

  #[rxcore_macro::test]
  fn dispose_from_next_stops_the_loop() {
    let (tx, rx) = std::sync::mpsc::channel();
    from_iter::<_, ()>(0..100).actual_subscribe(StopAt {
      upstream: None,
      seen: vec![],
      completed: false,
      out: tx,
    });
    assert_eq!(rx.recv().unwrap(), (vec![0, 1, 2, 3], false));
  }
}
