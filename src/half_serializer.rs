//! Serialization for one `next` producer racing with terminal signals.
//!
//! Cheaper than a drain loop: no queue, just a counter and an error slot. It
//! fits operators where items come from a single thread and only a terminal
//! event (an error, a completion, a boundary) can arrive from elsewhere.
use std::{
  cell::UnsafeCell,
  sync::atomic::{AtomicUsize, Ordering},
};

use crate::{error::undeliverable, error_slot::FirstError, observer::Observer};

pub struct HalfSerializer<O, Err> {
  wip: AtomicUsize,
  error: FirstError<Err>,
  observer: UnsafeCell<O>,
}

// SAFETY: `observer` is only touched by the thread that moved `wip` off zero.
unsafe impl<O: Send, Err: Send> Send for HalfSerializer<O, Err> {}
unsafe impl<O: Send, Err: Send> Sync for HalfSerializer<O, Err> {}

impl<O, Err> HalfSerializer<O, Err> {
  pub fn new(observer: O) -> Self {
    Self { wip: AtomicUsize::new(0), error: FirstError::new(), observer: UnsafeCell::new(observer) }
  }

  /// Runs `f` on the observer unless another signal is in flight or a
  /// terminal was delivered. A terminal deposited meanwhile is delivered
  /// before returning.
  ///
  /// Only one thread may call this (and so `next`) at a time. Returns whether
  /// `f` ran.
  pub fn emit<Item>(&self, f: impl FnOnce(&mut O)) -> bool
  where
    O: Observer<Item, Err>,
  {
    if self.wip.load(Ordering::Acquire) != 0
      || self.wip.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire).is_err()
    {
      return false;
    }
    // SAFETY: we moved `wip` from 0 to 1.
    f(unsafe { &mut *self.observer.get() });
    if self.wip.fetch_sub(1, Ordering::AcqRel) != 1 {
      self.deliver_terminal::<Item>();
    }
    true
  }

  #[inline]
  pub fn next<Item>(&self, value: Item) -> bool
  where
    O: Observer<Item, Err>,
  {
    self.emit::<Item>(|o: &mut O| o.next(value))
  }

  /// Records `err` as the terminal signal if none came first; otherwise it is
  /// reported as undeliverable.
  pub fn error<Item>(&self, err: Err)
  where
    O: Observer<Item, Err>,
  {
    match self.error.try_set(err) {
      Ok(()) => {
        if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
          self.deliver_terminal::<Item>();
        }
      }
      Err(err) => undeliverable(err),
    }
  }

  pub fn complete<Item>(&self)
  where
    O: Observer<Item, Err>,
  {
    if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
      self.deliver_terminal::<Item>();
    }
  }

  pub fn is_terminated(&self) -> bool { self.error.is_terminated() }

  fn deliver_terminal<Item>(&self)
  where
    O: Observer<Item, Err>,
  {
    if self.error.is_terminated() {
      return;
    }
    // SAFETY: only the thread that saw `wip` reach a non-zero value from zero
    // (or the emitter that found a deposited terminal) gets here, and `wip`
    // never returns to zero afterwards.
    let observer = unsafe { &mut *self.observer.get() };
    match self.error.terminate() {
      Some(err) => observer.error(err),
      None => observer.complete(),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{
      atomic::{AtomicBool, AtomicUsize},
      Arc,
    },
    thread,
  };

  use super::*;
  use crate::observer::Upstream;

  #[derive(Default)]
  struct Probe {
    nexts: usize,
    terminals: Arc<AtomicUsize>,
    after_terminal: Arc<AtomicBool>,
    errored: bool,
  }

  impl Observer<usize, &'static str> for Probe {
    fn on_subscribe(&mut self, _: Upstream<usize, &'static str>) {}

    fn next(&mut self, _: usize) {
      if self.terminals.load(Ordering::SeqCst) > 0 {
        self.after_terminal.store(true, Ordering::SeqCst);
      }
      self.nexts += 1;
    }

    fn error(&mut self, _: &'static str) {
      self.errored = true;
      self.terminals.fetch_add(1, Ordering::SeqCst);
    }

    fn complete(&mut self) { self.terminals.fetch_add(1, Ordering::SeqCst); }
  }

  #[rxcore_macro::test]
  fn next_then_complete() {
    let serializer = HalfSerializer::new(Probe::default());
    assert!(serializer.next(1usize));
    serializer.complete::<usize>();
    assert!(!serializer.next(2usize));
    serializer.complete::<usize>();
    assert!(serializer.is_terminated());
  }

  #[rxcore_macro::test]
  fn error_and_complete_race_delivers_once() {
    for _ in 0..200 {
      let probe = Probe::default();
      let terminals = probe.terminals.clone();
      let late = probe.after_terminal.clone();
      let serializer = Arc::new(HalfSerializer::new(probe));

      let s = serializer.clone();
      let producer = thread::spawn(move || {
        for i in 0..100usize {
          s.next(i);
        }
      });
      let s = serializer.clone();
      let failing = thread::spawn(move || s.error::<usize>("boom"));
      serializer.complete::<usize>();

      producer.join().unwrap();
      failing.join().unwrap();
      assert_eq!(terminals.load(Ordering::SeqCst), 1);
      assert!(!late.load(Ordering::SeqCst));
    }
  }

  #[rxcore_macro::test]
  fn error_deposited_during_next_is_delivered_by_emitter() {
    let serializer = Arc::new(HalfSerializer::new(Probe::default()));
    let inner = serializer.clone();
    serializer.emit::<usize>(|probe| {
      probe.nexts += 1;
      inner.error::<usize>("late");
      assert_eq!(probe.terminals.load(Ordering::SeqCst), 0);
    });
    drop(inner);
    let probe = Arc::try_unwrap(serializer).ok().unwrap().observer.into_inner();
    assert!(probe.errored);
    assert_eq!(probe.terminals.load(Ordering::SeqCst), 1);
  }
}
