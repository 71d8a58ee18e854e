//! # rxcore: the concurrency core of Reactive Extensions
//!
//! Push-based sequences whose operators stay correct when signals arrive
//! from many threads at once, without holding a lock while emitting.
//!
//! ## Quick Start
//!
//! ```rust
//! use rxcore::prelude::*;
//!
//! let test = range::<RxError>(0, 3)
//!   .flat_map(|i| range(i * 10, 2))
//!   .filter(|v| v % 2 == 0)
//!   .map(|v| v + 1)
//!   .test();
//!
//! test.assert_values(&[1, 11, 21]).assert_complete();
//! ```
//!
//! ## Key Concepts
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Observable`] | A sequence that starts producing when subscribed |
//! | [`Observer`] | Consumes `next`, `error`, and `complete` events |
//! | [`Disposable`] | Idempotent cancellation of a subscription |
//! | [`Drain`] | Serializes concurrent producers onto one consumer |
//! | [`FusionMode`] | Lets a consumer poll its upstream's queue directly |
//!
//! ## Feature Flags
//!
//! - **`tokio-scheduler`** (default): a [`Scheduler`] backed by a tokio
//!   runtime
//!
//! [`Observable`]: observable::Observable
//! [`Observer`]: observer::Observer
//! [`Disposable`]: disposable::Disposable
//! [`Drain`]: drain::Drain
//! [`FusionMode`]: fusion::FusionMode
//! [`Scheduler`]: scheduler::Scheduler

pub mod config;
pub mod disposable;
pub mod drain;
pub mod error;
pub mod error_slot;
pub mod fusion;
pub mod half_serializer;
pub mod observable;
pub mod observer;
pub mod ops;
pub mod prelude;
pub mod queue;
pub mod scheduler;
pub mod subject;
pub mod subscriber;
pub mod testing;
mod util;

// Re-export the prelude module
pub use prelude::*;
