//! Operators. Each lives in its own module and is reached through
//! [`ObservableExt`](crate::observable::ObservableExt).
pub mod filter;
pub mod flat_map;
pub mod map;
pub mod observe_on;
pub mod take_until;

pub use filter::FilterOp;
pub use flat_map::{merge, FlatMapOp, IdentityInner, InnerMapper, MapInner, TryMapInner};
pub use map::MapOp;
pub use observe_on::ObserveOnOp;
pub use take_until::TakeUntilOp;
