//! nbclient core primitives
//!
//! Building blocks shared by every nbclient crate:
//! - [`Signal`]: typed publish/subscribe channel (sender + payload)
//! - [`Disposable`] / [`ObservableDisposable`]: explicit, idempotent teardown
//! - [`FlagGuard`]: busy flag lowered on drop, even on cancellation
//! - [`Poll`]: cancellable interval refresh with standby and coalescing
//! - [`path`]: POSIX-style server path helpers

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod disposable;
pub mod flag;
pub mod path;
pub mod poll;
pub mod signal;

pub use disposable::{Disposable, DisposalState, ObservableDisposable};
pub use flag::FlagGuard;
pub use poll::{Poll, PollError, PollOptions, Standby, TickOutcome};
pub use signal::{Signal, SlotId};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
