//! Namespaced state database and restorable object pools
//!
//! - [`StateDB`]: JSON key/value store over a pluggable [`DataConnector`],
//!   with an optional one-shot transform applied before first use
//! - [`RestorablePool`]: tracked set of disposable objects whose
//!   restoration data is persisted and replayed through a [`CommandRegistry`]

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod command;
pub mod connector;
pub mod error;
pub mod restorable;
pub mod statedb;

pub use command::CommandRegistry;
pub use connector::{matches_query, namespace_of, DataConnector, InMemoryConnector, Listing};
pub use error::{CommandError, PoolError, StateError, StateResult};
pub use restorable::{RestorablePool, RestoreOptions, RestoreReport};
pub use statedb::{DataTransform, StateChange, StateChangeKind, StateDB, TransformKind};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
