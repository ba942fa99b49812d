//! Session service
//!
//! - [`DefaultSession`]: one document/kernel pairing
//! - [`RunningSessions`]: registry of local sessions per server
//! - [`SessionManager`]: polled list of running sessions and kernel specs

mod default;
mod manager;
mod model;
mod registry;

pub use default::DefaultSession;
pub use manager::{SessionManager, SessionManagerOptions};
pub use model::{
    KernelChange, KernelRequest, SessionModel, SessionOptions, SessionProperty,
};
pub use registry::RunningSessions;
