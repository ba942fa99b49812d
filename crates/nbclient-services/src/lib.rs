//! Notebook server services
//!
//! Client-side access to a notebook server's REST API:
//! - [`contents`]: files and directories across one or more drives
//! - [`kernel`]: kernel connections and kernel specs
//! - [`session`]: kernel sessions and the polled session manager
//!
//! Every request goes through a [`Transport`], configured once in
//! [`ServerSettings`].

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod contents;
pub mod error;
pub mod kernel;
pub mod session;
pub mod settings;
pub mod transport;

pub use config::ClientConfig;
pub use contents::{ContentsManager, Drive, RestDrive};
pub use error::{ConfigError, ContentsError, KernelError, ServerError, ServerResult, SessionError};
pub use kernel::{KernelConnection, KernelSpecs};
pub use session::{DefaultSession, RunningSessions, SessionManager, SessionManagerOptions};
pub use settings::ServerSettings;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
