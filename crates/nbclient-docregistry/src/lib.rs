//! nbclient document registry
//!
//! Decides which viewer opens a file:
//! - [`FileType`]: file families matched by name pattern or extension
//! - [`ModelFactory`] / [`WidgetFactory`]: document models and viewers
//! - [`DocumentRegistry`]: registrations and preference resolution

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod factory;
pub mod filetype;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use factory::{KernelPreference, ModelFactory, TextModelFactory, WidgetFactory, DEFAULT_MODEL};
pub use filetype::{default_file_types, FileType};
pub use registry::{ChangeType, DocumentRegistry, RegistryChange, RegistryItem};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
