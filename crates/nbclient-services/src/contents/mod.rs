//! Contents service
//!
//! - [`Drive`] / [`RestDrive`]: one backend, local paths
//! - [`ContentsManager`]: drive routing and global paths

mod drive;
mod manager;
mod model;

pub use drive::{ContentsResult, Drive, RestDrive};
pub use manager::ContentsManager;
pub use model::{
    CheckpointModel, ContentFormat, ContentType, ContentsModel, FileChange, FileChangeKind,
    GetOptions, NewUntitledOptions, PartialContentsModel,
};
