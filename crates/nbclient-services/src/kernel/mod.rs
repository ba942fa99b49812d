//! Kernel service
//!
//! - [`KernelConnection`]: status and message fan-out for one kernel
//! - [`get_specs`]: validated kernel spec listing

mod connection;
mod model;
mod specs;

pub use connection::KernelConnection;
pub use model::{Channel, KernelMessage, KernelModel, KernelStatus, MessageHeader};
pub use specs::{get_specs, parse_specs, KernelSpecModel, KernelSpecs};
