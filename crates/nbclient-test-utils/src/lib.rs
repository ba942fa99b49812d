//! Testing utilities for the nbclient workspace
//!
//! - [`FakeServer`]: in-memory notebook server behind the [`Transport`]
//!   seam, with request gating and failure injection
//! - [`RecordingCommands`]: command registry that records calls
//!
//! [`Transport`]: nbclient_services::Transport

#![allow(missing_docs)]

pub mod commands;
pub mod server;

pub use commands::RecordingCommands;
pub use server::{FakeServer, RecordedRequest};

/// Install a test tracing subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
