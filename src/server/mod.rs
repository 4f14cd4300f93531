//! Inference server supervision.
//!
//! The server is a child process reached over HTTP on a fixed local port. This module
//! finds and launches it, restarts it after crashes within a retry budget, reclaims the
//! port from stale processes, and shuts it down with a hard deadline.

pub mod api;
pub mod launch;
pub mod port;
pub mod shutdown;
pub mod supervisor;

pub use api::ServerApi;
pub use launch::{packaged_binary_name, LaunchTarget};
pub use supervisor::{
    AlwaysReady, ProcessSupervisor, ReadinessGate, ServerState, SupervisorEvent,
    SupervisorSettings, SupervisorStatus,
};
