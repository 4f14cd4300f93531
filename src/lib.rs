#![allow(clippy::multiple_crate_versions)]

pub mod app;
pub mod archive;
pub mod assets;
pub mod checksum;
pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod notifications;
pub mod paths;
pub mod progress;
pub mod server;

pub use error::{ReplayError, Result};
