#![deny(clippy::expect_used)]
#![deny(clippy::unwrap_used)]

pub mod camera_manager;
pub mod capture;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod inference;
pub mod protocol;
pub mod server;
pub mod session;
pub mod telemetry;
mod web_server;

pub use error::{OurError, OurResult};
