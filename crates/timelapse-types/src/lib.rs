//! Shared domain types for the timelapse camera workspace.

pub mod config;
pub mod events;
pub mod frame;
pub mod status;
pub mod window;

mod errors;

pub use errors::{Result, TimelapseError};
