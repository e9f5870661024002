//! Real-time "invisibility cloak": pixels matching a configured color are
//! replaced by a background sampled when the session starts, and the result
//! is served as an MJPEG stream.

pub mod capture;
pub mod compose;
pub mod config;
pub mod detection;
pub mod encoding;
pub mod error;
pub mod output;
pub mod server;
pub mod session;

pub use error::{CloakError, Result};
