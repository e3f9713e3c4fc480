//! XwalkDriver: WebDriver-protocol automation server
//!
//! This library provides an HTTP/JSON command server that maps WebDriver-style
//! commands onto browser automation primitives behind a pluggable backend.

pub mod error;
pub mod config;

pub mod protocol;
pub mod webview;
pub mod input;
pub mod emulation;
pub mod logging;
pub mod session;
pub mod server;

// Re-exports
pub use error::{Error, Result};

/// XwalkDriver library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
