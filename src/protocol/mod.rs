//! Wire protocol types
//!
//! Typed commands and the response envelope for the HTTP/JSON surface.

pub mod command;
pub mod response;

pub use command::{Command, FrameLocator, Locator};
pub use response::WireResponse;
