//! Session lifecycle and command execution
//!
//! One session owns one browser. Commands for a session run on a dedicated
//! worker task, strictly in arrival order; the manager only routes.

pub mod capabilities;
pub mod manager;
pub mod targets;
pub mod worker;

pub use capabilities::Capabilities;
pub use manager::{BrowserFactory, SessionManager};
pub use targets::TargetContext;
