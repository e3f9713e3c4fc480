//! Browser backend seam
//!
//! The protocol server never talks to a real browser directly; it drives the
//! [`Browser`]/[`WebView`] traits. The shipped implementation is an in-memory
//! simulation (`sim`) suitable for development and testing; a real backend
//! would attach to a browser's debugging endpoint behind the same traits.

pub mod traits;
pub mod sim;

pub use traits::{Browser, LaunchOptions, WebView, ELEMENT_KEY};
pub use sim::SimBrowser;
