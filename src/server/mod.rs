//! HTTP front end
//!
//! Thin translation layer: routes map method + path to a typed [`Command`],
//! hand it to the session manager, and wrap the outcome in the wire envelope.
//! No session state lives here.

pub mod routes;

pub use routes::router;

use std::sync::Arc;

use crate::session::SessionManager;

/// Shared state for all route handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
}
