//! Unified error types for XwalkDriver
//!
//! Error display strings are part of the compatibility surface: clients match
//! on the lowercase prefixes (`no such element: ...`, `script timeout`, ...)
//! and on embedded detail such as rejected capability keys.

use std::net;
use thiserror::Error;

/// Unified Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for XwalkDriver
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network errors
    #[error("Network error: {0}")]
    Net(#[from] net::AddrParseError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Session not found or already destroyed
    #[error("no such session: {0}")]
    NoSuchSession(String),

    /// Targeted window does not exist (or the current window was closed)
    #[error("no such window: {0}")]
    NoSuchWindow(String),

    /// Frame locator did not resolve, or the frame's document is gone
    #[error("no such frame: {0}")]
    NoSuchFrame(String),

    /// Element locator did not resolve
    #[error("no such element: {0}")]
    NoSuchElement(String),

    /// Element handle refers to a node no longer attached to its document
    #[error("stale element reference: {0}")]
    StaleElementReference(String),

    /// Asynchronous script did not complete within the session script timeout
    #[error("script timeout: {0}")]
    ScriptTimeout(String),

    /// Script syntax or runtime error
    #[error("javascript error: {0}")]
    JavaScriptError(String),

    /// No handler for the requested method/path
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Session creation rejected (capability validation, backend attach)
    #[error("session not created exception: {0}")]
    SessionNotCreated(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Catch-all; the message embeds the underlying cause
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl Error {
    /// Create a new session-not-found error
    pub fn no_such_session<S: Into<String>>(id: S) -> Self {
        Error::NoSuchSession(id.into())
    }

    /// Create a new window-not-found error
    pub fn no_such_window<S: Into<String>>(msg: S) -> Self {
        Error::NoSuchWindow(msg.into())
    }

    /// Create a new frame-not-found error
    pub fn no_such_frame<S: Into<String>>(msg: S) -> Self {
        Error::NoSuchFrame(msg.into())
    }

    /// Create a new element-not-found error
    pub fn no_such_element<S: Into<String>>(msg: S) -> Self {
        Error::NoSuchElement(msg.into())
    }

    /// Create a new stale-element error
    pub fn stale_element<S: Into<String>>(msg: S) -> Self {
        Error::StaleElementReference(msg.into())
    }

    /// Create a new script timeout error
    pub fn script_timeout<S: Into<String>>(msg: S) -> Self {
        Error::ScriptTimeout(msg.into())
    }

    /// Create a new javascript error
    pub fn javascript<S: Into<String>>(msg: S) -> Self {
        Error::JavaScriptError(msg.into())
    }

    /// Create a new session-not-created error
    pub fn session_not_created<S: Into<String>>(msg: S) -> Self {
        Error::SessionNotCreated(msg.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }

    /// Create a new catch-all error
    pub fn unknown<S: Into<String>>(msg: S) -> Self {
        Error::Unknown(msg.into())
    }

    /// Wire status code carried in the response envelope.
    ///
    /// Codes follow the classic WebDriver JSON wire protocol and are stable:
    /// clients switch on them to raise typed failures.
    pub fn status_code(&self) -> i64 {
        match self {
            Error::NoSuchSession(_) => 6,
            Error::NoSuchElement(_) => 7,
            Error::NoSuchFrame(_) => 8,
            Error::UnknownCommand(_) => 9,
            Error::StaleElementReference(_) => 10,
            Error::JavaScriptError(_) => 17,
            Error::NoSuchWindow(_) => 23,
            Error::ScriptTimeout(_) => 28,
            Error::SessionNotCreated(_) => 33,
            _ => 13,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_stable() {
        assert_eq!(Error::no_such_session("s").status_code(), 6);
        assert_eq!(Error::no_such_element("e").status_code(), 7);
        assert_eq!(Error::no_such_frame("f").status_code(), 8);
        assert_eq!(Error::stale_element("e").status_code(), 10);
        assert_eq!(Error::unknown("boom").status_code(), 13);
        assert_eq!(Error::javascript("bad").status_code(), 17);
        assert_eq!(Error::no_such_window("w").status_code(), 23);
        assert_eq!(Error::script_timeout("t").status_code(), 28);
        assert_eq!(Error::session_not_created("c").status_code(), 33);
    }

    #[test]
    fn test_message_prefixes() {
        let err = Error::no_such_element(
            r#"Unable to locate element: {"method":"tag name","selector":"divine"}"#,
        );
        let msg = err.to_string();
        assert!(msg.starts_with("no such element: Unable to locate element"));
        assert!(msg.contains(r#""selector":"divine""#));

        let err = Error::session_not_created("unrecognized xwalk option: fooBar");
        assert!(err.to_string().contains("unrecognized xwalk option: fooBar"));
    }
}
