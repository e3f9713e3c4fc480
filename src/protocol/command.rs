//! Typed command set
//!
//! Every verb the dispatcher routes is a variant of [`Command`] with typed
//! parameters, deserialized and validated at the HTTP boundary before any
//! handler runs. Loose per-verb JSON never reaches the session workers.

use serde::Deserialize;
use serde_json::Value;

use crate::webview::traits::ELEMENT_KEY;
use crate::{Error, Result};

/// Element lookup strategy + selector
#[derive(Debug, Clone, Deserialize)]
pub struct Locator {
    /// Strategy name (`id`, `name`, `tag name`, ...)
    pub using: String,
    /// Selector value
    pub value: String,
}

impl Locator {
    /// Detail string embedded in not-found errors; clients regex-match it
    pub fn describe(&self) -> String {
        format!(
            r#"Unable to locate element: {{"method":"{}","selector":"{}"}}"#,
            self.using, self.value
        )
    }
}

/// Frame targeting, relative to the current frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameLocator {
    /// Reset to the window's top frame
    Top,
    /// Match a frame element's id or name attribute
    IdOrName(String),
    /// Zero-based index among the current frame's children
    Index(u64),
    /// A previously returned element handle of a frame element
    Element(String),
}

impl FrameLocator {
    /// Parse the `id` field of a switch-to-frame body
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(FrameLocator::Top),
            Value::String(s) => Ok(FrameLocator::IdOrName(s.clone())),
            Value::Number(n) => n
                .as_u64()
                .map(FrameLocator::Index)
                .ok_or_else(|| Error::unknown("frame index must be a non-negative integer")),
            Value::Object(map) => map
                .get(ELEMENT_KEY)
                .and_then(Value::as_str)
                .map(|s| FrameLocator::Element(s.to_string()))
                .ok_or_else(|| Error::unknown("frame element reference is missing ELEMENT key")),
            _ => Err(Error::unknown("invalid frame locator")),
        }
    }
}

/// Extract an element handle from a script-value element reference
pub fn element_handle(value: &Value) -> Option<String> {
    value
        .as_object()
        .and_then(|map| map.get(ELEMENT_KEY))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Wrap an element handle as a wire element reference
pub fn element_reference(handle: &str) -> Value {
    serde_json::json!({ ELEMENT_KEY: handle })
}

/// The closed set of session-scoped commands
#[derive(Debug, Clone)]
pub enum Command {
    // Session
    GetCapabilities,
    Quit,

    // Navigation
    Navigate { url: String },
    GetCurrentUrl,
    GoBack,
    GoForward,
    Refresh,
    GetTitle,
    GetPageSource,

    // Windows
    GetWindowHandle,
    GetWindowHandles,
    SwitchToWindow { name: String },
    CloseWindow,
    GetWindowPosition { window: String },
    SetWindowPosition { window: String, x: i64, y: i64 },
    GetWindowSize { window: String },
    SetWindowSize { window: String, width: u64, height: u64 },
    MaximizeWindow { window: String },

    // Frames
    SwitchToFrame { locator: FrameLocator },
    SwitchToParentFrame,

    // Script
    ExecuteScript { script: String, args: Vec<Value> },
    ExecuteAsyncScript { script: String, args: Vec<Value> },
    SetTimeout { kind: String, ms: u64 },

    // Elements
    FindElement { locator: Locator },
    FindElements { locator: Locator },
    FindChildElement { parent: String, locator: Locator },
    FindChildElements { parent: String, locator: Locator },
    ClickElement { id: String },
    ClearElement { id: String },
    SendKeys { id: String, keys: String },
    GetElementText { id: String },
    IsElementDisplayed { id: String },
    GetElementLocation { id: String },

    // Mouse
    MouseMoveTo { element: Option<String>, xoffset: Option<i64>, yoffset: Option<i64> },
    MouseClick { button: u64 },
    MouseButtonDown { button: u64 },
    MouseButtonUp { button: u64 },
    MouseDoubleClick,

    // Touch
    TouchDown { x: i64, y: i64 },
    TouchUp { x: i64, y: i64 },
    TouchMove { x: i64, y: i64 },
    TouchScroll { element: Option<String>, xoffset: i64, yoffset: i64 },
    TouchDoubleTap { element: String },
    TouchLongPress { element: String },
    TouchFlick { element: Option<String>, xoffset: i64, yoffset: i64, speed: u64 },
    TouchPinch { x: i64, y: i64, scale: f64 },

    // Alerts
    GetAlertText,
    AcceptAlert,
    DismissAlert,
    IsAlertOpen,

    // Logging & emulation
    GetLog { log_type: String },
    GetNetworkConditions,
    SetNetworkConditions { body: Value },
    DeleteNetworkConditions,
}

impl Command {
    /// Whether the command may run while a modal alert is open
    pub fn allowed_with_alert(&self) -> bool {
        matches!(
            self,
            Command::GetAlertText
                | Command::AcceptAlert
                | Command::DismissAlert
                | Command::IsAlertOpen
                | Command::Quit
                | Command::GetCapabilities
                | Command::GetWindowHandle
                | Command::GetWindowHandles
        )
    }

    /// Short verb name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::GetCapabilities => "GetCapabilities",
            Command::Quit => "Quit",
            Command::Navigate { .. } => "Navigate",
            Command::GetCurrentUrl => "GetCurrentUrl",
            Command::GoBack => "GoBack",
            Command::GoForward => "GoForward",
            Command::Refresh => "Refresh",
            Command::GetTitle => "GetTitle",
            Command::GetPageSource => "GetPageSource",
            Command::GetWindowHandle => "GetWindowHandle",
            Command::GetWindowHandles => "GetWindowHandles",
            Command::SwitchToWindow { .. } => "SwitchToWindow",
            Command::CloseWindow => "CloseWindow",
            Command::GetWindowPosition { .. } => "GetWindowPosition",
            Command::SetWindowPosition { .. } => "SetWindowPosition",
            Command::GetWindowSize { .. } => "GetWindowSize",
            Command::SetWindowSize { .. } => "SetWindowSize",
            Command::MaximizeWindow { .. } => "MaximizeWindow",
            Command::SwitchToFrame { .. } => "SwitchToFrame",
            Command::SwitchToParentFrame => "SwitchToParentFrame",
            Command::ExecuteScript { .. } => "ExecuteScript",
            Command::ExecuteAsyncScript { .. } => "ExecuteAsyncScript",
            Command::SetTimeout { .. } => "SetTimeout",
            Command::FindElement { .. } => "FindElement",
            Command::FindElements { .. } => "FindElements",
            Command::FindChildElement { .. } => "FindChildElement",
            Command::FindChildElements { .. } => "FindChildElements",
            Command::ClickElement { .. } => "ClickElement",
            Command::ClearElement { .. } => "ClearElement",
            Command::SendKeys { .. } => "SendKeys",
            Command::GetElementText { .. } => "GetElementText",
            Command::IsElementDisplayed { .. } => "IsElementDisplayed",
            Command::GetElementLocation { .. } => "GetElementLocation",
            Command::MouseMoveTo { .. } => "MouseMoveTo",
            Command::MouseClick { .. } => "MouseClick",
            Command::MouseButtonDown { .. } => "MouseButtonDown",
            Command::MouseButtonUp { .. } => "MouseButtonUp",
            Command::MouseDoubleClick => "MouseDoubleClick",
            Command::TouchDown { .. } => "TouchDown",
            Command::TouchUp { .. } => "TouchUp",
            Command::TouchMove { .. } => "TouchMove",
            Command::TouchScroll { .. } => "TouchScroll",
            Command::TouchDoubleTap { .. } => "TouchDoubleTap",
            Command::TouchLongPress { .. } => "TouchLongPress",
            Command::TouchFlick { .. } => "TouchFlick",
            Command::TouchPinch { .. } => "TouchPinch",
            Command::GetAlertText => "GetAlertText",
            Command::AcceptAlert => "AcceptAlert",
            Command::DismissAlert => "DismissAlert",
            Command::IsAlertOpen => "IsAlertOpen",
            Command::GetLog { .. } => "GetLog",
            Command::GetNetworkConditions => "GetNetworkConditions",
            Command::SetNetworkConditions { .. } => "SetNetworkConditions",
            Command::DeleteNetworkConditions => "DeleteNetworkConditions",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_locator_parsing() {
        assert_eq!(FrameLocator::from_value(&Value::Null).unwrap(), FrameLocator::Top);
        assert_eq!(
            FrameLocator::from_value(&serde_json::json!("nav")).unwrap(),
            FrameLocator::IdOrName("nav".into())
        );
        assert_eq!(
            FrameLocator::from_value(&serde_json::json!(2)).unwrap(),
            FrameLocator::Index(2)
        );
        assert_eq!(
            FrameLocator::from_value(&serde_json::json!({"ELEMENT": "abc"})).unwrap(),
            FrameLocator::Element("abc".into())
        );
        assert!(FrameLocator::from_value(&serde_json::json!(-1)).is_err());
        assert!(FrameLocator::from_value(&serde_json::json!({"other": 1})).is_err());
    }

    #[test]
    fn test_locator_describe_matches_client_regex() {
        let locator = Locator { using: "tag name".into(), value: "divine".into() };
        assert_eq!(
            locator.describe(),
            r#"Unable to locate element: {"method":"tag name","selector":"divine"}"#
        );
    }

    #[test]
    fn test_element_reference_round_trip() {
        let reference = element_reference("el-1");
        assert_eq!(element_handle(&reference).unwrap(), "el-1");
        assert!(element_handle(&serde_json::json!({"x": 1})).is_none());
    }

    #[test]
    fn test_alert_gating() {
        assert!(Command::AcceptAlert.allowed_with_alert());
        assert!(Command::GetWindowHandles.allowed_with_alert());
        assert!(!Command::Navigate { url: "about:blank".into() }.allowed_with_alert());
        assert!(!Command::ExecuteScript { script: String::new(), args: vec![] }
            .allowed_with_alert());
    }
}
