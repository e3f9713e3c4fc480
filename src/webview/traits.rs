//! Backend traits
//!
//! One [`Browser`] per session, one [`WebView`] per window. Frame-scoped
//! methods take the session's current frame chain (frame ids from the top
//! document down) and fail with a not-found kind when a hop no longer
//! resolves.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use crate::input::InputEvent;
use crate::protocol::FrameLocator;
use crate::Result;

/// Wire key for opaque element references inside script values
pub const ELEMENT_KEY: &str = "ELEMENT";

/// Device metrics override for mobile emulation, fixed at session creation
#[derive(Debug, Clone)]
pub struct DeviceMetrics {
    pub width: u64,
    pub height: u64,
    pub pixel_ratio: f64,
    pub user_agent: Option<String>,
}

/// Options for launching or attaching the underlying browser,
/// derived from validated session capabilities
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Browser executable path
    pub binary: Option<String>,
    /// Raw process switches
    pub args: Vec<String>,
    /// Decoded extension packages to install
    pub extensions: Vec<Vec<u8>>,
    /// Attach to an already-running browser instead of launching
    pub debugger_address: Option<String>,
    /// Device-targeted launch
    pub android_package: Option<String>,
    pub android_activity: Option<String>,
    pub android_process: Option<String>,
    /// Mobile emulation metrics, when enabled
    pub device_metrics: Option<DeviceMetrics>,
}

/// A running browser owned by exactly one session
#[async_trait]
pub trait Browser: Send + Sync + std::fmt::Debug {
    /// Handles of all open windows, in creation order
    fn window_handles(&self) -> Vec<String>;

    /// Look up one window by handle
    fn window(&self, handle: &str) -> Option<Arc<dyn WebView>>;

    /// Look up a window by its script-visible `window.name`
    fn window_by_name(&self, name: &str) -> Option<String>;

    /// Close one window, removing it from the set
    async fn close_window(&self, handle: &str) -> Result<()>;

    /// Generation counter observable through [`Browser::window_events`],
    /// bumped whenever the window set changes
    fn window_generation(&self) -> u64;

    /// Change notification for the window set; receivers see the generation
    fn window_events(&self) -> watch::Receiver<u64>;

    /// False once the browser process has crashed or terminated
    fn is_alive(&self) -> bool;

    /// Terminate the browser and release its resources
    async fn quit(&self) -> Result<()>;
}

/// One window/tab and its document tree
#[async_trait]
pub trait WebView: Send + Sync + std::fmt::Debug {
    fn handle(&self) -> &str;

    /// Script-visible `window.name`
    fn window_name(&self) -> String;

    fn url(&self) -> String;

    fn title(&self) -> String;

    /// Window position in screen coordinates
    fn window_position(&self) -> Result<(i64, i64)>;

    fn set_window_position(&self, x: i64, y: i64) -> Result<()>;

    /// Outer window size in pixels
    fn window_size(&self) -> Result<(u64, u64)>;

    fn set_window_size(&self, width: u64, height: u64) -> Result<()>;

    /// Move to the screen origin and grow to fill it
    fn maximize(&self) -> Result<()>;

    /// Load a URL in the top frame; replaces the document (new epoch)
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn reload(&self) -> Result<()>;

    async fn go_back(&self) -> Result<()>;

    async fn go_forward(&self) -> Result<()>;

    /// Serialized document of the frame the chain points at
    fn source(&self, chain: &[String]) -> Result<String>;

    /// Epoch of the top document; bumped on navigation/reload/DOM replacement
    fn document_epoch(&self) -> u64;

    /// Fails with a not-found kind if any hop of the chain is gone
    fn validate_chain(&self, chain: &[String]) -> Result<()>;

    /// Resolve a child frame of the chain's frame; returns the frame id
    fn child_frame(&self, chain: &[String], locator: &FrameLocator) -> Result<String>;

    /// Find element handles under the chain's frame, optionally scoped to the
    /// children of `root`
    fn find_elements(
        &self,
        chain: &[String],
        root: Option<&str>,
        strategy: &str,
        value: &str,
    ) -> Result<Vec<String>>;

    /// Fails with a stale kind when the handle's node is detached or its
    /// document was replaced
    fn check_element(&self, handle: &str) -> Result<()>;

    fn element_text(&self, handle: &str) -> Result<String>;

    fn element_displayed(&self, handle: &str) -> Result<bool>;

    /// Top-left corner in page coordinates
    fn element_location(&self, handle: &str) -> Result<(i64, i64)>;

    /// Semantic click: dispatches the mouse sequence and follows link targets
    async fn click_element(&self, handle: &str) -> Result<()>;

    /// Append keystrokes to the element's value
    fn element_send_keys(&self, handle: &str, keys: &str) -> Result<()>;

    fn element_clear(&self, handle: &str) -> Result<()>;

    /// Dispatch synthesized events; `target` scopes delivery to an element,
    /// otherwise events are delivered at absolute coordinates
    async fn dispatch_input(
        &self,
        chain: &[String],
        target: Option<&str>,
        events: &[InputEvent],
    ) -> Result<()>;

    /// Adjust the document scroll offset
    fn scroll_by(&self, dx: i64, dy: i64) -> Result<()>;

    /// Rescale the viewport by a pinch zoom factor (> 1 zooms in)
    fn pinch_zoom(&self, scale: f64) -> Result<()>;

    /// Synchronous script evaluation in the chain's frame. Element references
    /// in `args` and in the result use [`ELEMENT_KEY`] maps.
    async fn evaluate(&self, chain: &[String], script: &str, args: &[Value]) -> Result<Value>;

    /// Asynchronous evaluation: resolves when the script's completion
    /// callback fires. The caller bounds this with its script timeout.
    async fn evaluate_async(&self, chain: &[String], script: &str, args: &[Value])
        -> Result<Value>;

    /// Message of the open modal, if any
    fn alert_message(&self) -> Option<String>;

    /// Accept or dismiss the open modal
    fn handle_alert(&self, accept: bool) -> Result<()>;
}
