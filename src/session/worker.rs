//! Per-session command execution
//!
//! Each session runs one worker task that owns the session's mutable state
//! and drains its command queue in arrival order. Replies go back through
//! per-command oneshot channels, so callers never share state with the
//! worker.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::emulation::{conditions_not_set, NetworkConditions};
use crate::input::{self, MouseButton};
use crate::logging::LogBuffers;
use crate::protocol::command::{element_reference, Command};
use crate::protocol::{FrameLocator, Locator};
use crate::session::manager::SessionHandle;
use crate::session::targets::{self, TargetContext};
use crate::webview::traits::{Browser, WebView};
use crate::{Error, Result};

/// How long SwitchToWindow waits for a window that is not there yet
const WINDOW_CHANGE_WAIT: Duration = Duration::from_millis(100);

/// One queued command with its reply channel
pub struct Job {
    pub command: Command,
    pub reply: oneshot::Sender<Result<Value>>,
}

/// State owned by one session's worker task
pub struct SessionState {
    pub id: String,
    pub browser: Arc<dyn Browser>,
    pub capabilities: Value,
    pub target: TargetContext,
    pub script_timeout: Duration,
    pub network: Option<NetworkConditions>,
    pub logs: Arc<LogBuffers>,
    pub mouse_position: (i64, i64),
}

/// Worker loop: strictly serial command execution, then self-removal from the
/// registry on quit or browser death.
pub async fn run(
    mut state: SessionState,
    mut queue: mpsc::Receiver<Job>,
    registry: Weak<RwLock<HashMap<String, SessionHandle>>>,
) {
    info!(session = %state.id, "session worker started");
    while let Some(job) = queue.recv().await {
        let name = job.command.name();
        let quitting = matches!(job.command, Command::Quit);
        debug!(session = %state.id, command = name, "executing");

        let result = state.execute(job.command).await;
        if let Err(error) = &result {
            debug!(session = %state.id, command = name, %error, "command failed");
        }

        let done = quitting || !state.browser.is_alive();
        let _ = job.reply.send(result);

        if done {
            if !quitting {
                warn!(session = %state.id, "browser gone, tearing down session");
                let _ = state.browser.quit().await;
            }
            if let Some(registry) = registry.upgrade() {
                if let Ok(mut sessions) = registry.write() {
                    sessions.remove(&state.id);
                }
            }
            break;
        }
    }
    info!(session = %state.id, "session worker stopped");
}

impl SessionState {
    pub async fn execute(&mut self, command: Command) -> Result<Value> {
        self.check_alert_gate(&command)?;

        match command {
            Command::GetCapabilities => Ok(self.capabilities.clone()),
            Command::Quit => {
                self.browser.quit().await?;
                Ok(Value::Null)
            }

            Command::Navigate { url } => {
                let view = self.view()?;
                view.navigate(&url).await?;
                self.target.frame_chain.clear();
                Ok(Value::Null)
            }
            Command::GetCurrentUrl => Ok(Value::String(self.view()?.url())),
            Command::GoBack => {
                let view = self.view()?;
                view.go_back().await?;
                self.target.frame_chain.clear();
                Ok(Value::Null)
            }
            Command::GoForward => {
                let view = self.view()?;
                view.go_forward().await?;
                self.target.frame_chain.clear();
                Ok(Value::Null)
            }
            Command::Refresh => {
                let view = self.view()?;
                view.reload().await?;
                self.target.frame_chain.clear();
                Ok(Value::Null)
            }
            Command::GetTitle => Ok(Value::String(self.view()?.title())),
            Command::GetPageSource => {
                let view = self.view()?;
                Ok(Value::String(view.source(&self.target.frame_chain)?))
            }

            Command::GetWindowHandle => self
                .target
                .window
                .clone()
                .map(Value::String)
                .ok_or_else(|| Error::no_such_window("target window already closed")),
            Command::GetWindowHandles => Ok(serde_json::to_value(self.browser.window_handles())?),
            Command::SwitchToWindow { name } => {
                let handle = self.resolve_window(&name).await?;
                self.target.switch_window(handle);
                self.mouse_position = (0, 0);
                Ok(Value::Null)
            }
            Command::CloseWindow => {
                let handle = self
                    .target
                    .window
                    .clone()
                    .ok_or_else(|| Error::no_such_window("target window already closed"))?;
                self.browser.close_window(&handle).await?;
                self.target.window = None;
                Ok(Value::Null)
            }

            Command::GetWindowPosition { window } => {
                let (x, y) = self.window_view(&window)?.window_position()?;
                Ok(serde_json::json!({ "x": x, "y": y }))
            }
            Command::SetWindowPosition { window, x, y } => {
                self.window_view(&window)?.set_window_position(x, y)?;
                Ok(Value::Null)
            }
            Command::GetWindowSize { window } => {
                let (width, height) = self.window_view(&window)?.window_size()?;
                Ok(serde_json::json!({ "width": width, "height": height }))
            }
            Command::SetWindowSize { window, width, height } => {
                self.window_view(&window)?.set_window_size(width, height)?;
                Ok(Value::Null)
            }
            Command::MaximizeWindow { window } => {
                self.window_view(&window)?.maximize()?;
                Ok(Value::Null)
            }

            Command::SwitchToFrame { locator } => {
                match locator {
                    FrameLocator::Top => self.target.frame_chain.clear(),
                    locator => {
                        let view = self.view()?;
                        let frame = view.child_frame(&self.target.frame_chain, &locator)?;
                        self.target.frame_chain.push(frame);
                    }
                }
                Ok(Value::Null)
            }
            Command::SwitchToParentFrame => {
                self.target.frame_chain.pop();
                Ok(Value::Null)
            }

            Command::ExecuteScript { script, args } => {
                let view = self.view()?;
                view.evaluate(&self.target.frame_chain, &script, &args).await
            }
            Command::ExecuteAsyncScript { script, args } => {
                let view = self.view()?;
                let evaluation = view.evaluate_async(&self.target.frame_chain, &script, &args);
                match tokio::time::timeout(self.script_timeout, evaluation).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::script_timeout(format!(
                        "asynchronous script timeout: result was not received in {} seconds",
                        self.script_timeout.as_secs_f64()
                    ))),
                }
            }
            Command::SetTimeout { kind, ms } => {
                match kind.as_str() {
                    "script" => self.script_timeout = Duration::from_millis(ms),
                    // Page loads and implicit waits resolve synchronously
                    // against the simulated document, so these are recorded
                    // as accepted and nothing more.
                    "implicit" | "page load" => {}
                    other => {
                        return Err(Error::unknown(format!("unknown timeout type: {}", other)))
                    }
                }
                Ok(Value::Null)
            }

            Command::FindElement { locator } => {
                let view = self.view()?;
                self.find_one(&view, None, &locator)
            }
            Command::FindElements { locator } => {
                let view = self.view()?;
                self.find_many(&view, None, &locator)
            }
            Command::FindChildElement { parent, locator } => {
                let view = self.view()?;
                self.find_one(&view, Some(&parent), &locator)
            }
            Command::FindChildElements { parent, locator } => {
                let view = self.view()?;
                self.find_many(&view, Some(&parent), &locator)
            }
            Command::ClickElement { id } => {
                let view = self.view()?;
                view.click_element(&id).await?;
                Ok(Value::Null)
            }
            Command::ClearElement { id } => {
                self.view()?.element_clear(&id)?;
                Ok(Value::Null)
            }
            Command::SendKeys { id, keys } => {
                self.view()?.element_send_keys(&id, &keys)?;
                Ok(Value::Null)
            }
            Command::GetElementText { id } => {
                Ok(Value::String(self.view()?.element_text(&id)?))
            }
            Command::IsElementDisplayed { id } => {
                Ok(Value::Bool(self.view()?.element_displayed(&id)?))
            }
            Command::GetElementLocation { id } => {
                let (x, y) = self.view()?.element_location(&id)?;
                Ok(serde_json::json!({ "x": x, "y": y }))
            }

            Command::MouseMoveTo { element, xoffset, yoffset } => {
                let view = self.view()?;
                let base = match &element {
                    Some(id) => view.element_location(id)?,
                    None => self.mouse_position,
                };
                let position =
                    (base.0 + xoffset.unwrap_or(0), base.1 + yoffset.unwrap_or(0));
                self.mouse_position = position;
                let events =
                    [input::InputEvent::MouseMove { x: position.0, y: position.1 }];
                view.dispatch_input(&self.target.frame_chain, element.as_deref(), &events)
                    .await?;
                Ok(Value::Null)
            }
            Command::MouseClick { button } => {
                let events = input::click_events(MouseButton::from_wire(button)?);
                self.dispatch_unscoped(&events).await
            }
            Command::MouseButtonDown { button } => {
                let events = [input::InputEvent::MouseDown {
                    button: MouseButton::from_wire(button)?,
                }];
                self.dispatch_unscoped(&events).await
            }
            Command::MouseButtonUp { button } => {
                let events = [input::InputEvent::MouseUp {
                    button: MouseButton::from_wire(button)?,
                }];
                self.dispatch_unscoped(&events).await
            }
            Command::MouseDoubleClick => {
                let events = input::double_click_events();
                self.dispatch_unscoped(&events).await
            }

            Command::TouchDown { x, y } => {
                let events = [input::InputEvent::TouchStart { x, y }];
                self.dispatch_unscoped(&events).await
            }
            Command::TouchUp { x, y } => {
                let events = [input::InputEvent::TouchEnd { x, y }];
                self.dispatch_unscoped(&events).await
            }
            Command::TouchMove { x, y } => {
                let events = [input::InputEvent::TouchMove { x, y }];
                self.dispatch_unscoped(&events).await
            }
            Command::TouchScroll { element, xoffset, yoffset } => {
                let view = self.view()?;
                let anchor = match &element {
                    Some(id) => view.element_location(id)?,
                    None => (0, 0),
                };
                let events = input::scroll_events(anchor.0, anchor.1, xoffset, yoffset);
                view.dispatch_input(&self.target.frame_chain, element.as_deref(), &events)
                    .await?;
                view.scroll_by(xoffset, yoffset)?;
                Ok(Value::Null)
            }
            Command::TouchDoubleTap { element } => {
                let view = self.view()?;
                let (x, y) = view.element_location(&element)?;
                view.dispatch_input(
                    &self.target.frame_chain,
                    Some(&element),
                    &input::double_tap_events(x, y),
                )
                .await?;
                Ok(Value::Null)
            }
            Command::TouchLongPress { element } => {
                let view = self.view()?;
                let (x, y) = view.element_location(&element)?;
                view.dispatch_input(
                    &self.target.frame_chain,
                    Some(&element),
                    &input::long_press_events(x, y),
                )
                .await?;
                Ok(Value::Null)
            }
            Command::TouchFlick { element, xoffset, yoffset, speed } => {
                let view = self.view()?;
                let anchor = match &element {
                    Some(id) => view.element_location(id)?,
                    None => (0, 0),
                };
                let events = input::flick_events(anchor.0, anchor.1, xoffset, yoffset, speed)?;
                view.dispatch_input(&self.target.frame_chain, element.as_deref(), &events)
                    .await?;
                Ok(Value::Null)
            }
            Command::TouchPinch { x, y, scale } => {
                let view = self.view()?;
                view.dispatch_input(
                    &self.target.frame_chain,
                    None,
                    &input::single_tap_events(x, y),
                )
                .await?;
                view.pinch_zoom(scale)?;
                Ok(Value::Null)
            }

            Command::GetAlertText => self
                .view()?
                .alert_message()
                .map(Value::String)
                .ok_or_else(|| Error::unknown("no alert open")),
            Command::AcceptAlert => {
                self.view()?.handle_alert(true)?;
                Ok(Value::Null)
            }
            Command::DismissAlert => {
                self.view()?.handle_alert(false)?;
                Ok(Value::Null)
            }
            Command::IsAlertOpen => {
                Ok(Value::Bool(self.view()?.alert_message().is_some()))
            }

            Command::GetLog { log_type } => {
                let log_type = log_type.parse()?;
                Ok(serde_json::to_value(self.logs.drain(log_type))?)
            }
            Command::GetNetworkConditions => match &self.network {
                Some(conditions) => Ok(serde_json::to_value(conditions)?),
                None => Err(conditions_not_set()),
            },
            Command::SetNetworkConditions { body } => {
                self.network = Some(parse_network_conditions(&body)?);
                Ok(Value::Null)
            }
            Command::DeleteNetworkConditions => {
                self.network = None;
                Ok(Value::Null)
            }
        }
    }

    /// Geometry commands address a window by handle; `current` means the
    /// session's target window.
    fn window_view(&mut self, window: &str) -> Result<Arc<dyn WebView>> {
        if window == "current" {
            return self.view();
        }
        if !self.browser.is_alive() {
            return Err(Error::unknown("session deleted because of page crash"));
        }
        self.browser
            .window(window)
            .ok_or_else(|| Error::no_such_window("window was already closed"))
    }

    fn view(&mut self) -> Result<Arc<dyn WebView>> {
        if !self.browser.is_alive() {
            return Err(Error::unknown("session deleted because of page crash"));
        }
        self.target.resolve(self.browser.as_ref())
    }

    /// Commands other than alert handling and session introspection are
    /// rejected while a modal dialog is open.
    fn check_alert_gate(&mut self, command: &Command) -> Result<()> {
        if command.allowed_with_alert() {
            return Ok(());
        }
        let Ok(view) = self.target.resolve(self.browser.as_ref()) else {
            return Ok(());
        };
        match view.alert_message() {
            Some(message) => Err(Error::unknown(format!(
                "unexpected alert open: {{Alert text : {}}}",
                message
            ))),
            None => Ok(()),
        }
    }

    /// Accepts a window handle or a script-visible window name; waits briefly
    /// for the window set to settle before giving up.
    async fn resolve_window(&mut self, name: &str) -> Result<String> {
        if !self.browser.is_alive() {
            return Err(Error::unknown("session deleted because of page crash"));
        }
        for attempt in 0..2 {
            if self.browser.window(name).is_some() {
                return Ok(name.to_string());
            }
            if let Some(handle) = self.browser.window_by_name(name) {
                return Ok(handle);
            }
            if attempt == 0 {
                let since = self.browser.window_generation();
                targets::wait_for_window_change(
                    self.browser.as_ref(),
                    since,
                    WINDOW_CHANGE_WAIT,
                )
                .await;
            }
        }
        Err(Error::no_such_window(format!("window '{}' not found", name)))
    }

    fn find_one(
        &self,
        view: &Arc<dyn WebView>,
        root: Option<&str>,
        locator: &Locator,
    ) -> Result<Value> {
        let handles =
            view.find_elements(&self.target.frame_chain, root, &locator.using, &locator.value)?;
        handles
            .first()
            .map(|h| element_reference(h))
            .ok_or_else(|| Error::no_such_element(locator.describe()))
    }

    fn find_many(
        &self,
        view: &Arc<dyn WebView>,
        root: Option<&str>,
        locator: &Locator,
    ) -> Result<Value> {
        let handles =
            view.find_elements(&self.target.frame_chain, root, &locator.using, &locator.value)?;
        Ok(Value::Array(handles.iter().map(|h| element_reference(h)).collect()))
    }

    /// Dispatch events hit-tested by coordinates rather than targeted at a
    /// known element
    async fn dispatch_unscoped(&mut self, events: &[input::InputEvent]) -> Result<Value> {
        let view = self.view()?;
        view.dispatch_input(&self.target.frame_chain, None, events).await?;
        Ok(Value::Null)
    }
}

/// Conditions arrive either inline under `network_conditions` or as a named
/// profile under `network_name`.
fn parse_network_conditions(body: &Value) -> Result<NetworkConditions> {
    if let Some(name) = body.get("network_name").and_then(Value::as_str) {
        return NetworkConditions::from_profile(name);
    }
    let conditions = body
        .get("network_conditions")
        .ok_or_else(|| Error::unknown("missing network_conditions"))?;
    Ok(serde_json::from_value(conditions.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;
    use crate::webview::traits::LaunchOptions;
    use crate::webview::SimBrowser;

    fn state() -> SessionState {
        let logs = Arc::new(LogBuffers::new(100, LogLevel::All, LogLevel::All));
        let browser =
            SimBrowser::launch(LaunchOptions::default(), vec![], logs.clone()).unwrap();
        let window = browser.window_handles()[0].clone();
        SessionState {
            id: "test-session".into(),
            browser,
            capabilities: serde_json::json!({"browserName": "xwalk"}),
            target: TargetContext::new(window),
            script_timeout: Duration::from_millis(200),
            network: None,
            logs,
            mouse_position: (0, 0),
        }
    }

    fn locator(using: &str, value: &str) -> Locator {
        Locator { using: using.into(), value: value.into() }
    }

    #[tokio::test]
    async fn test_find_element_error_names_locator() {
        let mut state = state();
        let err = state
            .execute(Command::FindElement { locator: locator("tag name", "divine") })
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"no such element: Unable to locate element: {"method":"tag name","selector":"divine"}"#
        );
    }

    #[tokio::test]
    async fn test_close_window_then_commands_fail() {
        let mut state = state();
        state.execute(Command::CloseWindow).await.unwrap();

        let err = state.execute(Command::GetCurrentUrl).await.unwrap_err();
        assert!(matches!(err, Error::NoSuchWindow(_)));
        // The window set is still reachable
        let handles = state.execute(Command::GetWindowHandles).await.unwrap();
        assert_eq!(handles.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_frame_switch_round_trip() {
        let mut state = state();
        state
            .execute(Command::SwitchToFrame {
                locator: FrameLocator::IdOrName("subframe".into()),
            })
            .await
            .unwrap();
        let nested = state
            .execute(Command::ExecuteScript {
                script: "return window.top != window".into(),
                args: vec![],
            })
            .await
            .unwrap();
        assert_eq!(nested, Value::Bool(true));

        state.execute(Command::SwitchToParentFrame).await.unwrap();
        let top = state
            .execute(Command::ExecuteScript {
                script: "return window.top == window".into(),
                args: vec![],
            })
            .await
            .unwrap();
        assert_eq!(top, Value::Bool(true));
    }

    #[tokio::test]
    async fn test_async_script_timeout_and_completion() {
        let mut state = state();
        state
            .execute(Command::SetTimeout { kind: "script".into(), ms: 50 })
            .await
            .unwrap();

        let err = state
            .execute(Command::ExecuteAsyncScript {
                script: "var callback = arguments[0];setTimeout(function(){callback(1);}, 10000);"
                    .into(),
                args: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ScriptTimeout(_)));

        let value = state
            .execute(Command::ExecuteAsyncScript {
                script: "var callback = arguments[0];setTimeout(function(){callback(2);}, 10);"
                    .into(),
                args: vec![],
            })
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!(2));
    }

    #[tokio::test]
    async fn test_alert_gates_other_commands() {
        let mut state = state();
        state
            .execute(Command::ExecuteScript {
                script: "alert('gate')".into(),
                args: vec![],
            })
            .await
            .unwrap();

        let err = state.execute(Command::GetCurrentUrl).await.unwrap_err();
        assert!(err.to_string().contains("unexpected alert open"));
        assert!(err.to_string().contains("gate"));

        let text = state.execute(Command::GetAlertText).await.unwrap();
        assert_eq!(text, serde_json::json!("gate"));
        state.execute(Command::AcceptAlert).await.unwrap();
        assert!(state.execute(Command::GetCurrentUrl).await.is_ok());
    }

    #[tokio::test]
    async fn test_network_conditions_lifecycle() {
        let mut state = state();
        let err = state.execute(Command::GetNetworkConditions).await.unwrap_err();
        assert!(err.to_string().contains("must be set before it can be retrieved"));

        state
            .execute(Command::SetNetworkConditions {
                body: serde_json::json!({ "network_name": "DSL" }),
            })
            .await
            .unwrap();
        let conditions = state.execute(Command::GetNetworkConditions).await.unwrap();
        assert_eq!(conditions["latency"], 5);
        assert_eq!(conditions["download_throughput"], 2048 * 1024);

        state.execute(Command::DeleteNetworkConditions).await.unwrap();
        assert!(state.execute(Command::GetNetworkConditions).await.is_err());
    }

    #[tokio::test]
    async fn test_switch_to_window_by_script_name() {
        let mut state = state();
        state
            .execute(Command::ExecuteScript {
                script: "window.name = 'mainWindow'".into(),
                args: vec![],
            })
            .await
            .unwrap();
        state
            .execute(Command::SwitchToWindow { name: "mainWindow".into() })
            .await
            .unwrap();
        assert!(state.target.window.is_some());

        let err = state
            .execute(Command::SwitchToWindow { name: "noSuchWindow".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchWindow(_)));
    }

    #[tokio::test]
    async fn test_touch_flick_reaches_recorder() {
        let mut state = state();
        let events_div = state
            .execute(Command::FindElement { locator: locator("id", "events") })
            .await
            .unwrap();
        let id = events_div["ELEMENT"].as_str().unwrap().to_string();

        state
            .execute(Command::TouchFlick {
                element: Some(id.clone()),
                xoffset: 3,
                yoffset: 4,
                speed: 5,
            })
            .await
            .unwrap();

        let text = state
            .execute(Command::GetElementText { id })
            .await
            .unwrap();
        let text = text.as_str().unwrap();
        assert!(text.starts_with("events: touchstart touchmove"));
        assert!(text.ends_with("touchend"));
        assert_eq!(text.matches("touchmove").count(), 30);
    }

    #[tokio::test]
    async fn test_crash_marks_session_dead() {
        let mut state = state();
        let err = state
            .execute(Command::Navigate { url: "xwalk://crash".into() })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("page crash"));
        assert!(!state.browser.is_alive());
    }
}
