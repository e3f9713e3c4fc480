//! Route table and request translation
//!
//! Paths follow the classic JSON wire protocol. Each handler parses its body
//! into a typed [`Command`], runs it through the manager, and returns the
//! envelope; parse failures and execution failures travel the same way.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::Uri;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;

use crate::protocol::command::Command;
use crate::protocol::{FrameLocator, Locator, WireResponse};
use crate::server::AppState;
use crate::session::SessionManager;
use crate::{Error, Result};

pub fn router(manager: Arc<SessionManager>) -> Router {
    let state = AppState { manager };
    Router::new()
        .route("/status", get(status))
        .route("/session", post(create_session))
        .route("/sessions", get(list_sessions))
        .route("/session/:id", get(get_capabilities).delete(quit_session))
        // Navigation
        .route("/session/:id/url", post(navigate).get(current_url))
        .route("/session/:id/back", post(go_back))
        .route("/session/:id/forward", post(go_forward))
        .route("/session/:id/refresh", post(refresh))
        .route("/session/:id/title", get(title))
        .route("/session/:id/source", get(source))
        // Windows
        .route("/session/:id/window_handle", get(window_handle))
        .route("/session/:id/window_handles", get(window_handles))
        .route("/session/:id/window", post(switch_window).delete(close_window))
        .route(
            "/session/:id/window/:win/position",
            get(get_window_position).post(set_window_position),
        )
        .route(
            "/session/:id/window/:win/size",
            get(get_window_size).post(set_window_size),
        )
        .route("/session/:id/window/:win/maximize", post(maximize_window))
        // Frames
        .route("/session/:id/frame", post(switch_frame))
        .route("/session/:id/frame/parent", post(switch_parent_frame))
        // Script
        .route("/session/:id/execute", post(execute_script))
        .route("/session/:id/execute_async", post(execute_async_script))
        .route("/session/:id/timeouts", post(set_timeout))
        // Elements
        .route("/session/:id/element", post(find_element))
        .route("/session/:id/elements", post(find_elements))
        .route("/session/:id/element/:eid/element", post(find_child_element))
        .route("/session/:id/element/:eid/elements", post(find_child_elements))
        .route("/session/:id/element/:eid/click", post(click_element))
        .route("/session/:id/element/:eid/clear", post(clear_element))
        .route("/session/:id/element/:eid/value", post(send_keys))
        .route("/session/:id/element/:eid/text", get(element_text))
        .route("/session/:id/element/:eid/displayed", get(element_displayed))
        .route("/session/:id/element/:eid/location", get(element_location))
        // Mouse
        .route("/session/:id/moveto", post(mouse_move_to))
        .route("/session/:id/click", post(mouse_click))
        .route("/session/:id/buttondown", post(mouse_button_down))
        .route("/session/:id/buttonup", post(mouse_button_up))
        .route("/session/:id/doubleclick", post(mouse_double_click))
        // Touch
        .route("/session/:id/touch/down", post(touch_down))
        .route("/session/:id/touch/up", post(touch_up))
        .route("/session/:id/touch/move", post(touch_move))
        .route("/session/:id/touch/scroll", post(touch_scroll))
        .route("/session/:id/touch/doubleclick", post(touch_double_tap))
        .route("/session/:id/touch/longclick", post(touch_long_press))
        .route("/session/:id/touch/flick", post(touch_flick))
        .route("/session/:id/touch/pinch", post(touch_pinch))
        // Alerts
        .route("/session/:id/alert", get(alert_open))
        .route("/session/:id/alert_text", get(alert_text))
        .route("/session/:id/accept_alert", post(accept_alert))
        .route("/session/:id/dismiss_alert", post(dismiss_alert))
        // Logging & emulation
        .route("/session/:id/log", post(get_log))
        .route(
            "/session/:id/network_conditions",
            get(get_network_conditions)
                .post(set_network_conditions)
                .delete(delete_network_conditions),
        )
        .fallback(unknown_command)
        .with_state(state)
}

async fn run(app: &AppState, session_id: String, command: Command) -> WireResponse {
    match app.manager.execute(&session_id, command).await {
        Ok(value) => WireResponse::success(Some(session_id), value),
        Err(e) => WireResponse::failure(Some(session_id), &e),
    }
}

async fn run_parsed(
    app: &AppState,
    session_id: String,
    command: Result<Command>,
) -> WireResponse {
    match command {
        Ok(command) => run(app, session_id, command).await,
        Err(e) => WireResponse::failure(Some(session_id), &e),
    }
}

// --- body field helpers ---------------------------------------------------

fn req_str(body: &Value, key: &str) -> Result<String> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::unknown(format!("missing or non-string '{}'", key)))
}

fn req_i64(body: &Value, key: &str) -> Result<i64> {
    body.get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::unknown(format!("missing or non-integer '{}'", key)))
}

fn req_u64(body: &Value, key: &str) -> Result<u64> {
    body.get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::unknown(format!("missing or non-integer '{}'", key)))
}

fn opt_str(body: &Value, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(str::to_string)
}

fn opt_i64(body: &Value, key: &str) -> Option<i64> {
    body.get(key).and_then(Value::as_i64)
}

fn locator_from(body: &Value) -> Result<Locator> {
    Ok(serde_json::from_value(body.clone())?)
}

fn script_args(body: &Value) -> Result<(String, Vec<Value>)> {
    let script = req_str(body, "script")?;
    let args = body
        .get("args")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Ok((script, args))
}

/// Keystrokes arrive as a list of strings to be typed in order
fn keys_from(body: &Value) -> Result<String> {
    body.get("value")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .concat()
        })
        .ok_or_else(|| Error::unknown("missing or non-list 'value'"))
}

// --- server-scoped handlers ------------------------------------------------

async fn status() -> WireResponse {
    WireResponse::success(
        None,
        serde_json::json!({
            "build": { "version": crate::VERSION },
            "os": { "name": std::env::consts::OS, "arch": std::env::consts::ARCH },
        }),
    )
}

async fn create_session(State(app): State<AppState>, Json(body): Json<Value>) -> WireResponse {
    let desired = body
        .get("desiredCapabilities")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    match app.manager.create_session(&desired) {
        Ok((id, caps)) => WireResponse::success(Some(id), caps),
        Err(e) => WireResponse::failure(None, &e),
    }
}

async fn list_sessions(State(app): State<AppState>) -> WireResponse {
    let sessions: Vec<Value> = app
        .manager
        .list()
        .into_iter()
        .map(|(id, capabilities)| serde_json::json!({ "id": id, "capabilities": capabilities }))
        .collect();
    WireResponse::success(None, Value::Array(sessions))
}

async fn get_capabilities(State(app): State<AppState>, Path(id): Path<String>) -> WireResponse {
    run(&app, id, Command::GetCapabilities).await
}

async fn quit_session(State(app): State<AppState>, Path(id): Path<String>) -> WireResponse {
    match app.manager.quit(&id).await {
        Ok(value) => WireResponse::success(Some(id), value),
        Err(e) => WireResponse::failure(Some(id), &e),
    }
}

async fn unknown_command(uri: Uri) -> WireResponse {
    WireResponse::failure(None, &Error::UnknownCommand(uri.path().to_string()))
}

// --- navigation -------------------------------------------------------------

async fn navigate(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = req_str(&body, "url").map(|url| Command::Navigate { url });
    run_parsed(&app, id, command).await
}

async fn current_url(State(app): State<AppState>, Path(id): Path<String>) -> WireResponse {
    run(&app, id, Command::GetCurrentUrl).await
}

async fn go_back(State(app): State<AppState>, Path(id): Path<String>) -> WireResponse {
    run(&app, id, Command::GoBack).await
}

async fn go_forward(State(app): State<AppState>, Path(id): Path<String>) -> WireResponse {
    run(&app, id, Command::GoForward).await
}

async fn refresh(State(app): State<AppState>, Path(id): Path<String>) -> WireResponse {
    run(&app, id, Command::Refresh).await
}

async fn title(State(app): State<AppState>, Path(id): Path<String>) -> WireResponse {
    run(&app, id, Command::GetTitle).await
}

async fn source(State(app): State<AppState>, Path(id): Path<String>) -> WireResponse {
    run(&app, id, Command::GetPageSource).await
}

// --- windows ---------------------------------------------------------------

async fn window_handle(State(app): State<AppState>, Path(id): Path<String>) -> WireResponse {
    run(&app, id, Command::GetWindowHandle).await
}

async fn window_handles(State(app): State<AppState>, Path(id): Path<String>) -> WireResponse {
    run(&app, id, Command::GetWindowHandles).await
}

async fn switch_window(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = req_str(&body, "name").map(|name| Command::SwitchToWindow { name });
    run_parsed(&app, id, command).await
}

async fn close_window(State(app): State<AppState>, Path(id): Path<String>) -> WireResponse {
    run(&app, id, Command::CloseWindow).await
}

async fn get_window_position(
    State(app): State<AppState>,
    Path((id, win)): Path<(String, String)>,
) -> WireResponse {
    run(&app, id, Command::GetWindowPosition { window: win }).await
}

async fn set_window_position(
    State(app): State<AppState>,
    Path((id, win)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = req_i64(&body, "x").and_then(|x| {
        req_i64(&body, "y").map(|y| Command::SetWindowPosition { window: win, x, y })
    });
    run_parsed(&app, id, command).await
}

async fn get_window_size(
    State(app): State<AppState>,
    Path((id, win)): Path<(String, String)>,
) -> WireResponse {
    run(&app, id, Command::GetWindowSize { window: win }).await
}

async fn set_window_size(
    State(app): State<AppState>,
    Path((id, win)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = req_u64(&body, "width").and_then(|width| {
        req_u64(&body, "height")
            .map(|height| Command::SetWindowSize { window: win, width, height })
    });
    run_parsed(&app, id, command).await
}

async fn maximize_window(
    State(app): State<AppState>,
    Path((id, win)): Path<(String, String)>,
) -> WireResponse {
    run(&app, id, Command::MaximizeWindow { window: win }).await
}

// --- frames ------------------------------------------------------------------

async fn switch_frame(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = FrameLocator::from_value(body.get("id").unwrap_or(&Value::Null))
        .map(|locator| Command::SwitchToFrame { locator });
    run_parsed(&app, id, command).await
}

async fn switch_parent_frame(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> WireResponse {
    run(&app, id, Command::SwitchToParentFrame).await
}

// --- script -------------------------------------------------------------------

async fn execute_script(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = script_args(&body).map(|(script, args)| Command::ExecuteScript { script, args });
    run_parsed(&app, id, command).await
}

async fn execute_async_script(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command =
        script_args(&body).map(|(script, args)| Command::ExecuteAsyncScript { script, args });
    run_parsed(&app, id, command).await
}

async fn set_timeout(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = req_str(&body, "type").and_then(|kind| {
        req_u64(&body, "ms").map(|ms| Command::SetTimeout { kind, ms })
    });
    run_parsed(&app, id, command).await
}

// --- elements -----------------------------------------------------------------

async fn find_element(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = locator_from(&body).map(|locator| Command::FindElement { locator });
    run_parsed(&app, id, command).await
}

async fn find_elements(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = locator_from(&body).map(|locator| Command::FindElements { locator });
    run_parsed(&app, id, command).await
}

async fn find_child_element(
    State(app): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = locator_from(&body)
        .map(|locator| Command::FindChildElement { parent: eid, locator });
    run_parsed(&app, id, command).await
}

async fn find_child_elements(
    State(app): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = locator_from(&body)
        .map(|locator| Command::FindChildElements { parent: eid, locator });
    run_parsed(&app, id, command).await
}

async fn click_element(
    State(app): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
) -> WireResponse {
    run(&app, id, Command::ClickElement { id: eid }).await
}

async fn clear_element(
    State(app): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
) -> WireResponse {
    run(&app, id, Command::ClearElement { id: eid }).await
}

async fn send_keys(
    State(app): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = keys_from(&body).map(|keys| Command::SendKeys { id: eid, keys });
    run_parsed(&app, id, command).await
}

async fn element_text(
    State(app): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
) -> WireResponse {
    run(&app, id, Command::GetElementText { id: eid }).await
}

async fn element_displayed(
    State(app): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
) -> WireResponse {
    run(&app, id, Command::IsElementDisplayed { id: eid }).await
}

async fn element_location(
    State(app): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
) -> WireResponse {
    run(&app, id, Command::GetElementLocation { id: eid }).await
}

// --- mouse ---------------------------------------------------------------------

async fn mouse_move_to(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = Command::MouseMoveTo {
        element: opt_str(&body, "element"),
        xoffset: opt_i64(&body, "xoffset"),
        yoffset: opt_i64(&body, "yoffset"),
    };
    run(&app, id, command).await
}

fn button_from(body: &Value) -> u64 {
    body.get("button").and_then(Value::as_u64).unwrap_or(0)
}

async fn mouse_click(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    run(&app, id, Command::MouseClick { button: button_from(&body) }).await
}

async fn mouse_button_down(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    run(&app, id, Command::MouseButtonDown { button: button_from(&body) }).await
}

async fn mouse_button_up(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    run(&app, id, Command::MouseButtonUp { button: button_from(&body) }).await
}

async fn mouse_double_click(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> WireResponse {
    run(&app, id, Command::MouseDoubleClick).await
}

// --- touch ------------------------------------------------------------------------

async fn touch_down(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = req_i64(&body, "x")
        .and_then(|x| req_i64(&body, "y").map(|y| Command::TouchDown { x, y }));
    run_parsed(&app, id, command).await
}

async fn touch_up(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = req_i64(&body, "x")
        .and_then(|x| req_i64(&body, "y").map(|y| Command::TouchUp { x, y }));
    run_parsed(&app, id, command).await
}

async fn touch_move(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = req_i64(&body, "x")
        .and_then(|x| req_i64(&body, "y").map(|y| Command::TouchMove { x, y }));
    run_parsed(&app, id, command).await
}

async fn touch_scroll(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = req_i64(&body, "xoffset").and_then(|xoffset| {
        req_i64(&body, "yoffset").map(|yoffset| Command::TouchScroll {
            element: opt_str(&body, "element"),
            xoffset,
            yoffset,
        })
    });
    run_parsed(&app, id, command).await
}

async fn touch_double_tap(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = req_str(&body, "element").map(|element| Command::TouchDoubleTap { element });
    run_parsed(&app, id, command).await
}

async fn touch_long_press(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = req_str(&body, "element").map(|element| Command::TouchLongPress { element });
    run_parsed(&app, id, command).await
}

async fn touch_flick(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = req_i64(&body, "xoffset").and_then(|xoffset| {
        req_i64(&body, "yoffset").and_then(|yoffset| {
            req_u64(&body, "speed").map(|speed| Command::TouchFlick {
                element: opt_str(&body, "element"),
                xoffset,
                yoffset,
                speed,
            })
        })
    });
    run_parsed(&app, id, command).await
}

async fn touch_pinch(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = req_i64(&body, "x").and_then(|x| {
        req_i64(&body, "y").and_then(|y| {
            body.get("scale")
                .and_then(Value::as_f64)
                .ok_or_else(|| Error::unknown("missing or non-numeric 'scale'"))
                .map(|scale| Command::TouchPinch { x, y, scale })
        })
    });
    run_parsed(&app, id, command).await
}

// --- alerts ---------------------------------------------------------------------

async fn alert_open(State(app): State<AppState>, Path(id): Path<String>) -> WireResponse {
    run(&app, id, Command::IsAlertOpen).await
}

async fn alert_text(State(app): State<AppState>, Path(id): Path<String>) -> WireResponse {
    run(&app, id, Command::GetAlertText).await
}

async fn accept_alert(State(app): State<AppState>, Path(id): Path<String>) -> WireResponse {
    run(&app, id, Command::AcceptAlert).await
}

async fn dismiss_alert(State(app): State<AppState>, Path(id): Path<String>) -> WireResponse {
    run(&app, id, Command::DismissAlert).await
}

// --- logging & emulation ----------------------------------------------------------

async fn get_log(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    let command = req_str(&body, "type").map(|log_type| Command::GetLog { log_type });
    run_parsed(&app, id, command).await
}

async fn get_network_conditions(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> WireResponse {
    run(&app, id, Command::GetNetworkConditions).await
}

async fn set_network_conditions(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> WireResponse {
    run(&app, id, Command::SetNetworkConditions { body }).await
}

async fn delete_network_conditions(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> WireResponse {
    run(&app, id, Command::DeleteNetworkConditions).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_concatenate_in_order() {
        let body = serde_json::json!({ "value": ["0123", "4567", "", "89"] });
        assert_eq!(keys_from(&body).unwrap(), "0123456789");
        assert!(keys_from(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_locator_body_parses() {
        let body = serde_json::json!({ "using": "id", "value": "link" });
        let locator = locator_from(&body).unwrap();
        assert_eq!(locator.using, "id");
        assert_eq!(locator.value, "link");
    }

    #[test]
    fn test_missing_field_errors_name_the_key() {
        let err = req_str(&serde_json::json!({}), "url").unwrap_err();
        assert!(err.to_string().contains("'url'"));
        let err = req_i64(&serde_json::json!({"x": "nope"}), "x").unwrap_err();
        assert!(err.to_string().contains("'x'"));
    }
}
