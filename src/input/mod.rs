//! Input event synthesis
//!
//! Gestures are expanded into the primitive event sequences a human gesture
//! would produce, then dispatched through the backend so page-level listeners
//! observe them in order.

use crate::{Error, Result};

/// Touch move events emitted per second during a flick
pub const FLICK_TOUCH_EVENTS_PER_SECOND: f64 = 30.0;

/// Mouse buttons as numbered on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl MouseButton {
    pub fn from_wire(button: u64) -> Result<Self> {
        match button {
            0 => Ok(MouseButton::Left),
            1 => Ok(MouseButton::Middle),
            2 => Ok(MouseButton::Right),
            other => Err(Error::unknown(format!("invalid mouse button: {}", other))),
        }
    }
}

/// A primitive input event as seen by page listeners
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    MouseMove { x: i64, y: i64 },
    MouseDown { button: MouseButton },
    MouseUp { button: MouseButton },
    Click { button: MouseButton },
    DoubleClick,
    ContextMenu,
    TouchStart { x: i64, y: i64 },
    TouchMove { x: i64, y: i64 },
    TouchEnd { x: i64, y: i64 },
    TouchCancel,
}

impl InputEvent {
    /// DOM event name page listeners receive
    pub fn dom_name(&self) -> &'static str {
        match self {
            InputEvent::MouseMove { .. } => "mouseover",
            InputEvent::MouseDown { .. } => "mousedown",
            InputEvent::MouseUp { .. } => "mouseup",
            InputEvent::Click { .. } => "click",
            InputEvent::DoubleClick => "dblclick",
            InputEvent::ContextMenu => "contextmenu",
            InputEvent::TouchStart { .. } => "touchstart",
            InputEvent::TouchMove { .. } => "touchmove",
            InputEvent::TouchEnd { .. } => "touchend",
            InputEvent::TouchCancel => "touchcancel",
        }
    }
}

/// Click expands to down, up, click (plus contextmenu for the right button)
pub fn click_events(button: MouseButton) -> Vec<InputEvent> {
    let mut events = vec![
        InputEvent::MouseDown { button },
        InputEvent::MouseUp { button },
        InputEvent::Click { button },
    ];
    if button == MouseButton::Right {
        events.push(InputEvent::ContextMenu);
    }
    events
}

pub fn double_click_events() -> Vec<InputEvent> {
    let mut events = click_events(MouseButton::Left);
    events.extend(click_events(MouseButton::Left));
    events.push(InputEvent::DoubleClick);
    events
}

/// Single tap: touchstart then touchend at the same point
pub fn single_tap_events(x: i64, y: i64) -> Vec<InputEvent> {
    vec![InputEvent::TouchStart { x, y }, InputEvent::TouchEnd { x, y }]
}

pub fn double_tap_events(x: i64, y: i64) -> Vec<InputEvent> {
    let mut events = single_tap_events(x, y);
    events.extend(single_tap_events(x, y));
    events
}

/// Long press: the gesture is cancelled rather than ended
pub fn long_press_events(x: i64, y: i64) -> Vec<InputEvent> {
    vec![InputEvent::TouchStart { x, y }, InputEvent::TouchCancel]
}

/// Flick from (x, y) along (dx, dy) at `speed` pixels per second.
///
/// Emits touchstart, then `floor(distance * event_rate / speed)` touchmove
/// events spaced evenly along the vector, then touchend at the end point.
pub fn flick_events(x: i64, y: i64, dx: i64, dy: i64, speed: u64) -> Result<Vec<InputEvent>> {
    if speed == 0 {
        return Err(Error::unknown("flick speed must be positive"));
    }
    let distance = ((dx * dx + dy * dy) as f64).sqrt();
    let move_count = (distance * FLICK_TOUCH_EVENTS_PER_SECOND / speed as f64) as i64;

    let mut events = Vec::with_capacity(move_count as usize + 2);
    events.push(InputEvent::TouchStart { x, y });
    for i in 1..=move_count {
        events.push(InputEvent::TouchMove {
            x: x + dx * i / move_count.max(1),
            y: y + dy * i / move_count.max(1),
        });
    }
    events.push(InputEvent::TouchEnd { x: x + dx, y: y + dy });
    Ok(events)
}

/// Touch scroll: a short drag from the anchor point by (dx, dy)
pub fn scroll_events(x: i64, y: i64, dx: i64, dy: i64) -> Vec<InputEvent> {
    vec![
        InputEvent::TouchStart { x, y },
        InputEvent::TouchMove { x: x + dx, y: y + dy },
        InputEvent::TouchEnd { x: x + dx, y: y + dy },
    ]
}
