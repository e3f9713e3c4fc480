//! In-memory simulated browser backend
//!
//! Implements the [`Browser`]/[`WebView`] seam without a real renderer: each
//! window carries a small document tree (frames + element nodes), scripts are
//! pattern-matched against the shapes automation clients actually send, and
//! input events are applied to the tree. Plausible-but-canned behavior,
//! deterministic for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use crate::input::InputEvent;
use crate::logging::{LogBuffers, LogEntry, LogLevel, LogType};
use crate::protocol::command::{element_handle, element_reference};
use crate::protocol::FrameLocator;
use crate::webview::traits::{Browser, DeviceMetrics, LaunchOptions, WebView};
use crate::{Error, Result};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Xwalk/42.0.2307.2 Safari/537.36";

const CRASH_URL: &str = "xwalk://crash";

/// Body markup every freshly navigated document starts with. Covers the
/// shapes commands address: findable elements, a `_blank` link, a text input,
/// touch-event recorders, a two-level frame tree, and two shadow hosts.
const DEFAULT_BODY: &str = r#"<p>One</p><div id="page">a</div><div>b</div><a id="link" target="_blank">Link to empty.html</a><input id="textbox" name="textbox"><div id="events">events:</div><iframe id="subframe" name="sub"><p>Two</p><div id="subevents">events:</div><iframe id="inner" name="innerframe"><p>Three</p></iframe></iframe><div id="outerDiv"><div id="olderChildDiv"><template shadowrootmode="open"><h4 id="olderHeading">Older Child</h4><input id="olderTextBox" value="foo"><button id="olderButton">Click</button></template></div><div id="youngerChildDiv"><template shadowrootmode="open"><input id="youngerTextBox" value="bar"></template></div></div>"#;

/// Simulated screen, used as the maximized window bounds
const SCREEN_SIZE: (u64, u64) = (1920, 1080);

fn stale() -> Error {
    Error::stale_element("element is not attached to the page document")
}

// ---------------------------------------------------------------------------
// Document model

#[derive(Debug, Clone)]
struct ElementNode {
    handle: String,
    tag: String,
    id_attr: Option<String>,
    name_attr: Option<String>,
    target_attr: Option<String>,
    parent: Option<String>,
    /// Handle of the host element whose shadow tree contains this node
    shadow_host: Option<String>,
    text: String,
    value: String,
    displayed: bool,
    removed: bool,
    location: (i64, i64),
}

#[derive(Debug, Clone)]
struct Frame {
    id: String,
    /// Handle of the owning iframe element in the parent frame
    element_handle: Option<String>,
    elements: Vec<ElementNode>,
    children: Vec<Frame>,
}

impl Frame {
    fn new(element_handle: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            element_handle,
            elements: Vec::new(),
            children: Vec::new(),
        }
    }

    fn by_chain(&self, chain: &[String]) -> Option<&Frame> {
        let mut frame = self;
        for id in chain {
            frame = frame.children.iter().find(|f| &f.id == id)?;
        }
        Some(frame)
    }

    fn by_chain_mut(&mut self, chain: &[String]) -> Option<&mut Frame> {
        let mut frame = self;
        for id in chain {
            frame = frame.children.iter_mut().find(|f| &f.id == id)?;
        }
        Some(frame)
    }

    fn node(&self, handle: &str) -> Option<&ElementNode> {
        if let Some(node) = self.elements.iter().find(|e| e.handle == handle) {
            return Some(node);
        }
        self.children.iter().find_map(|f| f.node(handle))
    }

    fn node_mut(&mut self, handle: &str) -> Option<&mut ElementNode> {
        if let Some(index) = self.elements.iter().position(|e| e.handle == handle) {
            return self.elements.get_mut(index);
        }
        self.children.iter_mut().find_map(|f| f.node_mut(handle))
    }

    fn render(&self) -> String {
        let mut body = String::new();
        for element in self
            .elements
            .iter()
            .filter(|e| !e.removed && e.shadow_host.is_none())
        {
            body.push_str(&format!("<{}>{}</{}>", element.tag, element.text, element.tag));
        }
        format!("<html><body>{}</body></html>", body)
    }
}

// ---------------------------------------------------------------------------
// Tiny markup parser for canned documents and innerHTML replacements

const VOID_TAGS: &[&str] = &["br", "input", "hr", "img", "meta"];

struct MarkupParser<'a> {
    src: &'a str,
    pos: usize,
    row: i64,
}

impl<'a> MarkupParser<'a> {
    fn parse(html: &'a str) -> Frame {
        let mut root = Frame::new(None);
        let mut parser = MarkupParser { src: html, pos: 0, row: 0 };
        parser.parse_children(&mut root, None, None);
        root
    }

    fn parse_children(
        &mut self,
        frame: &mut Frame,
        parent: Option<String>,
        shadow: Option<String>,
    ) {
        loop {
            let rest = &self.src[self.pos..];
            let Some(lt) = rest.find('<') else {
                self.append_text(frame, &parent, rest);
                self.pos = self.src.len();
                return;
            };
            self.append_text(frame, &parent, &rest[..lt]);
            self.pos += lt;

            if self.src[self.pos..].starts_with("</") {
                // Closing tag of the enclosing element
                if let Some(gt) = self.src[self.pos..].find('>') {
                    self.pos += gt + 1;
                }
                return;
            }

            let Some(gt) = self.src[self.pos..].find('>') else {
                self.pos = self.src.len();
                return;
            };
            let tag_body = &self.src[self.pos + 1..self.pos + gt];
            self.pos += gt + 1;

            let tag = tag_body
                .split_whitespace()
                .next()
                .unwrap_or("")
                .trim_end_matches('/')
                .to_ascii_lowercase();

            // Declarative shadow root: the template itself is not an element;
            // its children attach to the enclosing host's shadow tree.
            if tag == "template" && tag_body.contains("shadowroot") {
                self.parse_children(frame, None, parent.clone());
                continue;
            }

            let node = ElementNode {
                handle: uuid::Uuid::new_v4().to_string(),
                tag: tag.clone(),
                id_attr: attr(tag_body, "id"),
                name_attr: attr(tag_body, "name"),
                target_attr: attr(tag_body, "target"),
                parent: parent.clone(),
                shadow_host: shadow.clone(),
                text: String::new(),
                value: attr(tag_body, "value").unwrap_or_default(),
                displayed: true,
                removed: false,
                location: (0, self.row * 20),
            };
            self.row += 1;
            let handle = node.handle.clone();
            frame.elements.push(node);

            if tag == "iframe" {
                let mut child = Frame::new(Some(handle));
                self.parse_children(&mut child, None, None);
                frame.children.push(child);
            } else if !VOID_TAGS.contains(&tag.as_str()) && !tag_body.ends_with('/') {
                self.parse_children(frame, Some(handle), shadow.clone());
            }
        }
    }

    fn append_text(&self, frame: &mut Frame, parent: &Option<String>, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(handle) = parent {
            if let Some(node) = frame.node_mut(handle) {
                node.text.push_str(text);
            }
        }
    }
}

fn attr(tag_body: &str, name: &str) -> Option<String> {
    let marker = format!("{}=\"", name);
    let start = tag_body.find(&marker)? + marker.len();
    let end = tag_body[start..].find('"')?;
    Some(tag_body[start..start + end].to_string())
}

/// First quoted literal (single or double quotes) in a script fragment
fn quoted(fragment: &str) -> Option<String> {
    let open = fragment.find(['\'', '"'])?;
    let quote = fragment.as_bytes()[open] as char;
    let rest = &fragment[open + 1..];
    let close = rest.find(quote)?;
    Some(rest[..close].to_string())
}

// ---------------------------------------------------------------------------
// Window

#[derive(Debug)]
struct PendingAlert {
    message: String,
    /// `window.<var>` to receive the accept/dismiss result
    var: Option<String>,
}

#[derive(Debug)]
struct ViewState {
    url: String,
    title: String,
    name: String,
    epoch: u64,
    document: Frame,
    history: Vec<String>,
    history_pos: usize,
    alert: Option<PendingAlert>,
    vars: HashMap<String, Value>,
    scroll: (i64, i64),
    pointer: (i64, i64),
    inner_size: (f64, f64),
    position: (i64, i64),
    size: (u64, u64),
}

/// One simulated window/tab
pub struct SimWebView {
    handle: String,
    browser: Weak<SimBrowser>,
    state: RwLock<ViewState>,
}

impl std::fmt::Debug for SimWebView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimWebView").field("handle", &self.handle).finish()
    }
}

impl SimWebView {
    fn new(browser: Weak<SimBrowser>) -> Arc<Self> {
        Arc::new(Self {
            handle: uuid::Uuid::new_v4().to_string(),
            browser,
            state: RwLock::new(ViewState {
                url: "data:,".to_string(),
                title: String::new(),
                name: String::new(),
                epoch: 1,
                document: MarkupParser::parse(DEFAULT_BODY),
                history: vec!["data:,".to_string()],
                history_pos: 0,
                alert: None,
                vars: HashMap::new(),
                scroll: (0, 0),
                pointer: (0, 0),
                inner_size: (SCREEN_SIZE.0 as f64, SCREEN_SIZE.1 as f64),
                position: (0, 0),
                size: (800, 600),
            }),
        })
    }

    fn browser(&self) -> Result<Arc<SimBrowser>> {
        self.browser
            .upgrade()
            .filter(|b| b.is_alive())
            .ok_or_else(|| Error::unknown("session deleted because of page crash"))
    }

    fn state(&self) -> std::sync::RwLockReadGuard<'_, ViewState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn state_mut(&self) -> std::sync::RwLockWriteGuard<'_, ViewState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn load(&self, url: &str, push_history: bool) -> Result<()> {
        let browser = self.browser()?;
        if url == CRASH_URL {
            browser.crash();
            return Err(Error::unknown("session deleted because of page crash"));
        }

        {
            let mut state = self.state_mut();
            state.epoch += 1;
            state.document = MarkupParser::parse(DEFAULT_BODY);
            state.url = url.to_string();
            state.title = String::new();
            state.alert = None;
            state.scroll = (0, 0);
            if push_history {
                let pos = state.history_pos;
                state.history.truncate(pos + 1);
                state.history.push(url.to_string());
                state.history_pos += 1;
            }
        }

        browser.logs.append_performance_event(
            "Network.requestWillBeSent",
            serde_json::json!({ "request": { "url": url } }),
        );
        browser
            .logs
            .append_performance_event("Page.loadEventFired", serde_json::json!({}));

        // The simulated server 404s resources it has never heard of.
        if url.contains("nonexistent") {
            browser.append_browser_log(
                LogLevel::Severe,
                "network",
                format!(
                    "{} - Failed to load resource: the server responded with a status of 404 (Not Found)",
                    url
                ),
            );
        }
        if url.contains("console_error") {
            browser.append_browser_log(
                LogLevel::Severe,
                "javascript",
                format!("{} 1 Uncaught TypeError: undefined is not a function", url),
            );
        }
        Ok(())
    }

    fn checked_node<'a>(&self, state: &'a ViewState, handle: &str) -> Result<&'a ElementNode> {
        match state.document.node(handle) {
            Some(node) if !node.removed => Ok(node),
            _ => Err(stale()),
        }
    }

    /// Replace the body of the chain's frame, detaching its current subtree
    fn replace_inner_html(&self, chain: &[String], html: &str) -> Result<()> {
        let mut state = self.state_mut();
        let frame = state
            .document
            .by_chain_mut(chain)
            .ok_or_else(|| Error::no_such_frame("frame does not exist"))?;
        for element in frame.elements.iter_mut() {
            element.removed = true;
        }
        let detached: Vec<ElementNode> =
            frame.elements.drain(..).collect();
        let replacement = MarkupParser::parse(html);
        frame.children = replacement.children;
        frame.elements = replacement.elements;
        // Detached nodes stay addressable so later operations fail as stale
        // rather than vanishing.
        frame.elements.extend(detached);
        Ok(())
    }

    fn eval_statement(&self, chain: &[String], statement: &str, args: &[Value]) -> Result<Option<Value>> {
        let stmt = statement.trim();
        if stmt.is_empty() {
            return Ok(None);
        }

        if let Some(expr) = stmt.strip_prefix("return") {
            return self.eval_expression(chain, expr.trim(), args).map(Some);
        }

        if let Some(rest) = stmt.strip_prefix("document.title =") {
            if let Some(title) = quoted(rest) {
                self.state_mut().title = title;
            }
            return Ok(None);
        }

        if let Some(rest) = stmt.strip_prefix("window.name =") {
            if let Some(name) = quoted(rest) {
                self.state_mut().name = name;
            }
            return Ok(None);
        }

        if let Some(rest) = stmt.strip_prefix("document.body.innerHTML =") {
            if let Some(html) = quoted(rest) {
                self.replace_inner_html(chain, &html)?;
            }
            return Ok(None);
        }

        if stmt.contains("console.error(") || stmt.contains("console.warn(")
            || stmt.contains("console.info(") || stmt.contains("console.log(")
        {
            let browser = self.browser()?;
            let level = if stmt.contains("console.error(") {
                LogLevel::Severe
            } else if stmt.contains("console.warn(") {
                LogLevel::Warning
            } else {
                LogLevel::Info
            };
            let message = quoted(stmt).unwrap_or_default();
            browser.append_browser_log(level, "javascript", message);
            return Ok(None);
        }

        if stmt.contains("console.time(") || stmt.contains("console.timeEnd(") {
            let browser = self.browser()?;
            let name = quoted(stmt).unwrap_or_default();
            let category = browser.trace_categories.first().cloned().unwrap_or_default();
            browser.logs.append_performance_event(
                "Tracing.dataCollected",
                serde_json::json!({ "cat": category, "name": name }),
            );
            return Ok(None);
        }

        if stmt.contains("window.open(") {
            let browser = self.browser()?;
            browser.open_window("");
            return Ok(None);
        }

        if stmt.contains("confirm(") || stmt.contains("alert(") {
            let message = quoted(stmt).unwrap_or_default();
            let var = stmt
                .split('=')
                .next()
                .map(str::trim)
                .filter(|lhs| lhs.starts_with("window.") && !lhs.contains('('))
                .map(|lhs| lhs.trim_start_matches("window.").to_string());
            self.state_mut().alert = Some(PendingAlert { message, var });
            return Ok(None);
        }

        // Listener installation and other side-effect-free statements are
        // accepted silently.
        Ok(None)
    }

    fn eval_expression(&self, chain: &[String], expr: &str, args: &[Value]) -> Result<Value> {
        let expr = expr.trim().trim_end_matches(';').trim();
        if expr.is_empty() {
            return Ok(Value::Null);
        }

        match expr {
            "window.top == window" => return Ok(Value::Bool(chain.is_empty())),
            "window.top != window" => return Ok(Value::Bool(!chain.is_empty())),
            "document.title" => return Ok(Value::String(self.state().title.clone())),
            "window.location.href" => return Ok(Value::String(self.state().url.clone())),
            "window.name" => return Ok(Value::String(self.state().name.clone())),
            "document.body.scrollLeft" => return Ok(Value::from(self.state().scroll.0)),
            "document.body.scrollTop" => return Ok(Value::from(self.state().scroll.1)),
            "window.innerWidth" => return Ok(Value::from(self.state().inner_size.0 as i64)),
            "window.innerHeight" => return Ok(Value::from(self.state().inner_size.1 as i64)),
            _ => {}
        }

        if expr == "window.screen.width" || expr == "window.screen.height" {
            let browser = self.browser()?;
            let state = self.state();
            let (width, height) = match &browser.device {
                Some(metrics) => (metrics.width as i64, metrics.height as i64),
                None => (state.inner_size.0 as i64, state.inner_size.1 as i64),
            };
            return Ok(Value::from(if expr.ends_with("width") { width } else { height }));
        }

        if expr == "navigator.userAgent" {
            let browser = self.browser()?;
            let agent = browser
                .device
                .as_ref()
                .and_then(|m| m.user_agent.clone())
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
            return Ok(Value::String(agent));
        }

        if let Some(rest) = expr.strip_prefix("arguments[") {
            let close = rest.find(']').ok_or_else(|| Error::javascript("malformed arguments access"))?;
            let index: usize = rest[..close]
                .parse()
                .map_err(|_| Error::javascript("malformed arguments index"))?;
            let arg = args
                .get(index)
                .ok_or_else(|| Error::javascript(format!("arguments[{}] is undefined", index)))?;
            let tail = &rest[close + 1..];
            if tail.starts_with(".value") {
                let handle = element_handle(arg)
                    .ok_or_else(|| Error::javascript("argument is not an element"))?;
                let state = self.state();
                return Ok(Value::String(self.checked_node(&state, &handle)?.value.clone()));
            }
            return Ok(arg.clone());
        }

        if let Some(rest) = expr.strip_prefix("document.getElementsByTagName(") {
            let tag = quoted(rest).ok_or_else(|| Error::javascript("malformed tag lookup"))?;
            let state = self.state();
            let frame = state
                .document
                .by_chain(chain)
                .ok_or_else(|| Error::no_such_frame("frame does not exist"))?;
            let found = frame
                .elements
                .iter()
                .find(|e| !e.removed && e.tag.eq_ignore_ascii_case(&tag))
                .ok_or_else(|| Error::javascript(format!("no <{}> in document", tag)))?;
            return Ok(element_reference(&found.handle));
        }

        if let Some(var) = expr.strip_prefix("window.") {
            if var.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Ok(self.state().vars.get(var).cloned().unwrap_or(Value::Null));
            }
        }

        // Literals: JSON directly, or a quoted JS string
        if let Ok(value) = serde_json::from_str::<Value>(expr) {
            return Ok(value);
        }
        if let Some(text) = quoted(expr) {
            if expr.starts_with('\'') || expr.starts_with('"') {
                return Ok(Value::String(text));
            }
        }
        Ok(Value::Null)
    }

    fn check_args(&self, args: &[Value]) -> Result<()> {
        let state = self.state();
        for arg in args {
            if let Some(handle) = element_handle(arg) {
                self.checked_node(&state, &handle)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WebView for SimWebView {
    fn handle(&self) -> &str {
        &self.handle
    }

    fn window_name(&self) -> String {
        self.state().name.clone()
    }

    fn url(&self) -> String {
        self.state().url.clone()
    }

    fn title(&self) -> String {
        self.state().title.clone()
    }

    fn window_position(&self) -> Result<(i64, i64)> {
        Ok(self.state().position)
    }

    fn set_window_position(&self, x: i64, y: i64) -> Result<()> {
        self.state_mut().position = (x, y);
        Ok(())
    }

    fn window_size(&self) -> Result<(u64, u64)> {
        Ok(self.state().size)
    }

    fn set_window_size(&self, width: u64, height: u64) -> Result<()> {
        self.state_mut().size = (width, height);
        Ok(())
    }

    fn maximize(&self) -> Result<()> {
        let mut state = self.state_mut();
        state.position = (0, 0);
        state.size = SCREEN_SIZE;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.load(url, true)
    }

    async fn reload(&self) -> Result<()> {
        let url = self.state().url.clone();
        self.load(&url, false)
    }

    async fn go_back(&self) -> Result<()> {
        let target = {
            let mut state = self.state_mut();
            if state.history_pos == 0 {
                return Ok(());
            }
            state.history_pos -= 1;
            state.history[state.history_pos].clone()
        };
        self.load(&target, false)
    }

    async fn go_forward(&self) -> Result<()> {
        let target = {
            let mut state = self.state_mut();
            if state.history_pos + 1 >= state.history.len() {
                return Ok(());
            }
            state.history_pos += 1;
            state.history[state.history_pos].clone()
        };
        self.load(&target, false)
    }

    fn source(&self, chain: &[String]) -> Result<String> {
        let state = self.state();
        state
            .document
            .by_chain(chain)
            .map(Frame::render)
            .ok_or_else(|| Error::no_such_frame("frame does not exist"))
    }

    fn document_epoch(&self) -> u64 {
        self.state().epoch
    }

    fn validate_chain(&self, chain: &[String]) -> Result<()> {
        let state = self.state();
        state
            .document
            .by_chain(chain)
            .map(|_| ())
            .ok_or_else(|| Error::no_such_frame("frame does not exist"))
    }

    fn child_frame(&self, chain: &[String], locator: &FrameLocator) -> Result<String> {
        let state = self.state();
        let frame = state
            .document
            .by_chain(chain)
            .ok_or_else(|| Error::no_such_frame("frame does not exist"))?;

        let child = match locator {
            FrameLocator::Top => return Err(Error::no_such_frame("top frame is not a child")),
            FrameLocator::Index(index) => frame.children.get(*index as usize),
            FrameLocator::IdOrName(key) => frame.children.iter().find(|child| {
                child
                    .element_handle
                    .as_deref()
                    .and_then(|h| frame.elements.iter().find(|e| e.handle == h))
                    .map(|e| {
                        e.id_attr.as_deref() == Some(key.as_str())
                            || e.name_attr.as_deref() == Some(key.as_str())
                    })
                    .unwrap_or(false)
            }),
            FrameLocator::Element(handle) => {
                self.checked_node(&state, handle)?;
                frame
                    .children
                    .iter()
                    .find(|child| child.element_handle.as_deref() == Some(handle.as_str()))
            }
        };

        child
            .map(|c| c.id.clone())
            .ok_or_else(|| Error::no_such_frame("frame does not exist"))
    }

    fn find_elements(
        &self,
        chain: &[String],
        root: Option<&str>,
        strategy: &str,
        value: &str,
    ) -> Result<Vec<String>> {
        if let Some(root) = root {
            let state = self.state();
            self.checked_node(&state, root)?;
        }
        let state = self.state();
        let frame = state
            .document
            .by_chain(chain)
            .ok_or_else(|| Error::no_such_frame("frame does not exist"))?;

        // css selectors combined with /deep/ pierce shadow roots; the
        // effective selector is the segment after the last combinator.
        let css = matches!(strategy, "css selector" | "css");
        let deep = css && value.contains("/deep/");
        let selector = if deep {
            value.rsplit("/deep/").next().unwrap_or(value).trim()
        } else {
            value
        };

        let matches_strategy = |e: &ElementNode| -> Result<bool> {
            Ok(match strategy {
                "id" => e.id_attr.as_deref() == Some(selector),
                "name" => e.name_attr.as_deref() == Some(selector),
                "tag name" | "tagName" => e.tag.eq_ignore_ascii_case(selector),
                "css selector" | "css" => {
                    if selector == "*" {
                        true
                    } else if let Some(id) = selector.strip_prefix('#') {
                        e.id_attr.as_deref() == Some(id)
                    } else {
                        e.tag.eq_ignore_ascii_case(selector)
                    }
                }
                other => {
                    return Err(Error::unknown(format!("invalid locator strategy: {}", other)))
                }
            })
        };

        let mut found = Vec::new();
        for element in frame.elements.iter().filter(|e| !e.removed) {
            // Shadow trees are opaque: reachable only via /deep/, or from
            // their own host in a child search.
            let in_scope = if deep {
                true
            } else if let Some(root) = root {
                element.parent.as_deref() == Some(root)
                    || element.shadow_host.as_deref() == Some(root)
            } else {
                element.shadow_host.is_none()
            };
            if in_scope && matches_strategy(element)? {
                found.push(element.handle.clone());
            }
        }
        Ok(found)
    }

    fn check_element(&self, handle: &str) -> Result<()> {
        let state = self.state();
        self.checked_node(&state, handle).map(|_| ())
    }

    fn element_text(&self, handle: &str) -> Result<String> {
        let state = self.state();
        Ok(self.checked_node(&state, handle)?.text.trim().to_string())
    }

    fn element_displayed(&self, handle: &str) -> Result<bool> {
        let state = self.state();
        Ok(self.checked_node(&state, handle)?.displayed)
    }

    fn element_location(&self, handle: &str) -> Result<(i64, i64)> {
        let state = self.state();
        Ok(self.checked_node(&state, handle)?.location)
    }

    async fn click_element(&self, handle: &str) -> Result<()> {
        let opens_window = {
            let state = self.state();
            let node = self.checked_node(&state, handle)?;
            node.tag == "a" && node.target_attr.as_deref() == Some("_blank")
        };
        if opens_window {
            self.browser()?.open_window("");
        }
        Ok(())
    }

    fn element_send_keys(&self, handle: &str, keys: &str) -> Result<()> {
        let mut state = self.state_mut();
        match state.document.node_mut(handle) {
            Some(node) if !node.removed => {
                node.value.push_str(keys);
                // change fires once the value settles
                if node.text.starts_with("events:") {
                    node.text.push_str(" change");
                }
                Ok(())
            }
            _ => Err(stale()),
        }
    }

    fn element_clear(&self, handle: &str) -> Result<()> {
        let mut state = self.state_mut();
        match state.document.node_mut(handle) {
            Some(node) if !node.removed => {
                node.value.clear();
                Ok(())
            }
            _ => Err(stale()),
        }
    }

    async fn dispatch_input(
        &self,
        chain: &[String],
        target: Option<&str>,
        events: &[InputEvent],
    ) -> Result<()> {
        self.browser()?;
        let mut opens_window = false;
        {
            let mut state = self.state_mut();
            state
                .document
                .by_chain(chain)
                .ok_or_else(|| Error::no_such_frame("frame does not exist"))?;

            for event in events {
                // Events carrying coordinates move the pointer; the rest
                // (clicks, button transitions, cancels) land wherever the
                // pointer currently is.
                let point = match event {
                    InputEvent::MouseMove { x, y }
                    | InputEvent::TouchStart { x, y }
                    | InputEvent::TouchMove { x, y }
                    | InputEvent::TouchEnd { x, y } => Some((*x, *y)),
                    _ => None,
                };
                if let Some(point) = point {
                    state.pointer = point;
                }
                let handle = match target {
                    Some(handle) => Some(handle.to_string()),
                    None => {
                        // Hit-test against element rows of the targeted frame
                        let (_, y) = point.unwrap_or(state.pointer);
                        state.document.by_chain(chain).and_then(|frame| {
                            frame
                                .elements
                                .iter()
                                .find(|e| {
                                    !e.removed && y >= e.location.1 && y < e.location.1 + 20
                                })
                                .map(|e| e.handle.clone())
                        })
                    }
                };
                let Some(handle) = handle else { continue };
                let Some(node) = state.document.node_mut(&handle) else {
                    return Err(stale());
                };
                if node.removed {
                    return Err(stale());
                }
                // The canned event-recorder node mirrors received events into
                // its text, the way harness pages do with listeners.
                if node.text.starts_with("events:") {
                    node.text.push(' ');
                    node.text.push_str(event.dom_name());
                }
                if matches!(event, InputEvent::Click { .. })
                    && node.tag == "a"
                    && node.target_attr.as_deref() == Some("_blank")
                {
                    opens_window = true;
                }
            }
        }
        if opens_window {
            self.browser()?.open_window("");
        }
        Ok(())
    }

    fn scroll_by(&self, dx: i64, dy: i64) -> Result<()> {
        let mut state = self.state_mut();
        state.scroll.0 = (state.scroll.0 + dx).max(0);
        state.scroll.1 = (state.scroll.1 + dy).max(0);
        Ok(())
    }

    fn pinch_zoom(&self, scale: f64) -> Result<()> {
        if scale <= 0.0 {
            return Err(Error::unknown("pinch scale must be positive"));
        }
        let mut state = self.state_mut();
        state.inner_size.0 /= scale;
        state.inner_size.1 /= scale;
        Ok(())
    }

    async fn evaluate(&self, chain: &[String], script: &str, args: &[Value]) -> Result<Value> {
        self.browser()?;
        self.validate_chain(chain)?;
        self.check_args(args)?;

        let script = script.trim();
        if script.is_empty() {
            return Ok(Value::Null);
        }
        let opens = script.matches('{').count();
        let closes = script.matches('}').count();
        if opens != closes {
            return Err(Error::javascript("Unexpected token '{'"));
        }

        for statement in script.split(';') {
            if let Some(value) = self.eval_statement(chain, statement, args)? {
                return Ok(value);
            }
        }
        Ok(Value::Null)
    }

    async fn evaluate_async(&self, chain: &[String], script: &str, args: &[Value]) -> Result<Value> {
        self.browser()?;
        self.validate_chain(chain)?;
        self.check_args(args)?;

        // The completion callback is supplied as the final script argument;
        // clients invoke it directly or via setTimeout.
        let Some(call) = script.find("callback(") else {
            return futures::future::pending().await;
        };
        let value_text = script[call + "callback(".len()..]
            .split(')')
            .next()
            .unwrap_or("")
            .trim();
        let value = serde_json::from_str::<Value>(value_text).unwrap_or(Value::Null);

        if let Some(timeout_pos) = script.find("setTimeout(") {
            let tail = &script[timeout_pos..];
            let delay_ms = tail
                .rsplit(',')
                .next()
                .and_then(|s| s.split(')').next())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        Ok(value)
    }

    fn alert_message(&self) -> Option<String> {
        self.state().alert.as_ref().map(|a| a.message.clone())
    }

    fn handle_alert(&self, accept: bool) -> Result<()> {
        let mut state = self.state_mut();
        let alert = state
            .alert
            .take()
            .ok_or_else(|| Error::unknown("no alert open"))?;
        if let Some(var) = alert.var {
            state.vars.insert(var, Value::Bool(accept));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Browser

/// Simulated browser: one per session, owns the window set
pub struct SimBrowser {
    self_ref: Weak<SimBrowser>,
    windows: RwLock<Vec<Arc<SimWebView>>>,
    window_tx: watch::Sender<u64>,
    generation: AtomicU64,
    alive: AtomicBool,
    logs: Arc<LogBuffers>,
    device: Option<DeviceMetrics>,
    trace_categories: Vec<String>,
    extensions_installed: usize,
}

impl std::fmt::Debug for SimBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimBrowser")
            .field("windows", &self.windows.read().map(|w| w.len()).unwrap_or(0))
            .field("alive", &self.alive.load(Ordering::Relaxed))
            .finish()
    }
}

impl SimBrowser {
    /// Launch a simulated browser with one initial window
    pub fn launch(
        options: LaunchOptions,
        trace_categories: Vec<String>,
        logs: Arc<LogBuffers>,
    ) -> Result<Arc<Self>> {
        let (window_tx, _) = watch::channel(0);
        let browser = Arc::new_cyclic(|weak: &Weak<SimBrowser>| SimBrowser {
            self_ref: weak.clone(),
            windows: RwLock::new(Vec::new()),
            window_tx,
            generation: AtomicU64::new(0),
            alive: AtomicBool::new(true),
            logs,
            device: options.device_metrics.clone(),
            trace_categories,
            extensions_installed: options.extensions.len(),
        });
        browser.open_window("");
        Ok(browser)
    }

    /// Open a new window, returning its handle
    pub fn open_window(&self, name: &str) -> String {
        let view = SimWebView::new(self.self_ref.clone());
        if !name.is_empty() {
            view.state_mut().name = name.to_string();
        }
        let handle = view.handle.clone();
        if let Ok(mut windows) = self.windows.write() {
            windows.push(view);
        }
        self.bump_generation();
        handle
    }

    /// Number of extension packages installed at launch
    pub fn extensions_installed(&self) -> usize {
        self.extensions_installed
    }

    fn bump_generation(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.window_tx.send(generation);
    }

    fn crash(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Ok(mut windows) = self.windows.write() {
            windows.clear();
        }
        self.bump_generation();
    }

    fn append_browser_log(&self, level: LogLevel, source: &str, message: String) {
        self.logs
            .append(LogType::Browser, LogEntry::new(level, source, message));
    }
}

#[async_trait]
impl Browser for SimBrowser {
    fn window_handles(&self) -> Vec<String> {
        self.windows
            .read()
            .map(|w| w.iter().map(|v| v.handle.clone()).collect())
            .unwrap_or_default()
    }

    fn window(&self, handle: &str) -> Option<Arc<dyn WebView>> {
        self.windows
            .read()
            .ok()?
            .iter()
            .find(|v| v.handle == handle)
            .map(|v| v.clone() as Arc<dyn WebView>)
    }

    fn window_by_name(&self, name: &str) -> Option<String> {
        self.windows
            .read()
            .ok()?
            .iter()
            .find(|v| v.window_name() == name)
            .map(|v| v.handle.clone())
    }

    async fn close_window(&self, handle: &str) -> Result<()> {
        let removed = {
            let mut windows = self
                .windows
                .write()
                .map_err(|_| Error::unknown("window registry poisoned"))?;
            let before = windows.len();
            windows.retain(|v| v.handle != handle);
            windows.len() != before
        };
        if !removed {
            return Err(Error::no_such_window("window was already closed"));
        }
        self.bump_generation();
        Ok(())
    }

    fn window_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn window_events(&self) -> watch::Receiver<u64> {
        self.window_tx.subscribe()
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn quit(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        if let Ok(mut windows) = self.windows.write() {
            windows.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogBuffers;

    fn browser() -> Arc<SimBrowser> {
        let logs = Arc::new(LogBuffers::new(100, LogLevel::All, LogLevel::All));
        SimBrowser::launch(LaunchOptions::default(), vec!["blink.console".into()], logs).unwrap()
    }

    fn view(browser: &Arc<SimBrowser>) -> Arc<dyn WebView> {
        let handle = browser.window_handles()[0].clone();
        browser.window(&handle).unwrap()
    }

    #[tokio::test]
    async fn test_launch_opens_one_window() {
        let browser = browser();
        assert_eq!(browser.window_handles().len(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_literals() {
        let browser = browser();
        let view = view(&browser);

        let value = view.evaluate(&[], "return 1", &[]).await.unwrap();
        assert_eq!(value, serde_json::json!(1));

        let value = view.evaluate(&[], "", &[]).await.unwrap();
        assert_eq!(value, Value::Null);

        let err = view.evaluate(&[], "{{{", &[]).await.unwrap_err();
        assert!(matches!(err, Error::JavaScriptError(_)));
    }

    #[tokio::test]
    async fn test_evaluate_statements_then_return() {
        let browser = browser();
        let view = view(&browser);

        let value = view
            .evaluate(&[], r#"window.name = "oldWindow"; return 1;"#, &[])
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!(1));
        assert_eq!(view.window_name(), "oldWindow");

        view.evaluate(&[], r#"document.title = "title"; return 1;"#, &[])
            .await
            .unwrap();
        assert_eq!(view.title(), "title");
    }

    #[tokio::test]
    async fn test_frame_chain_evaluation_context() {
        let browser = browser();
        let view = view(&browser);

        let top = view.evaluate(&[], "return window.top == window", &[]).await.unwrap();
        assert_eq!(top, Value::Bool(true));

        let frame = view
            .child_frame(&[], &FrameLocator::IdOrName("subframe".into()))
            .unwrap();
        let nested = view
            .evaluate(&[frame.clone()], "return window.top != window", &[])
            .await
            .unwrap();
        assert_eq!(nested, Value::Bool(true));

        // Same frame reachable by name and by index
        let by_name = view.child_frame(&[], &FrameLocator::IdOrName("sub".into())).unwrap();
        let by_index = view.child_frame(&[], &FrameLocator::Index(0)).unwrap();
        assert_eq!(frame, by_name);
        assert_eq!(frame, by_index);
    }

    #[tokio::test]
    async fn test_nested_frame_sources() {
        let browser = browser();
        let view = view(&browser);

        assert!(view.source(&[]).unwrap().contains("One"));
        let sub = view.child_frame(&[], &FrameLocator::Index(0)).unwrap();
        assert!(view.source(&[sub.clone()]).unwrap().contains("Two"));
        let inner = view.child_frame(&[sub.clone()], &FrameLocator::Index(0)).unwrap();
        assert!(view.source(&[sub, inner]).unwrap().contains("Three"));
    }

    #[tokio::test]
    async fn test_switch_to_non_frame_element_fails() {
        let browser = browser();
        let view = view(&browser);

        let body = view.find_elements(&[], None, "tag name", "p").unwrap();
        let err = view
            .child_frame(&[], &FrameLocator::Element(body[0].clone()))
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchFrame(_)));
    }

    #[tokio::test]
    async fn test_inner_html_replacement_makes_elements_stale() {
        let browser = browser();
        let view = view(&browser);

        let divs = view.find_elements(&[], None, "tag name", "div").unwrap();
        assert!(!divs.is_empty());
        let first = divs[0].clone();

        view.evaluate(&[], r#"document.body.innerHTML = "<span>x</span>";"#, &[])
            .await
            .unwrap();

        let err = view.check_element(&first).unwrap_err();
        assert!(matches!(err, Error::StaleElementReference(_)));

        let spans = view.find_elements(&[], None, "tag name", "span").unwrap();
        assert_eq!(spans.len(), 1);
    }

    #[tokio::test]
    async fn test_child_element_search() {
        let browser = browser();
        let view = view(&browser);
        view.evaluate(
            &[],
            r#"document.body.innerHTML = "<div><br><br></div><div><br></div>";"#,
            &[],
        )
        .await
        .unwrap();

        let divs = view.find_elements(&[], None, "tag name", "div").unwrap();
        assert_eq!(divs.len(), 2);
        let brs = view.find_elements(&[], Some(&divs[0]), "tag name", "br").unwrap();
        assert_eq!(brs.len(), 2);
        let brs = view.find_elements(&[], Some(&divs[1]), "tag name", "br").unwrap();
        assert_eq!(brs.len(), 1);
    }

    #[tokio::test]
    async fn test_send_keys_and_clear() {
        let browser = browser();
        let view = view(&browser);

        let input = view.find_elements(&[], None, "id", "textbox").unwrap();
        view.element_send_keys(&input[0], "0123456789+-*/ Hi").unwrap();
        view.element_send_keys(&input[0], ", there!").unwrap();

        let value = view
            .evaluate(&[], "return arguments[0].value;", &[element_reference(&input[0])])
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!("0123456789+-*/ Hi, there!"));

        view.element_clear(&input[0]).unwrap();
        let value = view
            .evaluate(&[], "return arguments[0].value;", &[element_reference(&input[0])])
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!(""));
    }

    #[tokio::test]
    async fn test_click_blank_link_opens_window() {
        let browser = browser();
        let view = view(&browser);

        let link = view.find_elements(&[], None, "id", "link").unwrap();
        view.click_element(&link[0]).await.unwrap();
        assert_eq!(browser.window_handles().len(), 2);
    }

    #[tokio::test]
    async fn test_alert_round_trip() {
        let browser = browser();
        let view = view(&browser);

        assert!(view.alert_message().is_none());
        view.evaluate(&[], "window.confirmed = confirm('HI')", &[]).await.unwrap();
        assert_eq!(view.alert_message().unwrap(), "HI");

        view.handle_alert(false).unwrap();
        assert!(view.alert_message().is_none());

        let confirmed = view.evaluate(&[], "return window.confirmed", &[]).await.unwrap();
        assert_eq!(confirmed, Value::Bool(false));

        assert!(view.handle_alert(true).is_err());
    }

    #[tokio::test]
    async fn test_crash_invalidates_browser() {
        let browser = browser();
        let view = view(&browser);

        let err = view.navigate(CRASH_URL).await.unwrap_err();
        assert!(err.to_string().contains("page crash"));
        assert!(!browser.is_alive());

        let err = view.evaluate(&[], "return 1", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Unknown(_)));
    }

    #[tokio::test]
    async fn test_navigation_resets_document() {
        let browser = browser();
        let view = view(&browser);

        let divs = view.find_elements(&[], None, "tag name", "div").unwrap();
        let epoch = view.document_epoch();
        view.navigate("http://localhost/empty.html").await.unwrap();
        assert!(view.document_epoch() > epoch);

        let err = view.check_element(&divs[0]).unwrap_err();
        assert!(matches!(err, Error::StaleElementReference(_)));
    }

    #[tokio::test]
    async fn test_async_evaluate_callback_timing() {
        let browser = browser();
        let view = view(&browser);

        let script = "var callback = arguments[0];setTimeout(function(){callback(2);}, 10);";
        let value = view.evaluate_async(&[], script, &[]).await.unwrap();
        assert_eq!(value, serde_json::json!(2));

        let script = "var callback = arguments[0];callback(7);";
        let value = view.evaluate_async(&[], script, &[]).await.unwrap();
        assert_eq!(value, serde_json::json!(7));
    }

    #[tokio::test]
    async fn test_touch_events_recorded_in_order() {
        let browser = browser();
        let view = view(&browser);

        let events = view.find_elements(&[], None, "id", "events").unwrap();
        view.dispatch_input(
            &[],
            Some(&events[0]),
            &crate::input::single_tap_events(0, 0),
        )
        .await
        .unwrap();
        assert_eq!(view.element_text(&events[0]).unwrap(), "events: touchstart touchend");
    }

    #[tokio::test]
    async fn test_shadow_elements_hidden_without_deep() {
        let browser = browser();
        let view = view(&browser);

        assert!(view.find_elements(&[], None, "id", "olderTextBox").unwrap().is_empty());
        assert!(view
            .find_elements(&[], None, "css selector", "#olderTextBox")
            .unwrap()
            .is_empty());
        // The host itself is light DOM and stays findable
        assert_eq!(view.find_elements(&[], None, "id", "olderChildDiv").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deep_selector_pierces_shadow_roots() {
        let browser = browser();
        let view = view(&browser);

        let found = view
            .find_elements(&[], None, "css selector", "* /deep/ #olderTextBox")
            .unwrap();
        assert_eq!(found.len(), 1);

        let heading = view
            .find_elements(&[], None, "css selector", "* /deep/ #olderHeading")
            .unwrap();
        assert_eq!(view.element_text(&heading[0]).unwrap(), "Older Child");
    }

    #[tokio::test]
    async fn test_shadow_child_search_stays_within_one_root() {
        let browser = browser();
        let view = view(&browser);

        let older = view.find_elements(&[], None, "id", "olderChildDiv").unwrap();
        let younger = view.find_elements(&[], None, "id", "youngerChildDiv").unwrap();

        let from_host = view
            .find_elements(&[], Some(&older[0]), "id", "olderTextBox")
            .unwrap();
        assert_eq!(from_host.len(), 1);

        let across = view
            .find_elements(&[], Some(&younger[0]), "id", "olderTextBox")
            .unwrap();
        assert!(across.is_empty());
    }

    #[tokio::test]
    async fn test_shadow_elements_interact_and_go_stale() {
        let browser = browser();
        let view = view(&browser);

        let textbox = view
            .find_elements(&[], None, "css selector", "* /deep/ #olderTextBox")
            .unwrap();
        view.element_send_keys(&textbox[0], "bar").unwrap();
        let value = view
            .evaluate(&[], "return arguments[0].value;", &[element_reference(&textbox[0])])
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!("foobar"));

        view.element_clear(&textbox[0]).unwrap();
        assert!(view.element_displayed(&textbox[0]).unwrap());

        view.evaluate(&[], r#"document.body.innerHTML = "<div>x</div>";"#, &[])
            .await
            .unwrap();
        let err = view.element_send_keys(&textbox[0], "y").unwrap_err();
        assert!(matches!(err, Error::StaleElementReference(_)));
    }

    #[tokio::test]
    async fn test_window_geometry_round_trip() {
        let browser = browser();
        let view = view(&browser);

        let position = view.window_position().unwrap();
        view.set_window_position(position.0, position.1).unwrap();
        assert_eq!(view.window_position().unwrap(), position);

        view.set_window_position(100, 200).unwrap();
        assert_eq!(view.window_position().unwrap(), (100, 200));

        view.set_window_size(600, 400).unwrap();
        assert_eq!(view.window_size().unwrap(), (600, 400));

        view.maximize().unwrap();
        assert_ne!(view.window_position().unwrap(), (100, 200));
        assert_ne!(view.window_size().unwrap(), (600, 400));
    }

    #[tokio::test]
    async fn test_unscoped_input_hits_the_targeted_frame() {
        let browser = browser();
        let view = view(&browser);

        let top_recorder = view.find_elements(&[], None, "id", "events").unwrap();
        let (_, top_y) = view.element_location(&top_recorder[0]).unwrap();
        let sub = view.child_frame(&[], &FrameLocator::IdOrName("sub".into())).unwrap();
        let sub_recorder = view
            .find_elements(&[sub.clone()], None, "id", "subevents")
            .unwrap();
        let (_, sub_y) = view.element_location(&sub_recorder[0]).unwrap();

        // Coordinates land in the subframe, never on top-frame rows
        view.dispatch_input(
            &[sub.clone()],
            None,
            &[InputEvent::TouchStart { x: 0, y: top_y }, InputEvent::TouchStart { x: 0, y: sub_y }],
        )
        .await
        .unwrap();

        assert_eq!(view.element_text(&top_recorder[0]).unwrap(), "events:");
        assert_eq!(
            view.element_text(&sub_recorder[0]).unwrap(),
            "events: touchstart"
        );
    }

    #[tokio::test]
    async fn test_extensions_installed_at_launch() {
        let logs = Arc::new(LogBuffers::new(100, LogLevel::All, LogLevel::All));
        let options = LaunchOptions {
            extensions: vec![vec![0xca, 0xfe], vec![0xbe, 0xef]],
            ..LaunchOptions::default()
        };
        let browser = SimBrowser::launch(options, vec![], logs).unwrap();
        assert_eq!(browser.extensions_installed(), 2);
    }

    #[tokio::test]
    async fn test_console_messages_reach_browser_log() {
        let logs = Arc::new(LogBuffers::new(100, LogLevel::All, LogLevel::All));
        let browser =
            SimBrowser::launch(LaunchOptions::default(), vec![], logs.clone()).unwrap();
        let view = view(&browser);

        view.evaluate(&[], "console.error('broken')", &[]).await.unwrap();
        let drained = logs.drain(LogType::Browser);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].source, "javascript");
        assert_eq!(drained[0].message, "broken");
    }
}
