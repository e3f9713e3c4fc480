//! Command targeting
//!
//! Each session tracks which window and frame its commands address. The
//! window reference survives the window being closed; resolving it afterwards
//! fails until the client switches to a live window. The frame chain holds
//! frame ids from the top document down and is re-resolved on every use, so a
//! frame removed or navigated away mid-session surfaces as a missing frame
//! rather than silently retargeting.

use std::sync::Arc;
use std::time::Duration;

use crate::webview::traits::{Browser, WebView};
use crate::{Error, Result};

/// Current window + frame target of a session
#[derive(Debug, Clone, Default)]
pub struct TargetContext {
    /// Handle of the targeted window; `None` after it was closed
    pub window: Option<String>,
    /// Frame ids from the top document down; empty means the top frame
    pub frame_chain: Vec<String>,
}

impl TargetContext {
    pub fn new(window: String) -> Self {
        Self { window: Some(window), frame_chain: Vec::new() }
    }

    /// Point at a different window, resetting the frame target
    pub fn switch_window(&mut self, handle: String) {
        self.window = Some(handle);
        self.frame_chain.clear();
    }

    /// Resolve the targeted window, dropping the reference if it is gone
    pub fn resolve(&mut self, browser: &dyn Browser) -> Result<Arc<dyn WebView>> {
        let handle = self
            .window
            .as_ref()
            .ok_or_else(|| Error::no_such_window("target window already closed"))?;
        match browser.window(handle) {
            Some(view) => Ok(view),
            None => {
                self.window = None;
                Err(Error::no_such_window("target window already closed"))
            }
        }
    }
}

/// Block until the browser's window set changes past `since`, or until
/// `timeout` elapses. Returns whether a change was observed.
pub async fn wait_for_window_change(
    browser: &dyn Browser,
    since: u64,
    timeout: Duration,
) -> bool {
    if browser.window_generation() > since {
        return true;
    }
    let mut events = browser.window_events();
    tokio::time::timeout(timeout, async {
        while *events.borrow_and_update() <= since {
            if events.changed().await.is_err() {
                return false;
            }
        }
        true
    })
    .await
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogBuffers, LogLevel};
    use crate::webview::traits::LaunchOptions;
    use crate::webview::SimBrowser;

    fn browser() -> Arc<SimBrowser> {
        let logs = Arc::new(LogBuffers::new(10, LogLevel::All, LogLevel::Off));
        SimBrowser::launch(LaunchOptions::default(), vec![], logs).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_fails_after_close() {
        let browser = browser();
        let handle = browser.window_handles()[0].clone();
        let mut target = TargetContext::new(handle.clone());

        assert!(target.resolve(browser.as_ref()).is_ok());

        browser.close_window(&handle).await.unwrap();
        let err = target.resolve(browser.as_ref()).unwrap_err();
        assert!(matches!(err, Error::NoSuchWindow(_)));
        assert!(target.window.is_none());
    }

    #[tokio::test]
    async fn test_wait_observes_window_open() {
        let browser = browser();
        let since = browser.window_generation();

        let waiter = {
            let browser = browser.clone();
            tokio::spawn(async move {
                wait_for_window_change(browser.as_ref(), since, Duration::from_secs(1)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        browser.open_window("popup");
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_times_out_without_change() {
        let browser = browser();
        let since = browser.window_generation();
        let changed =
            wait_for_window_change(browser.as_ref(), since, Duration::from_millis(20)).await;
        assert!(!changed);
    }

    #[test]
    fn test_switch_window_resets_frame_chain() {
        let mut target = TargetContext::new("w1".into());
        target.frame_chain.push("f1".into());
        target.switch_window("w2".into());
        assert_eq!(target.window.as_deref(), Some("w2"));
        assert!(target.frame_chain.is_empty());
    }
}
