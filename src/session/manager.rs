//! Session registry and routing
//!
//! The manager owns the session table and a backend factory; everything else
//! about a session lives on its worker task. Command execution is
//! queue-and-await: the manager clones the session's sender, enqueues a job,
//! and awaits the oneshot reply, so concurrent requests against one session
//! serialize in arrival order while different sessions proceed independently.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::config::Config;
use crate::logging::LogBuffers;
use crate::protocol::Command;
use crate::session::capabilities::Capabilities;
use crate::session::targets::TargetContext;
use crate::session::worker::{self, Job, SessionState};
use crate::webview::traits::{Browser, LaunchOptions};
use crate::webview::SimBrowser;
use crate::{Error, Result};

/// Creates the browser a new session will own
pub type BrowserFactory = Arc<
    dyn Fn(LaunchOptions, Vec<String>, Arc<LogBuffers>) -> Result<Arc<dyn Browser>>
        + Send
        + Sync,
>;

/// Registry entry for one live session
pub struct SessionHandle {
    queue: mpsc::Sender<Job>,
    capabilities: Value,
    log_path: Option<String>,
}

/// Session registry + backend factory
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
    factory: BrowserFactory,
    config: Config,
}

impl SessionManager {
    pub fn new(config: Config, factory: BrowserFactory) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            factory,
            config,
        }
    }

    /// Manager backed by the in-memory browser simulation
    pub fn sim(config: Config) -> Self {
        Self::new(
            config,
            Arc::new(|options, trace_categories, logs| {
                SimBrowser::launch(options, trace_categories, logs)
                    .map(|browser| browser as Arc<dyn Browser>)
            }),
        )
    }

    /// Validate capabilities, launch a browser, and start the session worker.
    /// Returns the session id and the capabilities echoed to the client.
    pub fn create_session(&self, desired: &Value) -> Result<(String, Value)> {
        {
            let sessions = self.sessions.read().map_err(poisoned)?;
            if sessions.len() >= self.config.max_sessions {
                return Err(Error::session_not_created(format!(
                    "too many active sessions ({})",
                    sessions.len()
                )));
            }
        }

        let caps = match Capabilities::parse(desired) {
            Ok(caps) => caps,
            Err(e) => {
                // Rejections are recorded in the requested log file too
                if let Some(path) = desired
                    .pointer("/xwalkOptions/logPath")
                    .and_then(Value::as_str)
                {
                    log_line(path, &format!("session rejected: {}", e));
                }
                return Err(e);
            }
        };
        let logs = Arc::new(LogBuffers::new(
            self.config.log_buffer_capacity,
            caps.browser_level,
            caps.performance_level,
        ));
        let browser = (self.factory)(
            caps.launch.clone(),
            caps.trace_categories.clone(),
            logs.clone(),
        )
        .map_err(|e| match e {
            Error::SessionNotCreated(_) => e,
            other => Error::session_not_created(other.to_string()),
        })?;
        caps.apply_download_directory()?;

        let id = uuid::Uuid::new_v4().to_string();
        let wire_caps = caps.to_wire();
        let window = browser
            .window_handles()
            .into_iter()
            .next()
            .ok_or_else(|| Error::session_not_created("browser opened no window"))?;

        let state = SessionState {
            id: id.clone(),
            browser,
            capabilities: wire_caps.clone(),
            target: TargetContext::new(window),
            script_timeout: Duration::from_millis(self.config.default_script_timeout),
            network: None,
            logs,
            mouse_position: (0, 0),
        };

        let (queue, jobs) = mpsc::channel(self.config.command_queue_depth);
        {
            let mut sessions = self.sessions.write().map_err(poisoned)?;
            // The early check ran under a read lock; concurrent creates can
            // both pass it, so the cap is enforced again before inserting.
            if sessions.len() >= self.config.max_sessions {
                return Err(Error::session_not_created(format!(
                    "too many active sessions ({})",
                    sessions.len()
                )));
            }
            sessions.insert(
                id.clone(),
                SessionHandle {
                    queue,
                    capabilities: wire_caps.clone(),
                    log_path: caps.log_path.clone(),
                },
            );
        }
        tokio::spawn(worker::run(state, jobs, Arc::downgrade(&self.sessions)));

        if let Some(path) = &caps.log_path {
            log_line(path, &format!("session {} created", id));
        }
        info!(session = %id, "session created");
        Ok((id, wire_caps))
    }

    /// Run one command on a session, in queue order
    pub async fn execute(&self, session_id: &str, command: Command) -> Result<Value> {
        let queue = {
            let sessions = self.sessions.read().map_err(poisoned)?;
            sessions
                .get(session_id)
                .map(|handle| handle.queue.clone())
                .ok_or_else(|| Error::no_such_session(session_id))?
        };

        let (reply, response) = oneshot::channel();
        queue
            .send(Job { command, reply })
            .await
            .map_err(|_| Error::no_such_session(session_id))?;
        response
            .await
            .map_err(|_| Error::no_such_session(session_id))?
    }

    /// Quit a session. Quitting an unknown (or already quit) session
    /// succeeds, so teardown is safe to repeat.
    pub async fn quit(&self, session_id: &str) -> Result<Value> {
        let log_path = self
            .sessions
            .read()
            .ok()
            .and_then(|sessions| sessions.get(session_id).and_then(|h| h.log_path.clone()));
        match self.execute(session_id, Command::Quit).await {
            Ok(value) => {
                if let Some(path) = &log_path {
                    log_line(path, &format!("session {} destroyed", session_id));
                }
                info!(session = %session_id, "session quit");
                Ok(value)
            }
            Err(Error::NoSuchSession(_)) => Ok(Value::Null),
            Err(e) => Err(e),
        }
    }

    /// Quit every live session; used at server shutdown
    pub async fn quit_all(&self) {
        let ids: Vec<String> = {
            match self.sessions.read() {
                Ok(sessions) => sessions.keys().cloned().collect(),
                Err(_) => return,
            }
        };
        for id in ids {
            let _ = self.quit(&id).await;
        }
    }

    /// `(id, capabilities)` for every live session
    pub fn list(&self) -> Vec<(String, Value)> {
        self.sessions
            .read()
            .map(|sessions| {
                sessions
                    .iter()
                    .map(|(id, handle)| (id.clone(), handle.capabilities.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::unknown("session registry poisoned")
}

fn log_line(path: &str, message: &str) {
    let line = format!("[{}] {}\n", chrono::Utc::now().to_rfc3339(), message);
    if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
        let _ = file.write_all(line.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::sim(Config::default())
    }

    #[tokio::test]
    async fn test_create_and_execute() {
        let manager = manager();
        let (id, caps) = manager.create_session(&serde_json::json!({})).unwrap();
        assert_eq!(caps["browserName"], "xwalk");
        assert_eq!(manager.session_count(), 1);

        let handles = manager.execute(&id, Command::GetWindowHandles).await.unwrap();
        assert_eq!(handles.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session_rejected() {
        let manager = manager();
        let err = manager
            .execute("missing", Command::GetWindowHandles)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchSession(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_quit_twice_is_safe() {
        let manager = manager();
        let (id, _) = manager.create_session(&serde_json::json!({})).unwrap();

        manager.quit(&id).await.unwrap();
        manager.quit(&id).await.unwrap();

        // The registry entry is gone once the worker has unwound
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.session_count(), 0);
        let err = manager.execute(&id, Command::GetTitle).await.unwrap_err();
        assert!(matches!(err, Error::NoSuchSession(_)));
    }

    #[tokio::test]
    async fn test_max_sessions_enforced() {
        let mut config = Config::default();
        config.max_sessions = 1;
        let manager = SessionManager::sim(config);

        manager.create_session(&serde_json::json!({})).unwrap();
        let err = manager.create_session(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, Error::SessionNotCreated(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_session_cap_holds_under_concurrent_creates() {
        let mut config = Config::default();
        config.max_sessions = 2;
        let manager = Arc::new(SessionManager::sim(config));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager.create_session(&serde_json::json!({})).is_ok()
                })
            })
            .collect();
        let created = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();

        assert_eq!(created, 2);
        assert_eq!(manager.session_count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_capabilities_create_no_session() {
        let manager = manager();
        let desired = serde_json::json!({ "xwalkOptions": { "fooBar": 1 } });
        let err = manager.create_session(&desired).unwrap_err();
        assert!(err.to_string().contains("unrecognized xwalk option: fooBar"));
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_crash_removes_session() {
        let manager = manager();
        let (id, _) = manager.create_session(&serde_json::json!({})).unwrap();

        let err = manager
            .execute(&id, Command::Navigate { url: "xwalk://crash".into() })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("page crash"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = manager.execute(&id, Command::GetCurrentUrl).await.unwrap_err();
        assert!(matches!(err, Error::NoSuchSession(_)));
    }

    #[tokio::test]
    async fn test_list_reports_capabilities() {
        let manager = manager();
        let (id, _) = manager.create_session(&serde_json::json!({})).unwrap();
        let listed = manager.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, id);
        assert_eq!(listed[0].1["browserName"], "xwalk");
    }
}
