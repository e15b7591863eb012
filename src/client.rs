//! Client abstraction for talking to a semblance dispatcher.
//!
//! `SemblanceClient` wraps either a local [`ActionDispatcher`] or an HTTP
//! connection to a `semblanced` server instance. The CLI resolves which
//! variant to use at startup via [`discover_server`].

use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::{ActionDispatcher, Request, Response};
use crate::paths::SemblancePaths;

// ---------------------------------------------------------------------------
// Server discovery
// ---------------------------------------------------------------------------

/// Information about a running semblanced instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub pid: u32,
    pub port: u16,
    pub bind: String,
}

impl ServerInfo {
    /// Base URL for HTTP requests.
    pub fn base_url(&self) -> String {
        let host = if self.bind == "0.0.0.0" {
            "127.0.0.1"
        } else {
            &self.bind
        };
        format!("http://{host}:{}", self.port)
    }
}

/// Discover a running semblanced server via its PID file.
///
/// Returns `Some(ServerInfo)` when:
/// 1. The PID file exists and parses correctly
/// 2. The process is still alive (`kill(pid, 0)` succeeds)
/// 3. The server responds to `GET /health`
pub fn discover_server(paths: &SemblancePaths) -> Option<ServerInfo> {
    let pid_path = paths.pid_file();
    let contents = std::fs::read_to_string(&pid_path).ok()?;
    let info: ServerInfo = serde_json::from_str(&contents).ok()?;

    // Check process is alive.
    if !process_alive(info.pid) {
        // Stale PID file — clean up.
        let _ = std::fs::remove_file(&pid_path);
        return None;
    }

    // Health-check the server.
    let url = format!("{}/health", info.base_url());
    match ureq::get(&url).timeout(Duration::from_secs(2)).call() {
        Ok(resp) if resp.status() == 200 => Some(info),
        _ => None,
    }
}

/// Write a PID file for the current semblanced process.
pub fn write_pid_file(paths: &SemblancePaths, port: u16, bind: &str) -> std::io::Result<()> {
    let info = ServerInfo {
        pid: std::process::id(),
        port,
        bind: bind.to_string(),
    };
    let json = serde_json::to_string_pretty(&info).unwrap_or_default();
    std::fs::write(paths.pid_file(), json)
}

/// Remove the PID file on shutdown.
pub fn remove_pid_file(paths: &SemblancePaths) {
    let _ = std::fs::remove_file(paths.pid_file());
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 doesn't actually send a signal;
    // it only checks whether the process exists.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // On non-unix, fall back to trusting the PID file.
    true
}

// ---------------------------------------------------------------------------
// Client error
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ClientError {
    #[error("remote request failed: {message}")]
    #[diagnostic(code(semblance::client::request), help("Is semblanced running?"))]
    Request { message: String },

    #[error("unexpected response from server: {message}")]
    #[diagnostic(code(semblance::client::response), help("Server version mismatch?"))]
    Response { message: String },
}

pub type ClientResult<T> = Result<T, ClientError>;

// ---------------------------------------------------------------------------
// SemblanceClient
// ---------------------------------------------------------------------------

/// Either a local dispatcher or a remote HTTP connection to semblanced.
pub enum SemblanceClient {
    /// Direct local dispatch.
    Local(Arc<ActionDispatcher>),
    /// HTTP client to a running semblanced server.
    Remote { base_url: String, http: ureq::Agent },
}

impl SemblanceClient {
    /// Connect to a discovered server.
    pub fn remote(info: &ServerInfo) -> Self {
        SemblanceClient::Remote {
            base_url: info.base_url(),
            http: ureq::Agent::new(),
        }
    }

    /// Wrap a local dispatcher.
    pub fn local(dispatcher: Arc<ActionDispatcher>) -> Self {
        SemblanceClient::Local(dispatcher)
    }

    /// Returns true if this is a remote client.
    pub fn is_remote(&self) -> bool {
        matches!(self, SemblanceClient::Remote { .. })
    }

    /// Send one action request, locally or over the wire.
    pub fn dispatch(&self, request: &Request) -> ClientResult<Response> {
        match self {
            SemblanceClient::Local(dispatcher) => Ok(dispatcher.dispatch(request)),
            SemblanceClient::Remote { base_url, http } => {
                let url = format!("{base_url}/action");
                let resp = http
                    .post(&url)
                    .send_json(request)
                    .map_err(|e| ClientError::Request {
                        message: e.to_string(),
                    })?;
                resp.into_json().map_err(|e| ClientError::Response {
                    message: format!("failed to parse JSON: {e}"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{ActionCategory, ActionType};
    use crate::matcher::MatcherRegistry;
    use crate::matcher::structural::StructuralMatcher;
    use crate::schema::MemorySchema;
    use crate::store::{InstanceStore, WriteMode};

    #[test]
    fn server_info_rewrites_wildcard_bind() {
        let info = ServerInfo {
            pid: 1,
            port: 9173,
            bind: "0.0.0.0".to_string(),
        };
        assert_eq!(info.base_url(), "http://127.0.0.1:9173");
        let info = ServerInfo {
            pid: 1,
            port: 9173,
            bind: "192.168.1.5".to_string(),
        };
        assert_eq!(info.base_url(), "http://192.168.1.5:9173");
    }

    #[test]
    fn stale_pid_file_is_removed_during_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SemblancePaths {
            config_dir: dir.path().join("config"),
            data_dir: dir.path().join("data"),
            state_dir: dir.path().join("state"),
            runtime_dir: dir.path().to_path_buf(),
        };
        let info = ServerInfo {
            pid: u32::MAX - 1,
            port: 9173,
            bind: "127.0.0.1".to_string(),
        };
        std::fs::write(paths.pid_file(), serde_json::to_string(&info).unwrap()).unwrap();
        assert!(discover_server(&paths).is_none());
        assert!(!paths.pid_file().exists());
    }

    #[test]
    fn local_client_dispatches_without_a_server() {
        let schema = std::sync::Arc::new(MemorySchema::new());
        let mut matchers = MatcherRegistry::new();
        matchers.register(Box::new(StructuralMatcher::new(schema)));
        let store = Arc::new(InstanceStore::in_memory(matchers));
        let client =
            SemblanceClient::local(Arc::new(ActionDispatcher::new(store, WriteMode::Upsert)));
        assert!(!client.is_remote());

        let response = client
            .dispatch(&Request::new(
                ActionCategory::Store,
                ActionType::Get,
                serde_json::json!({ "identity": "ghost" }),
            ))
            .unwrap();
        assert!(!response.ok);
    }
}
