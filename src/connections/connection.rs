//! A held connection and its lifecycle.
//!
//! # Responsibilities
//! - Generate unique connection ids
//! - Reference (not own) the request context being streamed to
//! - Provide a one-shot termination signal
//! - Remember the close callback registered by scripts

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::watch;

use crate::http::context::RequestContext;

/// Generate a fresh random connection id.
pub fn generate_id() -> String {
    format!("conn-{:016x}", rand::random::<u64>())
}

/// Why a held connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `connection::close` or the admin API.
    Explicit,
    /// The client went away.
    Disconnected,
    /// Process shutdown.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Explicit => "explicit",
            CloseReason::Disconnected => "disconnected",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Serializable view of a connection.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: String,
    pub handle: String,
    pub alias: Option<String>,
    pub method: String,
    pub path: String,
    /// Unix seconds.
    pub opened: u64,
    pub on_close: Option<String>,
}

impl std::fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "id {} method {} path {} opened {}",
            self.id, self.method, self.path, self.opened
        )?;
        if let Some(alias) = &self.alias {
            write!(f, " name {alias}")?;
        }
        Ok(())
    }
}

/// A request context held open past its script for later executions to write to.
#[derive(Debug)]
pub struct Connection {
    id: String,
    alias: Option<String>,
    seq: u64,
    context: Arc<RequestContext>,
    opened: SystemTime,
    terminated: watch::Sender<bool>,
    on_close: Mutex<Option<String>>,
}

impl Connection {
    pub(crate) fn new(
        id: String,
        alias: Option<String>,
        seq: u64,
        context: Arc<RequestContext>,
    ) -> Self {
        let (terminated, _) = watch::channel(false);
        Self {
            id,
            alias,
            seq,
            context,
            opened: SystemTime::now(),
            terminated,
            on_close: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// The name scripts should use: the alias if given, else the id.
    pub fn handle(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.id)
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub fn context(&self) -> &Arc<RequestContext> {
        &self.context
    }

    /// Fire the termination signal. Returns true only for the first call.
    pub(crate) fn terminate(&self) -> bool {
        !self.terminated.send_replace(true)
    }

    pub fn is_terminated(&self) -> bool {
        *self.terminated.borrow()
    }

    /// Resolves once the connection has been terminated.
    pub async fn terminated(&self) {
        let mut rx = self.terminated.subscribe();
        // The sender lives as long as `self`, so this cannot fail while we wait.
        let _ = rx.wait_for(|terminated| *terminated).await;
    }

    pub fn set_on_close(&self, callback: impl Into<String>) {
        *self.on_close.lock().unwrap_or_else(|e| e.into_inner()) = Some(callback.into());
    }

    pub fn on_close(&self) -> Option<String> {
        self.on_close.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn info(&self) -> ConnectionInfo {
        let request = self.context.request();
        ConnectionInfo {
            id: self.id.clone(),
            handle: self.handle().to_string(),
            alias: self.alias.clone(),
            method: request.method.clone(),
            path: request.path.clone(),
            opened: self
                .opened
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            on_close: self.on_close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::RequestData;
    use crate::http::response;
    use crate::routing::Params;
    use axum::http::Method;

    fn connection(alias: Option<&str>) -> Connection {
        let (sink, _pending) = response::channel();
        let ctx = RequestContext::new(RequestData::new(Method::GET, "/events", ""), Params::new(), sink);
        Connection::new(generate_id(), alias.map(str::to_string), 0, Arc::new(ctx))
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert!(a.starts_with("conn-"));
        assert_eq!(a.len(), "conn-".len() + 16);
    }

    #[test]
    fn test_handle_prefers_alias() {
        assert_eq!(connection(Some("room")).handle(), "room");
        let anonymous = connection(None);
        assert_eq!(anonymous.handle(), anonymous.id());
    }

    #[tokio::test]
    async fn test_terminate_fires_once() {
        let conn = connection(None);
        assert!(!conn.is_terminated());
        assert!(conn.terminate());
        assert!(!conn.terminate());
        // Already terminated: resolves immediately.
        conn.terminated().await;
    }

    #[test]
    fn test_info_text_form() {
        let conn = connection(Some("room"));
        conn.set_on_close("left");
        let info = conn.info();
        assert_eq!(info.method, "GET");
        assert_eq!(info.path, "/events");
        assert_eq!(info.on_close.as_deref(), Some("left"));
        let text = info.to_string();
        assert!(text.starts_with(&format!("id {} method GET path /events opened ", conn.id())));
        assert!(text.ends_with(" name room"));
    }
}
