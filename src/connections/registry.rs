//! Registry of held connections.
//!
//! # Responsibilities
//! - Hold the current request under a generated id and optional alias
//! - Resolve handles (id or alias) to connections
//! - Close connections exactly once, dropping every index entry together
//! - Find the connection owning a given request context
//!
//! # Design Decisions
//! - One owned record per id; aliases and contexts are secondary indexes
//!   onto the id, so removal always goes through the id
//! - A single lock covers all three maps; removal is atomic
//! - Re-using a live alias points it at the newest connection; the older
//!   one stays reachable by its id

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::connections::connection::{generate_id, CloseReason, Connection, ConnectionInfo};
use crate::error::{Error, Result};
use crate::http::context::{ContextId, RequestContext};
use crate::observability::metrics;

#[derive(Debug, Default)]
struct Inner {
    by_id: HashMap<String, Arc<Connection>>,
    aliases: HashMap<String, String>,
    by_context: HashMap<ContextId, String>,
    next_seq: u64,
}

impl Inner {
    fn resolve(&self, handle: &str) -> Option<&Arc<Connection>> {
        self.by_id
            .get(handle)
            .or_else(|| self.aliases.get(handle).and_then(|id| self.by_id.get(id)))
    }

    fn remove(&mut self, id: &str) -> Option<Arc<Connection>> {
        let conn = self.by_id.remove(id)?;
        if let Some(alias) = conn.alias() {
            if self.aliases.get(alias).map(String::as_str) == Some(id) {
                self.aliases.remove(alias);
            }
        }
        self.by_context.remove(&conn.context().id());
        Some(conn)
    }

    /// The handle a listing should show: the alias while it still points here.
    fn display_handle(&self, conn: &Connection) -> String {
        match conn.alias() {
            Some(alias) if self.aliases.get(alias).map(String::as_str) == Some(conn.id()) => {
                alias.to_string()
            }
            _ => conn.id().to_string(),
        }
    }
}

/// Concurrency-safe map of handles to held connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hold `context` as a connection. Returns the alias if given, else the id.
    ///
    /// A context owns at most one connection; holding it again returns the
    /// existing handle.
    pub fn hold(&self, context: Arc<RequestContext>, alias: Option<&str>) -> Result<String> {
        if let Some(alias) = alias {
            if alias.is_empty() {
                return Err(Error::argument("connection hold", "alias must not be empty"));
            }
        }

        let mut inner = self.lock();
        if let Some(existing) = inner.by_context.get(&context.id()) {
            let handle = inner
                .by_id
                .get(existing)
                .map(|conn| inner.display_handle(conn))
                .unwrap_or_else(|| existing.clone());
            tracing::debug!(handle = %handle, "Request already held");
            return Ok(handle);
        }

        let id = loop {
            let candidate = generate_id();
            if !inner.by_id.contains_key(&candidate) {
                break candidate;
            }
        };
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let conn = Arc::new(Connection::new(
            id.clone(),
            alias.map(str::to_string),
            seq,
            Arc::clone(&context),
        ));
        if let Some(alias) = alias {
            if let Some(previous) = inner.aliases.insert(alias.to_string(), id.clone()) {
                tracing::debug!(alias, previous = %previous, "Alias moved to newer connection");
            }
        }
        inner.by_context.insert(context.id(), id.clone());
        inner.by_id.insert(id.clone(), conn);
        metrics::set_held_connections(inner.by_id.len());
        drop(inner);

        tracing::info!(
            id = %id,
            alias = alias.unwrap_or(""),
            path = %context.request().path,
            "Connection held"
        );
        Ok(alias.map(str::to_string).unwrap_or(id))
    }

    /// Resolve a handle (id or alias).
    pub fn get(&self, handle: &str) -> Option<Arc<Connection>> {
        self.lock().resolve(handle).cloned()
    }

    /// Terminate and remove a connection.
    ///
    /// Closing a handle that is not (or no longer) held is an error.
    pub fn close(&self, handle: &str) -> Result<()> {
        self.close_with(handle, CloseReason::Explicit).map(|_| ())
    }

    pub(crate) fn close_with(&self, handle: &str, reason: CloseReason) -> Result<Arc<Connection>> {
        let conn = {
            let mut inner = self.lock();
            let id = inner
                .resolve(handle)
                .map(|conn| conn.id().to_string())
                .ok_or_else(|| Error::UnknownHandle(handle.to_string()))?;
            let conn = inner
                .remove(&id)
                .ok_or_else(|| Error::UnknownHandle(handle.to_string()))?;
            metrics::set_held_connections(inner.by_id.len());
            conn
        };

        conn.terminate();
        metrics::record_connection_closed(reason.as_str());
        tracing::info!(id = %conn.id(), handle, reason = reason.as_str(), "Connection closed");
        Ok(conn)
    }

    /// Handles of all live connections, oldest first, each listed once.
    pub fn list(&self) -> Vec<String> {
        let inner = self.lock();
        let mut conns: Vec<&Arc<Connection>> = inner.by_id.values().collect();
        conns.sort_by_key(|conn| conn.seq());
        conns
            .into_iter()
            .map(|conn| inner.display_handle(conn))
            .collect()
    }

    /// Info records for all live connections, oldest first.
    pub fn infos(&self) -> Vec<ConnectionInfo> {
        let inner = self.lock();
        let mut conns: Vec<&Arc<Connection>> = inner.by_id.values().collect();
        conns.sort_by_key(|conn| conn.seq());
        conns
            .into_iter()
            .map(|conn| {
                let mut info = conn.info();
                info.handle = inner.display_handle(conn);
                info
            })
            .collect()
    }

    /// The connection holding `context`, if any.
    pub fn find_by_context(&self, context: &RequestContext) -> Option<Arc<Connection>> {
        let inner = self.lock();
        inner
            .by_context
            .get(&context.id())
            .and_then(|id| inner.by_id.get(id))
            .cloned()
    }

    /// Terminate every connection; used at shutdown.
    pub fn close_all(&self) -> usize {
        let ids: Vec<String> = self.lock().by_id.keys().cloned().collect();
        ids.iter()
            .filter(|id| self.close_with(id, CloseReason::Shutdown).is_ok())
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
