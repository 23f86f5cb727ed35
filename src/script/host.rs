//! Host commands, independent of the script language.
//!
//! # Responsibilities
//! - Track the scope of the execution in progress
//! - Resolve a command's target (current request or a held handle)
//! - Implement every command scripts can call
//!
//! # Design Decisions
//! - Targeted writes to a handle that is gone succeed silently, so one
//!   departed peer never breaks a broadcast loop
//! - Lookups by handle (`close`, `info`, `on_close`) do report unknown handles

use std::sync::{Arc, Mutex, MutexGuard};

use crate::connections::{ConnectionInfo, ConnectionRegistry};
use crate::error::{Error, Result};
use crate::http::context::RequestContext;
use crate::lifecycle::Shutdown;
use crate::routing::{RouteInfo, RouteTable};
use crate::script::{commands, ExecutionScope};

/// Which response a command acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    /// The request of the running execution.
    Current,
    /// A held connection, by id or alias.
    Handle(&'a str),
}

struct HostInner {
    routes: Arc<RouteTable>,
    registry: Arc<ConnectionRegistry>,
    shutdown: Shutdown,
    event_name: String,
    scope: Mutex<Option<ExecutionScope>>,
}

/// Shared state behind the script commands. Cheap to clone.
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

/// Clears the installed scope when dropped.
pub struct ScopeGuard<'a> {
    host: &'a Host,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        *self.host.scope_slot() = None;
    }
}

impl Host {
    pub fn new(
        routes: Arc<RouteTable>,
        registry: Arc<ConnectionRegistry>,
        shutdown: Shutdown,
        event_name: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(HostInner {
                routes,
                registry,
                shutdown,
                event_name: event_name.into(),
                scope: Mutex::new(None),
            }),
        }
    }

    fn scope_slot(&self) -> MutexGuard<'_, Option<ExecutionScope>> {
        self.inner.scope.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `scope` visible to commands until the guard is dropped.
    pub fn enter(&self, scope: ExecutionScope) -> ScopeGuard<'_> {
        *self.scope_slot() = Some(scope);
        ScopeGuard { host: self }
    }

    fn current(&self, command: &'static str) -> Result<Arc<RequestContext>> {
        self.scope_slot()
            .as_ref()
            .and_then(|scope| scope.context.clone())
            .ok_or(Error::Context { command })
    }

    /// `Ok(None)` means a handle that no longer exists; callers treat it as a no-op.
    pub fn resolve(
        &self,
        command: &'static str,
        target: Target<'_>,
    ) -> Result<Option<Arc<RequestContext>>> {
        match target {
            Target::Current => self.current(command).map(Some),
            Target::Handle(handle) => {
                let context = self
                    .inner
                    .registry
                    .get(handle)
                    .map(|conn| Arc::clone(conn.context()));
                if context.is_none() {
                    tracing::debug!(command, handle, "Write to unknown connection ignored");
                }
                Ok(context)
            }
        }
    }

    pub fn respond(&self, target: Target<'_>, body: &[u8]) -> Result<()> {
        if let Some(ctx) = self.resolve("respond", target)? {
            ctx.write(body);
        }
        Ok(())
    }

    pub fn status(&self, target: Target<'_>, code: i64) -> Result<()> {
        match self.resolve("status", target)? {
            Some(ctx) => ctx.set_status(code),
            None => Ok(()),
        }
    }

    pub fn header(&self, target: Target<'_>, name: &str, value: &str) -> Result<()> {
        match self.resolve("header", target)? {
            Some(ctx) => ctx.set_header(name, value),
            None => Ok(()),
        }
    }

    pub fn flush(&self, target: Target<'_>) -> Result<()> {
        if let Some(ctx) = self.resolve("flush", target)? {
            ctx.flush();
        }
        Ok(())
    }

    /// A path parameter of the current request; missing reads as empty.
    pub fn param(&self, name: &str) -> Result<String> {
        let ctx = self.current("param")?;
        Ok(ctx.param(name).unwrap_or_default().to_string())
    }

    /// A query parameter; missing or empty values read as `default`.
    pub fn query(&self, name: &str, default: &str) -> Result<String> {
        let ctx = self.current("query")?;
        let value = ctx
            .request()
            .query_value(name)
            .filter(|value| !value.is_empty())
            .unwrap_or(default);
        Ok(value.to_string())
    }

    pub fn request_method(&self) -> Result<String> {
        Ok(self.current("request::method")?.request().method.clone())
    }

    pub fn request_path(&self) -> Result<String> {
        Ok(self.current("request::path")?.request().path.clone())
    }

    pub fn request_body(&self) -> Result<String> {
        Ok(self.current("request::body")?.request().body_text())
    }

    pub fn request_header(&self, name: &str) -> Result<String> {
        let ctx = self.current("request::header")?;
        Ok(ctx.request().header(name).unwrap_or_default().to_string())
    }

    /// Hold the current request as a streaming connection.
    pub fn hold(&self, alias: Option<&str>) -> Result<String> {
        let ctx = self.current("connection::hold")?;
        let handle = self.inner.registry.hold(Arc::clone(&ctx), alias)?;
        ctx.start_stream(&self.inner.event_name);
        Ok(handle)
    }

    pub fn close(&self, handle: &str) -> Result<()> {
        self.inner.registry.close(handle)
    }

    pub fn info(&self, handle: &str) -> Result<ConnectionInfo> {
        let conn = self
            .inner
            .registry
            .get(handle)
            .ok_or_else(|| Error::UnknownHandle(handle.to_string()))?;
        let mut info = conn.info();
        info.handle = handle.to_string();
        Ok(info)
    }

    /// Name the function to call with the handle when the peer disconnects.
    pub fn on_close(&self, handle: &str, callback: &str) -> Result<()> {
        if !is_identifier(callback) {
            return Err(Error::argument(
                "connection::on_close",
                format!("{callback:?} is not a function name"),
            ));
        }
        let conn = self
            .inner
            .registry
            .get(handle)
            .ok_or_else(|| Error::UnknownHandle(handle.to_string()))?;
        conn.set_on_close(callback);
        Ok(())
    }

    pub fn connections(&self) -> Vec<String> {
        self.inner.registry.list()
    }

    pub fn route(&self, method: &str, pattern: &str, body: &str) -> Result<()> {
        self.inner.routes.register(method, pattern, body)
    }

    pub fn route_list(&self) -> Vec<RouteInfo> {
        self.inner.routes.list()
    }

    /// Script output: to the scope's sink, or the log when there is none.
    pub fn print(&self, text: &str) {
        let scope = self.scope_slot().clone();
        match scope {
            Some(scope) => scope.emit(text),
            None => ExecutionScope::detached().emit(text),
        }
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.trigger();
    }

    /// Print help for every command, one command, or one of its subcommands.
    pub fn help(&self, topic: &[&str]) -> Result<()> {
        let Some((name, rest)) = topic.split_first() else {
            self.print("Available commands:");
            for cmd in commands::COMMANDS {
                for line in cmd.lines("  ") {
                    self.print(&line);
                }
            }
            return Ok(());
        };

        let top = commands::find(name)
            .ok_or_else(|| Error::argument("help", format!("unknown command {name:?}")))?;
        let mut cmd = top;
        for sub in rest {
            cmd = cmd.subcommand(sub).ok_or_else(|| {
                Error::argument("help", format!("{} has no subcommand {sub:?}", top.name))
            })?;
        }
        for line in cmd.lines("") {
            self.print(&line);
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
