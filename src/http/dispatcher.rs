//! Per-request dispatch.
//!
//! # Responsibilities
//! - Match the request against the route table snapshot
//! - Run the route's script through the serializer with an explicit scope
//! - Turn failures into a server error while nothing is committed
//! - Keep a held request open until it is closed or the peer leaves
//!
//! # Held connections
//! ```text
//! script returns ──▶ held? ──no──▶ finish
//!                     │yes
//!                     ▼
//!         select! { terminated | disconnected | heartbeat tick }
//!           terminated   ──▶ finish
//!           disconnected ──▶ on_close callback (if any) ──▶ registry close ──▶ finish
//! ```
//! There is no hold timeout. A held request with no close and a live
//! peer keeps its task parked indefinitely.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::{interval_at, Interval, MissedTickBehavior};

use crate::connections::{CloseReason, Connection, ConnectionRegistry};
use crate::error::Error;
use crate::http::context::RequestContext;
use crate::http::request::RequestData;
use crate::http::response::ResponseSink;
use crate::observability::metrics;
use crate::routing::{Params, RouteTable};
use crate::script::{ExecutionScope, ExecutionSerializer};

/// How a held connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldEnd {
    /// Closed by a script, the admin API or shutdown.
    Closed,
    /// The client went away first.
    Disconnected,
}

/// Result of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    NotFound,
    Completed,
    Held(HoldEnd),
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::NotFound => "not_found",
            Outcome::Completed => "completed",
            Outcome::Held(HoldEnd::Closed) => "held_closed",
            Outcome::Held(HoldEnd::Disconnected) => "held_disconnected",
        }
    }
}

/// Routes requests to scripts. Cheap to clone; one clone per request task.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    registry: Arc<ConnectionRegistry>,
    serializer: Arc<ExecutionSerializer>,
    keepalive: Option<Duration>,
}

impl Dispatcher {
    /// A zero `keepalive` disables heartbeats on held connections.
    pub fn new(
        routes: Arc<RouteTable>,
        registry: Arc<ConnectionRegistry>,
        serializer: Arc<ExecutionSerializer>,
        keepalive: Duration,
    ) -> Self {
        Self {
            routes,
            registry,
            serializer,
            keepalive: (!keepalive.is_zero()).then_some(keepalive),
        }
    }

    /// Handle one request to completion, writing the response into `sink`.
    pub async fn dispatch(&self, request: RequestData, sink: ResponseSink) -> Outcome {
        let start = Instant::now();
        let method = request.method.clone();
        let path = request.path.clone();

        let Some(matched) = self.routes.match_route(&method, &path) else {
            let err = Error::Routing {
                method: method.clone(),
                path: path.clone(),
            };
            tracing::debug!(error = %err, "No matching route");
            let ctx = RequestContext::new(request, Params::new(), sink);
            ctx.not_found();
            ctx.finish();
            metrics::record_request(&method, ctx.status().as_u16(), start);
            return Outcome::NotFound;
        };

        let ctx = Arc::new(RequestContext::new(request, matched.params, sink));
        let scope = ExecutionScope::for_request(Arc::clone(&ctx));
        if let Err(e) = self.serializer.execute(matched.route.body.clone(), scope).await {
            let message = e.to_string();
            if ctx.fail(&message) {
                tracing::warn!(method = %method, path = %path, error = %message, "Script failed");
            } else {
                tracing::debug!(
                    method = %method,
                    path = %path,
                    error = %message,
                    "Script error after commit discarded"
                );
            }
        }

        let outcome = match self.registry.find_by_context(&ctx) {
            Some(conn) => Outcome::Held(self.wait_held(&conn).await),
            None => Outcome::Completed,
        };
        ctx.finish();

        let status = ctx.status().as_u16();
        metrics::record_request(&method, status, start);
        tracing::debug!(
            method = %method,
            path = %path,
            status,
            outcome = outcome.as_str(),
            "Request dispatched"
        );
        outcome
    }

    async fn wait_held(&self, conn: &Arc<Connection>) -> HoldEnd {
        let ctx = conn.context();
        let terminated = conn.terminated();
        let disconnected = ctx.disconnected();
        tokio::pin!(terminated, disconnected);

        let mut heartbeat = self.keepalive.map(|period| {
            let mut interval = interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let end = loop {
            tokio::select! {
                _ = &mut terminated => break HoldEnd::Closed,
                _ = &mut disconnected => break HoldEnd::Disconnected,
                _ = tick(&mut heartbeat) => ctx.keep_alive(),
            }
        };

        if end == HoldEnd::Disconnected {
            self.on_disconnect(conn).await;
        }
        end
    }

    async fn on_disconnect(&self, conn: &Arc<Connection>) {
        let handle = self.handle_of(conn);
        tracing::info!(handle = %handle, "Held connection disconnected");

        if let Some(callback) = conn.on_close() {
            let script = format!("{callback}({})", quote(&handle));
            if let Err(e) = self
                .serializer
                .execute(script, ExecutionScope::detached())
                .await
            {
                tracing::warn!(handle = %handle, callback = %callback, error = %e, "Close callback failed");
            }
        }

        match self.registry.close_with(conn.id(), CloseReason::Disconnected) {
            Ok(_) | Err(Error::UnknownHandle(_)) => {}
            Err(e) => tracing::warn!(handle = %handle, error = %e, "Failed to remove connection"),
        }
    }

    /// The alias while it still addresses this connection, else the id.
    fn handle_of(&self, conn: &Arc<Connection>) -> String {
        match self.registry.get(conn.handle()) {
            Some(found) if Arc::ptr_eq(&found, conn) => conn.handle().to_string(),
            _ => conn.id().to_string(),
        }
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// A script string literal holding `text`.
fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
