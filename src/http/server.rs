//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all script handler
//! - Wire up middleware (tracing, body limit, request ID)
//! - Bind server to listener
//! - Hand each request to the dispatcher on its own task
//!
//! # Design Decisions
//! - No request timeout layer: held connections stream indefinitely
//! - The dispatch task is detached from the handler future, so a client
//!   disconnect never cancels a script mid-execution; it runs in a
//!   `dispatch` span carrying the request id
//! - On shutdown, held connections are closed first so graceful drain
//!   can complete

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tracing::Instrument;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::HttpConfig;
use crate::connections::ConnectionRegistry;
use crate::http::dispatcher::Dispatcher;
use crate::http::request::{RequestData, X_REQUEST_ID};
use crate::http::response;
use crate::lifecycle::Shutdown;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub max_body_size: usize,
    pub send_queue_depth: usize,
}

/// HTTP server for scripted routes.
pub struct HttpServer {
    router: Router,
    registry: Arc<ConnectionRegistry>,
}

impl HttpServer {
    /// Create a new HTTP server around `dispatcher`.
    pub fn new(dispatcher: Dispatcher, registry: Arc<ConnectionRegistry>, http: &HttpConfig) -> Self {
        let state = AppState {
            dispatcher,
            max_body_size: http.max_body_size,
            send_queue_depth: http.send_queue_depth,
        };
        Self {
            router: Self::build_router(state),
            registry,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        let max_body_size = state.max_body_size;
        Router::new()
            .route("/", any(script_handler))
            .route("/{*path}", any(script_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
                    .layer(RequestBodyLimitLayer::new(max_body_size)),
            )
    }

    /// The router, for embedding or tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` triggers, then drain.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let registry = Arc::clone(&self.registry);
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.wait().await;
                let closed = registry.close_all();
                tracing::info!(closed, "Held connections closed, draining requests");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Catch-all handler: buffer the body, dispatch on a fresh task, stream the reply.
async fn script_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read request body");
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large\n").into_response();
        }
    };

    let data = RequestData::from_parts(&parts, body);
    let span = tracing::info_span!(
        "dispatch",
        request_id = data.request_id().unwrap_or_default(),
        method = %data.method,
        path = %data.path,
    );
    let (sink, pending) = response::bounded(state.send_queue_depth);
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(
        async move {
            dispatcher.dispatch(data, sink).await;
        }
        .instrument(span),
    );

    pending.into_response().await
}
