use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE},
        StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use futures_util::stream;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::admin::AdminState;
use crate::connections::ConnectionInfo;
use crate::error::Error;
use crate::http::sse;
use crate::routing::RouteInfo;
use crate::script::ExecutionScope;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub routes: usize,
    pub connections: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if state.serializer.is_stopped() {
            "stopping"
        } else {
            "operational"
        },
        routes: state.routes.len(),
        connections: state.registry.len(),
    })
}

pub async fn get_routes(State(state): State<AdminState>) -> Json<Vec<RouteInfo>> {
    Json(state.routes.list())
}

pub async fn get_connections(State(state): State<AdminState>) -> Json<Vec<ConnectionInfo>> {
    Json(state.registry.infos())
}

pub async fn delete_connection(
    State(state): State<AdminState>,
    Path(handle): Path<String>,
) -> Response {
    match state.registry.close(&handle) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e @ Error::UnknownHandle(_)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Run the body as a script and stream its output, then its result or error.
pub async fn post_eval(State(state): State<AdminState>, script: String) -> Response {
    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();

    let output = tx.clone();
    let scope = ExecutionScope::detached().with_output(Arc::new(move |text: &str| {
        let _ = output.send(sse::frame_event("output", text));
    }));

    let serializer = Arc::clone(&state.serializer);
    tokio::spawn(async move {
        let last = match serializer.execute(script, scope).await {
            Ok(result) if result.is_empty() => None,
            Ok(result) => Some(sse::frame_event("result", &result)),
            Err(e) => Some(sse::frame_event("error", &e.to_string())),
        };
        if let Some(record) = last {
            let _ = tx.send(record);
        }
    });

    let records = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|record| (Ok::<_, Infallible>(record), rx))
    });

    (
        [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
        Body::from_stream(records),
    )
        .into_response()
}
