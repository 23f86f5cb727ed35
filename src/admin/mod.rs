//! Admin API: introspection and control of a running server.
//!
//! Served on its own listener, behind a bearer token.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::connections::ConnectionRegistry;
use crate::routing::RouteTable;
use crate::script::ExecutionSerializer;

/// Shared state of the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub routes: Arc<RouteTable>,
    pub registry: Arc<ConnectionRegistry>,
    pub serializer: Arc<ExecutionSerializer>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", get(get_routes))
        .route("/admin/connections", get(get_connections))
        .route("/admin/connections/{handle}", delete(delete_connection))
        .route("/admin/eval", post(post_eval))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use crate::script::{EngineLimits, ExecutionScope, Host, RhaiEngine};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn state() -> AdminState {
        let routes = Arc::new(RouteTable::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let host = Host::new(
            Arc::clone(&routes),
            Arc::clone(&registry),
            Shutdown::new(),
            "message",
        );
        let serializer = Arc::new(
            ExecutionSerializer::start(RhaiEngine::new(host, EngineLimits::default())).unwrap(),
        );
        AdminState {
            routes,
            registry,
            serializer,
            api_key: Arc::from("secret"),
        }
    }

    fn request(method: &str, uri: &str, body: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_requires_bearer_token() {
        let app = setup_admin_router(state());
        let response = app
            .clone()
            .oneshot(request("GET", "/admin/status", "", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(request("GET", "/admin/status", "", Some("wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status_and_routes() {
        let state = state();
        state
            .serializer
            .execute(r#"route("GET", "/a/:id", "respond(param(\"id\"))")"#, ExecutionScope::detached())
            .await
            .unwrap();
        let app = setup_admin_router(state);

        let response = app
            .clone()
            .oneshot(request("GET", "/admin/status", "", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(status["status"], "operational");
        assert_eq!(status["routes"], 1);

        let response = app
            .oneshot(request("GET", "/admin/routes", "", Some("secret")))
            .await
            .unwrap();
        let routes: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(routes[0]["pattern"], "/a/:id");
        assert_eq!(routes[0]["params"][0], "id");
    }

    #[tokio::test]
    async fn test_close_unknown_connection_is_404() {
        let app = setup_admin_router(state());
        let response = app
            .oneshot(request("DELETE", "/admin/connections/nobody", "", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_eval_streams_output_and_result() {
        let app = setup_admin_router(state());
        let response = app
            .clone()
            .oneshot(request("POST", "/admin/eval", "print(\"hi\"); 40 + 2", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        assert_eq!(
            body_text(response).await,
            "event: output\ndata: hi\n\nevent: result\ndata: 42\n\n"
        );

        let response = app
            .oneshot(request("POST", "/admin/eval", "respond(1)", Some("secret")))
            .await
            .unwrap();
        let text = body_text(response).await;
        assert!(text.starts_with("event: error\ndata: "));
        assert!(text.contains("respond: not in request context"));
    }
}
