//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use scriptd::config::ServerConfig;
use scriptd::connections::ConnectionRegistry;
use scriptd::lifecycle::{Application, Shutdown};
use scriptd::script::{ExecutionScope, ExecutionSerializer};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A server running on a loopback port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub registry: Arc<ConnectionRegistry>,
    pub serializer: Arc<ExecutionSerializer>,
    pub task: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Run a script with no request context, as the admin eval would.
    pub async fn eval(&self, script: &str) -> String {
        self.serializer
            .execute(script, ExecutionScope::detached())
            .await
            .expect("script failed")
    }

    /// Wait until `handle` is held.
    pub async fn wait_for_connection(&self, handle: &str) {
        for _ in 0..400 {
            if self.registry.get(handle).is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("connection {handle} was never held");
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop")
            .expect("server task panicked");
    }
}

/// Start a server with default config and the given startup script.
pub async fn start_server(script: &str) -> TestServer {
    start_server_with(ServerConfig::default(), script).await
}

pub async fn start_server_with(config: ServerConfig, script: &str) -> TestServer {
    let app = Application::new(config).expect("engine worker");
    app.eval(script).await.expect("startup script failed");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = app.shutdown_handle();
    let registry = Arc::clone(app.registry());
    let serializer = Arc::clone(app.serializer());

    let task = tokio::spawn(async move {
        app.serve(listener).await.map_err(|e| e.to_string()).unwrap();
    });

    TestServer {
        addr,
        shutdown,
        registry,
        serializer,
        task,
    }
}

/// Reads event records off a streaming response.
pub struct EventReader {
    stream: futures_util::stream::BoxStream<'static, reqwest::Result<axum::body::Bytes>>,
    buffer: String,
}

impl EventReader {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            stream: response.bytes_stream().boxed(),
            buffer: String::new(),
        }
    }

    /// Next complete record (up to and including the blank line), or None at end of body.
    pub async fn next_record(&mut self) -> Option<String> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                return Some(self.buffer.drain(..end + 2).collect());
            }
            match tokio::time::timeout(Duration::from_secs(5), self.stream.next())
                .await
                .expect("timed out waiting for event")
            {
                Some(chunk) => self
                    .buffer
                    .push_str(&String::from_utf8_lossy(&chunk.expect("stream error"))),
                None => return None,
            }
        }
    }
}
