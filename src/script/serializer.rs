//! Single-worker execution serializer.
//!
//! # Responsibilities
//! - Own the only handle to the script engine
//! - Run submitted scripts one at a time, in arrival order
//! - Reply to each caller through its own one-shot slot
//!
//! # Design Decisions
//! - The worker is a dedicated OS thread, so a long script never blocks
//!   the async runtime's workers
//! - A panicking engine call is reported as a script failure and the
//!   worker keeps serving
//! - After `stop`, queued executions still run; later submissions fail
//!   with `EngineStopped`
//! - Each execution runs inside its submitter's span, so script logs keep
//!   the request id

use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::observability::metrics;
use crate::script::engine::ScriptEngine;
use crate::script::ExecutionScope;

enum Message {
    Execute {
        script: String,
        scope: ExecutionScope,
        span: tracing::Span,
        reply: oneshot::Sender<Result<String>>,
    },
    Stop,
}

/// Handle to the engine worker. Share it behind an `Arc`.
pub struct ExecutionSerializer {
    tx: mpsc::UnboundedSender<Message>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionSerializer {
    /// Move `engine` onto a new worker thread.
    pub fn start<E: ScriptEngine>(engine: E) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = std::thread::Builder::new()
            .name("script-engine".to_string())
            .spawn(move || worker_loop(engine, rx))?;

        Ok(Self {
            tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue `script` and wait for its result.
    pub async fn execute(&self, script: impl Into<String>, scope: ExecutionScope) -> Result<String> {
        let (reply, result) = oneshot::channel();
        self.tx
            .send(Message::Execute {
                script: script.into(),
                scope,
                span: tracing::Span::current(),
                reply,
            })
            .map_err(|_| Error::EngineStopped)?;
        result.await.map_err(|_| Error::EngineStopped)?
    }

    /// Ask the worker to exit once everything queued so far has run.
    pub fn stop(&self) {
        let _ = self.tx.send(Message::Stop);
    }

    /// Stop and wait for the worker thread to exit.
    pub fn join(&self) {
        self.stop();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!("Script engine worker panicked");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for ExecutionSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionSerializer")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

fn worker_loop<E: ScriptEngine>(mut engine: E, mut rx: mpsc::UnboundedReceiver<Message>) {
    tracing::debug!("Script engine worker started");

    while let Some(message) = rx.blocking_recv() {
        let (script, scope, span, reply) = match message {
            Message::Execute {
                script,
                scope,
                span,
                reply,
            } => (script, scope, span, reply),
            Message::Stop => break,
        };

        let _entered = span.enter();
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| engine.execute(&script, scope)))
            .unwrap_or_else(|payload| Err(Error::Script(panic_message(payload.as_ref()))));

        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::record_execution(outcome, started);
        if let Err(e) = &result {
            tracing::debug!(error = %e, "Script execution failed");
        }

        // The caller may have given up waiting; the execution still counts.
        let _ = reply.send(result);
    }

    // Drain without running: dropped reply slots report EngineStopped.
    rx.close();
    tracing::debug!("Script engine worker stopped");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("script engine panicked: {detail}")
}
