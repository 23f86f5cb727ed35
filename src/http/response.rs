//! Response plumbing between a dispatch task and the HTTP handler.
//!
//! # Responsibilities
//! - Carry the committed status line and headers to the handler, once
//! - Stream body chunks to the client through a bounded queue
//! - Expose a signal that fires when the client goes away or stops reading
//!
//! # Data Flow
//! ```text
//! dispatch task                            axum handler
//!   ResponseSink::send_head ──oneshot────▶ PendingResponse (awaits head)
//!   ResponseSink::try_send_body ──mpsc(N)─▶ streaming Body
//! ```
//!
//! # Design Decisions
//! - The dispatch task owns the sink; the handler only ever reads
//! - Writers never wait for queue space. The engine thread must not block
//!   on one slow client, so a full queue is reported back to the caller
//! - Dropping the body receiver (client disconnect) is what closes the
//!   channel, so "peer gone" is observable from the sending side
//! - A stalled sink counts as a disconnect for anyone waiting on one

use std::convert::Infallible;
use std::future::Future;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::stream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};

/// Body chunks a response may have queued before the client reads them.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Status line and headers, sent once at commit.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// What happened to a body chunk handed to the sink.
#[derive(Debug)]
pub enum Delivery {
    Queued,
    /// The client has not drained the queue; the chunk is handed back.
    Full(Bytes),
    /// The client is gone or the body already ended; the chunk was dropped.
    Gone,
}

/// Write side of a response, owned by a request context.
#[derive(Debug)]
pub struct ResponseSink {
    head: Option<oneshot::Sender<ResponseHead>>,
    body: Option<mpsc::Sender<Bytes>>,
    stalled: watch::Sender<bool>,
}

/// Read side of a response, owned by the HTTP handler.
#[derive(Debug)]
pub struct PendingResponse {
    head: oneshot::Receiver<ResponseHead>,
    body: mpsc::Receiver<Bytes>,
}

/// Create a connected sink/pending pair with the default queue depth.
pub fn channel() -> (ResponseSink, PendingResponse) {
    bounded(DEFAULT_QUEUE_DEPTH)
}

/// Create a connected sink/pending pair holding at most `depth` unread chunks.
pub fn bounded(depth: usize) -> (ResponseSink, PendingResponse) {
    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel(depth.max(1));
    let (stalled, _) = watch::channel(false);
    (
        ResponseSink {
            head: Some(head_tx),
            body: Some(body_tx),
            stalled,
        },
        PendingResponse {
            head: head_rx,
            body: body_rx,
        },
    )
}

impl ResponseSink {
    /// Send the head. Only the first call has any effect.
    pub fn send_head(&mut self, head: ResponseHead) {
        if let Some(tx) = self.head.take() {
            let _ = tx.send(head);
        }
    }

    /// Queue a body chunk without waiting.
    pub fn try_send_body(&mut self, chunk: Bytes) -> Delivery {
        let Some(tx) = &self.body else {
            return Delivery::Gone;
        };
        match tx.try_send(chunk) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(chunk)) => Delivery::Full(chunk),
            Err(TrySendError::Closed(_)) => Delivery::Gone,
        }
    }

    /// Queue the last chunk of a body, waiting for room on a background
    /// task if the queue is full. The body ends once it is delivered.
    pub fn send_last(&mut self, chunk: Bytes) {
        let Delivery::Full(chunk) = self.try_send_body(chunk) else {
            return;
        };
        let (Some(tx), Ok(runtime)) = (self.body.clone(), tokio::runtime::Handle::try_current())
        else {
            tracing::debug!("Response tail dropped: queue full and no runtime");
            return;
        };
        runtime.spawn(async move {
            let _ = tx.send(chunk).await;
        });
    }

    /// Give up on a client that stopped reading: end the body and wake
    /// every `disconnected` waiter.
    pub fn stall(&mut self) {
        self.head.take();
        self.body.take();
        self.stalled.send_replace(true);
    }

    /// End the response body.
    pub fn close(&mut self) {
        self.head.take();
        self.body.take();
    }

    pub fn is_closed(&self) -> bool {
        self.body.as_ref().map_or(true, |tx| tx.is_closed())
    }

    /// Resolves when the client disconnects or the sink stalls, or at once
    /// if the body already ended.
    ///
    /// The future holds a sender clone, which keeps the body open until
    /// the future is dropped.
    pub(crate) fn disconnected(&self) -> impl Future<Output = ()> + Send + 'static {
        let body = self.body.clone();
        let mut stalled = self.stalled.subscribe();
        async move {
            let Some(body) = body else {
                return;
            };
            let sink_dropped = async { stalled.wait_for(|stalled| *stalled).await.is_err() };
            tokio::select! {
                _ = body.closed() => {}
                dropped = sink_dropped => {
                    // Dropped without stalling: only the client can end this wait.
                    if dropped {
                        body.closed().await;
                    }
                }
            }
        }
    }
}

impl PendingResponse {
    /// Wait for the head. `None` if the sink was dropped without committing.
    pub async fn head(&mut self) -> Option<ResponseHead> {
        (&mut self.head).await.ok()
    }

    /// Next body chunk, or `None` once the body has ended.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.body.recv().await
    }

    /// Wait for the head and the complete body.
    pub async fn collect(mut self) -> Option<(ResponseHead, Bytes)> {
        let head = self.head().await?;
        let mut body = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            body.extend_from_slice(&chunk);
        }
        Some((head, Bytes::from(body)))
    }

    /// Wait for the commit and turn the pending response into a streaming axum response.
    pub async fn into_response(mut self) -> Response {
        let Some(head) = self.head().await else {
            return (StatusCode::INTERNAL_SERVER_ERROR, "handler produced no response")
                .into_response();
        };

        let chunks = stream::unfold(self.body, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), rx))
        });

        let mut response = Response::new(Body::from_stream(chunks));
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers;
        response
    }
}
