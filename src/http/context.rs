//! Per-request response state and the commit protocol.
//!
//! # States
//! ```text
//! Open ──first write / flush / heartbeat / finish──▶ Committed (terminal)
//! ```
//! While Open, status and header mutations only touch memory. Commit sends
//! the head exactly once; later status/header calls succeed with no effect.
//!
//! Body bytes are buffered. A plain response sends the buffer on flush,
//! on finish, or once it reaches [`PLAIN_CHUNK_SIZE`]; a plain response is
//! never cut short, however slowly the client reads.
//!
//! A held context is additionally in event-stream mode: each flush emits
//! the buffer as one event record. A stream whose client lets the send
//! queue fill up is stalled, which the dispatcher sees as a disconnect.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use axum::body::Bytes;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::error::{Error, Result};
use crate::http::request::RequestData;
use crate::http::response::{Delivery, ResponseHead, ResponseSink};
use crate::http::sse;
use crate::routing::Params;

static CONTEXT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of a request context, used to find the connection holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        Self(CONTEXT_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Buffered plain body bytes are sent once they reach this size.
pub const PLAIN_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug)]
struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    committed: bool,
    /// Event name, once the context is in event-stream mode.
    event: Option<String>,
    pending: Vec<u8>,
    sink: ResponseSink,
}

impl ResponseState {
    fn commit(&mut self) {
        if self.committed {
            return;
        }
        self.committed = true;
        self.sink.send_head(ResponseHead {
            status: self.status,
            headers: self.headers.clone(),
        });
    }

    /// Send buffered plain bytes. On a full queue they stay buffered.
    fn push_plain(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let chunk = Bytes::from(std::mem::take(&mut self.pending));
        if let Delivery::Full(chunk) = self.sink.try_send_body(chunk) {
            self.pending = Vec::from(chunk);
        }
    }

    /// Emit buffered stream bytes as one event record.
    fn push_record(&mut self) {
        let Some(event) = &self.event else {
            return;
        };
        if self.pending.is_empty() {
            return;
        }
        let data = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        let record = sse::frame_event(event, &data);
        self.send_stream(record);
    }

    fn send_stream(&mut self, chunk: Bytes) {
        if let Delivery::Full(_) = self.sink.try_send_body(chunk) {
            tracing::warn!("Stream client is not reading, dropping it");
            self.sink.stall();
        }
    }

    fn push(&mut self) {
        if self.event.is_some() {
            self.push_record();
        } else {
            self.push_plain();
        }
    }
}

/// Mutable response state of one request, shared with any connection holding it.
#[derive(Debug)]
pub struct RequestContext {
    id: ContextId,
    request: RequestData,
    params: Params,
    state: Mutex<ResponseState>,
}

impl RequestContext {
    /// New Open context with status 200 and no headers.
    pub fn new(request: RequestData, params: Params, sink: ResponseSink) -> Self {
        Self {
            id: ContextId::next(),
            request,
            params,
            state: Mutex::new(ResponseState {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                committed: false,
                event: None,
                pending: Vec::new(),
                sink,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ResponseState> {
        // A poisoned lock only means a writer panicked mid-update; the state is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn request(&self) -> &RequestData {
        &self.request
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Current status: pending while Open, sent once Committed.
    pub fn status(&self) -> StatusCode {
        self.lock().status
    }

    /// Set the pending status; no effect after commit.
    pub fn set_status(&self, code: i64) -> Result<()> {
        let status = u16::try_from(code)
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(|| {
                Error::argument("status", format!("expected integer in 100..=999, got {code}"))
            })?;

        let mut state = self.lock();
        if state.committed {
            tracing::trace!(context = %self.id, %status, "Status ignored after commit");
            return Ok(());
        }
        state.status = status;
        Ok(())
    }

    /// Set a pending header, replacing any previous value; no effect after commit.
    pub fn set_header(&self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::argument("header", format!("invalid header name {name:?}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::argument("header", format!("invalid value for {name}")))?;

        let mut state = self.lock();
        if state.committed {
            tracing::trace!(context = %self.id, header = %name, "Header ignored after commit");
            return Ok(());
        }
        state.headers.insert(name, value);
        Ok(())
    }

    /// Commit if needed and append body bytes.
    ///
    /// In event-stream mode the bytes wait for the next flush.
    pub fn write(&self, bytes: &[u8]) {
        let mut state = self.lock();
        state.commit();
        state.pending.extend_from_slice(bytes);
        if state.event.is_none() && state.pending.len() >= PLAIN_CHUNK_SIZE {
            state.push_plain();
        }
    }

    /// Commit if needed and push buffered bytes to the transport.
    pub fn flush(&self) {
        let mut state = self.lock();
        state.commit();
        state.push();
    }

    /// Switch to event-stream mode. Defaults the stream headers while still Open.
    ///
    /// Bytes written before the switch go out unframed.
    pub fn start_stream(&self, event: &str) {
        let mut state = self.lock();
        if state.event.is_some() {
            return;
        }
        if !state.committed {
            state
                .headers
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static("text/event-stream"));
            state
                .headers
                .entry(CACHE_CONTROL)
                .or_insert(HeaderValue::from_static("no-cache"));
        }
        state.push_plain();
        state.event = Some(event.to_string());
    }

    /// Heartbeat for a held stream; commits if nothing was sent yet.
    pub fn keep_alive(&self) {
        let mut state = self.lock();
        if state.event.is_none() {
            return;
        }
        state.commit();
        state.send_stream(sse::keep_alive());
    }

    /// Commit a server error carrying `message`, unless already committed.
    ///
    /// Returns false when the error had to be discarded.
    pub fn fail(&self, message: &str) -> bool {
        self.commit_plain(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Commit the not-found outcome.
    pub fn not_found(&self) -> bool {
        self.commit_plain(StatusCode::NOT_FOUND, "404 page not found\n")
    }

    fn commit_plain(&self, status: StatusCode, body: &str) -> bool {
        let mut state = self.lock();
        if state.committed {
            return false;
        }
        state.status = status;
        state.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        state.commit();
        state.pending.clear();
        state.pending.extend_from_slice(body.as_bytes());
        true
    }

    /// Commit if needed, send everything still buffered, and end the body.
    pub fn finish(&self) {
        let mut state = self.lock();
        state.commit();
        if state.event.is_some() {
            state.push_record();
        } else if !state.pending.is_empty() {
            let tail = Bytes::from(std::mem::take(&mut state.pending));
            state.sink.send_last(tail);
        }
        state.sink.close();
    }

    /// Resolves when the client disconnects or stops reading a stream, or
    /// at once if the body already ended.
    pub fn disconnected(&self) -> impl Future<Output = ()> + Send + 'static {
        self.lock().sink.disconnected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::{self, PendingResponse};
    use axum::http::Method;

    fn context() -> (RequestContext, PendingResponse) {
        let (sink, pending) = response::channel();
        let request = RequestData::new(Method::GET, "/", "");
        (RequestContext::new(request, Params::new(), sink), pending)
    }

    #[tokio::test]
    async fn test_status_after_write_has_no_effect() {
        let (ctx, pending) = context();
        ctx.set_status(201).unwrap();
        ctx.write(b"hello");
        ctx.set_status(500).unwrap();
        ctx.set_header("X-Late", "1").unwrap();
        ctx.finish();

        let (head, body) = pending.collect().await.unwrap();
        assert_eq!(head.status, StatusCode::CREATED);
        assert!(head.headers.get("x-late").is_none());
        assert_eq!(&body[..], b"hello");
        assert_eq!(ctx.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_header_last_write_wins() {
        let (ctx, pending) = context();
        ctx.set_header("X-Mode", "a").unwrap();
        ctx.set_header("x-mode", "b").unwrap();
        ctx.finish();

        let (head, _) = pending.collect().await.unwrap();
        assert_eq!(head.headers.get_all("x-mode").iter().count(), 1);
        assert_eq!(head.headers["x-mode"], "b");
    }

    #[test]
    fn test_invalid_status_and_header() {
        let (ctx, _pending) = context();
        assert!(matches!(ctx.set_status(42), Err(Error::Argument { .. })));
        assert!(matches!(ctx.set_status(-1), Err(Error::Argument { .. })));
        assert!(matches!(ctx.set_header("bad name", "v"), Err(Error::Argument { .. })));
        assert!(matches!(ctx.set_header("X-Ok", "line\nbreak"), Err(Error::Argument { .. })));
    }

    #[tokio::test]
    async fn test_fail_before_and_after_commit() {
        let (ctx, pending) = context();
        assert!(ctx.fail("boom"));
        assert!(!ctx.fail("again"));
        ctx.finish();
        let (head, body) = pending.collect().await.unwrap();
        assert_eq!(head.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(&body[..], b"boom");

        let (ctx, pending) = context();
        ctx.write(b"partial");
        assert!(!ctx.fail("too late"));
        ctx.finish();
        let (head, body) = pending.collect().await.unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(&body[..], b"partial");
    }

    #[tokio::test]
    async fn test_stream_mode_frames_on_flush() {
        let (ctx, mut pending) = context();
        ctx.start_stream("message");
        ctx.write(b"pi");
        ctx.write(b"ng");
        ctx.flush();

        let head = pending.head().await.unwrap();
        assert_eq!(head.headers[CONTENT_TYPE], "text/event-stream");
        assert_eq!(head.headers[CACHE_CONTROL], "no-cache");
        assert_eq!(
            &pending.next_chunk().await.unwrap()[..],
            b"event: message\ndata: ping\n\n"
        );

        ctx.write(b"tail");
        ctx.finish();
        assert_eq!(
            &pending.next_chunk().await.unwrap()[..],
            b"event: message\ndata: tail\n\n"
        );
        assert!(pending.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_keeps_script_content_type() {
        let (ctx, mut pending) = context();
        ctx.set_header("Content-Type", "text/plain").unwrap();
        ctx.start_stream("message");
        ctx.keep_alive();

        let head = pending.head().await.unwrap();
        assert_eq!(head.headers[CONTENT_TYPE], "text/plain");
        assert_eq!(&pending.next_chunk().await.unwrap()[..], b": keep-alive\n\n");
    }

    #[tokio::test]
    async fn test_plain_body_survives_a_slow_reader() {
        let (sink, pending) = response::bounded(1);
        let ctx = RequestContext::new(RequestData::new(Method::GET, "/", ""), Params::new(), sink);
        let piece = vec![b'x'; PLAIN_CHUNK_SIZE / 4];
        for _ in 0..40 {
            ctx.write(&piece);
        }
        ctx.finish();

        let (_, body) = pending.collect().await.unwrap();
        assert_eq!(body.len(), piece.len() * 40);
    }

    #[tokio::test]
    async fn test_unread_stream_stalls_and_counts_as_disconnect() {
        let (sink, mut pending) = response::bounded(2);
        let ctx = RequestContext::new(RequestData::new(Method::GET, "/", ""), Params::new(), sink);
        ctx.start_stream("message");
        let gone = ctx.disconnected();

        for i in 0..5 {
            ctx.write(format!("record {i}").as_bytes());
            ctx.flush();
        }
        tokio::time::timeout(std::time::Duration::from_secs(1), gone)
            .await
            .expect("stalled stream was not reported as gone");

        pending.head().await.unwrap();
        assert_eq!(
            &pending.next_chunk().await.unwrap()[..],
            b"event: message\ndata: record 0\n\n"
        );
        assert_eq!(
            &pending.next_chunk().await.unwrap()[..],
            b"event: message\ndata: record 1\n\n"
        );
        assert!(pending.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn test_disconnected_fires_when_client_drops() {
        let (ctx, pending) = context();
        let gone = ctx.disconnected();
        drop(pending);
        gone.await;
    }

    #[test]
    fn test_context_ids_are_unique() {
        let (a, _pa) = context();
        let (b, _pb) = context();
        assert_ne!(a.id(), b.id());
    }
}
