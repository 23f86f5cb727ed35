//! Event-stream record framing.
//!
//! A record is `event: <name>\n`, one `data: <line>\n` per payload line,
//! and a terminating blank line.

use axum::body::Bytes;

/// Frame one event record.
pub fn frame_event(event: &str, data: &str) -> Bytes {
    let mut record = String::with_capacity(event.len() + data.len() + 16);
    record.push_str("event: ");
    record.push_str(event);
    record.push('\n');
    for line in data.split('\n') {
        record.push_str("data: ");
        record.push_str(line);
        record.push('\n');
    }
    record.push('\n');
    Bytes::from(record)
}

/// Comment record used as a heartbeat; ignored by event-stream clients.
pub fn keep_alive() -> Bytes {
    Bytes::from_static(b": keep-alive\n\n")
}
