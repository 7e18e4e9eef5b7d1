//! Newline-delimited JSON token stream.
//!
//! Every token becomes one self-contained line `{"token":"..."}\n`, written in
//! production order as soon as it arrives. The stream simply ends when the
//! agent is done; there is no terminator frame.

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};
use gateway_core::types::TokenFrame;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Encode one token as a frame, newline included.
pub fn encode_frame(token: String) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(&TokenFrame { token })?;
    line.push(b'\n');
    Ok(line)
}

/// One frame per token, same order.
pub fn encode<S>(tokens: S) -> impl Stream<Item = Result<Vec<u8>, serde_json::Error>>
where
    S: Stream<Item = String>,
{
    tokens.map(encode_frame)
}

/// Streaming response fed from `tokens`. Dropping the response (client gone)
/// drops the receiver, which the producing side observes.
pub fn ndjson_response(tokens: mpsc::Receiver<String>) -> Response {
    let body = Body::from_stream(encode(ReceiverStream::new(tokens)));
    ([(CONTENT_TYPE, NDJSON_CONTENT_TYPE)], body).into_response()
}
