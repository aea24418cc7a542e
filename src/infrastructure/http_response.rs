// HTTP response utilities: JSON errors and newline-delimited JSON streams
use axum::body::Body;
use axum::http::{header, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Serialize;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// `{"error": "..."}` with the given status.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response<Body> {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Serialize one value as a JSON line.
pub fn ndjson_line<T: Serialize>(value: &T) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    let mut line = BytesMut::with_capacity(json.len() + 1);
    line.put_slice(&json);
    line.put_u8(b'\n');
    Ok(line.freeze())
}

/// Create a streaming NDJSON response, one line per item
pub fn ndjson_stream<S, T>(stream: S) -> Result<Response<Body>, StatusCode>
where
    S: Stream<Item = T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let byte_stream = stream.map(|item| ndjson_line(&item));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
        .body(Body::from_stream(byte_stream))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Helper to create a streaming response from a receiver
pub fn stream_from_receiver<T>(mut rx: tokio::sync::mpsc::Receiver<T>) -> Response<Body>
where
    T: Serialize + Send + 'static,
{
    let stream = async_stream::stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    };

    match ndjson_stream(stream) {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}
