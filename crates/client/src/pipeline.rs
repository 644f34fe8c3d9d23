//! Issues one request on a session and collects the response.
//!
//! The pipeline works against a single [`Session`] snapshot and never
//! reconnects; retry policy lives in [`crate::ConnectionSession`]. Transport
//! faults observed here mark the session as [`SessionStatus::Error`] so the
//! next request reconnects.
//!
//! [`SessionStatus::Error`]: crate::SessionStatus::Error

use std::str::FromStr;
use std::sync::Arc;

use futures::StreamExt;
use http::uri::PathAndQuery;
use http::{HeaderName, HeaderValue};
use tracing::{debug, error, trace};

use crate::assemble::BodyStrategy;
use crate::ensure;
use crate::error::{ClientError, TransportError};
use crate::protocol::{RequestBody, RequestSpec, Response, ResponseHead, SUPPORTED_METHODS};
use crate::session::Session;
use crate::transport::{IncomingStream, RequestHead, StreamEvent};

/// Sends `request` on `session` and waits for the complete response.
pub(crate) async fn execute(session: &Session, request: RequestSpec) -> Result<Response, ClientError> {
    let head = request_head(&request)?;
    let body = request.request_body().map(RequestBody::to_bytes).transpose()?;
    let request = Arc::new(request);

    debug!(generation = session.generation(), method = %head.method, path = %head.path, "send request");

    // the incoming half is returned by `open`, so the response is observed
    // before any body byte is written
    let (mut outgoing, mut incoming) =
        session.handle().open(head, body.is_none()).await.map_err(|e| fault(session, ClientError::stream(e)))?;

    let write_error = match body {
        Some(body) => {
            trace!(size = body.len(), "write request body");
            outgoing.write(body, true).await.err()
        }
        None => None,
    };

    // a peer may answer and reset the stream before reading the whole body,
    // the response still stands in that case
    let head = match (read_head(&mut incoming).await, write_error) {
        (Ok(head), None) => head,
        (Ok(head), Some(e)) => {
            debug!(cause = %e, "response arrived although the request body was not fully written");
            head
        }
        (Err(_), Some(e)) => return Err(fault(session, ClientError::stream(e))),
        (Err(e), None) => return Err(fault(session, e)),
    };
    debug!(status = %head.status, "received response head");

    let strategy = BodyStrategy::select(&head.headers)?;
    let body = strategy.assemble(&mut incoming).await.map_err(|e| fault(session, e))?;

    drop(outgoing);
    Ok(Response::new(head, body, request))
}

fn request_head(request: &RequestSpec) -> Result<RequestHead, ClientError> {
    let method = request.method();
    ensure!(SUPPORTED_METHODS.contains(method), ClientError::invalid_request(format!("unsupported method: {method}")));

    let path = request.path();
    ensure!(path.starts_with('/'), ClientError::invalid_request(format!("path must start with '/': {path:?}")));
    PathAndQuery::from_str(path).map_err(|e| ClientError::invalid_request(format!("invalid path {path:?}: {e}")))?;

    let headers = request.header_map();
    if let Some(name) = headers.iter().find_map(|(name, value)| is_connection_specific(name, value).then_some(name)) {
        return Err(ClientError::invalid_request(format!("connection-specific header not allowed: {name}")));
    }

    Ok(RequestHead { method: method.clone(), path: path.to_string(), headers: headers.clone() })
}

/// Headers HTTP/2 forbids on a request; `te` is only allowed as `trailers`.
fn is_connection_specific(name: &HeaderName, value: &HeaderValue) -> bool {
    match name.as_str() {
        "connection" | "keep-alive" | "proxy-connection" | "transfer-encoding" | "upgrade" => true,
        "te" => value != "trailers",
        _ => false,
    }
}

async fn read_head(incoming: &mut IncomingStream) -> Result<ResponseHead, ClientError> {
    match incoming.next().await {
        Some(Ok(StreamEvent::Response(raw))) => ResponseHead::parse(raw),
        Some(Ok(StreamEvent::Data(_))) => Err(ClientError::invalid_response("body data before response headers")),
        Some(Ok(StreamEvent::End)) => {
            Err(ClientError::stream(TransportError::protocol("stream ended before response headers")))
        }
        Some(Err(e)) => Err(ClientError::stream(e)),
        None => Err(ClientError::stream(TransportError::protocol("stream closed before response headers"))),
    }
}

fn fault(session: &Session, e: ClientError) -> ClientError {
    if e.is_transport_fault() {
        error!(generation = session.generation(), cause = %e, "request failed, session marked as broken");
        session.mark_error();
    }
    e
}
