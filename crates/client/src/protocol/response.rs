use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tracing::warn;

use crate::error::ClientError;
use crate::protocol::RequestSpec;

/// Pseudo-header carrying the response status.
pub const STATUS_PSEUDO_HEADER: &str = ":status";

/// Response headers as reported by the transport, in arrival order.
///
/// Names may be in any case and include pseudo-headers. Values keep their raw
/// bytes, including obs-text; a `None` value marks a null entry.
pub type RawHeaders = Vec<(String, Option<HeaderValue>)>;

/// Status and headers of a response, available before the body is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// Parses the transport's raw header list.
    ///
    /// The status comes from the `:status` pseudo-header. Every other name
    /// starting with `:` is dropped, as are entries without a value; remaining
    /// names are lowercased.
    pub fn parse(raw: RawHeaders) -> Result<Self, ClientError> {
        let mut status = None;
        let mut headers = HeaderMap::with_capacity(raw.len());

        for (name, value) in raw {
            if name == STATUS_PSEUDO_HEADER {
                status = value;
                continue;
            }
            if name.starts_with(':') {
                continue;
            }
            let Some(value) = value else {
                continue;
            };

            let name = match HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()) {
                Ok(name) => name,
                Err(e) => {
                    warn!(header = %name, cause = %e, "skip invalid response header name");
                    continue;
                }
            };
            headers.append(name, value);
        }

        let status = status.ok_or_else(|| ClientError::invalid_response("missing :status pseudo-header"))?;
        let status = status
            .to_str()
            .ok()
            .and_then(|status| status.trim().parse::<u16>().ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(|| ClientError::invalid_response(format!("invalid status: {status:?}")))?;

        Ok(Self { status, headers })
    }
}

/// A fully received response.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    request: Arc<RequestSpec>,
}

impl Response {
    pub(crate) fn new(head: ResponseHead, body: Bytes, request: Arc<RequestSpec>) -> Self {
        Self { status: head.status, headers: head.headers, body, request }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// The request this response answers.
    pub fn request(&self) -> &RequestSpec {
        &self.request
    }
}
