use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};

use crate::error::ClientError;

/// Methods a [`RequestSpec`] may carry.
pub const SUPPORTED_METHODS: [Method; 7] =
    [Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::HEAD, Method::OPTIONS];

/// How a text body is turned into bytes before it is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyEncoding {
    #[default]
    Utf8,
    /// One byte per char; chars above `U+00FF` are rejected.
    Latin1,
    /// The text is a hex string.
    Hex,
    /// The text is standard base64.
    Base64,
}

impl BodyEncoding {
    pub fn encode(self, text: &str) -> Result<Bytes, ClientError> {
        match self {
            BodyEncoding::Utf8 => Ok(Bytes::copy_from_slice(text.as_bytes())),
            BodyEncoding::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c))
                        .map_err(|_e| ClientError::invalid_request(format!("char {c:?} is not latin1")))
                })
                .collect::<Result<Vec<u8>, _>>()
                .map(Bytes::from),
            BodyEncoding::Hex => hex::decode(text)
                .map(Bytes::from)
                .map_err(|e| ClientError::invalid_request(format!("invalid hex body: {e}"))),
            BodyEncoding::Base64 => STANDARD
                .decode(text)
                .map(Bytes::from)
                .map_err(|e| ClientError::invalid_request(format!("invalid base64 body: {e}"))),
        }
    }
}

/// Body attached to an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Bytes(Bytes),
    Text { text: String, encoding: BodyEncoding },
}

impl RequestBody {
    /// The bytes to put on the wire.
    pub fn to_bytes(&self) -> Result<Bytes, ClientError> {
        match self {
            RequestBody::Bytes(bytes) => Ok(bytes.clone()),
            RequestBody::Text { text, encoding } => encoding.encode(text),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for RequestBody {
    fn from(bytes: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(bytes))
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self::Text { text, encoding: BodyEncoding::Utf8 }
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        Self::from(text.to_owned())
    }
}

/// A single request to issue on a session.
///
/// Header names are case-insensitive and a name may hold several values; use
/// [`RequestSpec::header`] repeatedly to append to the list.
#[derive(Clone, PartialEq)]
pub struct RequestSpec {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<RequestBody>,
    resubmitted: bool,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), headers: HeaderMap::new(), body: None, resubmitted: false }
    }

    /// Appends one header value.
    pub fn header<K, V>(mut self, name: K, value: V) -> Result<Self, ClientError>
    where
        K: TryInto<HeaderName>,
        K::Error: fmt::Display,
        V: TryInto<HeaderValue>,
        V::Error: fmt::Display,
    {
        let name = name.try_into().map_err(|e| ClientError::invalid_request(format!("invalid header name: {e}")))?;
        let value = value.try_into().map_err(|e| ClientError::invalid_request(format!("invalid header value: {e}")))?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Merges `headers` into the request, appending to existing names.
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        let mut last_name = None;
        for (name, value) in headers {
            // `HeaderMap::into_iter` yields the name only for the first value of each entry
            if let Some(name) = name {
                last_name = Some(name);
            }
            if let Some(name) = &last_name {
                self.headers.append(name.clone(), value);
            }
        }
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn text_body(mut self, text: impl Into<String>, encoding: BodyEncoding) -> Self {
        self.body = Some(RequestBody::Text { text: text.into(), encoding });
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn header_map(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn request_body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    /// Whether this request is already the retry issued after a reconnect.
    pub fn is_resubmission(&self) -> bool {
        self.resubmitted
    }

    pub(crate) fn into_resubmission(mut self) -> Self {
        self.resubmitted = true;
        self
    }
}

impl fmt::Debug for RequestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSpec")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(|_| ".."))
            .field("resubmitted", &self.resubmitted)
            .finish()
    }
}
