//! The seam between the session logic and the multiplexed transport.
//!
//! A [`Transport`] opens [`TransportHandle`]s to an origin. A handle opens
//! independent request streams, answers keepalive pings, and reports when the
//! underlying connection goes away. Each request stream is split in two
//! halves: an [`OutgoingStream`] used to write the request body and an
//! [`IncomingStream`] of [`StreamEvent`]s carrying the response.
//!
//! The incoming half is handed out together with the outgoing half, so the
//! response is observed from the moment the stream is opened and can never be
//! missed, even if the peer answers before the request body is written.
//!
//! [`h2`] provides the implementation on top of the `h2` crate.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use http::{HeaderMap, Method};

#[cfg(test)]
use mockall::automock;

use crate::config::{Origin, TrustAnchor};
use crate::error::TransportError;
use crate::protocol::RawHeaders;

pub mod h2;

/// One event on the response side of a request stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Response headers, including the `:status` pseudo-header.
    Response(RawHeaders),
    /// A chunk of the raw response body.
    Data(Bytes),
    /// The peer finished the response body.
    End,
}

impl StreamEvent {
    /// Returns true if this event terminates the stream
    #[inline]
    pub fn is_end(&self) -> bool {
        matches!(self, StreamEvent::End)
    }
}

/// Response side of a request stream; an `Err` item is a stream fault.
pub type IncomingStream = BoxStream<'static, Result<StreamEvent, TransportError>>;

/// What the transport needs to start a request stream.
///
/// Method and path travel as pseudo-headers; `headers` are the caller's
/// application headers and cannot contain pseudo-header names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
}

/// Opens sessions to an origin.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Resolves once the session is ready for requests.
    async fn connect(
        &self,
        origin: &Origin,
        trust_anchor: Option<TrustAnchor>,
    ) -> Result<Arc<dyn TransportHandle>, TransportError>;
}

/// A live session to one origin.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransportHandle: Send + Sync + 'static {
    /// Opens a request stream. With `end_of_stream` the request has no body.
    async fn open(
        &self,
        head: RequestHead,
        end_of_stream: bool,
    ) -> Result<(Box<dyn OutgoingStream>, IncomingStream), TransportError>;

    /// Sends a liveness probe and returns its round-trip time.
    async fn ping(&self) -> Result<Duration, TransportError>;

    /// Gracefully shuts the session down; resolves once the transport confirms.
    async fn close(&self) -> Result<(), TransportError>;

    /// Whether the session is already closed or destroyed.
    fn is_closed(&self) -> bool;

    /// Resolves when the session ends: `Ok` on a graceful close, `Err` on a fault.
    fn closed(&self) -> BoxFuture<'static, Result<(), TransportError>>;
}

/// Request side of a request stream.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OutgoingStream: Send {
    async fn write(&mut self, data: Bytes, end_of_stream: bool) -> Result<(), TransportError>;
}

impl fmt::Debug for dyn TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle").field("closed", &self.is_closed()).finish()
    }
}

impl fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transport")
    }
}
