//! Response body assembly.
//!
//! The strategy is picked once from the response headers, before the body is
//! read, and drives the whole body:
//!
//! 1. `content-encoding` present: decode through [`Decoder`]
//! 2. `content-length` present: copy into a buffer sized up front
//! 3. otherwise: keep every chunk and concatenate at the end

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http::HeaderMap;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use tracing::{debug, trace, warn};

use crate::decompress::{Decoder, decompress};
use crate::error::{ClientError, TransportError};
use crate::transport::StreamEvent;

/// Upper bound on the buffer reserved from a declared `content-length`.
const MAX_PREALLOCATION: usize = 1024 * 1024;

/// How the body of one response is collected.
pub(crate) enum BodyStrategy {
    Decompress(Decoder),
    Sized { length: usize },
    Concat,
}

impl BodyStrategy {
    /// Picks the strategy for a response.
    ///
    /// Fails with [`ClientError::UnsupportedEncoding`] when the encoding has no
    /// decoder; nothing has been read from the body at that point.
    pub(crate) fn select(headers: &HeaderMap) -> Result<Self, ClientError> {
        if let Some(encoding) = headers.get(CONTENT_ENCODING) {
            let encoding = encoding
                .to_str()
                .map_err(|_e| ClientError::unsupported_encoding(String::from_utf8_lossy(encoding.as_bytes())))?;
            return Decoder::select(encoding).map(BodyStrategy::Decompress);
        }

        if let Some(length) = headers.get(CONTENT_LENGTH) {
            match length.to_str().ok().and_then(|length| length.trim().parse::<usize>().ok()) {
                Some(length) => return Ok(BodyStrategy::Sized { length }),
                None => warn!(content_length = ?length, "ignore invalid content-length"),
            }
        }

        Ok(BodyStrategy::Concat)
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            BodyStrategy::Decompress(_) => "decompress",
            BodyStrategy::Sized { .. } => "sized",
            BodyStrategy::Concat => "concat",
        }
    }

    /// Reads the body to its end.
    ///
    /// Partially collected bytes are dropped on any failure.
    pub(crate) async fn assemble<S>(self, events: &mut S) -> Result<Bytes, ClientError>
    where
        S: Stream<Item = Result<StreamEvent, TransportError>> + Unpin,
    {
        debug!(strategy = self.name(), "assemble response body");
        match self {
            BodyStrategy::Decompress(decoder) => decompress(decoder, events).await,
            BodyStrategy::Sized { length } => sized(length, events).await,
            BodyStrategy::Concat => concat(events).await,
        }
    }
}

/// Copies each chunk into a buffer reserved from the declared length.
///
/// The reservation is capped at [`MAX_PREALLOCATION`], so the declared length
/// is never trusted for allocation. More bytes than declared is a stream fault;
/// a body ending early keeps the bytes actually received, as for `HEAD` or
/// `304` responses.
async fn sized<S>(length: usize, events: &mut S) -> Result<Bytes, ClientError>
where
    S: Stream<Item = Result<StreamEvent, TransportError>> + Unpin,
{
    let mut buf = BytesMut::with_capacity(length.min(MAX_PREALLOCATION));

    loop {
        match next_chunk(events).await? {
            Some(chunk) => {
                if chunk.len() > length - buf.len() {
                    return Err(ClientError::stream(TransportError::protocol(format!(
                        "body exceeds declared content-length {length}"
                    ))));
                }
                buf.extend_from_slice(&chunk);
                trace!(offset = buf.len(), length, "copied body chunk");
            }
            None => {
                if buf.len() < length {
                    debug!(received = buf.len(), length, "body shorter than declared content-length");
                }
                return Ok(buf.freeze());
            }
        }
    }
}

async fn concat<S>(events: &mut S) -> Result<Bytes, ClientError>
where
    S: Stream<Item = Result<StreamEvent, TransportError>> + Unpin,
{
    let mut chunks = Vec::new();
    while let Some(chunk) = next_chunk(events).await? {
        trace!(size = chunk.len(), "received body chunk");
        chunks.push(chunk);
    }

    match chunks.len() {
        0 => Ok(Bytes::new()),
        1 => Ok(chunks.swap_remove(0)),
        _ => {
            let mut buf = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
            for chunk in &chunks {
                buf.extend_from_slice(chunk);
            }
            Ok(buf.freeze())
        }
    }
}

/// `Some(chunk)` for body data, `None` once the body ended.
async fn next_chunk<S>(events: &mut S) -> Result<Option<Bytes>, ClientError>
where
    S: Stream<Item = Result<StreamEvent, TransportError>> + Unpin,
{
    match events.next().await {
        Some(Ok(StreamEvent::Data(chunk))) => Ok(Some(chunk)),
        Some(Ok(StreamEvent::End)) => Ok(None),
        Some(Ok(StreamEvent::Response(_))) => {
            Err(ClientError::stream(TransportError::protocol("response headers received twice")))
        }
        Some(Err(e)) => Err(ClientError::stream(e)),
        None => Err(ClientError::stream(TransportError::protocol("stream closed before end of body"))),
    }
}
