//! Response body decompression.
//!
//! [`Decoder::select`] maps a `content-encoding` value to a streaming decoder
//! before a single byte of the body is read; [`decompress`] then pipes the raw
//! response chunks through it.

use std::io;
use std::io::Write;

use bytes::{Bytes, BytesMut};
use flate2::write::{GzDecoder, ZlibDecoder};
use futures::{Stream, StreamExt};
use tracing::{error, trace};

use crate::error::{ClientError, TransportError};
use crate::transport::StreamEvent;

/// Collects decoded output in arrival order.
pub(crate) struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096) }
    }

    fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Streaming decoder for one supported content encoding.
pub(crate) enum Decoder {
    /// Gzip decoding.
    Gzip(GzDecoder<Writer>),
    /// Deflate (zlib) decoding.
    Deflate(ZlibDecoder<Writer>),
    /// Brotli decoding.
    Br(Box<brotli::DecompressorWriter<Writer>>),
}

impl Decoder {
    fn gzip() -> Self {
        Self::Gzip(GzDecoder::new(Writer::new()))
    }

    fn deflate() -> Self {
        Self::Deflate(ZlibDecoder::new(Writer::new()))
    }

    fn br() -> Self {
        Self::Br(Box::new(brotli::DecompressorWriter::new(
            Writer::new(),
            32 * 1024, // 32 KiB buffer
        )))
    }

    /// Selects a decoder for a `content-encoding` value.
    pub(crate) fn select(content_encoding: &str) -> Result<Self, ClientError> {
        let encoding = content_encoding.trim();
        if encoding.eq_ignore_ascii_case("gzip") {
            Ok(Self::gzip())
        } else if encoding.eq_ignore_ascii_case("deflate") {
            Ok(Self::deflate())
        } else if encoding.eq_ignore_ascii_case("br") {
            Ok(Self::br())
        } else {
            Err(ClientError::unsupported_encoding(encoding))
        }
    }

    /// Returns the name of the encoding.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Decoder::Gzip(_) => "gzip",
            Decoder::Deflate(_) => "deflate",
            Decoder::Br(_) => "br",
        }
    }

    /// Feeds compressed bytes to the decoder.
    fn write(&mut self, data: &[u8]) -> Result<(), io::Error> {
        let result = match self {
            Self::Gzip(decoder) => decoder.write_all(data),
            Self::Deflate(decoder) => decoder.write_all(data),
            Self::Br(decoder) => decoder.write_all(data),
        };
        if let Err(e) = &result {
            trace!("error decoding {} encoding: {}", self.name(), e);
        }
        result
    }

    /// Finishes decoding and returns everything decoded so far.
    ///
    /// Fails if the compressed stream is truncated.
    fn finish(self) -> Result<Bytes, io::Error> {
        match self {
            Self::Gzip(decoder) => decoder.finish().map(Writer::freeze),
            Self::Deflate(decoder) => decoder.finish().map(Writer::freeze),
            Self::Br(decoder) => {
                let mut decoder = *decoder;
                decoder.flush()?;
                decoder
                    .into_inner()
                    .map(Writer::freeze)
                    .map_err(|_writer| io::Error::new(io::ErrorKind::UnexpectedEof, "incomplete brotli stream"))
            }
        }
    }
}

/// Pipes a response body through `decoder` and returns the decoded bytes.
///
/// A transport fault yields [`ClientError::Stream`], malformed or truncated
/// compressed data yields [`ClientError::Decompression`].
pub(crate) async fn decompress<S>(mut decoder: Decoder, events: &mut S) -> Result<Bytes, ClientError>
where
    S: Stream<Item = Result<StreamEvent, TransportError>> + Unpin,
{
    let encoding = decoder.name();
    loop {
        match events.next().await {
            Some(Ok(StreamEvent::Data(chunk))) => {
                decoder.write(&chunk).map_err(|e| {
                    error!(encoding, cause = %e, "malformed compressed body");
                    ClientError::decompression(encoding, e)
                })?;
            }

            Some(Ok(StreamEvent::End)) => {
                return decoder.finish().map_err(|e| {
                    error!(encoding, cause = %e, "truncated compressed body");
                    ClientError::decompression(encoding, e)
                });
            }

            Some(Ok(StreamEvent::Response(_))) => {
                return Err(ClientError::stream(TransportError::protocol("response headers received twice")));
            }

            Some(Err(e)) => return Err(ClientError::stream(e)),

            None => return Err(ClientError::stream(TransportError::protocol("stream closed before end of body"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use futures::stream;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn br(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
            encoder.write_all(data).unwrap();
        }
        out
    }

    fn chunked(data: &[u8], size: usize) -> Vec<Result<StreamEvent, TransportError>> {
        let mut events: Vec<_> =
            data.chunks(size).map(|chunk| Ok(StreamEvent::Data(Bytes::copy_from_slice(chunk)))).collect();
        events.push(Ok(StreamEvent::End));
        events
    }

    #[test]
    fn select_known_encodings() {
        assert_eq!(Decoder::select("gzip").unwrap().name(), "gzip");
        assert_eq!(Decoder::select(" Deflate ").unwrap().name(), "deflate");
        assert_eq!(Decoder::select("BR").unwrap().name(), "br");
    }

    #[test]
    fn select_unknown_encoding() {
        for encoding in ["identity-custom", "zstd", "gzip, br", ""] {
            assert!(matches!(Decoder::select(encoding), Err(ClientError::UnsupportedEncoding { .. })), "{encoding}");
        }
    }

    #[tokio::test]
    async fn decode_gzip() {
        let mut events = stream::iter(chunked(&gzip(b"ok"), 3));
        let body = decompress(Decoder::select("gzip").unwrap(), &mut events).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"ok"));
    }

    #[tokio::test]
    async fn decode_deflate_and_br_across_chunks() {
        let text = "hello world ".repeat(200);

        let mut events = stream::iter(chunked(&zlib(text.as_bytes()), 7));
        let body = decompress(Decoder::select("deflate").unwrap(), &mut events).await.unwrap();
        assert_eq!(body, text.as_bytes());

        let mut events = stream::iter(chunked(&br(text.as_bytes()), 5));
        let body = decompress(Decoder::select("br").unwrap(), &mut events).await.unwrap();
        assert_eq!(body, text.as_bytes());
    }

    #[tokio::test]
    async fn malformed_gzip_is_a_decompression_error() {
        let mut events = stream::iter(chunked(b"definitely not gzip", 4));
        let result = decompress(Decoder::select("gzip").unwrap(), &mut events).await;
        assert!(matches!(result, Err(ClientError::Decompression { encoding: "gzip", .. })));
    }

    #[tokio::test]
    async fn stream_fault_is_a_stream_error() {
        let compressed = gzip(b"some body");
        let truncated = Bytes::copy_from_slice(&compressed[..4]);
        let mut events = stream::iter(vec![Ok(StreamEvent::Data(truncated)), Err(TransportError::Closed)]);
        let result = decompress(Decoder::select("gzip").unwrap(), &mut events).await;
        assert!(matches!(result, Err(ClientError::Stream { .. })));
    }
}
