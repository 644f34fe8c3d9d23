//! HTTP/2 transport on top of the `h2` crate.
//!
//! `http://` origins use HTTP/2 with prior knowledge over plain TCP, `https://`
//! origins negotiate `h2` through ALPN with rustls. Without a
//! [`TrustAnchor`] the webpki root set is trusted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{BoxFuture, poll_fn};
use futures::{FutureExt, StreamExt, stream};
use h2::client::{ResponseFuture, SendRequest};
use h2::{Ping, PingPong, RecvStream, SendStream};
use http::{HeaderValue, Request, Uri};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot, watch};
use tokio_rustls::TlsConnector;
use tracing::{debug, error, info};

use crate::config::{Origin, TrustAnchor};
use crate::error::TransportError;
use crate::protocol::{RawHeaders, STATUS_PSEUDO_HEADER};
use crate::transport::{IncomingStream, OutgoingStream, RequestHead, StreamEvent, Transport, TransportHandle};
use crate::utils::ensure;

const ALPN_H2: &[u8] = b"h2";

/// Connects to origins over TCP (and TLS for `https`) and speaks HTTP/2.
#[derive(Debug, Clone, Copy, Default)]
pub struct H2Transport;

#[async_trait]
impl Transport for H2Transport {
    async fn connect(
        &self,
        origin: &Origin,
        trust_anchor: Option<TrustAnchor>,
    ) -> Result<Arc<dyn TransportHandle>, TransportError> {
        let tcp_stream = TcpStream::connect((origin.host(), origin.port())).await?;
        tcp_stream.set_nodelay(true)?;

        if origin.is_tls() {
            let connector = tls_connector(trust_anchor.as_ref())?;
            let server_name = ServerName::try_from(origin.host().to_owned()).map_err(TransportError::tls)?;
            let tls_stream = connector.connect(server_name, tcp_stream).await?;
            H2Handle::handshake(tls_stream, origin.clone()).await
        } else {
            H2Handle::handshake(tcp_stream, origin.clone()).await
        }
    }
}

fn tls_connector(trust_anchor: Option<&TrustAnchor>) -> Result<TlsConnector, TransportError> {
    let mut roots = RootCertStore::empty();
    match trust_anchor {
        Some(trust_anchor) => {
            let mut pem = trust_anchor.pem();
            for cert in rustls_pemfile::certs(&mut pem) {
                roots.add(cert?).map_err(TransportError::tls)?;
            }
            ensure!(!roots.is_empty(), TransportError::tls("trust anchor holds no certificate"));
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(TransportError::tls)?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![ALPN_H2.to_vec()];

    Ok(TlsConnector::from(Arc::new(config)))
}

#[derive(Debug, Clone)]
enum ConnectionEnd {
    Graceful,
    Fault(String),
}

/// One HTTP/2 connection.
///
/// The `h2` connection future runs on its own task and publishes how it ended
/// through a watch channel.
struct H2Handle {
    origin: Origin,
    send_request: Mutex<Option<SendRequest<Bytes>>>,
    ping_pong: Mutex<PingPong>,
    close_signal: Mutex<Option<oneshot::Sender<()>>>,
    ended: watch::Receiver<Option<ConnectionEnd>>,
}

impl H2Handle {
    async fn handshake<IO>(io: IO, origin: Origin) -> Result<Arc<dyn TransportHandle>, TransportError>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (send_request, mut connection) = h2::client::handshake(io).await?;
        let ping_pong = connection.ping_pong().ok_or_else(|| TransportError::protocol("ping handle already taken"))?;

        let (close_sender, mut close_receiver) = oneshot::channel();
        let (ended_sender, ended) = watch::channel(None);
        let task_origin = origin.to_string();
        tokio::spawn(async move {
            tokio::pin!(connection);
            let result = tokio::select! {
                result = &mut connection => result,
                // the connection may be parked when the last `SendRequest` goes away, poll it again
                _ = &mut close_receiver => connection.await,
            };

            let end = match result {
                Ok(()) => {
                    info!(origin = %task_origin, "h2 connection closed");
                    ConnectionEnd::Graceful
                }
                Err(e) => {
                    error!(origin = %task_origin, cause = %e, "h2 connection failed");
                    ConnectionEnd::Fault(e.to_string())
                }
            };
            // nobody may be listening any more
            let _ = ended_sender.send(Some(end));
        });

        debug!(origin = %origin, "h2 handshake finished");
        Ok(Arc::new(Self {
            origin,
            send_request: Mutex::new(Some(send_request)),
            ping_pong: Mutex::new(ping_pong),
            close_signal: Mutex::new(Some(close_sender)),
            ended,
        }))
    }
}

#[async_trait]
impl TransportHandle for H2Handle {
    async fn open(
        &self,
        head: RequestHead,
        end_of_stream: bool,
    ) -> Result<(Box<dyn OutgoingStream>, IncomingStream), TransportError> {
        let send_request = self.send_request.lock().await.clone().ok_or(TransportError::Closed)?;
        let mut send_request = send_request.ready().await?;

        let uri = Uri::builder()
            .scheme(self.origin.scheme().clone())
            .authority(self.origin.authority().clone())
            .path_and_query(head.path.as_str())
            .build()
            .map_err(TransportError::protocol)?;
        let mut request = Request::builder().method(head.method).uri(uri).body(()).map_err(TransportError::protocol)?;
        *request.headers_mut() = head.headers;

        let (response, send_stream) = send_request.send_request(request, end_of_stream)?;
        Ok((Box::new(H2Outgoing { send_stream }), incoming_events(response)))
    }

    async fn ping(&self) -> Result<Duration, TransportError> {
        let mut ping_pong = self.ping_pong.lock().await;
        let started = Instant::now();
        ping_pong.ping(Ping::opaque()).await?;
        Ok(started.elapsed())
    }

    async fn close(&self) -> Result<(), TransportError> {
        drop(self.send_request.lock().await.take());
        if self.is_closed() {
            debug!(origin = %self.origin, "h2 connection already ended");
            return Ok(());
        }
        if let Some(close_signal) = self.close_signal.lock().await.take() {
            let _ = close_signal.send(());
        }
        self.closed().await
    }

    fn is_closed(&self) -> bool {
        self.ended.borrow().is_some()
    }

    fn closed(&self) -> BoxFuture<'static, Result<(), TransportError>> {
        let mut ended = self.ended.clone();
        async move {
            let end =
                ended.wait_for(Option::is_some).await.map(|end| end.clone()).map_err(|_e| TransportError::Closed)?;
            match end {
                Some(ConnectionEnd::Fault(reason)) => Err(TransportError::protocol(reason)),
                Some(ConnectionEnd::Graceful) | None => Ok(()),
            }
        }
        .boxed()
    }
}

struct H2Outgoing {
    send_stream: SendStream<Bytes>,
}

#[async_trait]
impl OutgoingStream for H2Outgoing {
    async fn write(&mut self, mut data: Bytes, end_of_stream: bool) -> Result<(), TransportError> {
        if data.is_empty() {
            return self.send_stream.send_data(data, end_of_stream).map_err(Into::into);
        }

        while !data.is_empty() {
            self.send_stream.reserve_capacity(data.len());
            let capacity = match poll_fn(|cx| self.send_stream.poll_capacity(cx)).await {
                Some(Ok(0)) => continue,
                Some(Ok(capacity)) => capacity,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(TransportError::Closed),
            };

            let chunk = data.split_to(capacity.min(data.len()));
            self.send_stream.send_data(chunk, end_of_stream && data.is_empty())?;
        }
        Ok(())
    }
}

enum Incoming {
    Head(ResponseFuture),
    Body(RecvStream),
    Done,
}

fn incoming_events(response: ResponseFuture) -> IncomingStream {
    stream::unfold(Incoming::Head(response), |state| async move {
        match state {
            Incoming::Head(response) => match response.await {
                Ok(response) => {
                    let (parts, body) = response.into_parts();
                    Some((Ok(StreamEvent::Response(raw_headers(&parts))), Incoming::Body(body)))
                }
                Err(e) => Some((Err(e.into()), Incoming::Done)),
            },

            Incoming::Body(mut body) => match body.data().await {
                Some(Ok(chunk)) => match body.flow_control().release_capacity(chunk.len()) {
                    Ok(()) => Some((Ok(StreamEvent::Data(chunk)), Incoming::Body(body))),
                    Err(e) => Some((Err(e.into()), Incoming::Done)),
                },
                Some(Err(e)) => Some((Err(e.into()), Incoming::Done)),
                None => Some((Ok(StreamEvent::End), Incoming::Done)),
            },

            Incoming::Done => None,
        }
    })
    .boxed()
}

fn raw_headers(parts: &http::response::Parts) -> RawHeaders {
    let mut raw = Vec::with_capacity(parts.headers.len() + 1);
    raw.push((STATUS_PSEUDO_HEADER.to_owned(), Some(HeaderValue::from(parts.status.as_u16()))));
    raw.extend(parts.headers.iter().map(|(name, value)| (name.as_str().to_owned(), Some(value.clone()))));
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future;
    use h2::Reason;
    use http::{HeaderMap, Method, StatusCode};
    use tokio::io::DuplexStream;

    use crate::pipeline;
    use crate::protocol::RequestSpec;
    use crate::session::{Session, SessionStatus};

    /// Answers every request with `"<method> <path>[ <body>]"` once the request body is read.
    fn serve_echo(io: DuplexStream) {
        tokio::spawn(async move {
            let mut connection = h2::server::handshake(io).await.expect("server handshake");
            while let Some(result) = connection.accept().await {
                let (request, mut respond) = result.expect("accept stream");
                tokio::spawn(async move {
                    let (parts, mut body) = request.into_parts();
                    let mut reply = format!("{} {}", parts.method, parts.uri.path()).into_bytes();
                    let mut received = Vec::new();
                    while let Some(chunk) = body.data().await {
                        let chunk = chunk.expect("request body");
                        body.flow_control().release_capacity(chunk.len()).expect("release capacity");
                        received.extend_from_slice(&chunk);
                    }
                    if !received.is_empty() {
                        reply.push(b' ');
                        reply.extend_from_slice(&received);
                    }

                    let response = http::Response::builder()
                        .status(StatusCode::OK)
                        .header("content-length", reply.len())
                        .header("x-reply", "yes")
                        .body(())
                        .unwrap();
                    let mut send_stream = respond.send_response(response, false).expect("send response");
                    send_stream.send_data(Bytes::from(reply), true).expect("send body");
                });
            }
        });
    }

    /// Answers `ok` right away and drops the request unread, which resets the stream.
    fn serve_without_reading(io: DuplexStream) {
        tokio::spawn(async move {
            let mut connection = h2::server::handshake(io).await.expect("server handshake");
            while let Some(result) = connection.accept().await {
                let (_request, mut respond) = result.expect("accept stream");
                let response =
                    http::Response::builder().status(StatusCode::OK).header("content-length", 2).body(()).unwrap();
                let mut send_stream = respond.send_response(response, false).expect("send response");
                send_stream.send_data(Bytes::from_static(b"ok"), true).expect("send body");
            }
        });
    }

    /// Tears the connection down with a protocol error right after the handshake.
    fn serve_and_fail(io: DuplexStream) {
        tokio::spawn(async move {
            let mut connection = h2::server::handshake(io).await.expect("server handshake");
            connection.abrupt_shutdown(Reason::PROTOCOL_ERROR);
            let _ = future::poll_fn(|cx| connection.poll_closed(cx)).await;
        });
    }

    async fn connected_handle(serve: fn(DuplexStream)) -> Arc<dyn TransportHandle> {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        serve(server_io);
        H2Handle::handshake(client_io, Origin::parse("http://localhost").unwrap()).await.expect("client handshake")
    }

    fn head(method: Method, path: &str) -> RequestHead {
        RequestHead { method, path: path.into(), headers: HeaderMap::new() }
    }

    #[tokio::test]
    async fn request_events_arrive_in_order() {
        let handle = connected_handle(serve_echo).await;

        let (_outgoing, incoming) = handle.open(head(Method::GET, "/data"), true).await.unwrap();
        let events: Vec<_> = incoming.collect().await;
        let events: Vec<_> = events.into_iter().map(Result::unwrap).collect();

        assert_eq!(events.len(), 3);
        match &events[0] {
            StreamEvent::Response(raw) => {
                assert!(raw.contains(&(":status".to_owned(), Some(HeaderValue::from_static("200")))));
                assert!(raw.contains(&("x-reply".to_owned(), Some(HeaderValue::from_static("yes")))));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(events[1], StreamEvent::Data(Bytes::from_static(b"GET /data")));
        assert!(events[2].is_end());
    }

    #[tokio::test]
    async fn request_with_body() {
        let handle = connected_handle(serve_echo).await;

        let (mut outgoing, incoming) = handle.open(head(Method::POST, "/upload"), false).await.unwrap();
        outgoing.write(Bytes::from_static(b"payload"), true).await.unwrap();

        let events: Vec<_> = incoming.collect().await;
        let echoed = Bytes::from_static(b"POST /upload payload");
        assert!(matches!(&events[1], Ok(StreamEvent::Data(data)) if data == &echoed));
    }

    #[tokio::test]
    async fn response_sent_before_body_is_read_is_kept() {
        let handle = connected_handle(serve_without_reading).await;
        let session = Session::new(handle, 1);

        let request = RequestSpec::new(Method::POST, "/upload").body("payload");
        let response = pipeline::execute(&session, request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), &Bytes::from_static(b"ok"));
        assert_eq!(session.status(), SessionStatus::Connected);
    }

    #[tokio::test]
    async fn ping_and_close() {
        let handle = connected_handle(serve_echo).await;
        assert!(!handle.is_closed());

        handle.ping().await.expect("ping round trip");

        handle.close().await.expect("graceful close");
        assert!(handle.is_closed());

        assert!(matches!(handle.open(head(Method::GET, "/"), true).await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn close_after_connection_fault_succeeds() {
        let handle = connected_handle(serve_and_fail).await;
        let _ = handle.closed().await;
        assert!(handle.is_closed());

        handle.close().await.expect("close after fault");
        handle.close().await.expect("close again");
    }

    #[test]
    fn empty_trust_anchor_is_rejected() {
        let trust_anchor = TrustAnchor::from_pem(&b"not a certificate"[..]);
        assert!(matches!(tls_connector(Some(&trust_anchor)), Err(TransportError::Tls { .. })));
    }

    #[test]
    fn default_roots_build_a_connector() {
        assert!(tls_connector(None).is_ok());
    }
}
