//! Scripted transports for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use http::HeaderValue;
use futures::{FutureExt, StreamExt, future, stream};

use crate::error::TransportError;
use crate::protocol::RawHeaders;
use crate::transport::{
    IncomingStream, MockOutgoingStream, MockTransport, MockTransportHandle, OutgoingStream, StreamEvent,
    TransportHandle,
};

pub(crate) fn raw_headers(status: u16, headers: &[(&str, &str)]) -> RawHeaders {
    let mut raw = vec![(":status".to_string(), Some(HeaderValue::from(status)))];
    raw.extend(headers.iter().map(|(name, value)| ((*name).to_string(), Some(HeaderValue::from_str(value).unwrap()))));
    raw
}

/// A complete response: headers, each chunk, then `End`.
pub(crate) fn response_events(status: u16, headers: &[(&str, &str)], chunks: &[&[u8]]) -> IncomingStream {
    let mut events = vec![Ok(StreamEvent::Response(raw_headers(status, headers)))];
    events.extend(chunks.iter().map(|chunk| Ok(StreamEvent::Data(Bytes::copy_from_slice(chunk)))));
    events.push(Ok(StreamEvent::End));
    stream::iter(events).boxed()
}

pub(crate) fn events(events: Vec<Result<StreamEvent, TransportError>>) -> IncomingStream {
    stream::iter(events).boxed()
}

/// An outgoing half that accepts any write.
pub(crate) fn accepting_outgoing() -> Box<dyn OutgoingStream> {
    let mut outgoing = MockOutgoingStream::new();
    outgoing.expect_write().returning(|_, _| Ok(()));
    Box::new(outgoing)
}

/// A handle that stays open and never reports an end.
pub(crate) fn open_handle() -> MockTransportHandle {
    let mut handle = MockTransportHandle::new();
    handle.expect_is_closed().return_const(false);
    handle.expect_closed().returning(|| future::pending().boxed());
    handle
}

/// An open handle answering every request with `200` and `body`.
pub(crate) fn serving_handle(body: &'static [u8]) -> MockTransportHandle {
    let mut handle = open_handle();
    handle.expect_open().returning(move |_, _| Ok((accepting_outgoing(), response_events(200, &[], &[body]))));
    handle
}

/// A handle the transport already reports as gone.
pub(crate) fn dead_handle() -> MockTransportHandle {
    let mut handle = MockTransportHandle::new();
    handle.expect_is_closed().return_const(true);
    handle.expect_closed().returning(|| future::pending().boxed());
    handle
}

/// A transport handing out `handles` in order, refusing once they run out.
///
/// The returned counter tracks every connect attempt.
pub(crate) fn scripted_transport(handles: Vec<MockTransportHandle>) -> (MockTransport, Arc<AtomicUsize>) {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let mut handles = handles.into_iter();
    let mut transport = MockTransport::new();
    transport.expect_connect().returning(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        match handles.next() {
            Some(handle) => Ok(Arc::new(handle) as Arc<dyn TransportHandle>),
            None => Err(TransportError::protocol("connection refused")),
        }
    });
    (transport, attempts)
}
