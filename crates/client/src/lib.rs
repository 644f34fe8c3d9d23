//! An asynchronous HTTP/2 client session for a single origin
//!
//! This crate wraps one multiplexed connection behind a request/response API.
//! Beyond the raw transport it takes care of the session lifecycle, keepalive
//! pings and response decompression.
//!
//! # Features
//!
//! - One session per origin, shared by every concurrent request
//! - Demand-driven reconnect: a dead session is replaced by the next request,
//!   which is resubmitted once
//! - Optional keepalive pings with round-trip reporting, debounced by request traffic
//! - Transparent `br`, `gzip` and `deflate` response decoding
//! - TLS with the default web roots or a custom trust anchor
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use http::HeaderMap;
//! use tracing::{error, info, Level};
//! use tracing_subscriber::FmtSubscriber;
//! use micro_client::{ConnectConfig, ConnectionSession};
//!
//! #[tokio::main]
//! async fn main() {
//!     let subscriber = FmtSubscriber::builder()
//!         .with_max_level(Level::INFO)
//!         .finish();
//!     tracing::subscriber::set_global_default(subscriber)
//!         .expect("setting default subscriber failed");
//!
//!     let config = ConnectConfig::new("https://example.com")
//!         .expect("valid origin")
//!         .with_ping_interval(Duration::from_secs(30))
//!         .with_ping_listener(|result| info!(round_trip = ?result.round_trip(), "ping"));
//!
//!     let session = match ConnectionSession::connect(config).await {
//!         Ok(session) => session,
//!         Err(e) => {
//!             error!(cause = %e, "connect failed");
//!             return;
//!         }
//!     };
//!
//!     match session.get("/", HeaderMap::new()).await {
//!         Ok(response) => {
//!             info!(status = %response.status(), size = response.body().len(), "received response")
//!         }
//!         Err(e) => error!(cause = %e, "request failed"),
//!     }
//!
//!     let _ = session.close().await;
//! }
//! ```
//!
//! # Architecture
//!
//! - [`ConnectionSession`]: owns the current session, reconnects and resubmits
//! - `pipeline`: issues one request on a session and parses the response head
//! - `assemble`: collects the body by decoding, copying against the declared
//!   length or concatenating
//! - `decompress`: streaming decoders for the supported content encodings
//! - `ping`: the keepalive timer
//! - [`transport`]: the transport seam and its HTTP/2 implementation
//!
//! # Error Handling
//!
//! Every call returns [`ClientError`]. Transport faults seen while writing,
//! reading, decoding or pinging also move the session to
//! [`SessionStatus::Error`], so the next request reconnects.
//!
//! # Limitations
//!
//! - No per-request timeouts or cancellation
//! - No connection pooling across origins

mod assemble;
pub mod config;
mod decompress;
pub mod error;
mod ping;
mod pipeline;
pub mod protocol;
mod session;
pub mod transport;

#[cfg(test)]
mod test_util;

mod utils;
pub(crate) use utils::ensure;

pub use config::{ConnectConfig, Origin, PingListener, PingResult, TrustAnchor};
pub use error::{ClientError, TransportError};
pub use protocol::{BodyEncoding, RequestBody, RequestSpec, Response};
pub use session::{ConnectionSession, SessionStatus};
