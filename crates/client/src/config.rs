//! Connection configuration.
//!
//! A [`ConnectConfig`] names the single origin a session talks to, the optional
//! trust anchor used to verify it, and the optional keepalive ping settings.
//! The configuration is kept by the session and reused verbatim for every
//! reconnect.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::Uri;
use http::uri::{Authority, Scheme};

use crate::error::ClientError;
use crate::utils::ensure;

/// Result of one successful keepalive ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingResult {
    round_trip: Duration,
}

impl PingResult {
    pub fn new(round_trip: Duration) -> Self {
        Self { round_trip }
    }

    /// Time between sending the probe and receiving its acknowledgement.
    pub fn round_trip(&self) -> Duration {
        self.round_trip
    }
}

/// Callback invoked with every successful ping.
pub type PingListener = Arc<dyn Fn(PingResult) + Send + Sync>;

/// The scheme and authority of the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    scheme: Scheme,
    authority: Authority,
}

impl Origin {
    /// Parses an absolute `http://` or `https://` URL; any path is ignored.
    pub fn parse(url: &str) -> Result<Self, ClientError> {
        let uri: Uri = url.parse().map_err(|e| ClientError::invalid_config(format!("invalid origin {url}: {e}")))?;

        let scheme =
            uri.scheme().cloned().ok_or_else(|| ClientError::invalid_config(format!("origin {url} has no scheme")))?;
        ensure!(
            scheme == Scheme::HTTP || scheme == Scheme::HTTPS,
            ClientError::invalid_config(format!("unsupported origin scheme: {scheme}"))
        );

        let authority =
            uri.authority().cloned().ok_or_else(|| ClientError::invalid_config(format!("origin {url} has no host")))?;
        ensure!(!authority.host().is_empty(), ClientError::invalid_config(format!("origin {url} has no host")));

        Ok(Self { scheme, authority })
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Host name without brackets around IPv6 literals.
    pub fn host(&self) -> &str {
        self.authority.host().trim_start_matches('[').trim_end_matches(']')
    }

    pub fn port(&self) -> u16 {
        self.authority.port_u16().unwrap_or(if self.is_tls() { 443 } else { 80 })
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::HTTPS
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)
    }
}

/// PEM encoded certificates trusted in place of the default web roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchor {
    pem: Bytes,
}

impl TrustAnchor {
    pub fn from_pem(pem: impl Into<Bytes>) -> Self {
        Self { pem: pem.into() }
    }

    pub fn pem(&self) -> &[u8] {
        &self.pem
    }
}

/// Everything needed to (re)establish a session.
#[derive(Clone)]
pub struct ConnectConfig {
    origin: Origin,
    trust_anchor: Option<TrustAnchor>,
    ping_interval: Option<Duration>,
    ping_listener: Option<PingListener>,
}

impl ConnectConfig {
    pub fn new(origin: &str) -> Result<Self, ClientError> {
        Ok(Self { origin: Origin::parse(origin)?, trust_anchor: None, ping_interval: None, ping_listener: None })
    }

    #[must_use]
    pub fn with_trust_anchor(mut self, trust_anchor: TrustAnchor) -> Self {
        self.trust_anchor = Some(trust_anchor);
        self
    }

    /// Enables keepalive pings after `interval` of request inactivity.
    ///
    /// A zero interval leaves pings disabled.
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    #[must_use]
    pub fn with_ping_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(PingResult) + Send + Sync + 'static,
    {
        self.ping_listener = Some(Arc::new(listener));
        self
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn trust_anchor(&self) -> Option<&TrustAnchor> {
        self.trust_anchor.as_ref()
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        self.ping_interval
    }

    pub fn ping_listener(&self) -> Option<&PingListener> {
        self.ping_listener.as_ref()
    }
}

impl fmt::Debug for ConnectConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectConfig")
            .field("origin", &self.origin)
            .field("trust_anchor", &self.trust_anchor.is_some())
            .field("ping_interval", &self.ping_interval)
            .field("ping_listener", &self.ping_listener.is_some())
            .finish()
    }
}
