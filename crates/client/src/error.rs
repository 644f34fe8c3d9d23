use std::io;
use thiserror::Error;

/// Errors returned by [`ConnectionSession`](crate::ConnectionSession) operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {origin}: {source}")]
    Connection {
        origin: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to reconnect: {reason}")]
    Reconnect {
        reason: String,
        #[source]
        source: Option<Box<ClientError>>,
    },

    #[error("unsupported content-encoding: {encoding}")]
    UnsupportedEncoding { encoding: String },

    #[error("stream error: {source}")]
    Stream {
        #[from]
        source: TransportError,
    },

    #[error("failed to decode {encoding} body: {source}")]
    Decompression {
        encoding: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },
}

impl ClientError {
    pub fn connection<S: ToString>(origin: S, source: TransportError) -> Self {
        Self::Connection { origin: origin.to_string(), source }
    }

    pub fn reconnect<S: ToString>(reason: S) -> Self {
        Self::Reconnect { reason: reason.to_string(), source: None }
    }

    pub fn reconnect_failed(source: ClientError) -> Self {
        Self::Reconnect { reason: "reconnect attempt failed".into(), source: Some(Box::new(source)) }
    }

    pub fn unsupported_encoding<S: ToString>(encoding: S) -> Self {
        Self::UnsupportedEncoding { encoding: encoding.to_string() }
    }

    pub fn stream<E: Into<TransportError>>(e: E) -> Self {
        Self::Stream { source: e.into() }
    }

    pub fn decompression(encoding: &'static str, source: io::Error) -> Self {
        Self::Decompression { encoding, source }
    }

    pub fn invalid_config<S: ToString>(str: S) -> Self {
        Self::InvalidConfig { reason: str.to_string() }
    }

    pub fn invalid_request<S: ToString>(str: S) -> Self {
        Self::InvalidRequest { reason: str.to_string() }
    }

    pub fn invalid_response<S: ToString>(str: S) -> Self {
        Self::InvalidResponse { reason: str.to_string() }
    }

    /// Whether this error means the underlying session can no longer be trusted.
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Stream { .. } | Self::Decompression { .. })
    }
}

/// Faults reported by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    #[error("tls error: {reason}")]
    Tls { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl TransportError {
    pub fn protocol<S: ToString>(str: S) -> Self {
        Self::Protocol { reason: str.to_string() }
    }

    pub fn tls<S: ToString>(str: S) -> Self {
        Self::Tls { reason: str.to_string() }
    }
}

impl From<h2::Error> for TransportError {
    fn from(e: h2::Error) -> Self {
        if e.is_io() {
            match e.into_io() {
                Some(source) => Self::Io { source },
                None => Self::protocol("h2 io error"),
            }
        } else {
            Self::protocol(e)
        }
    }
}
