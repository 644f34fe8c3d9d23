//! Session lifecycle: connect, demand-driven reconnect, close.
//!
//! [`ConnectionSession`] owns the current [`Session`] for one origin. The
//! session is never repaired in place; when a request finds it closed or
//! broken, a fresh one is connected and the request is resubmitted exactly
//! once. Reconnects are serialized, so concurrent requests that all observe
//! the same dead session share a single reconnect.

mod state;

pub use state::SessionStatus;
pub(crate) use state::Session;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use http::{HeaderMap, Method};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::ConnectConfig;
use crate::error::ClientError;
use crate::ping::PingMonitor;
use crate::pipeline;
use crate::protocol::{RequestBody, RequestSpec, Response};
use crate::transport::Transport;
use crate::transport::h2::H2Transport;

/// A client session to a single origin.
///
/// Cloning is cheap; clones share the same underlying session, so requests
/// issued through any clone are multiplexed over one connection.
#[derive(Clone)]
pub struct ConnectionSession {
    shared: Arc<Shared>,
}

struct Shared {
    transport: Arc<dyn Transport>,
    config: ConnectConfig,
    current: ArcSwapOption<Session>,
    reconnect_lock: Mutex<()>,
    connecting: AtomicBool,
    generation: AtomicU64,
    ping: PingMonitor,
}

impl ConnectionSession {
    /// Connects over HTTP/2, using TLS for `https` origins.
    pub async fn connect(config: ConnectConfig) -> Result<Self, ClientError> {
        Self::connect_with(H2Transport, config).await
    }

    /// Connects through a custom [`Transport`].
    pub async fn connect_with<T: Transport>(transport: T, config: ConnectConfig) -> Result<Self, ClientError> {
        let ping = PingMonitor::new(config.ping_interval(), config.ping_listener().cloned());
        let shared = Shared {
            transport: Arc::new(transport),
            config,
            current: ArcSwapOption::empty(),
            reconnect_lock: Mutex::new(()),
            connecting: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            ping,
        };

        shared.establish().await?;
        Ok(Self { shared: Arc::new(shared) })
    }

    /// Issues a request and waits for the complete response.
    ///
    /// A closed or broken session is replaced before the request goes out. If
    /// the replacement is not usable either, the call fails with
    /// [`ClientError::Reconnect`] and nothing else is retried.
    pub async fn request(&self, request: RequestSpec) -> Result<Response, ClientError> {
        let mut request = request;
        loop {
            let current = self.shared.current.load_full();
            match current {
                Some(session) if session.is_usable() => {
                    self.shared.ping.schedule_next(&session);
                    return pipeline::execute(&session, request).await;
                }

                stale => {
                    if request.is_resubmission() {
                        warn!(
                            method = %request.method(),
                            path = request.path(),
                            "session still unusable after reconnect"
                        );
                        return Err(ClientError::reconnect("session unusable after reconnect"));
                    }

                    let stale = stale.map(|session| session.generation());
                    self.shared.reconnect(stale).await.map_err(ClientError::reconnect_failed)?;
                    request = request.into_resubmission();
                }
            }
        }
    }

    /// `GET path`; pass an empty [`HeaderMap`] for no extra headers.
    pub async fn get(&self, path: &str, headers: HeaderMap) -> Result<Response, ClientError> {
        self.request(RequestSpec::new(Method::GET, path).headers(headers)).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        headers: HeaderMap,
    ) -> Result<Response, ClientError> {
        self.request(RequestSpec::new(Method::POST, path).headers(headers).body(body)).await
    }

    pub async fn put(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        headers: HeaderMap,
    ) -> Result<Response, ClientError> {
        self.request(RequestSpec::new(Method::PUT, path).headers(headers).body(body)).await
    }

    pub async fn patch(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        headers: HeaderMap,
    ) -> Result<Response, ClientError> {
        self.request(RequestSpec::new(Method::PATCH, path).headers(headers).body(body)).await
    }

    /// Current health, without side effects.
    pub fn status(&self) -> SessionStatus {
        if self.shared.connecting.load(Ordering::Acquire) {
            return SessionStatus::Connecting;
        }

        match self.shared.current.load().as_deref() {
            Some(session) => match session.status() {
                SessionStatus::Connected if session.handle().is_closed() => SessionStatus::Closed,
                status => status,
            },
            None => SessionStatus::Closed,
        }
    }

    /// Gracefully shuts the session down and waits for the transport to confirm.
    ///
    /// Closing an already closed session does nothing, and neither does
    /// closing one whose connection already ended, with or without a fault.
    /// A later request reconnects.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.shared.ping.cancel();

        let Some(session) = self.shared.current.load_full() else {
            return Ok(());
        };
        if session.status() == SessionStatus::Closed {
            debug!(generation = session.generation(), "session already closed");
            return Ok(());
        }
        if session.handle().is_closed() {
            debug!(generation = session.generation(), status = %session.status(), "connection already ended");
            session.mark_closed();
            return Ok(());
        }

        if let Err(e) = session.handle().close().await {
            error!(generation = session.generation(), cause = %e, "failed to close session");
            session.mark_error();
            return Err(ClientError::stream(e));
        }

        session.mark_closed();
        info!(origin = %self.shared.config.origin(), generation = session.generation(), "session closed");
        Ok(())
    }

    /// Returns the connection settings.
    pub fn config(&self) -> &ConnectConfig {
        &self.shared.config
    }
}

impl Shared {
    async fn establish(&self) -> Result<Arc<Session>, ClientError> {
        let origin = self.config.origin();
        info!(%origin, "connecting");

        let handle = self.transport.connect(origin, self.config.trust_anchor().cloned()).await.map_err(|e| {
            error!(%origin, cause = %e, "failed to connect");
            ClientError::connection(origin, e)
        })?;

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let session = Arc::new(Session::new(handle, generation).watch_close());
        info!(%origin, generation, "session connected");

        self.current.store(Some(Arc::clone(&session)));
        self.ping.schedule_next(&session);
        Ok(session)
    }

    /// Replaces the session of generation `stale`.
    ///
    /// Callers queue on the reconnect lock; whoever gets it after a successful
    /// reconnect finds a newer usable session and returns without connecting.
    async fn reconnect(&self, stale: Option<u64>) -> Result<(), ClientError> {
        let _guard = self.reconnect_lock.lock().await;

        if let Some(current) = self.current.load_full() {
            if Some(current.generation()) != stale && current.is_usable() {
                debug!(generation = current.generation(), "session already replaced");
                return Ok(());
            }
        }

        info!(origin = %self.config.origin(), ?stale, "reconnecting");
        let _connecting = Connecting::enter(&self.connecting);
        self.establish().await.map(|_session| ())
    }
}

/// Reports [`SessionStatus::Connecting`] until dropped.
struct Connecting<'a> {
    flag: &'a AtomicBool,
}

impl<'a> Connecting<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self { flag }
    }
}

impl Drop for Connecting<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("origin", self.shared.config.origin())
            .field("status", &self.status())
            .field("session", &self.shared.current.load().as_deref())
            .finish_non_exhaustive()
    }
}
