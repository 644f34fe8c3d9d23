use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::transport::TransportHandle;

/// Health of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionStatus {
    Connecting = 0,
    Connected = 1,
    Closed = 2,
    Error = 3,
}

impl SessionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionStatus::Connecting,
            1 => SessionStatus::Connected,
            2 => SessionStatus::Closed,
            _ => SessionStatus::Error,
        }
    }

    /// Returns true if requests can be issued without reconnecting first
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionStatus::Connected)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Closed => "closed",
            SessionStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Atomic health cell shared by everything working on one session.
#[derive(Debug)]
pub(crate) struct Health {
    status: AtomicU8,
}

impl Health {
    pub(crate) fn new(status: SessionStatus) -> Self {
        Self { status: AtomicU8::new(status as u8) }
    }

    pub(crate) fn get(&self) -> SessionStatus {
        SessionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, status: SessionStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Moves `from` to `to`; returns false if the state was something else.
    pub(crate) fn transition(&self, from: SessionStatus, to: SessionStatus) -> bool {
        self.status.compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }
}

/// One established transport handle plus its health.
///
/// A reconnect creates a new `Session` instead of mutating the old one, so a
/// fault reported late by a stale session never touches its replacement.
pub(crate) struct Session {
    handle: Arc<dyn TransportHandle>,
    health: Arc<Health>,
    generation: u64,
    watcher: Option<JoinHandle<()>>,
}

impl Session {
    pub(crate) fn new(handle: Arc<dyn TransportHandle>, generation: u64) -> Self {
        Self { handle, health: Arc::new(Health::new(SessionStatus::Connected)), generation, watcher: None }
    }

    /// Follows the transport's close signal: a graceful close moves a connected
    /// session to `Closed`, a fault moves it to `Error`.
    pub(crate) fn watch_close(mut self) -> Self {
        let closed = self.handle.closed();
        let health = Arc::clone(&self.health);
        let generation = self.generation;
        self.watcher = Some(tokio::spawn(async move {
            match closed.await {
                Ok(()) => {
                    if health.transition(SessionStatus::Connected, SessionStatus::Closed) {
                        info!(generation, "session closed by peer");
                    }
                }
                Err(e) => {
                    warn!(generation, cause = %e, "session failed");
                    health.set(SessionStatus::Error);
                }
            }
        }));
        self
    }

    pub(crate) fn handle(&self) -> &Arc<dyn TransportHandle> {
        &self.handle
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.health.get()
    }

    /// Connected and the transport does not report the handle as gone.
    pub(crate) fn is_usable(&self) -> bool {
        self.health.get().is_connected() && !self.handle.is_closed()
    }

    pub(crate) fn mark_error(&self) {
        self.health.set(SessionStatus::Error);
    }

    pub(crate) fn mark_closed(&self) {
        self.health.set(SessionStatus::Closed);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("generation", &self.generation).field("status", &self.health.get()).finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}
