//! Keepalive pings.
//!
//! At most one timer is armed per [`PingMonitor`]. Every request re-arms it,
//! so pings only go out after a full interval without traffic. A failed ping
//! marks the session as broken and stops the timer until the next request.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::{PingListener, PingResult};
use crate::session::Session;

struct TimerTask {
    handle: JoinHandle<()>,
}

impl Drop for TimerTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub(crate) struct PingMonitor {
    interval: Option<Duration>,
    listener: Option<PingListener>,
    timer: ArcSwapOption<TimerTask>,
}

impl PingMonitor {
    /// A monitor that never pings when `interval` is `None`.
    pub(crate) fn new(interval: Option<Duration>, listener: Option<PingListener>) -> Self {
        Self { interval, listener, timer: ArcSwapOption::empty() }
    }

    /// Replaces any armed timer with one firing `interval` from now.
    pub(crate) fn schedule_next(&self, session: &Arc<Session>) {
        let Some(interval) = self.interval else {
            return;
        };

        let session = Arc::clone(session);
        let listener = self.listener.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !session.is_usable() {
                    trace!(generation = session.generation(), "session unusable, stop pinging");
                    return;
                }

                match session.handle().ping().await {
                    Ok(round_trip) => {
                        debug!(generation = session.generation(), ?round_trip, "ping acknowledged");
                        if let Some(listener) = &listener {
                            listener(PingResult::new(round_trip));
                        }
                    }
                    Err(e) => {
                        warn!(generation = session.generation(), cause = %e, "ping failed, session marked as broken");
                        session.mark_error();
                        return;
                    }
                }
            }
        });

        // dropping the previous timer aborts it
        self.timer.store(Some(Arc::new(TimerTask { handle })));
    }

    pub(crate) fn cancel(&self) {
        self.timer.store(None);
    }
}

impl fmt::Debug for PingMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PingMonitor")
            .field("interval", &self.interval)
            .field("armed", &self.timer.load().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::sleep;

    use crate::error::TransportError;
    use crate::session::SessionStatus;
    use crate::test_util::open_handle;

    fn counting_session(pings: &Arc<AtomicUsize>) -> Arc<Session> {
        let pings = Arc::clone(pings);
        let mut handle = open_handle();
        handle.expect_ping().returning(move || {
            pings.fetch_add(1, Ordering::SeqCst);
            Ok(Duration::from_millis(3))
        });
        Arc::new(Session::new(Arc::new(handle), 1))
    }

    #[tokio::test(start_paused = true)]
    async fn requests_push_the_ping_back() {
        let pings = Arc::new(AtomicUsize::new(0));
        let session = counting_session(&pings);
        let monitor = PingMonitor::new(Some(Duration::from_millis(100)), None);

        monitor.schedule_next(&session);
        sleep(Duration::from_millis(50)).await;
        monitor.schedule_next(&session);

        sleep(Duration::from_millis(60)).await;
        assert_eq!(pings.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(50)).await;
        assert_eq!(pings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_rearms_and_reports_round_trip() {
        let pings = Arc::new(AtomicUsize::new(0));
        let session = counting_session(&pings);
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        let listener: PingListener = Arc::new(move |result: PingResult| sink.lock().unwrap().push(result.round_trip()));
        let monitor = PingMonitor::new(Some(Duration::from_millis(100)), Some(listener));

        monitor.schedule_next(&session);
        sleep(Duration::from_millis(350)).await;

        assert_eq!(pings.load(Ordering::SeqCst), 3);
        assert_eq!(*reported.lock().unwrap(), vec![Duration::from_millis(3); 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_disarms_the_timer() {
        let pings = Arc::new(AtomicUsize::new(0));
        let session = counting_session(&pings);
        let monitor = PingMonitor::new(Some(Duration::from_millis(100)), None);

        monitor.schedule_next(&session);
        monitor.cancel();
        sleep(Duration::from_millis(500)).await;
        assert_eq!(pings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn no_interval_never_pings() {
        let pings = Arc::new(AtomicUsize::new(0));
        let session = counting_session(&pings);
        let monitor = PingMonitor::new(None, None);

        monitor.schedule_next(&session);
        sleep(Duration::from_secs(10)).await;
        assert_eq!(pings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_ping_marks_session_broken() {
        let mut handle = open_handle();
        handle.expect_ping().times(1).returning(|| Err(TransportError::protocol("ping timed out")));
        let session = Arc::new(Session::new(Arc::new(handle), 1));
        let monitor = PingMonitor::new(Some(Duration::from_millis(100)), None);

        monitor.schedule_next(&session);
        sleep(Duration::from_millis(250)).await;
        assert_eq!(session.status(), SessionStatus::Error);
    }
}
