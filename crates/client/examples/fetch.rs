use std::env;
use std::time::Duration;

use http::HeaderMap;
use micro_client::{ConnectConfig, ConnectionSession, PingResult, TrustAnchor};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Fetches a path twice over one session, with keepalive pings in between.
///
/// ```text
/// cargo run --example fetch -- https://example.com / [ca.pem]
/// ```
#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut args = env::args().skip(1);
    let origin = args.next().unwrap_or_else(|| "https://example.com".to_string());
    let path = args.next().unwrap_or_else(|| "/".to_string());

    let mut config = match ConnectConfig::new(&origin) {
        Ok(config) => config,
        Err(e) => {
            error!(cause = %e, "invalid origin");
            return;
        }
    };
    if let Some(ca) = args.next() {
        match std::fs::read(&ca) {
            Ok(pem) => config = config.with_trust_anchor(TrustAnchor::from_pem(pem)),
            Err(e) => {
                error!(file = %ca, cause = %e, "failed to read trust anchor");
                return;
            }
        }
    }
    let config = config
        .with_ping_interval(Duration::from_secs(1))
        .with_ping_listener(|result: PingResult| info!(round_trip = ?result.round_trip(), "ping"));

    let session = match ConnectionSession::connect(config).await {
        Ok(session) => session,
        Err(e) => {
            error!(cause = %e, "failed to connect");
            return;
        }
    };

    for _ in 0..2 {
        match session.get(&path, HeaderMap::new()).await {
            Ok(response) => {
                let body = String::from_utf8_lossy(response.body());
                info!(status = %response.status(), headers = ?response.headers(), "received response");
                info!(body = %body.chars().take(200).collect::<String>(), "response body");
            }
            Err(e) => warn!(cause = %e, status = %session.status(), "request failed"),
        }
        tokio::time::sleep(Duration::from_millis(2500)).await;
    }

    if let Err(e) = session.close().await {
        error!(cause = %e, "failed to close session");
    }
    info!(status = %session.status(), "done");
}
