//! Idle Reaper
//!
//! NIST 800-53: AC-12 (Session Termination)
//! Implementation: There is no logout command, so this timer is the only way a
//! silent peer's session slot is freed.

use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audit::AuditLogger;
use crate::session::SessionTable;

/// Run one sweep; returns how many sessions were evicted
pub async fn reap_once(
    sessions: &SessionTable,
    timeout: Duration,
    now: Instant,
    audit: AuditLogger,
) -> usize {
    let evicted = sessions.evict_idle(now, timeout).await;

    for session in &evicted {
        let idle_secs = session.idle_for(now).as_secs();
        info!(
            event = "session_evicted",
            client = %session.addr,
            user = %session.username,
            idle_secs,
            "Evicted idle session"
        );
        audit.session_evicted(
            session.addr,
            &session.username,
            idle_secs,
            session.messages_received,
        );
    }

    evicted.len()
}

/// Spawn the reaper on a fixed interval until `shutdown` is cancelled
pub fn spawn_idle_reaper(
    sessions: SessionTable,
    interval: Duration,
    timeout: Duration,
    audit: AuditLogger,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Idle reaper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    reap_once(&sessions, timeout, Instant::now(), audit).await;

                    let snapshot = sessions.snapshot().await;
                    debug!(
                        active = snapshot.active_connections,
                        messages = snapshot.stats.total_messages_received,
                        bytes_received = snapshot.stats.total_bytes_received,
                        bytes_sent = snapshot.stats.total_bytes_sent,
                        "Session sweep"
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn sweep_evicts_exactly_the_idle_session() {
        let sessions = SessionTable::new(5);
        let start = Instant::now();
        sessions.admit(addr(1), 1, start).await;
        sessions.admit(addr(2), 1, start + Duration::from_secs(25)).await;

        let evicted = reap_once(
            &sessions,
            Duration::from_secs(30),
            start + Duration::from_secs(31),
            AuditLogger::disabled(),
        )
        .await;

        assert_eq!(evicted, 1);
        assert_eq!(sessions.active_connections().await, 1);
        assert!(sessions.session(addr(1)).await.is_none());
        assert!(sessions.session(addr(2)).await.is_some());
    }

    #[tokio::test]
    async fn background_reaper_frees_slots_and_stops_on_cancel() {
        let sessions = SessionTable::new(1);
        sessions.admit(addr(1), 1, Instant::now()).await;

        let shutdown = CancellationToken::new();
        let handle = spawn_idle_reaper(
            sessions.clone(),
            Duration::from_millis(20),
            Duration::from_millis(50),
            AuditLogger::disabled(),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sessions.active_connections().await, 0);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
