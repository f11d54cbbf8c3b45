//! Session Table
//!
//! NIST 800-53: AC-10 (Concurrent Session Control), AC-12 (Session Termination)
//! Implementation: Maps peer address to session state. Sessions, global
//! counters and the admin pointer live behind one mutex so a request's
//! admission, counter update and privilege check can never interleave with
//! the reaper or another handler for the same peer.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::Privilege;
use crate::stats::{GlobalStats, StatsSnapshot};

/// Server-side state for one peer address
#[derive(Debug, Clone)]
pub struct Session {
    pub addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
    pub is_admin: bool,
    pub username: String,
    pub messages_received: u64,
    pub bytes_received: u64,
    pub last_activity: Instant,
    /// Announced by `/upload`, cleared when content arrives
    pub pending_upload: Option<PendingUpload>,
}

/// First phase of a two-phase upload
///
/// Nothing on the wire ties `READY_FOR_UPLOAD` to the following `UPLOAD:`
/// frame; the pairing relies on the peer not interleaving other uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpload {
    pub filename: String,
    pub correlation_id: String,
}

impl Session {
    fn new(addr: SocketAddr, username: String, now: Instant) -> Self {
        Self {
            addr,
            connected_at: Utc::now(),
            is_admin: false,
            username,
            messages_received: 0,
            bytes_received: 0,
            last_activity: now,
            pending_upload: None,
        }
    }

    pub fn privilege(&self) -> Privilege {
        if self.is_admin {
            Privilege::Admin
        } else {
            Privilege::User
        }
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }
}

/// Result of admitting a datagram
#[derive(Debug, Clone)]
pub enum Admission {
    /// Session exists (or was just created) and has been touched
    Admitted {
        session: Session,
        created: bool,
        active: usize,
    },
    /// Table is full and this peer has no session
    ServerFull { active: usize },
}

#[derive(Debug, Default)]
struct TableState {
    sessions: HashMap<SocketAddr, Session>,
    stats: GlobalStats,
    admin_client: Option<SocketAddr>,
    next_user_id: u64,
}

impl TableState {
    /// Look up a session, creating it with a fresh `user_N` name if absent
    fn entry(&mut self, addr: SocketAddr, now: Instant) -> &mut Session {
        let next_user_id = &mut self.next_user_id;
        self.sessions.entry(addr).or_insert_with(|| {
            *next_user_id += 1;
            Session::new(addr, format!("user_{next_user_id}"), now)
        })
    }

    fn touch(&mut self, addr: SocketAddr, bytes: usize, now: Instant) -> Session {
        self.stats.record_received(addr, bytes);
        let session = self.entry(addr, now);
        session.messages_received += 1;
        session.bytes_received += bytes as u64;
        session.last_activity = now;
        session.clone()
    }
}

/// Lock-guarded session table
///
/// Cloning is cheap; clones share the same table. The active-connection count
/// is the map's length, so it cannot drift from the live entries.
#[derive(Debug, Clone)]
pub struct SessionTable {
    max_connections: usize,
    state: Arc<Mutex<TableState>>,
}

impl SessionTable {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            state: Arc::new(Mutex::new(TableState::default())),
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Capacity check, lookup-or-create and touch as one atomic step
    pub async fn admit(&self, addr: SocketAddr, bytes: usize, now: Instant) -> Admission {
        let mut state = self.state.lock().await;

        let created = !state.sessions.contains_key(&addr);
        if created && state.sessions.len() >= self.max_connections {
            let active = state.sessions.len();
            warn!(
                event = "server_full",
                client = %addr,
                active,
                max = self.max_connections,
                "Rejecting new peer: session table full"
            );
            return Admission::ServerFull { active };
        }

        let session = state.touch(addr, bytes, now);
        let active = state.sessions.len();
        if created {
            info!(
                event = "session_created",
                client = %addr,
                username = %session.username,
                active,
                "New session"
            );
        }
        Admission::Admitted {
            session,
            created,
            active,
        }
    }

    /// Return the session for `addr`, creating it with defaults on first sight
    ///
    /// Does not enforce `max_connections`; use [`SessionTable::admit`] on the
    /// request path.
    pub async fn get_or_create(&self, addr: SocketAddr, now: Instant) -> Session {
        let mut state = self.state.lock().await;
        if let Some(session) = state.sessions.get(&addr) {
            return session.clone();
        }
        state.entry(addr, now).clone()
    }

    /// Update last-activity and per-session counters
    ///
    /// Returns `None` if the peer has no session (e.g. it was just evicted).
    pub async fn touch(&self, addr: SocketAddr, bytes: usize, now: Instant) -> Option<Session> {
        let mut state = self.state.lock().await;
        if !state.sessions.contains_key(&addr) {
            return None;
        }
        Some(state.touch(addr, bytes, now))
    }

    /// Promote a session to admin and make it the admin client
    ///
    /// Last writer wins when several peers log in.
    pub async fn set_admin(&self, addr: SocketAddr, username: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(session) = state.sessions.get_mut(&addr) else {
            return false;
        };
        session.is_admin = true;
        session.username = username.to_string();

        if let Some(previous) = state.admin_client.replace(addr)
            && previous != addr
        {
            debug!(previous = %previous, current = %addr, "Admin client pointer moved");
        }
        true
    }

    /// Replace the session's pending upload, returning the previous one
    pub async fn set_pending_upload(
        &self,
        addr: SocketAddr,
        pending: Option<PendingUpload>,
    ) -> Option<PendingUpload> {
        let mut state = self.state.lock().await;
        state
            .sessions
            .get_mut(&addr)
            .and_then(|session| std::mem::replace(&mut session.pending_upload, pending))
    }

    /// Remove every session idle longer than `timeout`
    ///
    /// Returns the evicted sessions.
    pub async fn evict_idle(&self, now: Instant, timeout: Duration) -> Vec<Session> {
        let mut state = self.state.lock().await;

        let expired: Vec<SocketAddr> = state
            .sessions
            .values()
            .filter(|session| session.idle_for(now) > timeout)
            .map(|session| session.addr)
            .collect();

        let mut evicted = Vec::with_capacity(expired.len());
        for addr in expired {
            if let Some(session) = state.sessions.remove(&addr) {
                state.stats.forget(addr);
                if state.admin_client == Some(addr) {
                    state.admin_client = None;
                }
                evicted.push(session);
            }
        }
        evicted
    }

    pub async fn record_sent(&self, bytes: usize) {
        self.state.lock().await.stats.record_sent(bytes);
    }

    pub async fn session(&self, addr: SocketAddr) -> Option<Session> {
        self.state.lock().await.sessions.get(&addr).cloned()
    }

    pub async fn active_connections(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    pub async fn admin_client(&self) -> Option<SocketAddr> {
        self.state.lock().await.admin_client
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        let state = self.state.lock().await;
        StatsSnapshot {
            taken_at: Utc::now(),
            active_connections: state.sessions.len(),
            admin_client: state.admin_client,
            stats: state.stats.clone(),
        }
    }
}
