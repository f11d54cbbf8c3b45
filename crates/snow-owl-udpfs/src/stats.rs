//! Traffic counters
//!
//! NIST 800-53: SI-4 (System Monitoring)
//! Implementation: Process-wide and per-peer counters, never persisted. The
//! session table owns the live instance and mutates it under its lock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::SocketAddr;

/// Per-peer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    pub messages_received: u64,
    pub bytes_received: u64,
}

/// Process-wide counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct GlobalStats {
    pub total_messages_received: u64,
    pub total_bytes_received: u64,
    pub total_bytes_sent: u64,
    /// Live sessions only; totals above survive eviction
    pub clients: BTreeMap<SocketAddr, ClientStats>,
}

impl GlobalStats {
    pub fn record_received(&mut self, addr: SocketAddr, bytes: usize) {
        let bytes = bytes as u64;
        self.total_messages_received += 1;
        self.total_bytes_received += bytes;
        let client = self.clients.entry(addr).or_default();
        client.messages_received += 1;
        client.bytes_received += bytes;
    }

    pub fn record_sent(&mut self, bytes: usize) {
        self.total_bytes_sent += bytes as u64;
    }

    /// Drop a peer's breakdown once its session is gone
    pub fn forget(&mut self, addr: SocketAddr) {
        self.clients.remove(&addr);
    }
}

/// Point-in-time copy of the counters, taken under the table lock
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub active_connections: usize,
    pub admin_client: Option<SocketAddr>,
    pub stats: GlobalStats,
}

impl StatsSnapshot {
    /// Render the `STATS` reply with no size bound
    pub fn render(&self) -> String {
        self.render_within(usize::MAX)
    }

    /// Render the `STATS` reply in at most `limit` bytes
    ///
    /// The totals always appear. Per-client lines are added while they fit,
    /// and the rest are summarized as `... and K more`.
    pub fn render_within(&self, limit: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "SERVER STATS ({})", self.taken_at.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out, "active connections: {}", self.active_connections);
        let _ = writeln!(
            out,
            "admin client: {}",
            self.admin_client
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        let _ = writeln!(out, "total messages received: {}", self.stats.total_messages_received);
        let _ = writeln!(out, "total bytes received: {}", self.stats.total_bytes_received);
        let _ = write!(out, "total bytes sent: {}", self.stats.total_bytes_sent);

        let total = self.stats.clients.len();
        if total == 0 {
            return out;
        }

        let trailer_room = format!("\n  ... and {total} more").len();
        let mut section = String::from("\nclients:");
        let mut listed = 0;
        for (addr, client) in &self.stats.clients {
            let line = format!(
                "\n  {}: messages={}, bytes={}",
                addr, client.messages_received, client.bytes_received
            );
            let remaining = total - listed - 1;
            let reserve = if remaining > 0 { trailer_room } else { 0 };
            if out.len() + section.len() + line.len() + reserve > limit {
                break;
            }
            section.push_str(&line);
            listed += 1;
        }

        if listed < total {
            let _ = write!(section, "\n  ... and {} more", total - listed);
        }
        if out.len() + section.len() <= limit {
            out.push_str(&section);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn records_per_client_and_totals() {
        let mut stats = GlobalStats::default();
        stats.record_received(addr(1000), 4);
        stats.record_received(addr(1000), 6);
        stats.record_received(addr(2000), 5);
        stats.record_sent(12);

        assert_eq!(stats.total_messages_received, 3);
        assert_eq!(stats.total_bytes_received, 15);
        assert_eq!(stats.total_bytes_sent, 12);
        assert_eq!(
            stats.clients[&addr(1000)],
            ClientStats {
                messages_received: 2,
                bytes_received: 10
            }
        );
    }

    #[test]
    fn renders_report() {
        let mut stats = GlobalStats::default();
        stats.record_received(addr(4242), 5);
        let snapshot = StatsSnapshot {
            taken_at: Utc::now(),
            active_connections: 1,
            admin_client: None,
            stats,
        };

        let report = snapshot.render();
        assert!(report.starts_with("SERVER STATS"));
        assert!(report.contains("active connections: 1"));
        assert!(report.contains("admin client: none"));
        assert!(report.contains("total messages received: 1"));
        assert!(report.contains("total bytes sent: 0"));
        assert!(report.contains("127.0.0.1:4242: messages=1, bytes=5"));
    }

    #[test]
    fn forget_keeps_totals() {
        let mut stats = GlobalStats::default();
        stats.record_received(addr(1), 4);
        stats.forget(addr(1));

        assert!(stats.clients.is_empty());
        assert_eq!(stats.total_messages_received, 1);
        assert_eq!(stats.total_bytes_received, 4);
    }

    #[test]
    fn bounded_report_summarizes_extra_clients() {
        let mut stats = GlobalStats::default();
        for port in 1..=5000 {
            stats.record_received(addr(port), 4);
        }
        let snapshot = StatsSnapshot {
            taken_at: Utc::now(),
            active_connections: 5000,
            admin_client: Some(addr(1)),
            stats,
        };

        let limit = 2048;
        let report = snapshot.render_within(limit);
        assert!(report.len() <= limit);
        assert!(report.starts_with("SERVER STATS"));
        assert!(report.contains("total messages received: 5000"));
        assert!(report.contains("127.0.0.1:1: messages=1, bytes=4"));
        assert!(report.contains(" more"));

        let full = snapshot.render();
        assert!(full.len() > limit);
        assert!(!full.contains(" more"));
    }

    #[test]
    fn tiny_limit_still_keeps_totals() {
        let mut stats = GlobalStats::default();
        stats.record_received(addr(1), 4);
        let snapshot = StatsSnapshot {
            taken_at: Utc::now(),
            active_connections: 1,
            admin_client: None,
            stats,
        };

        let report = snapshot.render_within(10);
        assert!(report.contains("total bytes sent: 0"));
        assert!(!report.contains("clients:"));
    }
}
