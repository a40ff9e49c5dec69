//! Per-connection statistics.
//!
//! Tracks byte counters and stream counters for one connection. A snapshot
//! is returned by [`Connection::stats`](crate::Connection::stats) and can be
//! serialized for status output.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Connection statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStats {
    /// Total payload bytes handed to the transport.
    pub bytes_sent: u64,
    /// Total payload bytes delivered to readers.
    pub bytes_recv: u64,
    /// Outbound streams opened locally.
    pub streams_opened: u64,
    /// Inbound streams claimed through `accept_inbound_stream`.
    pub streams_accepted: u64,
    /// Inbound streams refused because the accept queue was full.
    pub streams_refused: u64,
    /// Time from establishment until close, once closed.
    #[serde(with = "duration_opt_millis")]
    pub lifetime: Option<Duration>,
    /// Establishment timestamp (not serialized, reset on deserialize).
    #[serde(skip, default = "Instant::now")]
    pub established_at: Instant,
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStats {
    /// Create a new stats tracker.
    pub fn new() -> Self {
        Self {
            bytes_sent: 0,
            bytes_recv: 0,
            streams_opened: 0,
            streams_accepted: 0,
            streams_refused: 0,
            lifetime: None,
            established_at: Instant::now(),
        }
    }

    /// Record bytes sent.
    pub fn record_send(&mut self, bytes: usize) {
        self.bytes_sent = self.bytes_sent.saturating_add(bytes as u64);
    }

    /// Record bytes received.
    pub fn record_recv(&mut self, bytes: usize) {
        self.bytes_recv = self.bytes_recv.saturating_add(bytes as u64);
    }

    /// Record a locally opened stream.
    pub fn record_opened(&mut self) {
        self.streams_opened = self.streams_opened.saturating_add(1);
    }

    /// Record an accepted stream.
    pub fn record_accepted(&mut self) {
        self.streams_accepted = self.streams_accepted.saturating_add(1);
    }

    /// Record a refused inbound stream.
    pub fn record_refused(&mut self) {
        self.streams_refused = self.streams_refused.saturating_add(1);
    }

    /// Freeze the lifetime; later calls keep the first value.
    pub fn mark_closed(&mut self) {
        if self.lifetime.is_none() {
            self.lifetime = Some(self.established_at.elapsed());
        }
    }

    /// Time since establishment, or the frozen lifetime once closed.
    pub fn age(&self) -> Duration {
        self.lifetime
            .unwrap_or_else(|| self.established_at.elapsed())
    }
}

/// Serde helper for optional Duration as milliseconds.
mod duration_opt_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => (d.as_millis() as u64).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<u64> = Option::deserialize(deserializer)?;
        Ok(opt.map(Duration::from_millis))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_new() {
        let stats = ConnectionStats::new();
        assert_eq!(stats.bytes_sent, 0);
        assert_eq!(stats.bytes_recv, 0);
        assert_eq!(stats.streams_opened, 0);
        assert_eq!(stats.streams_accepted, 0);
        assert_eq!(stats.streams_refused, 0);
        assert!(stats.lifetime.is_none());
    }

    #[test]
    fn stats_counters() {
        let mut stats = ConnectionStats::new();

        stats.record_send(100);
        stats.record_send(50);
        stats.record_recv(10);
        stats.record_opened();
        stats.record_accepted();
        stats.record_accepted();
        stats.record_refused();

        assert_eq!(stats.bytes_sent, 150);
        assert_eq!(stats.bytes_recv, 10);
        assert_eq!(stats.streams_opened, 1);
        assert_eq!(stats.streams_accepted, 2);
        assert_eq!(stats.streams_refused, 1);
    }

    #[test]
    fn mark_closed_keeps_first_lifetime() {
        let mut stats = ConnectionStats::new();
        stats.mark_closed();
        let first = stats.lifetime;
        assert!(first.is_some());

        std::thread::sleep(Duration::from_millis(5));
        stats.mark_closed();
        assert_eq!(stats.lifetime, first);
        assert_eq!(stats.age(), first.unwrap());
    }

    #[test]
    fn stats_serialize_skips_instant() {
        let mut stats = ConnectionStats::new();
        stats.record_send(3);
        let json = serde_json::to_value(&stats).unwrap();

        assert_eq!(json["bytes_sent"], 3);
        assert!(json["lifetime"].is_null());
        assert!(json.get("established_at").is_none());
    }
}
