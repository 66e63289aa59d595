//! `/health` body: uptime, connection count and identifier pool headroom.
//!
//! The status reads `"saturated"` once every session identifier is taken,
//! since new connections are then refused with close code 1013.

use serde::Serialize;
use std::time::Instant;

/// Occupancy of one identifier pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolUsage {
    /// Identifiers currently allocated.
    pub live: usize,
    /// Pool size.
    pub capacity: usize,
}

impl PoolUsage {
    /// Whether no identifier is left.
    pub fn is_full(self) -> bool {
        self.live >= self.capacity
    }
}

/// `/health` response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"saturated"` while the session pool is full.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Accepted WebSocket connections.
    pub connections: usize,
    /// Session identifier pool.
    pub sessions: PoolUsage,
    /// Notification identifier pool, shared by all sessions.
    pub notifications: PoolUsage,
}

/// Assemble the response.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    sessions: PoolUsage,
    notifications: PoolUsage,
) -> HealthResponse {
    HealthResponse {
        status: if sessions.is_full() { "saturated" } else { "ok" },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        sessions,
        notifications,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(live: usize, capacity: usize) -> PoolUsage {
        PoolUsage { live, capacity }
    }

    #[test]
    fn idle_server_is_ok() {
        let resp = health_check(Instant::now(), 0, usage(0, 32), usage(0, 256));
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn full_session_pool_is_saturated() {
        let resp = health_check(Instant::now(), 32, usage(32, 32), usage(3, 256));
        assert_eq!(resp.status, "saturated");
        // A full notification pool only fails creates, not connects.
        let resp = health_check(Instant::now(), 1, usage(1, 32), usage(256, 256));
        assert_eq!(resp.status, "ok");
    }

    #[test]
    fn uptime_counts_from_start() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        assert!(health_check(start, 0, usage(0, 1), usage(0, 1)).uptime_secs >= 59);
    }

    #[test]
    fn body_nests_pool_usage() {
        let resp = health_check(Instant::now(), 2, usage(1, 32), usage(7, 256));
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["connections"], 2);
        assert_eq!(parsed["sessions"]["live"], 1);
        assert_eq!(parsed["sessions"]["capacity"], 32);
        assert_eq!(parsed["notifications"]["live"], 7);
        assert_eq!(parsed["notifications"]["capacity"], 256);
    }
}
