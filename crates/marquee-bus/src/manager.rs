use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use marquee_core::{BroadcastFilter, ConnectionId, PushEvent, Role};

use crate::connection::{Connection, EventReceiver};

/// Trailing window for the delivery metric.
const SENT_WINDOW: Duration = Duration::from_secs(3600);

/// Aggregate view returned by [`Manager::stats`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BusStats {
    pub total_connections: usize,
    pub admin_connections: usize,
    pub display_connections: usize,
    pub mean_age_secs: f64,
    pub events_sent_last_hour: usize,
}

/// Registry of all open connections. Explicitly constructed and shared by
/// `Arc` — one per server, one per test.
pub struct Manager {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    queue_capacity: usize,
    sent_window: Mutex<VecDeque<Instant>>,
}

impl Manager {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            queue_capacity,
            sent_window: Mutex::new(VecDeque::new()),
        }
    }

    /// Register a fresh connection. The id is never reused for the life of
    /// the registry, including under concurrent creation.
    pub fn create(&self, role: Role, owner: Option<String>) -> (Arc<Connection>, EventReceiver) {
        let id = ConnectionId::new();
        let (conn, receiver) = Connection::channel(id.clone(), role, owner, self.queue_capacity);
        self.connections.insert(id.clone(), Arc::clone(&conn));
        tracing::info!(connection_id = %id, role = %role, "connection registered");
        (conn, receiver)
    }

    /// Idempotent removal: absent or already-removed ids are a no-op.
    pub fn remove(&self, id: &ConnectionId) {
        if let Some((_, conn)) = self.connections.remove(id) {
            conn.disconnect();
            tracing::info!(connection_id = %id, "connection removed");
        }
    }

    /// Fan one event out to every active connection matching `filter`.
    /// Returns the number of successful enqueues; a single connection's
    /// failure never surfaces to the broadcaster.
    pub fn broadcast(&self, event: &PushEvent, filter: &BroadcastFilter) -> usize {
        let purged = self.purge_inactive();
        if purged > 0 {
            tracing::debug!(purged, "purged inactive connections before broadcast");
        }

        let mut delivered = 0;
        for entry in self.connections.iter() {
            let conn = entry.value();
            if !filter.matches(conn.role, conn.owner.as_deref()) {
                continue;
            }
            match conn.enqueue(event.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    tracing::warn!(
                        connection_id = %conn.id,
                        event_type = %event.event_type,
                        kind = err.error_kind(),
                        "delivery failed, connection marked inactive"
                    );
                }
            }
        }

        if delivered > 0 {
            self.record_sent(Instant::now());
        }
        delivered
    }

    /// True when any active connection matches role and (optionally) owner.
    pub fn is_connected(&self, role: Role, owner: Option<&str>) -> bool {
        self.connections.iter().any(|entry| {
            let conn = entry.value();
            conn.is_active()
                && conn.role == role
                && (owner.is_none() || conn.owner.as_deref() == owner)
        })
    }

    pub fn stats(&self) -> BusStats {
        let now = Utc::now();
        let mut total = 0usize;
        let mut admin = 0usize;
        let mut display = 0usize;
        let mut age_sum = 0i64;

        for entry in self.connections.iter() {
            let conn = entry.value();
            total += 1;
            match conn.role {
                Role::Admin => admin += 1,
                Role::Display => display += 1,
            }
            age_sum += conn.age_secs(now);
        }

        let mean_age_secs = if total > 0 {
            age_sum as f64 / total as f64
        } else {
            0.0
        };

        BusStats {
            total_connections: total,
            admin_connections: admin,
            display_connections: display,
            mean_age_secs,
            events_sent_last_hour: self.events_sent_last_hour(),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Drop entries already flagged inactive (overflow, writer teardown in
    /// flight). Their stream writers still call `remove` themselves; this
    /// keeps the registry from carrying dead entries across broadcasts.
    fn purge_inactive(&self) -> usize {
        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| !entry.value().is_active())
            .map(|entry| entry.key().clone())
            .collect();
        let count = dead.len();
        for id in dead {
            self.remove(&id);
        }
        count
    }

    fn events_sent_last_hour(&self) -> usize {
        self.events_sent_since(Instant::now())
    }

    /// Lazy-cleanup sliding window: prune on read, then count.
    fn events_sent_since(&self, now: Instant) -> usize {
        let mut window = self.sent_window.lock();
        while let Some(front) = window.front() {
            if now.duration_since(*front) > SENT_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        window.len()
    }

    fn record_sent(&self, at: Instant) {
        self.sent_window.lock().push_back(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn event(event_type: &str) -> PushEvent {
        PushEvent::new(event_type, Map::new())
    }

    #[tokio::test]
    async fn create_registers_and_remove_is_idempotent() {
        let manager = Manager::new(32);
        let (conn, _rx) = manager.create(Role::Admin, None);
        assert_eq!(manager.connection_count(), 1);

        manager.remove(&conn.id);
        assert_eq!(manager.connection_count(), 0);
        assert!(!conn.is_active());

        // Second removal and unknown id are no-ops
        manager.remove(&conn.id);
        manager.remove(&ConnectionId::new());
        assert_eq!(manager.connection_count(), 0);
    }

    #[tokio::test]
    async fn removing_one_connection_leaves_others_intact() {
        let manager = Manager::new(32);
        let (a, _rx_a) = manager.create(Role::Admin, None);
        let (b, mut rx_b) = manager.create(Role::Display, Some("kiosk-1".into()));

        manager.broadcast(&event("slideshow.updated"), &BroadcastFilter::any());
        manager.remove(&a.id);
        manager.broadcast(&event("display.heartbeat"), &BroadcastFilter::any());

        assert!(b.is_active());
        let first = rx_b.next(Duration::from_secs(1)).await.unwrap();
        let second = rx_b.next(Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.event_type, "slideshow.updated");
        assert_eq!(second.event_type, "display.heartbeat");
    }

    #[tokio::test]
    async fn broadcast_respects_role_and_owner_filter() {
        let manager = Manager::new(32);
        let (_admin, mut rx_admin) = manager.create(Role::Admin, Some("alice".into()));
        let (_kiosk1, mut rx_k1) = manager.create(Role::Display, Some("kiosk-1".into()));
        let (_kiosk2, mut rx_k2) = manager.create(Role::Display, Some("kiosk-2".into()));

        let count = manager.broadcast(
            &event("display.heartbeat"),
            &BroadcastFilter::for_owner(Role::Display, "kiosk-1"),
        );
        assert_eq!(count, 1);

        let evt = rx_k1.next(Duration::from_secs(1)).await.unwrap();
        assert_eq!(evt.event_type, "display.heartbeat");

        // Siblings get the idle ping, never the filtered event
        let admin_evt = rx_admin.next(Duration::from_millis(10)).await.unwrap();
        assert_eq!(admin_evt.event_type, "ping");
        let k2_evt = rx_k2.next(Duration::from_millis(10)).await.unwrap();
        assert_eq!(k2_evt.event_type, "ping");
    }

    #[tokio::test]
    async fn broadcast_without_filter_reaches_everyone() {
        let manager = Manager::new(32);
        let (_a, mut rx_a) = manager.create(Role::Admin, None);
        let (_b, mut rx_b) = manager.create(Role::Display, Some("kiosk-1".into()));

        let count = manager.broadcast(&event("slideshow.updated"), &BroadcastFilter::any());
        assert_eq!(count, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let evt = rx.next(Duration::from_secs(1)).await.unwrap();
            assert_eq!(evt.event_type, "slideshow.updated");
        }
    }

    #[tokio::test]
    async fn overflowed_connection_is_excluded_then_purged() {
        let manager = Manager::new(1);
        let (conn, _rx) = manager.create(Role::Display, Some("kiosk-1".into()));

        assert_eq!(manager.broadcast(&event("a"), &BroadcastFilter::any()), 1);
        // Queue full: delivery fails, connection goes inactive
        assert_eq!(manager.broadcast(&event("b"), &BroadcastFilter::any()), 0);
        assert!(!conn.is_active());

        // Next broadcast purges the dead entry before iterating
        assert_eq!(manager.broadcast(&event("c"), &BroadcastFilter::any()), 0);
        assert_eq!(manager.connection_count(), 0);
    }

    #[tokio::test]
    async fn is_connected_matches_active_only() {
        let manager = Manager::new(32);
        let (conn, _rx) = manager.create(Role::Display, Some("kiosk-1".into()));

        assert!(manager.is_connected(Role::Display, Some("kiosk-1")));
        assert!(manager.is_connected(Role::Display, None));
        assert!(!manager.is_connected(Role::Display, Some("kiosk-2")));
        assert!(!manager.is_connected(Role::Admin, None));

        conn.disconnect();
        assert!(!manager.is_connected(Role::Display, Some("kiosk-1")));
    }

    #[tokio::test]
    async fn stats_counts_roles_and_window() {
        let manager = Manager::new(32);
        let (_a, _rx_a) = manager.create(Role::Admin, None);
        let (_b, _rx_b) = manager.create(Role::Display, Some("kiosk-1".into()));

        manager.broadcast(&event("slideshow.updated"), &BroadcastFilter::any());
        manager.broadcast(
            &event("display.heartbeat"),
            &BroadcastFilter::for_owner(Role::Display, "kiosk-1"),
        );

        let stats = manager.stats();
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.admin_connections, 1);
        assert_eq!(stats.display_connections, 1);
        assert!(stats.mean_age_secs >= 0.0);
        assert_eq!(stats.events_sent_last_hour, 2);
    }

    #[test]
    fn window_drops_entries_older_than_one_hour() {
        let manager = Manager::new(32);
        let t0 = Instant::now();
        manager.record_sent(t0);
        manager.record_sent(t0 + Duration::from_secs(1900));
        manager.record_sent(t0 + Duration::from_secs(3650));

        // All three inside the trailing hour
        assert_eq!(manager.events_sent_since(t0 + Duration::from_secs(3650)), 3);
        // Advance past 3600s from the first record: it falls out
        assert_eq!(manager.events_sent_since(t0 + Duration::from_secs(3700)), 2);
        // Far future: window drains back to zero
        assert_eq!(manager.events_sent_since(t0 + Duration::from_secs(9000)), 0);
    }

    #[tokio::test]
    async fn delivery_to_nobody_does_not_count() {
        let manager = Manager::new(32);
        let count = manager.broadcast(&event("slideshow.updated"), &BroadcastFilter::any());
        assert_eq!(count, 0);
        assert_eq!(manager.stats().events_sent_last_hour, 0);
    }

    #[tokio::test]
    async fn concurrent_creates_yield_unique_ids() {
        let manager = Arc::new(Manager::new(8));
        let mut handles = vec![];
        for _ in 0..8 {
            let m = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                (0..50)
                    .map(|_| m.create(Role::Display, None).0.id.clone())
                    .collect::<Vec<_>>()
            }));
        }

        let mut seen = std::collections::HashSet::new();
        for h in handles {
            for id in h.await.unwrap() {
                assert!(seen.insert(id.as_str().to_string()));
            }
        }
        assert_eq!(seen.len(), 400);
        assert_eq!(manager.connection_count(), 400);
    }

    #[test]
    fn stats_serialize_shape() {
        let manager = Manager::new(8);
        let json = serde_json::to_value(manager.stats()).unwrap();
        assert_eq!(json["total_connections"], 0);
        assert_eq!(json["events_sent_last_hour"], 0);
        assert_eq!(json["mean_age_secs"], 0.0);
    }
}
