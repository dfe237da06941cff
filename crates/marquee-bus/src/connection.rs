use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use marquee_core::{BusError, ConnectionId, PushEvent, Role};

/// One registered sink: identity, role, bounded send queue, activity
/// tracking. Created by the [`Manager`](crate::Manager); the paired
/// [`EventReceiver`] goes to the stream writer serving the transport.
pub struct Connection {
    pub id: ConnectionId,
    pub role: Role,
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    last_activity: AtomicI64,
    active: AtomicBool,
    delivered: AtomicU64,
    tx: mpsc::Sender<PushEvent>,
}

impl Connection {
    /// Build a connection and its receiver half. `capacity` bounds the
    /// pending-event queue.
    pub(crate) fn channel(
        id: ConnectionId,
        role: Role,
        owner: Option<String>,
        capacity: usize,
    ) -> (Arc<Self>, EventReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        let now = Utc::now();
        let conn = Arc::new(Self {
            id,
            role,
            owner,
            created_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
            active: AtomicBool::new(true),
            delivered: AtomicU64::new(0),
            tx,
        });
        let receiver = EventReceiver {
            conn: Arc::clone(&conn),
            rx,
        };
        (conn, receiver)
    }

    /// Non-blocking bounded push. Overflow policy: mark inactive and fail —
    /// the stream writer observes the flag and tears the connection down, so
    /// the client reconnects with a fresh queue instead of receiving a
    /// silently gappy stream.
    pub fn enqueue(&self, event: PushEvent) -> Result<(), BusError> {
        if !self.is_active() {
            return Err(BusError::Inactive {
                connection_id: self.id.clone(),
            });
        }
        match self.tx.try_send(event) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.disconnect();
                Err(BusError::QueueFull {
                    connection_id: self.id.clone(),
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.disconnect();
                Err(BusError::Inactive {
                    connection_id: self.id.clone(),
                })
            }
        }
    }

    /// Idempotent; safe to call any number of times.
    pub fn disconnect(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> i64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds().max(0)
    }
}

/// Receiver half of a connection, owned by its stream writer task. The only
/// blocking point in the subsystem, and it blocks only that task.
pub struct EventReceiver {
    conn: Arc<Connection>,
    rx: mpsc::Receiver<PushEvent>,
}

impl EventReceiver {
    /// Wait for the next event. Yields a synthetic ping when `idle_timeout`
    /// elapses with nothing queued; returns `None` once the connection is
    /// inactive or its queue closed, ending the stream.
    pub async fn next(&mut self, idle_timeout: Duration) -> Option<PushEvent> {
        if !self.conn.is_active() {
            return None;
        }
        match tokio::time::timeout(idle_timeout, self.rx.recv()).await {
            Ok(Some(event)) => {
                self.conn.touch();
                Some(event)
            }
            Ok(None) => None,
            Err(_) => {
                self.conn.touch();
                Some(PushEvent::ping())
            }
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }
}
