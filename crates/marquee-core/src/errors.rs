use crate::ids::ConnectionId;

/// Delivery failures local to one connection. A broadcast never propagates
/// these to its caller; the affected connection is excluded from the success
/// count and torn down by its own stream writer.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BusError {
    #[error("queue full for connection {connection_id}")]
    QueueFull { connection_id: ConnectionId },
    #[error("connection {connection_id} is inactive")]
    Inactive { connection_id: ConnectionId },
}

impl BusError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::QueueFull { .. } => "queue_full",
            Self::Inactive { .. } => "inactive",
        }
    }
}
