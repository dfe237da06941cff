pub mod connection;
pub mod manager;

pub use connection::{Connection, EventReceiver};
pub use manager::{BusStats, Manager};
