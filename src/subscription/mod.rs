// Client protocol, subscription registry and per-connection handling

pub mod manager;
pub mod protocol;
pub mod registry;

pub use manager::ConnectionManager;
pub use protocol::{ClientMessage, ProtocolError, RelayMessage};
pub use registry::{
    ConnectionHandle, ConnectionId, Outbound, Subscription, SubscriptionRegistry,
    SubscriptionTasks,
};
