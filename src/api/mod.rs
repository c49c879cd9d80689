// HTTP and WebSocket APIs

pub mod relay_info;
pub mod websocket;

pub use relay_info::RelayInformation;
pub use websocket::{create_router, RelayAppState};
