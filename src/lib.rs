// Event model and validation
pub mod event;

// Subscription filters
pub mod filter;

// In-memory event store
pub mod store;

// Relay engine (shared state and protocol handling)
pub mod relay;

// Upstream relay bridging
pub mod upstream;

// Configuration
pub mod config;

// HTTP and WebSocket APIs
pub mod api;

// Client protocol and subscription management
pub mod subscription;
