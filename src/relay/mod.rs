// Relay engine: event acceptance, history replay and fan-out

mod engine;


pub use engine::RelayEngine;
