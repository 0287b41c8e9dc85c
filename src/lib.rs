// Bed status board
pub mod board;

// History log, retention and display time
pub mod history;

// Durable history persistence
pub mod store;

// Command serialization, undo and revert
pub mod engine;

// Board fan-out to observers
pub mod sync;

// WebSocket observer sessions
pub mod subscription;

// HTTP and WebSocket APIs
pub mod api;

// TOML configuration
pub mod config;
