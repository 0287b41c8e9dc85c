// WebSocket observer sessions

pub mod manager;
pub mod protocol;

pub use manager::ConnectionManager;
pub use protocol::{BoardUpdateMessage, ClientMessage, ErrorMessage};
