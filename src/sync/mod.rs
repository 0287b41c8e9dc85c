// Fan-out of board views to connected observers

mod broadcaster;

pub use broadcaster::{BoardView, Broadcaster, ObserverInfo, ObserverSession};
