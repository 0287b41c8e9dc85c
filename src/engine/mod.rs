// Mutation serializer and undo/revert over the history log

mod command;
mod error;
mod revert;
mod serializer;

pub use command::{Applied, Command, MergeStrategy};
pub use error::EngineError;
pub use serializer::{BoardEngine, EngineHandle, EngineSettings};

#[cfg(test)]
mod tests;
