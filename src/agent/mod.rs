pub mod claude;
pub mod engine;
pub mod prompt;
pub mod regenerator;
pub mod tools;

pub use regenerator::{regenerator_for, ClaudeRegenerator};
