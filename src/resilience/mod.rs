pub mod escalator;
pub mod retry;

pub use escalator::InstructionEscalator;
pub use retry::{Retried, RetryPolicy};
