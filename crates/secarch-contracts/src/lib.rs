pub mod analysis;
pub mod chat;
pub mod errors;
pub mod events;
pub mod prompts;

pub use errors::{AnalysisError, StrategyFailure};
