//! Everything that shapes what the model sees for one turn.

pub mod assembler;
pub mod budget;
pub mod token;

pub use assembler::{DEFAULT_PERSONA, PromptAssembler, persona_with_tool_providers};
pub use budget::ContextBudgetPlanner;
pub use token::TokenCounter;
