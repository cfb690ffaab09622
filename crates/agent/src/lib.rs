//! Single-turn orchestration for redscope.
//!
//! A turn flows through these stages:
//!
//! 1. **Retrieve** an optional knowledge excerpt for the query
//! 2. **Assemble** instructions from the excerpt, the persona and the history
//! 3. **Plan** the reply budget from what the input leaves of the window
//! 4. **Run** the model/tool loop in its own task
//! 5. **Route** its events to the display and accumulate the answer
//!
//! Recording the result in [`ConversationHistoryStore`] is up to the caller.

pub mod context;
pub mod history;
pub mod loop_runner;
pub mod runner;
pub mod stream_router;

#[cfg(test)]
mod test_helpers;

pub use context::{
    ContextBudgetPlanner, DEFAULT_PERSONA, PromptAssembler, TokenCounter, persona_with_tool_providers,
};
pub use history::{ConversationHistoryStore, DialogueTurn};
pub use loop_runner::{RoundSettings, ToolLoop};
pub use runner::{AgentContext, AgentRunner, TurnInvoker, TurnOutcome};
pub use stream_router::{
    DisplaySink, EventReceiver, Interruption, NullSink, RecordingSink, RoutedOutput, SinkEntry,
    StreamEventRouter, decode_tool_arguments, render_tool_output,
};
