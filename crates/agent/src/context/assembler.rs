//! PromptAssembler: builds the system instructions for one turn.
//!
//! Section order is fixed: the knowledge excerpt (when there is one), then
//! the persona, then the retained history. Assembly is deterministic; the
//! only fallible input, knowledge retrieval, is resolved beforehand by
//! [`PromptAssembler::retrieve_excerpt`].

use crate::history::DialogueTurn;
use redscope_core::knowledge::KnowledgeSource;
use std::fmt::Write;
use tracing::{debug, warn};

pub const DEFAULT_PERSONA: &str = "You are a security analysis assistant supporting authorized \
penetration testing and defensive assessments. Work methodically: state what you are checking, \
use the available tools to gather evidence, and report concrete findings with their severity and \
a recommended remediation. Do not guess when a tool can confirm. If a request falls outside an \
authorized engagement, say so.";

const KNOWLEDGE_HEADER: &str = "Based on the following knowledge base information:";
const HISTORY_HEADER: &str = "Below is the previous conversation history, please refer to this \
information to answer the user's question:";

/// Extend `persona` with the names of the connected tool providers.
pub fn persona_with_tool_providers(persona: &str, providers: &[String]) -> String {
    if providers.is_empty() {
        return persona.to_string();
    }
    format!(
        "{persona}\n\nYou have access to the following tools: {}.",
        providers.join(", ")
    )
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PromptAssembler;

impl PromptAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Ask the knowledge source for an excerpt relevant to `query`.
    ///
    /// Never fails: an absent source, an empty excerpt, or a retrieval error
    /// all yield `None`.
    pub async fn retrieve_excerpt(
        &self,
        source: Option<&dyn KnowledgeSource>,
        query: &str,
    ) -> Option<String> {
        let source = source?;
        match source.retrieve(query).await {
            Ok(Some(excerpt)) if !excerpt.trim().is_empty() => {
                debug!(chars = excerpt.len(), "Retrieved knowledge excerpt");
                Some(excerpt)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Knowledge retrieval failed, continuing without it");
                None
            }
        }
    }

    /// Compose the instructions: excerpt, persona, then history.
    pub fn assemble_instructions(
        &self,
        persona: &str,
        excerpt: Option<&str>,
        history: &[DialogueTurn],
    ) -> String {
        let mut out = String::new();

        if let Some(excerpt) = excerpt.filter(|e| !e.trim().is_empty()) {
            let _ = write!(out, "{KNOWLEDGE_HEADER}\n{excerpt}\n\n");
        }

        out.push_str(persona);

        if !history.is_empty() {
            let _ = write!(out, "\n\n{HISTORY_HEADER}\n");
            for turn in history {
                let _ = write!(out, "\nUser question {}: {}", turn.ordinal, turn.user_query);
                match turn.ai_response.as_deref() {
                    Some(response) if !response.is_empty() => {
                        let _ = writeln!(out, "\nAI answer {}: {}", turn.ordinal, response);
                    }
                    _ => out.push('\n'),
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use redscope_core::error::KnowledgeError;

    fn turn(ordinal: u64, q: &str, a: Option<&str>) -> DialogueTurn {
        DialogueTurn {
            ordinal,
            user_query: q.into(),
            ai_response: a.map(String::from),
        }
    }

    struct FixedSource(Result<Option<String>, KnowledgeError>);

    #[async_trait]
    impl KnowledgeSource for FixedSource {
        async fn retrieve(&self, _query: &str) -> Result<Option<String>, KnowledgeError> {
            self.0.clone()
        }
    }

    #[test]
    fn persona_only() {
        let out = PromptAssembler::new().assemble_instructions("You are helpful.", None, &[]);
        assert_eq!(out, "You are helpful.");
    }

    #[test]
    fn excerpt_precedes_persona_precedes_history() {
        let history = vec![turn(1, "scan host", Some("port 22 open"))];
        let out = PromptAssembler::new().assemble_instructions(
            "PERSONA",
            Some("CVE-2024-0001 affects OpenSSH"),
            &history,
        );

        let excerpt_at = out.find("CVE-2024-0001").unwrap();
        let persona_at = out.find("PERSONA").unwrap();
        let history_at = out.find("User question 1: scan host").unwrap();
        assert!(out.starts_with(KNOWLEDGE_HEADER));
        assert!(excerpt_at < persona_at);
        assert!(persona_at < history_at);
        assert!(out.contains("AI answer 1: port 22 open"));
    }

    #[test]
    fn history_keeps_order_and_skips_empty_answers() {
        let history = vec![
            turn(4, "first", Some("one")),
            turn(5, "second", None),
            turn(6, "third", Some("")),
        ];
        let out = PromptAssembler::new().assemble_instructions("P", None, &history);
        let first = out.find("User question 4").unwrap();
        let second = out.find("User question 5").unwrap();
        let third = out.find("User question 6").unwrap();
        assert!(first < second && second < third);
        assert!(out.contains("AI answer 4: one"));
        assert!(!out.contains("AI answer 5"));
        assert!(!out.contains("AI answer 6"));
    }

    #[test]
    fn blank_excerpt_is_omitted() {
        let out = PromptAssembler::new().assemble_instructions("P", Some("  "), &[]);
        assert_eq!(out, "P");
    }

    #[test]
    fn persona_lists_tool_providers() {
        let out = persona_with_tool_providers("Base.", &["nmap".into(), "web".into()]);
        assert_eq!(out, "Base.\n\nYou have access to the following tools: nmap, web.");
        assert_eq!(persona_with_tool_providers("Base.", &[]), "Base.");
    }

    #[tokio::test]
    async fn retrieval_outcomes() {
        let assembler = PromptAssembler::new();
        assert_eq!(assembler.retrieve_excerpt(None, "q").await, None);

        let found = FixedSource(Ok(Some("excerpt".into())));
        assert_eq!(
            assembler.retrieve_excerpt(Some(&found as &dyn KnowledgeSource), "q").await.as_deref(),
            Some("excerpt")
        );

        let empty = FixedSource(Ok(Some(String::new())));
        assert_eq!(assembler.retrieve_excerpt(Some(&empty as &dyn KnowledgeSource), "q").await, None);

        let failing = FixedSource(Err(KnowledgeError::Unavailable("offline".into())));
        assert_eq!(assembler.retrieve_excerpt(Some(&failing as &dyn KnowledgeSource), "q").await, None);
    }
}
