//! KnowledgeSource trait: optional retrieval of reference material.
//!
//! Similarity search itself lives outside this runtime. The prompt
//! assembler only needs "give me an excerpt for this query, if any".

use crate::error::KnowledgeError;
use async_trait::async_trait;

#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Return the excerpt most relevant to `query`, or `None`.
    async fn retrieve(&self, query: &str) -> std::result::Result<Option<String>, KnowledgeError>;
}
