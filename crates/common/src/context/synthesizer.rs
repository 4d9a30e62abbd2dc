//! Grounding & Synthesis - picks the evidence an answer rests on
//!
//! Three branches, tried in order:
//! - retrieved context exists: answer from it (plus recent memory)
//! - only memory exists: answer from the conversation history
//! - neither: fixed refusal, no language model call

use super::types::{truncate_chars, Citation, Grounding, MemoryEntry, RetrievalResult};
use crate::config::{LlmConfig, MemoryConfig};
use crate::errors::Result;
use crate::llm::LanguageModel;
use std::sync::Arc;
use tracing::debug;

/// Answer given when there is no evidence at all.
pub const REFUSAL: &str =
    "I don't know based on the uploaded documents. This looks like a general or ungrounded query.";

/// Separator between condensed memory blocks.
pub const MEMORY_SEPARATOR: &str = "\n---\n";

/// Synthesized answer
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub answer: String,
    pub grounding: Grounding,
    pub citations: Vec<Citation>,
}

/// Render memory as `Q:`/`A:` blocks with each side cut to its budget.
pub fn condense_memory(memory: &[MemoryEntry], user_chars: usize, ai_chars: usize) -> String {
    memory
        .iter()
        .map(|entry| {
            format!(
                "Q: {}\nA: {}",
                truncate_chars(&entry.user_text, user_chars),
                truncate_chars(&entry.ai_text, ai_chars)
            )
        })
        .collect::<Vec<_>>()
        .join(MEMORY_SEPARATOR)
}

/// Citations of the newest entry that has any.
pub fn latest_memory_citations(memory: &[MemoryEntry]) -> Vec<Citation> {
    memory
        .iter()
        .rev()
        .find(|entry| !entry.citations.is_empty())
        .map(|entry| entry.citations.clone())
        .unwrap_or_default()
}

pub struct Synthesizer {
    llm: Arc<dyn LanguageModel>,
    temperature: f32,
    max_tokens: u32,
    condensed_user_chars: usize,
    condensed_ai_chars: usize,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>, llm_config: &LlmConfig, memory: &MemoryConfig) -> Self {
        Self {
            llm,
            temperature: llm_config.answer_temperature,
            max_tokens: llm_config.answer_max_tokens,
            condensed_user_chars: memory.condensed_user_chars,
            condensed_ai_chars: memory.condensed_ai_chars,
        }
    }

    fn condense(&self, memory: &[MemoryEntry]) -> String {
        condense_memory(memory, self.condensed_user_chars, self.condensed_ai_chars)
    }

    fn context_prompt(&self, user_query: &str, context: &str, memory: &[MemoryEntry]) -> String {
        let history = self.condense(memory);
        let memory_section = if history.is_empty() {
            String::new()
        } else {
            format!("\nRecent conversation:\n{}\n", history)
        };

        format!(
            "You are a helpful assistant. Answer using ONLY the context below.\n\
             If the context does not contain the answer, reply \"I don't know.\"{}\n\
             Context:\n{}\n\n\
             User question:\n{}\n\n\
             Answer concisely in 2-3 sentences:\n",
            memory_section, context, user_query
        )
    }

    fn memory_prompt(&self, user_query: &str, memory: &[MemoryEntry]) -> String {
        format!(
            "You are a helpful assistant answering follow-up questions about documents discussed earlier.\n\
             Answer using ONLY the conversation history below. If the history does not contain the answer, reply \"I don't know.\"\n\n\
             Conversation history:\n{}\n\n\
             User question:\n{}\n\n\
             Answer concisely in 1-2 sentences:\n",
            self.condense(memory),
            user_query
        )
    }

    /// Produce the answer, its grounding and the citations backing it.
    pub async fn synthesize(
        &self,
        user_query: &str,
        retrieval: RetrievalResult,
        memory: &[MemoryEntry],
    ) -> Result<Synthesis> {
        if !retrieval.is_empty() {
            let context = retrieval
                .ranked()
                .map(|(_, c)| c.document.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = self.context_prompt(user_query, &context, memory);
            let answer = self
                .llm
                .complete(&prompt, self.temperature, self.max_tokens)
                .await?;

            debug!(branch = "context", citations = retrieval.len(), "Answer synthesized");
            return Ok(Synthesis {
                answer: answer.trim().to_string(),
                grounding: Grounding::Grounded,
                citations: retrieval.into_citations(),
            });
        }

        if !memory.is_empty() {
            let prompt = self.memory_prompt(user_query, memory);
            let answer = self
                .llm
                .complete(&prompt, self.temperature, self.max_tokens)
                .await?;

            let citations = latest_memory_citations(memory);
            debug!(branch = "memory", citations = citations.len(), "Answer synthesized");
            return Ok(Synthesis {
                answer: answer.trim().to_string(),
                grounding: Grounding::Grounded,
                citations,
            });
        }

        debug!(branch = "ungrounded", "No evidence, refusing");
        Ok(Synthesis {
            answer: REFUSAL.to_string(),
            grounding: Grounding::Ungrounded,
            citations: Vec::new(),
        })
    }
}
