//! Summarizer - second LLM call turning rows into a short English answer

use crate::db::Row;
use crate::llm::client::{ChatCompletion, ChatMessage};
use crate::llm::plan::Presentation;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Rows beyond this many are withheld from the prompt
const MAX_ROWS_IN_PROMPT: usize = 50;

pub struct Summarizer {
    client: Arc<dyn ChatCompletion>,
}

impl Summarizer {
    pub fn new(client: Arc<dyn ChatCompletion>) -> Self {
        Self { client }
    }

    /// Produce a 1-2 sentence answer referring only to numbers present in
    /// the rows. Failures are the caller's to degrade from.
    pub async fn summarize(
        &self,
        question: &str,
        rows: &[Row],
        presentation: Option<&Presentation>,
    ) -> Result<String> {
        let shown = &rows[..rows.len().min(MAX_ROWS_IN_PROMPT)];
        let rows_json =
            serde_json::to_string(shown).context("Failed to serialize rows for summary")?;

        let style = match presentation.and_then(|p| p.style.as_deref()) {
            Some("bulleted") => "Answer as a short bulleted list.",
            Some("headline") => "Answer as a single headline sentence.",
            _ => "Answer in one or two plain sentences.",
        };
        let include = presentation
            .map(|p| p.include.as_slice())
            .filter(|f| !f.is_empty())
            .map(|f| format!(" Call out these fields if present: {}.", f.join(", ")))
            .unwrap_or_default();

        let messages = [
            ChatMessage::system(format!(
                "You summarize SQL query results. Use only numbers that appear \
                 in the rows; never invent values. {}{}",
                style, include
            )),
            ChatMessage::user(format!(
                "Question: {}\n\nRows ({} of {} shown):\n{}",
                question,
                shown.len(),
                rows.len(),
                rows_json
            )),
        ];

        let answer = self.client.complete(&messages).await?;
        Ok(answer.trim().to_string())
    }
}
