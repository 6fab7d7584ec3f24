//! LLM Module - chat client, planner and summarizer

pub mod client;
pub mod plan;
pub mod planner;
pub mod summarize;

pub use client::{ChatCompletion, ChatMessage, OpenAiChatClient};
pub use plan::{Plan, Presentation};
pub use planner::{is_recoverable_execution_error, Planner};
pub use summarize::Summarizer;
