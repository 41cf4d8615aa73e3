//! # Judgement Cat
//!
//! Quiz-answer judging backed by an external language model.
//!
//! ## Key Components:
//! - **Prompt**: Builds the chat messages for one question/answer pair (`prompt`)
//! - **Client**: `JudgeBackend` trait and the OpenAI-compatible implementation (`client`)
//! - **Verdict**: Parses the model's free-form reply, with fixed fallbacks (`verdict`)

pub mod client;
pub mod prompt;
pub mod verdict;

pub use client::{JudgeBackend, OpenAiJudge};
