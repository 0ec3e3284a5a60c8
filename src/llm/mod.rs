//! Chat model integration
//!
//! Streaming completion client plus the sentence merger that shapes the
//! token stream for synthesis.

pub mod client;
pub mod sentence;

pub use client::{LlmClient, VOICE_ONLY_DIRECTIVE};
pub use sentence::SentenceMerger;
