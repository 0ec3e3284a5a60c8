//! Shared types used across modules
//!
//! This module contains types that are used by multiple modules
//! to avoid circular dependencies.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatRole::System => write!(f, "system"),
            ChatRole::User => write!(f, "user"),
            ChatRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A recognizer output: revisable partial or utterance-terminal final
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
}

impl Transcript {
    pub fn partial(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_final: false }
    }

    pub fn fin(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_final: true }
    }
}

/// A block of synthesized PCM samples with its upstream sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmChunk {
    pub seq: i32,
    pub samples: Vec<i16>,
}

/// Errors crossing the pipeline's component seams
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("asr: {0}")]
    Asr(String),

    #[error("tts: {0}")]
    Tts(String),

    #[error("llm: {0}")]
    Llm(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("transport: {0}")]
    Transport(String),
}
