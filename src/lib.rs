//! Voice Roleplay - real-time voice dialog pipeline
//!
//! A per-session streaming pipeline between a browser microphone and a
//! remote generative stack:
//! - Streaming or VAD-batch speech recognition with debounced finalization
//! - Roleplay prompt and history assembly, streamed chat completion
//! - Sentence-merged speech synthesis with strict chunk ordering
//! - Barge-in: the user can interrupt a reply at any point
//!
//! # Example
//!
//! ```ignore
//! use voice_roleplay::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     voice_roleplay::server::start(config).await
//! }
//! ```

pub mod types;
pub mod config;
pub mod audio;
pub mod asr;
pub mod vad;
pub mod llm;
pub mod tts;
pub mod storage;
pub mod roles;
pub mod session;
pub mod server;
pub mod cli;

// Re-export commonly used types for convenience
pub use config::{Config, IngestMode};
pub use server::{router, start as start_server, ServerState};
pub use session::{Session, SessionDeps, SessionState};
pub use types::{ChatMessage, ChatRole, PcmChunk, Transcript, VoiceError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
