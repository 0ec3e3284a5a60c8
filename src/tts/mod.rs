//! Speech synthesis client

pub mod client;
pub mod reorder;

pub use client::TtsClient;
pub use reorder::ReorderBuffer;
