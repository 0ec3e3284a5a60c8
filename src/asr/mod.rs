//! Speech recognition clients
//!
//! Two paths into the upstream recognizer: a streaming WebSocket client with
//! debounced finalization, and a one-shot HTTP client used by the VAD-batch
//! ingestion path.

pub mod batch;
pub mod codec;
pub mod finalizer;
pub mod stream;

pub use batch::{BatchAsr, Transcriber};
pub use finalizer::Finalizer;
pub use stream::AsrStream;
