//! Voice activity detection and segmentation

pub mod detector;
pub mod segmenter;

pub use detector::VoiceDetector;
pub use segmenter::{SegmentResult, Segmenter, SegmenterHandle, SegmenterState};
