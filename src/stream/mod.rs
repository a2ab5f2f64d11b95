//! Response stream decoding
//!
//! - [`decoder`]: byte chunks to newline-delimited text frames
//! - [`event`]: text frames to typed [`StreamEvent`]s

pub mod decoder;
pub mod event;

pub use decoder::{FrameCodec, FrameDecoder};
pub use event::{parse_frame, StreamEvent, TokenUsage};
