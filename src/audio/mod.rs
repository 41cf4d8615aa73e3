//! # Audio Processing Module
//!
//! Converts microphone audio into the frames streamed to the realtime voice
//! interview pipeline.
//!
//! ## Key Components:
//! - **Frame Accumulator**: Buffers float chunks into fixed-size frames (`accumulator`)
//! - **PCM Conversion**: Float ↔ 16-bit PCM and wire encodings (`pcm`)
//! - **Processor Registry**: Instantiates processors by registered name (`registry`)
//!
//! ## Audio Format:
//! - **Input**: 32-bit float samples in [-1.0, 1.0], any chunk length
//! - **Output**: 16-bit signed PCM, little-endian, `frame_size` samples per frame
//! - **Channels**: Mono (1 channel)

// WebSocket handler is in src/websocket.rs at the root level
pub mod accumulator; // Fixed-size frame accumulation
pub mod pcm; // Sample encoding and wire formats
pub mod registry; // Processors by name
