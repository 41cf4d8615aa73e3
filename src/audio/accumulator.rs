//! # Frame Accumulator
//!
//! Turns an irregular stream of floating-point audio chunks into a regular
//! stream of fixed-size 16-bit PCM frames.
//!
//! ## How it works:
//! 1. Every sample of an incoming chunk is copied into a fixed-capacity buffer
//! 2. When the buffer is full it is encoded into an [`EncodedFrame`] and handed
//!    to the registered [`FrameSink`]
//! 3. The write cursor resets to zero and the rest of the chunk keeps filling
//!
//! A single chunk may complete several frames, or none at all.
//!
//! ## Realtime Constraints:
//! `process_chunk` is called from the audio callback. It never blocks, never
//! performs I/O, and allocates only the `frame_size` samples of each emitted
//! frame. The accumulation buffer itself is allocated once in [`FrameAccumulator::new`].
//!
//! ## Teardown:
//! There is no flush. Dropping the accumulator discards any partially filled
//! buffer (see [`FrameAccumulator::buffered`]).

use crate::audio::pcm::{encode_sample, EncodedFrame};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

/// Default number of samples per emitted frame.
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Largest accepted frame size (about 1.4s of audio at 48kHz).
pub const MAX_FRAME_SIZE: usize = 1 << 16;

/// Result of processing one chunk.
///
/// The accumulator never ends the stream on its own; start and stop are
/// controlled by whoever owns the audio callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Continue,
}

/// Consumer of completed frames.
///
/// `deliver` runs inside the audio callback, so implementations must return
/// promptly. The frame is passed by value; the accumulator keeps no reference
/// to it.
pub trait FrameSink {
    fn deliver(&mut self, frame: EncodedFrame);
}

impl<F> FrameSink for F
where
    F: FnMut(EncodedFrame),
{
    fn deliver(&mut self, frame: EncodedFrame) {
        self(frame)
    }
}

/// Hands frames to a bounded tokio channel without blocking.
///
/// When the channel is full (the transport is behind) or closed (the
/// transport is gone) the frame is dropped and counted.
#[derive(Debug)]
pub struct ChannelSink {
    sender: mpsc::Sender<EncodedFrame>,
    dropped: u64,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<EncodedFrame>) -> Self {
        Self { sender, dropped: 0 }
    }

    /// Number of frames dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameSink for ChannelSink {
    fn deliver(&mut self, frame: EncodedFrame) {
        match self.sender.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                self.dropped += 1;
                warn!(
                    sequence = frame.sequence(),
                    dropped = self.dropped,
                    "Frame channel full, dropping frame"
                );
            }
            Err(TrySendError::Closed(frame)) => {
                self.dropped += 1;
                warn!(
                    sequence = frame.sequence(),
                    dropped = self.dropped,
                    "Frame channel closed, dropping frame"
                );
            }
        }
    }
}

/// Stateful buffer that accumulates samples into fixed-size PCM frames.
///
/// ## Invariants:
/// - `buffer.len() == frame_size` for the accumulator's whole lifetime
/// - `cursor < frame_size` between calls to `process_chunk`
pub struct FrameAccumulator<S> {
    buffer: Box<[f32]>,
    cursor: usize,
    frames_emitted: u64,
    sink: S,
}

impl<S: FrameSink> FrameAccumulator<S> {
    /// Create an accumulator emitting frames of `frame_size` samples to `sink`.
    ///
    /// ## Errors:
    /// Returns an error when `frame_size` is zero or above [`MAX_FRAME_SIZE`].
    pub fn new(frame_size: usize, sink: S) -> Result<Self, String> {
        if frame_size == 0 || frame_size > MAX_FRAME_SIZE {
            return Err(format!(
                "Frame size must be between 1 and {}, got {}",
                MAX_FRAME_SIZE, frame_size
            ));
        }

        Ok(Self {
            buffer: vec![0.0; frame_size].into_boxed_slice(),
            cursor: 0,
            frames_emitted: 0,
            sink,
        })
    }

    /// Feed the newest chunk of samples captured since the previous call.
    ///
    /// `None` and empty chunks are no-ops. Any number of frames may be emitted,
    /// in the order their samples arrived.
    pub fn process_chunk(&mut self, input: Option<&[f32]>) -> ProcessStatus {
        let mut remaining = match input {
            Some(samples) if !samples.is_empty() => samples,
            _ => return ProcessStatus::Continue,
        };

        while !remaining.is_empty() {
            let space = self.buffer.len() - self.cursor;
            let take = space.min(remaining.len());

            self.buffer[self.cursor..self.cursor + take].copy_from_slice(&remaining[..take]);
            self.cursor += take;
            remaining = &remaining[take..];

            if self.cursor == self.buffer.len() {
                self.emit_frame();
            }
        }

        ProcessStatus::Continue
    }

    fn emit_frame(&mut self) {
        let samples: Vec<i16> = self.buffer.iter().map(|&s| encode_sample(s)).collect();
        let frame = EncodedFrame::new(self.frames_emitted, samples);

        self.frames_emitted += 1;
        self.cursor = 0;
        self.sink.deliver(frame);
    }

    /// Samples per emitted frame.
    pub fn frame_size(&self) -> usize {
        self.buffer.len()
    }

    /// Samples written since the last emitted frame.
    pub fn buffered(&self) -> usize {
        self.cursor
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}
