//! # Processor Registry
//!
//! Hosts create audio processors by name rather than by type, the same way a
//! browser audio graph instantiates a registered worklet processor. The frame
//! accumulator is registered as [`PCM_FRAME_ACCUMULATOR`].

use crate::audio::accumulator::{FrameAccumulator, FrameSink};
use crate::error::{AppError, AppResult};
use tracing::debug;

/// Registered name of the PCM frame accumulator.
pub const PCM_FRAME_ACCUMULATOR: &str = "pcm-frame-accumulator";

const REGISTERED_PROCESSORS: &[&str] = &[PCM_FRAME_ACCUMULATOR];

/// Names of every processor a host can instantiate.
pub fn available_processors() -> &'static [&'static str] {
    REGISTERED_PROCESSORS
}

pub fn is_registered(name: &str) -> bool {
    REGISTERED_PROCESSORS.contains(&name)
}

/// Instantiate a processor by its registered name.
///
/// ## Errors:
/// - **BadRequest**: no processor is registered under `name`
/// - **ValidationError**: `frame_size` is zero or above `MAX_FRAME_SIZE`
pub fn instantiate<S: FrameSink>(
    name: &str,
    frame_size: usize,
    sink: S,
) -> AppResult<FrameAccumulator<S>> {
    match name {
        PCM_FRAME_ACCUMULATOR => {
            debug!(processor = name, frame_size, "Instantiating audio processor");
            FrameAccumulator::new(frame_size, sink).map_err(AppError::ValidationError)
        }
        other => Err(AppError::BadRequest(format!(
            "Unknown audio processor '{}', available: {}",
            other,
            REGISTERED_PROCESSORS.join(", ")
        ))),
    }
}
