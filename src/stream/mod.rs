//! Output and input stream state machines, plus timing helpers they share.

mod input;
mod output;

use std::time::Duration;

pub use input::InputStream;
pub use output::{OutputStream, PresentationPosition};

/// Identifies a stream within its device.
pub(crate) type StreamId = u64;

/// Lowest attenuation reachable through the volume control, in dB.
const VOLUME_FLOOR_DB: f64 = -58.0;

/// Convert a linear 0.0..=1.0 volume into the percentage expected by the
/// route's volume control, on a logarithmic scale with a -58dB floor.
pub fn volume_to_percent(volume: f32) -> i32 {
    let decibels = if volume > 0.0 {
        (f64::from(volume).ln() / 0.115129).max(VOLUME_FLOOR_DB)
    } else {
        VOLUME_FLOOR_DB
    };

    // -58..0 dB rescaled to 0..100
    ((decibels - VOLUME_FLOOR_DB) * 100.0 / -VOLUME_FLOOR_DB) as i32
}

/// Caller-visible capture buffer size in bytes: one hardware period
/// converted to the caller's rate, rounded up to a multiple of 16 frames.
pub fn input_buffer_size(
    hw_period_size: u32,
    stream_rate: u32,
    hw_rate: u32,
    frame_size: usize,
) -> usize {
    if hw_rate == 0 {
        return 0;
    }
    let frames = u64::from(hw_period_size) * u64::from(stream_rate) / u64::from(hw_rate);
    let frames = frames.div_ceil(16) * 16;
    frames as usize * frame_size
}

/// Time it takes to play or capture `bytes` at the given frame size and rate.
pub(crate) fn nominal_duration(bytes: usize, frame_size: usize, sample_rate: u32) -> Duration {
    let bytes_per_sec = frame_size as u64 * u64::from(sample_rate);
    if bytes_per_sec == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((bytes as u64).saturating_mul(1_000_000_000) / bytes_per_sec)
}
