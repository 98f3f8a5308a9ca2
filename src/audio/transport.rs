//! Back-end protocols for the kernel sound devices.
//!
//! Two kinds of transport exist: raw PCM (playback and capture) and a
//! compressed-codec device used for PCM capture through a DSP.

use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmDirection {
    Playback,
    Capture,
}

/// Sample format on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmFormat {
    S16Le,
    S32Le,
}

impl PcmFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16Le => 2,
            Self::S32Le => 4,
        }
    }
}

/// PCM hardware geometry, requested at open and read back after negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmConfig {
    pub channels: u32,
    pub rate: u32,
    /// Frames per period
    pub period_size: u32,
    pub period_count: u32,
    pub format: PcmFormat,
}

impl PcmConfig {
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }

    pub fn frames_to_bytes(&self, frames: u32) -> usize {
        frames as usize * self.frame_bytes()
    }

    /// Frames held by the kernel ring buffer.
    pub fn buffer_frames(&self) -> u64 {
        u64::from(self.period_size) * u64::from(self.period_count)
    }
}

/// Opens raw PCM devices.
pub trait PcmBackend: Send + Sync {
    fn open(
        &self,
        card: u32,
        device: u32,
        direction: PcmDirection,
        config: &PcmConfig,
    ) -> Result<Box<dyn PcmTransport>>;
}

/// An open PCM device. Closed on drop.
pub trait PcmTransport: Send {
    /// Geometry actually granted by the hardware.
    fn negotiated(&self) -> PcmConfig;

    /// Blocking read of exactly `buf.len()` bytes.
    fn read(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Blocking write of the whole buffer.
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Frames free in the hardware queue and the time they were sampled.
    fn hardware_timestamp(&mut self) -> Result<(u32, Duration)>;
}

/// Codec description for the compressed device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub channels: u32,
    pub sample_rate: u32,
    pub format: PcmFormat,
    pub fragment_size: u32,
    pub fragments: u32,
}

/// Opens compressed-codec devices.
pub trait CompressBackend: Send + Sync {
    fn open(
        &self,
        card: u32,
        device: u32,
        codec: &CodecDescriptor,
    ) -> Result<Box<dyn CompressTransport>>;
}

/// An open compressed-codec device. Closed on drop.
pub trait CompressTransport: Send {
    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Read up to `buf.len()` bytes, blocking at most for the poll timeout.
    /// Returns 0 when the wait timed out.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn set_max_poll_wait(&mut self, timeout: Duration);
}
