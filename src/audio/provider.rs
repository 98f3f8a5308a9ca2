//! Bridge between a pull-style resampling engine and a blocking PCM capture.
//!
//! The engine pulls hardware frames through [`BufferProvider`]; each time the
//! local fragment runs empty exactly one hardware period is read from the
//! transport. Transport failures are remembered in `read_status` because the
//! pull protocol itself has no error channel back to the read loop.

use super::resampler::{BufferProvider, Resampler, ResamplerFactory};
use super::transport::{PcmConfig, PcmTransport};
use crate::error::{HalError, Result, errno};

/// Decode little-endian 16-bit samples.
pub(crate) fn samples_from_le_bytes(src: &[u8], dst: &mut [i16]) {
    for (sample, bytes) in dst.iter_mut().zip(src.chunks_exact(2)) {
        *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
    }
}

/// Encode 16-bit samples as little-endian bytes.
pub(crate) fn samples_to_le_bytes(src: &[i16], dst: &mut [u8]) {
    for (bytes, sample) in dst.chunks_exact_mut(2).zip(src) {
        bytes.copy_from_slice(&sample.to_le_bytes());
    }
}

/// One hardware period of captured audio, converted to the stream's
/// channel layout.
struct Fragment {
    /// Raw bytes of one hardware period
    raw: Vec<u8>,
    samples: Vec<i16>,
    period_frames: usize,
    hw_channels: usize,
    stream_channels: usize,
    /// Frames not yet released to the engine
    frames_in: usize,
    read_status: Result<()>,
}

impl Fragment {
    fn fill(&mut self, pcm: &mut dyn PcmTransport) -> Result<()> {
        pcm.read(&mut self.raw)?;

        let hw_samples = self.period_frames * self.hw_channels;
        samples_from_le_bytes(&self.raw, &mut self.samples[..hw_samples]);

        match (self.hw_channels, self.stream_channels) {
            (2, 1) => {
                // Discard right channel
                for i in 1..self.period_frames {
                    self.samples[i] = self.samples[i * 2];
                }
            }
            (1, 2) => {
                for i in (0..self.period_frames).rev() {
                    let s = self.samples[i];
                    self.samples[i * 2] = s;
                    self.samples[i * 2 + 1] = s;
                }
            }
            _ => {}
        }

        self.frames_in = self.period_frames;
        Ok(())
    }
}

/// The provider handed to the engine for the duration of one pull step.
struct TransportProvider<'a, 'p> {
    pcm: &'a mut (dyn PcmTransport + 'p),
    fragment: &'a mut Fragment,
}

impl BufferProvider for TransportProvider<'_, '_> {
    fn get_next_buffer(&mut self, want_frames: usize) -> Result<&[i16]> {
        let fragment = &mut *self.fragment;

        if fragment.frames_in == 0 {
            fragment.read_status = fragment.fill(&mut *self.pcm);
            if let Err(e) = &fragment.read_status {
                log::error!("get_next_buffer: pcm read error {}", e);
                return Err(e.clone());
            }
        }

        let ch = fragment.stream_channels;
        let frames = want_frames.min(fragment.frames_in);
        let start = (fragment.period_frames - fragment.frames_in) * ch;
        Ok(&fragment.samples[start..start + frames * ch])
    }

    fn release_buffer(&mut self, consumed_frames: usize) {
        let fragment = &mut *self.fragment;
        fragment.frames_in = fragment.frames_in.saturating_sub(consumed_frames);
    }
}

/// Resampling state of a PCM input stream whose hardware rate differs from
/// the caller's rate. Dropped when the stream enters standby.
pub(crate) struct InResampler {
    engine: Box<dyn Resampler>,
    fragment: Fragment,
}

impl InResampler {
    /// `hw` is the geometry the transport actually negotiated.
    pub(crate) fn new(
        factory: &dyn ResamplerFactory,
        hw: &PcmConfig,
        stream_rate: u32,
        stream_channels: u32,
    ) -> Result<Self> {
        let period_frames = hw.period_size as usize;
        let hw_channels = hw.channels as usize;
        let stream_channels = stream_channels as usize;

        let engine = factory.create(hw.rate, stream_rate, stream_channels)?;

        log::debug!(
            "input resampler {}Hz/{}ch -> {}Hz/{}ch, fragment {} frames",
            hw.rate,
            hw_channels,
            stream_rate,
            stream_channels,
            period_frames
        );

        Ok(Self {
            engine,
            fragment: Fragment {
                raw: vec![0; hw.frames_to_bytes(hw.period_size)],
                samples: vec![0; period_frames * hw_channels.max(stream_channels)],
                period_frames,
                hw_channels,
                stream_channels,
                frames_in: 0,
                read_status: Ok(()),
            },
        })
    }

    /// Fill `out` with resampled frames, reading hardware periods as needed.
    ///
    /// Returns the number of frames produced or the transport error that
    /// stopped the loop.
    pub(crate) fn read_frames(
        &mut self,
        pcm: &mut dyn PcmTransport,
        out: &mut [i16],
    ) -> Result<usize> {
        let ch = self.fragment.stream_channels;
        let frames = out.len() / ch;
        let mut frames_wr = 0;

        while frames_wr < frames {
            let mut provider = TransportProvider {
                pcm: &mut *pcm,
                fragment: &mut self.fragment,
            };
            let produced = self
                .engine
                .resample_from_provider(&mut provider, &mut out[frames_wr * ch..frames * ch]);

            self.fragment.read_status.clone()?;
            if produced == 0 {
                return Err(HalError::transport(errno::EIO, "resampler produced no frames"));
            }
            frames_wr += produced;
        }

        log::trace!("read_frames: {} frames", frames_wr);
        Ok(frames_wr)
    }
}
