//! Pull-style resampling engine interface and a linear-interpolation engine.

use crate::error::{HalError, Result};

/// Source of interleaved 16-bit frames for a resampling engine.
///
/// The engine asks for frames with [`get_next_buffer`](Self::get_next_buffer),
/// copies what it needs and hands back the number of frames it consumed with
/// [`release_buffer`](Self::release_buffer).
pub trait BufferProvider {
    /// Up to `want_frames` frames of interleaved samples. An empty slice or
    /// an error means no more input is available right now.
    fn get_next_buffer(&mut self, want_frames: usize) -> Result<&[i16]>;

    fn release_buffer(&mut self, consumed_frames: usize);
}

/// A resampling engine converting frames pulled from a provider.
pub trait Resampler: Send {
    /// Fill `out` (interleaved) with resampled frames. Returns the number of
    /// frames produced, which is short only when the provider ran dry.
    fn resample_from_provider(
        &mut self,
        provider: &mut dyn BufferProvider,
        out: &mut [i16],
    ) -> usize;
}

/// Creates resampling engines when an input stream needs one.
pub trait ResamplerFactory: Send + Sync {
    fn create(&self, in_rate: u32, out_rate: u32, channels: usize) -> Result<Box<dyn Resampler>>;
}

/// Linear interpolation between consecutive input frames.
pub struct LinearResampler {
    channels: usize,
    /// Input frames advanced per output frame
    step: f64,
    /// Position between `prev` and `next`, in input frames
    frac: f64,
    prev: Vec<i16>,
    next: Vec<i16>,
}

impl LinearResampler {
    pub fn new(in_rate: u32, out_rate: u32, channels: usize) -> Result<Self> {
        if in_rate == 0 || out_rate == 0 || channels == 0 {
            return Err(HalError::invalid_state(format!(
                "cannot resample {}Hz -> {}Hz with {} channels",
                in_rate, out_rate, channels
            )));
        }
        Ok(Self {
            channels,
            step: f64::from(in_rate) / f64::from(out_rate),
            // Forces the first input frame to be loaded before any output
            frac: 1.0,
            prev: vec![0; channels],
            next: vec![0; channels],
        })
    }
}

impl Resampler for LinearResampler {
    fn resample_from_provider(
        &mut self,
        provider: &mut dyn BufferProvider,
        out: &mut [i16],
    ) -> usize {
        let ch = self.channels;
        let wanted = out.len() / ch;
        let mut produced = 0;

        while produced < wanted {
            let want_in = (((wanted - produced) as f64 * self.step).ceil() as usize).max(1);
            let input = match provider.get_next_buffer(want_in) {
                Ok(input) if !input.is_empty() => input,
                _ => break,
            };
            let frames_avail = input.len() / ch;
            let mut consumed = 0;

            'fill: while produced < wanted {
                while self.frac >= 1.0 {
                    if consumed == frames_avail {
                        break 'fill;
                    }
                    self.prev.copy_from_slice(&self.next);
                    self.next
                        .copy_from_slice(&input[consumed * ch..(consumed + 1) * ch]);
                    consumed += 1;
                    self.frac -= 1.0;
                }

                let frame = &mut out[produced * ch..(produced + 1) * ch];
                for (c, sample) in frame.iter_mut().enumerate() {
                    let a = f64::from(self.prev[c]);
                    let b = f64::from(self.next[c]);
                    *sample = (a + (b - a) * self.frac) as i16;
                }
                produced += 1;
                self.frac += self.step;
            }

            provider.release_buffer(consumed);
        }

        produced
    }
}

/// Builds [`LinearResampler`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearResamplerFactory;

impl ResamplerFactory for LinearResamplerFactory {
    fn create(&self, in_rate: u32, out_rate: u32, channels: usize) -> Result<Box<dyn Resampler>> {
        Ok(Box::new(LinearResampler::new(in_rate, out_rate, channels)?))
    }
}
