use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use super::{StreamId, nominal_duration, volume_to_percent};
use crate::audio::transport::{PcmConfig, PcmDirection, PcmFormat, PcmTransport};
use crate::device::DeviceShared;
use crate::error::{HalError, Result};
use crate::parms::{self, KEY_ROUTING, KvPairs};
use crate::route::RouteHandle;
use crate::types::{AudioFormat, DeviceMask, StreamConfig};

/// Frames presented to the listener and when that count was sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationPosition {
    pub frames: u64,
    /// Hardware timestamp; `None` when no transport is open
    pub timestamp: Option<Duration>,
}

struct OutputState {
    standby: bool,
    /// Open transport; always `None` in standby and in audio-disabled mode
    pcm: Option<Box<dyn PcmTransport>>,

    // Geometry granted by the hardware at the last activation
    hw_rate: u32,
    hw_channels: u32,
    hw_period_size: u32,
    hw_period_count: u32,

    buffer_size: usize,
    latency_ms: u32,

    /// Never reset, so presentation position stays monotonic across standby
    frames_written: u64,
    /// Reset on every exit from standby
    frames_rendered: u64,
}

/// A playback stream bound to one hardware route.
pub struct OutputStream {
    id: StreamId,
    dev: Arc<DeviceShared>,
    hw: RouteHandle,
    config: StreamConfig,
    /// Taken before `inner` so control calls can queue ahead of a burst of writes
    pre_lock: Mutex<()>,
    inner: Mutex<OutputState>,
}

impl OutputStream {
    pub(crate) fn new(
        dev: Arc<DeviceShared>,
        hw: RouteHandle,
        config: StreamConfig,
        devices: DeviceMask,
    ) -> Self {
        let id = dev.next_stream_id();

        // Apply initial route
        hw.apply_route(devices);

        let stream = Self {
            id,
            dev,
            hw,
            config,
            pre_lock: Mutex::new(()),
            inner: Mutex::new(OutputState {
                standby: true,
                pcm: None,
                hw_rate: 0,
                hw_channels: 0,
                hw_period_size: 0,
                hw_period_count: 0,
                buffer_size: 0,
                latency_ms: 0,
                frames_written: 0,
                frames_rendered: 0,
            }),
        };
        let buffer_size = stream.cfg_period_size() as usize * config.frame_size();
        stream.inner.lock().buffer_size = buffer_size;
        stream
    }

    fn lock_stream(&self) -> MutexGuard<'_, OutputState> {
        let _pre = self.pre_lock.lock();
        self.inner.lock()
    }

    // ===== Hardware configuration =====

    fn cfg_period_count(&self) -> u32 {
        match self.hw.caps().period_count {
            0 => self.dev.config.output.period_count,
            n => n,
        }
    }

    fn cfg_period_size(&self) -> u32 {
        match self.hw.caps().period_size {
            0 => self.dev.config.output.period_size,
            n => n,
        }
    }

    fn cfg_rate(&self) -> u32 {
        let caps_rate = self.hw.caps().rate;
        if caps_rate != 0 {
            caps_rate
        } else if self.config.sample_rate != 0 {
            self.config.sample_rate
        } else {
            self.dev.config.output.sample_rate
        }
    }

    fn cfg_channel_count(&self) -> u32 {
        match self.config.channel_count() {
            0 => self.dev.config.output.channel_count,
            n => n,
        }
    }

    // ===== State transitions =====

    /// Open the transport. Called with the stream and device locks held.
    fn start(&self, st: &mut OutputState) -> Result<()> {
        let caps = self.hw.caps();
        let requested = PcmConfig {
            channels: self.cfg_channel_count(),
            rate: self.cfg_rate(),
            period_size: self.cfg_period_size(),
            period_count: self.cfg_period_count(),
            format: PcmFormat::S16Le,
        };

        log::debug!(
            "start output {}: channels={}, rate={}, period_size={}, period_count={}",
            self.id,
            requested.channels,
            requested.rate,
            requested.period_size,
            requested.period_count
        );

        let granted = if self.dev.config.disable_audio {
            requested
        } else {
            let pcm = self
                .dev
                .backends
                .pcm
                .open(caps.card_number, caps.device_number, PcmDirection::Playback, &requested)
                .inspect_err(|e| log::error!("pcm open (out) failed: {}", e))?;
            let granted = pcm.negotiated();
            st.pcm = Some(pcm);
            granted
        };

        st.hw_rate = granted.rate;
        st.hw_channels = granted.channels;
        st.hw_period_size = granted.period_size;
        st.hw_period_count = granted.period_count;
        st.buffer_size = granted.frames_to_bytes(granted.period_size);
        st.latency_ms = match granted.rate {
            0 => 0,
            rate => (u64::from(granted.period_size) * u64::from(granted.period_count) * 1000
                / u64::from(rate)) as u32,
        };
        Ok(())
    }

    fn do_standby(&self, st: &mut OutputState) {
        if !st.standby {
            let _dev = self.dev.state.lock();
            st.pcm = None;
            st.standby = true;
            log::debug!("output {} entered standby", self.id);
        }
    }

    /// Write interleaved samples in the stream's format.
    ///
    /// Returns the bytes consumed: all of them, or 0 when the route is
    /// currently disconnected from every device.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        // A write to nowhere may not be accepted by the driver
        if self.hw.current_routes() == 0 {
            log::trace!("output {} write: no routes", self.id);
            return Ok(0);
        }

        let mut st = self.lock_stream();

        if st.standby {
            let _dev = self.dev.state.lock();
            self.start(&mut st)?;
            st.standby = false;
            st.frames_rendered = 0;
        }

        match st.pcm.as_mut() {
            Some(pcm) => {
                log::trace!("output {} write {} bytes", self.id, buf.len());
                pcm.write(buf)
                    .inspect_err(|e| log::warn!("output {} write failed: {}", self.id, e))?;
            }
            None if self.dev.config.disable_audio => {
                let frame_size = self.config.frame_size();
                thread::sleep(nominal_duration(buf.len(), frame_size, self.config.sample_rate));
            }
            None => return Err(HalError::invalid_state("output active without transport")),
        }

        let frames = (buf.len() / self.config.frame_size().max(1)) as u64;
        st.frames_written += frames;
        st.frames_rendered += frames;
        Ok(buf.len())
    }

    pub fn standby(&self) {
        let mut st = self.lock_stream();
        self.do_standby(&mut st);
    }

    /// `frames_written - kernel_buffer + avail`.
    ///
    /// Fails with `InvalidState` while the hardware queue has not yet been
    /// filled past its size.
    pub fn presentation_position(&self) -> Result<PresentationPosition> {
        let mut st = self.lock_stream();
        let kernel_buffer = i64::from(st.hw_period_size) * i64::from(st.hw_period_count);

        let (avail, timestamp) = match st.pcm.as_mut() {
            Some(pcm) => {
                let (avail, ts) = pcm.hardware_timestamp()?;
                (i64::from(avail), Some(ts))
            }
            None => (0, None),
        };

        let presented = st.frames_written as i64 - kernel_buffer + avail;
        if presented < 0 {
            return Err(HalError::invalid_state(format!(
                "presentation position not ready ({} frames)",
                presented
            )));
        }

        log::trace!("output {} presented {} frames", self.id, presented);
        Ok(PresentationPosition {
            frames: presented as u64,
            timestamp,
        })
    }

    /// Frames rendered since the stream last left standby.
    pub fn render_position(&self) -> u32 {
        self.lock_stream().frames_rendered as u32
    }

    pub fn frames_written(&self) -> u64 {
        self.lock_stream().frames_written
    }

    pub fn next_write_timestamp(&self) -> Result<i64> {
        Err(HalError::NotSupported("next write timestamp"))
    }

    pub fn set_volume(&self, left: f32, right: f32) -> Result<()> {
        let l_pc = volume_to_percent(left);
        let r_pc = volume_to_percent(right);
        log::debug!("set_volume ({},{}) -> ({}%,{}%)", left, right, l_pc, r_pc);
        self.hw.set_volume(l_pc, r_pc)
    }

    /// Apply `routing` and forward every pair to the route's use-cases.
    /// Parameters this stream does not understand are not an error.
    pub fn set_parameters(&self, kvpairs: &str) {
        log::debug!("output {} set_parameters '{}'", self.id, kvpairs);

        let kv = KvPairs::parse(kvpairs);
        let _st = self.lock_stream();
        let _dev = self.dev.state.lock();

        if let Some(devices) = kv.get_u32(KEY_ROUTING) {
            self.hw.apply_route(devices);
        }
        if let Err(e) = parms::invoke_use_cases(Some(&*self.hw), kvpairs) {
            log::trace!("output {} use-cases: {}", self.id, e);
        }
    }

    pub fn get_parameters(&self, keys: &str) -> String {
        parms::stream_query_reply(keys, self.config.format)
    }

    // ===== Stream properties =====

    pub(crate) fn id(&self) -> StreamId {
        self.id
    }

    /// Negotiated stream configuration.
    pub fn config(&self) -> StreamConfig {
        self.config
    }

    pub fn sample_rate(&self) -> u32 {
        match self.config.sample_rate {
            0 => self.hw.caps().rate,
            rate => rate,
        }
    }

    pub fn set_sample_rate(&self, _rate: u32) -> Result<()> {
        Err(HalError::NotSupported("output sample rate change"))
    }

    pub fn channel_mask(&self) -> u32 {
        self.config.channel_mask
    }

    pub fn format(&self) -> AudioFormat {
        self.config.format
    }

    /// One hardware period in bytes.
    pub fn buffer_size(&self) -> usize {
        self.inner.lock().buffer_size
    }

    pub fn latency_ms(&self) -> u32 {
        match self.inner.lock().latency_ms {
            0 => {
                let out = &self.dev.config.output;
                (u64::from(out.period_size) * u64::from(out.period_count) * 1000
                    / u64::from(out.sample_rate.max(1))) as u32
            }
            latency => latency,
        }
    }

    pub fn is_standby(&self) -> bool {
        self.inner.lock().standby
    }

    /// Hardware rate and channel count granted at the last activation.
    pub fn hw_geometry(&self) -> (u32, u32) {
        let st = self.inner.lock();
        (st.hw_rate, st.hw_channels)
    }

    /// Enter standby and release the route.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        let mut st = self.lock_stream();
        self.do_standby(&mut st);
        log::info!("Closed output stream {}", self.id);
    }
}
