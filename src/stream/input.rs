use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{StreamId, input_buffer_size, nominal_duration};
use crate::audio::provider::{InResampler, samples_to_le_bytes};
use crate::audio::transport::{
    CodecDescriptor, CompressTransport, PcmConfig, PcmDirection, PcmFormat, PcmTransport,
};
use crate::device::DeviceShared;
use crate::error::{HalError, Result};
use crate::parms::{self, KEY_INPUT_SOURCE, KEY_ROUTING, KvPairs, parse_leading_int};
use crate::route::{RouteHandle, TransportKind};
use crate::types::{AudioFormat, DeviceMask, StreamConfig, source};

/// Raw PCM capture state while active.
struct PcmCapture {
    /// `None` in audio-disabled mode
    pcm: Option<Box<dyn PcmTransport>>,
    /// Present only when the hardware rate differs from the stream rate
    resampler: Option<InResampler>,
    /// Resampled samples before conversion to bytes
    scratch: Vec<i16>,
}

/// Transport of an input stream, chosen by the bound route's kind when the
/// stream leaves standby.
enum InputTransport {
    Standby,
    Pcm(PcmCapture),
    Compressed(Box<dyn CompressTransport>),
}

struct InputState {
    /// Bound route. Kept across standby; replaced on source change.
    hw: Option<RouteHandle>,
    devices: DeviceMask,
    /// Unset until the first successful source change
    input_source: Option<i32>,
    transport: InputTransport,
    buffer_size: usize,
}

impl InputState {
    fn is_standby(&self) -> bool {
        matches!(self.transport, InputTransport::Standby)
    }
}

/// A capture stream.
///
/// No route is bound at open: the logical input source arrives later as a
/// parameter and decides which route to use.
pub struct InputStream {
    id: StreamId,
    dev: Arc<DeviceShared>,
    config: StreamConfig,
    inner: Mutex<InputState>,
    last_read: Mutex<Option<Instant>>,
}

impl InputStream {
    pub(crate) fn new(dev: Arc<DeviceShared>, config: StreamConfig, devices: DeviceMask) -> Self {
        let id = dev.next_stream_id();
        // The framework reads the buffer size before telling us the input
        // source, so start from a size that suits every kind of input
        let buffer_size = dev.config.input.default_buffer_size;

        Self {
            id,
            dev,
            config,
            inner: Mutex::new(InputState {
                hw: None,
                devices,
                input_source: None,
                transport: InputTransport::Standby,
                buffer_size,
            }),
            last_read: Mutex::new(None),
        }
    }

    // ===== Hardware configuration =====

    fn pcm_request(&self, hw: &RouteHandle) -> PcmConfig {
        let caps = hw.caps();
        let input = &self.dev.config.input;
        let or_default = |v: u32, default: u32| if v != 0 { v } else { default };

        PcmConfig {
            channels: or_default(self.config.channel_count(), input.channel_count),
            rate: or_default(caps.rate, input.sample_rate),
            period_size: or_default(caps.period_size, input.period_size),
            period_count: or_default(caps.period_count, input.period_count),
            format: match self.config.format {
                AudioFormat::Pcm32Bit | AudioFormat::Pcm8_24Bit => PcmFormat::S32Le,
                _ => PcmFormat::S16Le,
            },
        }
    }

    // ===== State transitions =====

    fn start_pcm(&self, st: &mut InputState) -> Result<()> {
        let Some(hw) = st.hw.as_ref() else {
            log::warn!("input {}: input_source not set", self.id);
            return Err(HalError::invalid_state("input source not set"));
        };
        let caps = hw.caps();
        let requested = self.pcm_request(hw);

        log::debug!(
            "start input {}: channels={}, rate={}, period_size={}, period_count={}",
            self.id,
            requested.channels,
            requested.rate,
            requested.period_size,
            requested.period_count
        );

        if self.dev.config.disable_audio {
            st.buffer_size = input_buffer_size(
                requested.period_size,
                self.config.sample_rate,
                requested.rate,
                self.config.frame_size(),
            );
            st.transport = InputTransport::Pcm(PcmCapture {
                pcm: None,
                resampler: None,
                scratch: Vec::new(),
            });
            return Ok(());
        }

        let pcm = self
            .dev
            .backends
            .pcm
            .open(caps.card_number, caps.device_number, PcmDirection::Capture, &requested)
            .inspect_err(|e| log::error!("pcm open (in) failed: {}", e))?;
        let granted = pcm.negotiated();

        let resampler = if granted.rate != self.config.sample_rate {
            if granted.format != PcmFormat::S16Le || self.config.format != AudioFormat::Pcm16Bit {
                log::error!(
                    "input {}: cannot resample {:?} capture to {:?}",
                    self.id,
                    granted.format,
                    self.config.format
                );
                return Err(HalError::NotSupported("resampling of non 16-bit capture"));
            }
            Some(InResampler::new(
                self.dev.backends.resampler.as_ref(),
                &granted,
                self.config.sample_rate,
                self.config.channel_count(),
            )?)
        } else {
            None
        };

        st.buffer_size = input_buffer_size(
            granted.period_size,
            self.config.sample_rate,
            granted.rate,
            self.config.frame_size(),
        );
        log::debug!("input {} buffer size={:#x}", self.id, st.buffer_size);

        st.transport = InputTransport::Pcm(PcmCapture {
            pcm: Some(pcm),
            resampler,
            scratch: Vec::new(),
        });
        Ok(())
    }

    fn start_compressed(&self, st: &mut InputState) -> Result<()> {
        let Some(hw) = st.hw.as_ref() else {
            log::warn!("input {}: input_source not set", self.id);
            return Err(HalError::invalid_state("input source not set"));
        };
        let Some(backend) = self.dev.backends.compress.as_ref() else {
            return Err(HalError::NotSupported("no compressed capture back end"));
        };
        let caps = hw.caps();
        let compress = &self.dev.config.compress;

        let codec = CodecDescriptor {
            channels: self.config.channel_count(),
            sample_rate: self.config.sample_rate,
            format: PcmFormat::S16Le,
            fragment_size: compress.fragment_size,
            fragments: compress.fragments,
        };

        let mut transport = backend
            .open(caps.card_number, caps.device_number, &codec)
            .inspect_err(|e| log::error!("compress open (in) failed: {}", e))?;

        let frame_size = self.config.frame_size();
        let fragments = compress.fragment_size as usize * compress.fragments as usize;
        let buffer_size = fragments * frame_size;

        // Bound how long a read may block: about two buffers' worth of audio
        let buffer_time = nominal_duration(buffer_size, frame_size, self.config.sample_rate);
        let max_wait = Duration::from_millis(u64::from(compress.max_poll_wait_ms));
        let poll_wait = Duration::from_millis(buffer_time.as_millis() as u64 * 2).min(max_wait);
        transport.set_max_poll_wait(poll_wait);
        transport.start()?;

        log::debug!(
            "start compressed input {}: buffer size={}, poll wait={:?}",
            self.id,
            buffer_size,
            poll_wait
        );

        st.buffer_size = buffer_size;
        st.transport = InputTransport::Compressed(transport);
        Ok(())
    }

    fn do_standby(&self, st: &mut InputState) {
        match std::mem::replace(&mut st.transport, InputTransport::Standby) {
            InputTransport::Standby => {}
            InputTransport::Pcm(_) => {
                log::debug!("input {} entered standby", self.id);
            }
            InputTransport::Compressed(mut transport) => {
                if let Err(e) = transport.stop() {
                    log::warn!("input {}: compress stop failed: {}", self.id, e);
                }
                log::debug!("input {} (compressed) entered standby", self.id);
            }
        }
    }

    pub fn standby(&self) {
        let mut st = self.inner.lock();
        self.do_standby(&mut st);
    }

    /// Bind the route for `new_source`.
    ///
    /// Only allowed in standby. Returns `false` when the source is already
    /// the current one.
    pub fn change_input_source(&self, new_source: i32, devices: DeviceMask) -> Result<bool> {
        let mut st = self.inner.lock();
        self.change_input_source_locked(&mut st, new_source, devices)
    }

    fn change_input_source_locked(
        &self,
        st: &mut InputState,
        new_source: i32,
        devices: DeviceMask,
    ) -> Result<bool> {
        if !st.is_standby() {
            log::error!("input {}: attempt to change input source while active", self.id);
            return Err(HalError::invalid_state("input source change while active"));
        }

        if st.input_source == Some(new_source) {
            log::debug!("input {}: input source not changed", self.id);
            return Ok(false);
        }

        // Special input sources are opened by name; the voice recognition
        // stream to use depends on the trigger state
        let (stream_name, voice_control) = match new_source {
            source::VOICE_RECOGNITION => {
                let state = self.dev.state.lock().voice.state();
                (state.audio_stream_name(), true)
            }
            _ => (None, false),
        };

        let routes = self.dev.routes.as_ref();
        let named = stream_name.and_then(|name| {
            let hw = routes.resolve_by_name(name);
            if hw.is_some() {
                log::info!("input {}: changing input source to '{}'", self.id, name);
            }
            hw
        });
        let hw = match named {
            Some(hw) => hw,
            None => {
                let hw = routes
                    .resolve_by_capability(devices, 0, &self.config)
                    .ok_or(HalError::NoMatchingRoute { devices, flags: 0 })
                    .inspect_err(|_| {
                        log::warn!("input {}: could not open new input stream", self.id)
                    })?;
                log::info!(
                    "input {}: changing to default input source for devices {:#x}",
                    self.id,
                    devices
                );
                hw
            }
        };

        // Initial route, then replace (and release) the previous one
        hw.apply_route(devices);
        st.hw = Some(RouteHandle::new(hw));
        st.devices = devices;

        self.dev.update_voice_control(self.id, voice_control);

        st.input_source = Some(new_source);
        Ok(true)
    }

    /// Handle `input_source`, `routing` and route use-cases.
    /// Unknown or failing parameters are not reported.
    pub fn set_parameters(&self, kvpairs: &str) {
        log::debug!("input {} set_parameters '{}'", self.id, kvpairs);

        let kv = KvPairs::parse(kvpairs);
        let mut routing = kv.get_u32(KEY_ROUTING);
        let mut st = self.inner.lock();

        if let Some(value) = kv.get(KEY_INPUT_SOURCE) {
            // Route the new stream to the same devices as the current one
            let devices = routing
                .or_else(|| st.hw.as_ref().map(|hw| hw.routed_devices()))
                .unwrap_or(st.devices);

            let new_source = parse_leading_int(value) as i32;
            match self.change_input_source_locked(&mut st, new_source, devices) {
                // The new route already carries `devices`
                Ok(true) => routing = None,
                Ok(false) => routing = Some(devices),
                Err(e) => {
                    log::warn!("input {}: input_source={} rejected: {}", self.id, value, e);
                    return;
                }
            }
        }

        if let Some(devices) = routing {
            st.devices = devices;
            if let Some(hw) = &st.hw {
                log::debug!("input {}: apply routing={:#x}", self.id, devices);
                hw.apply_route(devices);
            }
        }

        if let Err(e) = parms::invoke_use_cases(st.hw.as_deref(), kvpairs) {
            log::trace!("input {} use-cases: {}", self.id, e);
        }
    }

    // ===== Read path =====

    /// Read captured audio into `buf`.
    ///
    /// Never fails: transport errors, a missing route and mic mute all yield
    /// a buffer of silence delivered at the realtime rate.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let captured = self.capture(buf);
        let mic_mute = self.dev.state.lock().mic_mute;

        let n = match captured {
            Ok(n) if n > 0 && !mic_mute => n,
            other => {
                buf.fill(0);
                // Only delay if we failed to capture any audio
                match other {
                    Ok(n) if n > 0 => {}
                    Ok(_) => self.realtime_delay(buf.len()),
                    Err(e) => {
                        log::debug!("input {} read -> silence: {}", self.id, e);
                        self.realtime_delay(buf.len());
                    }
                }
                buf.len()
            }
        };

        *self.last_read.lock() = Some(Instant::now());
        n
    }

    /// One read from the bound transport. Errors instead of producing silence.
    pub(crate) fn capture(&self, buf: &mut [u8]) -> Result<usize> {
        let mut st = self.inner.lock();

        let kind = match &st.hw {
            None => {
                log::warn!("input {} read: no input source for stream", self.id);
                return Err(HalError::invalid_state("no input source"));
            }
            Some(hw) if hw.current_routes() == 0 => {
                log::trace!("input {} read: no routes", self.id);
                return Err(HalError::invalid_state("no routes"));
            }
            Some(hw) => hw.caps().kind,
        };

        match kind {
            TransportKind::Compressed => self.read_compressed(&mut st, buf),
            TransportKind::RawPcm => self.read_pcm(&mut st, buf),
        }
    }

    fn read_pcm(&self, st: &mut InputState, buf: &mut [u8]) -> Result<usize> {
        if st.is_standby() {
            self.start_pcm(st)?;
        }
        let InputTransport::Pcm(capture) = &mut st.transport else {
            return Err(HalError::invalid_state("route kind changed while active"));
        };

        let frame_size = self.config.frame_size();
        let Some(pcm) = capture.pcm.as_deref_mut() else {
            // Audio disabled
            thread::sleep(nominal_duration(buf.len(), frame_size, self.config.sample_rate));
            buf.fill(0);
            return Ok(buf.len());
        };

        match capture.resampler.as_mut() {
            Some(resampler) => {
                let frames = buf.len() / frame_size;
                let samples = frames * self.config.channel_count() as usize;
                capture.scratch.resize(samples, 0);
                resampler.read_frames(pcm, &mut capture.scratch)?;
                samples_to_le_bytes(&capture.scratch, &mut buf[..frames * frame_size]);
            }
            None => pcm.read(buf)?,
        }

        log::trace!("input {} read {} bytes", self.id, buf.len());
        Ok(buf.len())
    }

    fn read_compressed(&self, st: &mut InputState, buf: &mut [u8]) -> Result<usize> {
        if st.is_standby() {
            self.start_compressed(st)?;
        }
        let InputTransport::Compressed(transport) = &mut st.transport else {
            return Err(HalError::invalid_state("route kind changed while active"));
        };

        let n = transport.read(buf)?;
        if n > 0 {
            // Consumers cannot cope with bursty data: cap delivery at 4x realtime
            self.realtime_delay(n / 4);
        } else {
            log::trace!("input {} compressed read: no data", self.id);
        }
        Ok(n)
    }

    /// Sleep for the time `bytes` take to capture, minus the time elapsed
    /// since the previous read. Differences under a millisecond are ignored.
    fn realtime_delay(&self, bytes: usize) {
        let Some(last_read) = *self.last_read.lock() else {
            return;
        };

        let required = nominal_duration(bytes, self.config.frame_size(), self.config.sample_rate);
        let elapsed = last_read.elapsed();
        if required.as_millis() > elapsed.as_millis() {
            thread::sleep(required - elapsed);
        }
    }

    // ===== Stream properties =====

    pub(crate) fn id(&self) -> StreamId {
        self.id
    }

    pub fn config(&self) -> StreamConfig {
        self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn set_sample_rate(&self, rate: u32) -> Result<()> {
        if rate == self.config.sample_rate {
            Ok(())
        } else {
            Err(HalError::NotSupported("input sample rate change"))
        }
    }

    pub fn channel_mask(&self) -> u32 {
        self.config.channel_mask
    }

    pub fn format(&self) -> AudioFormat {
        self.config.format
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.lock().buffer_size
    }

    pub fn set_gain(&self, _gain: f32) -> Result<()> {
        Ok(())
    }

    pub fn input_frames_lost(&self) -> u32 {
        0
    }

    pub fn get_parameters(&self, keys: &str) -> String {
        parms::stream_query_reply(keys, self.config.format)
    }

    pub fn input_source(&self) -> Option<i32> {
        self.inner.lock().input_source
    }

    pub fn is_standby(&self) -> bool {
        self.inner.lock().is_standby()
    }

    /// Enter standby, give up voice control and release the route.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for InputStream {
    fn drop(&mut self) {
        let mut st = self.inner.lock();
        self.do_standby(&mut st);

        // Standby leaves voice control in place; only close clears it
        self.dev.update_voice_control(self.id, false);

        st.hw = None;
        log::info!("Closed input stream {}", self.id);
    }
}
