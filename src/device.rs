//! Device coordinator: owns the routing configuration, the device-wide lock,
//! mic mute and the voice-trigger state, and opens/closes streams.
//!
//! Lock order is always stream lock, then device lock. Nothing here takes a
//! stream lock while the device lock is held.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::audio::resampler::{LinearResamplerFactory, ResamplerFactory};
use crate::audio::transport::{CompressBackend, PcmBackend};
use crate::config::HalConfig;
use crate::error::{HalError, Result};
use crate::parms::{self, KvPairs};
use crate::route::{RouteConfig, RouteHandle};
use crate::stream::{InputStream, OutputStream, StreamId};
use crate::types::{
    AUDIO_CHANNEL_IN_MONO, AUDIO_CHANNEL_OUT_STEREO, AudioMode, DeviceMask, MicrophoneInfo,
    StreamConfig, input_devices, output_devices,
};
use crate::voice_trigger::{VoiceEvent, VoiceState, VoiceTrigger};

/// Named route receiving device-wide use-case parameters.
pub const GLOBAL_STREAM: &str = "global";

/// Transports and the resampling engine used by the streams.
#[derive(Clone)]
pub struct Backends {
    pub pcm: Arc<dyn PcmBackend>,
    /// Compressed capture; routes of the compressed kind fail to start without it
    pub compress: Option<Arc<dyn CompressBackend>>,
    pub resampler: Arc<dyn ResamplerFactory>,
}

impl Backends {
    pub fn new(pcm: Arc<dyn PcmBackend>) -> Self {
        Self {
            pcm,
            compress: None,
            resampler: Arc::new(LinearResamplerFactory),
        }
    }

    pub fn with_compress(mut self, compress: Arc<dyn CompressBackend>) -> Self {
        self.compress = Some(compress);
        self
    }

    pub fn with_resampler(mut self, resampler: Arc<dyn ResamplerFactory>) -> Self {
        self.resampler = resampler;
        self
    }

    /// ALSA PCM with the linear resampler.
    #[cfg(feature = "alsa-backend")]
    pub fn alsa() -> Self {
        Self::new(Arc::new(crate::audio::AlsaPcmBackend::new()))
    }
}

/// State guarded by the device lock.
pub(crate) struct DeviceState {
    pub(crate) mic_mute: bool,
    /// Input stream currently consuming voice-recognition audio
    pub(crate) active_voice_control: Option<StreamId>,
    pub(crate) voice: VoiceTrigger,
    global: Option<RouteHandle>,
}

/// Device data shared by the coordinator and every stream it opened.
pub(crate) struct DeviceShared {
    pub(crate) routes: Arc<dyn RouteConfig>,
    pub(crate) backends: Backends,
    pub(crate) config: HalConfig,
    pub(crate) state: Mutex<DeviceState>,
    next_stream_id: AtomicU64,
}

impl DeviceShared {
    pub(crate) fn next_stream_id(&self) -> StreamId {
        self.next_stream_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Under the device lock: make `id` the voice-control stream, or give up
    /// that role, notifying the voice trigger either way.
    pub(crate) fn update_voice_control(&self, id: StreamId, voice_control: bool) {
        let mut state = self.state.lock();
        if voice_control {
            state.active_voice_control = Some(id);
            state.voice.handle(VoiceEvent::AudioStarted, self.routes.as_ref());
        } else if state.active_voice_control == Some(id) {
            state.active_voice_control = None;
            state.voice.handle(VoiceEvent::AudioEnded, self.routes.as_ref());
        }
    }
}

/// An open audio device.
pub struct AudioDevice {
    shared: Arc<DeviceShared>,
}

impl AudioDevice {
    /// Open the device, loading the routing configuration with `load_routes`.
    ///
    /// A loader failure is reported as [`HalError::Config`].
    pub fn open<F>(load_routes: F, backends: Backends, config: HalConfig) -> Result<Self>
    where
        F: FnOnce() -> anyhow::Result<Arc<dyn RouteConfig>>,
    {
        let routes = load_routes().map_err(|e| {
            log::error!("Failed to load routing configuration: {:#}", e);
            HalError::Config(format!("{:#}", e))
        })?;
        Ok(Self::with_routes(routes, backends, config))
    }

    /// Open the device over an already loaded routing configuration.
    pub fn with_routes(
        routes: Arc<dyn RouteConfig>,
        backends: Backends,
        config: HalConfig,
    ) -> Self {
        let global = routes.resolve_by_name(GLOBAL_STREAM).map(RouteHandle::new);
        let voice = VoiceState::probe(routes.as_ref());

        log::info!(
            "Audio device open: global stream={}, voice={:?}, disable_audio={}",
            global.is_some(),
            voice,
            config.disable_audio
        );

        Self {
            shared: Arc::new(DeviceShared {
                routes,
                backends,
                config,
                state: Mutex::new(DeviceState {
                    mic_mute: false,
                    active_voice_control: None,
                    voice: VoiceTrigger::new(voice),
                    global,
                }),
                next_stream_id: AtomicU64::new(1),
            }),
        }
    }

    /// Release the global and voice-trigger routes.
    ///
    /// Streams must have been closed by the caller already.
    pub fn close(self) {
        let mut state = self.shared.state.lock();
        state.voice.release();
        state.global = None;
        log::info!("Audio device closed");
    }

    pub fn config(&self) -> &HalConfig {
        &self.shared.config
    }

    pub fn init_check(&self) -> Result<()> {
        Ok(())
    }

    /// Apply device parameters. Unknown keys are ignored.
    pub fn set_parameters(&self, kvpairs: &str) {
        log::debug!("adev set_parameters '{}'", kvpairs);

        let kv = KvPairs::parse(kvpairs);
        let mut state = self.shared.state.lock();
        state.voice.set_params(&kv, self.shared.routes.as_ref());

        if let Some(global) = &state.global {
            if let Err(e) = parms::invoke_use_cases(Some(&**global), kvpairs) {
                log::trace!("global use-cases: {}", e);
            }
        }
    }

    pub fn get_parameters(&self, _keys: &str) -> String {
        String::new()
    }

    pub fn set_voice_volume(&self, _volume: f32) -> Result<()> {
        Ok(())
    }

    pub fn set_master_volume(&self, _volume: f32) -> Result<()> {
        Err(HalError::NotSupported("master volume"))
    }

    pub fn set_master_mute(&self, _mute: bool) -> Result<()> {
        Err(HalError::NotSupported("master mute"))
    }

    pub fn set_mode(&self, mode: AudioMode) -> Result<()> {
        log::debug!("set_mode {:?}", mode);
        Ok(())
    }

    pub fn set_mic_mute(&self, mute: bool) {
        self.shared.state.lock().mic_mute = mute;
    }

    pub fn get_mic_mute(&self) -> bool {
        self.shared.state.lock().mic_mute
    }

    /// Capture buffer size to use before a stream exists.
    pub fn get_input_buffer_size(&self, config: &StreamConfig) -> usize {
        let input = &self.shared.config.input;
        let size = input.period_size as usize
            * config.format.bytes_per_sample()
            * config.channel_count() as usize;
        size.min(input.default_buffer_size)
    }

    pub fn microphones(&self) -> Vec<MicrophoneInfo> {
        Vec::new()
    }

    pub fn voice_trigger_state(&self) -> VoiceState {
        self.shared.state.lock().voice.state()
    }

    /// Open a playback stream on the route matching `devices`/`flags`/`config`.
    ///
    /// Unset fields of `config` are filled in; read the negotiated values back
    /// with [`OutputStream::config`].
    pub fn open_output_stream(
        &self,
        devices: DeviceMask,
        flags: u32,
        config: &StreamConfig,
    ) -> Result<OutputStream> {
        let devices = output_devices(devices);
        let Some(hw) = self
            .shared
            .routes
            .resolve_by_capability(devices, flags, config)
        else {
            log::error!(
                "No suitable output stream for devices={:#x} flags={:#x} format={:?}",
                devices,
                flags,
                config.format
            );
            return Err(HalError::NoMatchingRoute { devices, flags });
        };
        let hw = RouteHandle::new(hw);

        let default_rate = match hw.caps().rate {
            0 => self.shared.config.output.sample_rate,
            rate => rate,
        };
        let config = config.with_defaults(default_rate, AUDIO_CHANNEL_OUT_STEREO);

        let stream = OutputStream::new(self.shared.clone(), hw, config, devices);
        log::info!(
            "Opened output stream {}: format={:?}, channel_mask={:#x}, rate={}",
            stream.id(),
            config.format,
            config.channel_mask,
            config.sample_rate
        );
        Ok(stream)
    }

    pub fn close_output_stream(&self, stream: OutputStream) {
        stream.close();
    }

    /// Open a capture stream. No route is bound until the input source is
    /// set through [`InputStream::set_parameters`].
    pub fn open_input_stream(
        &self,
        devices: DeviceMask,
        config: &StreamConfig,
    ) -> Result<InputStream> {
        let devices = input_devices(devices);
        let default_rate = self.shared.config.input.sample_rate;
        let config = config.with_defaults(default_rate, AUDIO_CHANNEL_IN_MONO);

        let stream = InputStream::new(self.shared.clone(), config, devices);
        log::info!(
            "Opened input stream {}: format={:?}, channel_mask={:#x}, rate={}",
            stream.id(),
            config.format,
            config.channel_mask,
            config.sample_rate
        );
        Ok(stream)
    }

    pub fn close_input_stream(&self, stream: InputStream) {
        stream.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockPcmBackend, MockRouteConfig};
    use crate::route::StreamCaps;
    use crate::types::{AUDIO_CHANNEL_IN_STEREO, AUDIO_DEVICE_OUT_SPEAKER, AudioFormat};
    use crate::voice_trigger::VOICE_RECOGNITION_STREAM;

    fn device(routes: Arc<MockRouteConfig>) -> AudioDevice {
        let backends = Backends::new(Arc::new(MockPcmBackend::new()));
        AudioDevice::with_routes(routes, backends, HalConfig::default())
    }

    #[test]
    fn test_open_reports_config_error() {
        let backends = Backends::new(Arc::new(MockPcmBackend::new()));
        let err = AudioDevice::open(
            || Err(anyhow::anyhow!("no mixer paths")),
            backends,
            HalConfig::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, HalError::Config(ref msg) if msg.contains("no mixer paths")));
    }

    #[test]
    fn test_stubs() {
        let dev = device(Arc::new(MockRouteConfig::new()));
        assert!(dev.init_check().is_ok());
        assert!(dev.set_voice_volume(0.5).is_ok());
        assert!(matches!(dev.set_master_volume(1.0), Err(HalError::NotSupported(_))));
        assert!(matches!(dev.set_master_mute(true), Err(HalError::NotSupported(_))));
        assert!(dev.set_mode(AudioMode::InCall).is_ok());
        assert!(dev.set_mode(AudioMode::Other(42)).is_ok());
        assert_eq!(dev.get_parameters("anything"), "");
        assert!(dev.microphones().is_empty());
    }

    #[test]
    fn test_mic_mute() {
        let dev = device(Arc::new(MockRouteConfig::new()));
        assert!(!dev.get_mic_mute());
        dev.set_mic_mute(true);
        assert!(dev.get_mic_mute());
    }

    #[test]
    fn test_input_buffer_size() {
        let dev = device(Arc::new(MockRouteConfig::new()));
        let mono = StreamConfig::new(16000, AUDIO_CHANNEL_IN_MONO, AudioFormat::Pcm16Bit);
        assert_eq!(dev.get_input_buffer_size(&mono), 512);
        let stereo = StreamConfig::new(16000, AUDIO_CHANNEL_IN_STEREO, AudioFormat::Pcm32Bit);
        assert_eq!(dev.get_input_buffer_size(&stereo), 1024);
    }

    #[test]
    fn test_no_matching_route() {
        let dev = device(Arc::new(MockRouteConfig::new()));
        let err = dev
            .open_output_stream(AUDIO_DEVICE_OUT_SPEAKER, 0, &StreamConfig::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            HalError::NoMatchingRoute {
                devices: AUDIO_DEVICE_OUT_SPEAKER,
                flags: 0
            }
        ));
    }

    #[test]
    fn test_global_use_cases() {
        let routes = Arc::new(MockRouteConfig::new());
        let global = routes.add_named(GLOBAL_STREAM, StreamCaps::pcm(0, 0));
        global.accept_use_case("bt_sco");
        let dev = device(routes);
        assert!(global.is_in_use());

        dev.set_parameters("bt_sco=on;unknown=1");
        assert_eq!(
            global.applied_use_cases(),
            vec![("bt_sco".to_string(), "on".to_string())]
        );

        dev.close();
        assert!(!global.is_in_use());
    }

    #[test]
    fn test_voice_trigger_via_parameters() {
        let routes = Arc::new(MockRouteConfig::new());
        let recog = routes.add_named(VOICE_RECOGNITION_STREAM, StreamCaps::pcm(0, 5));
        let dev = device(routes);
        assert_eq!(dev.voice_trigger_state(), VoiceState::RecogIdle);

        dev.set_parameters("voice_trigger=1");
        assert_eq!(dev.voice_trigger_state(), VoiceState::RecogArmed);
        assert!(recog.is_in_use());

        dev.set_parameters("voice_trigger=2");
        assert_eq!(dev.voice_trigger_state(), VoiceState::RecogFired);

        dev.close();
        assert!(!recog.is_in_use());
    }
}
