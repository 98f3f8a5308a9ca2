//! Integration tests for tinyhal_rs.
//!
//! Every test runs against the in-memory routing configuration and
//! transports from `tinyhal_rs::mock`; no sound hardware is needed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tinyhal_rs::mock::{MockCompressBackend, MockHwStream, MockPcmBackend, MockRouteConfig};
use tinyhal_rs::types::{
    AUDIO_CHANNEL_IN_MONO, AUDIO_CHANNEL_OUT_STEREO, AUDIO_DEVICE_IN_BUILTIN_MIC,
    AUDIO_DEVICE_OUT_SPEAKER, source,
};
use tinyhal_rs::voice_trigger::VOICE_RECOGNITION_STREAM;
use tinyhal_rs::{
    AudioDevice, AudioFormat, Backends, HalConfig, HalError, InputStream, StreamCaps, StreamConfig,
    VoiceState,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A device over mock routes and transports, with handles to inspect them.
struct TestHal {
    dev: AudioDevice,
    routes: Arc<MockRouteConfig>,
    pcm: MockPcmBackend,
    compress: MockCompressBackend,
}

impl TestHal {
    fn new() -> Self {
        Self::with_config(HalConfig::default(), |_| {})
    }

    /// `setup` declares routes before the device is opened.
    fn with_config(config: HalConfig, setup: impl FnOnce(&MockRouteConfig)) -> Self {
        init_logger();
        let routes = Arc::new(MockRouteConfig::new());
        setup(&routes);

        let pcm = MockPcmBackend::new();
        let compress = MockCompressBackend::new();
        let backends =
            Backends::new(Arc::new(pcm.clone())).with_compress(Arc::new(compress.clone()));
        let dev = AudioDevice::with_routes(routes.clone(), backends, config);

        Self {
            dev,
            routes,
            pcm,
            compress,
        }
    }

    fn speaker(&self, caps: StreamCaps) -> Arc<MockHwStream> {
        self.routes.add_stream(AUDIO_DEVICE_OUT_SPEAKER, caps)
    }

    fn mic(&self, caps: StreamCaps) -> Arc<MockHwStream> {
        self.routes.add_stream(AUDIO_DEVICE_IN_BUILTIN_MIC, caps)
    }

    fn open_input(&self, rate: u32) -> InputStream {
        let cfg = StreamConfig::new(rate, AUDIO_CHANNEL_IN_MONO, AudioFormat::Pcm16Bit);
        self.dev.open_input_stream(AUDIO_DEVICE_IN_BUILTIN_MIC, &cfg).unwrap()
    }
}

fn stereo_44k() -> StreamConfig {
    StreamConfig::new(44100, AUDIO_CHANNEL_OUT_STEREO, AudioFormat::Pcm16Bit)
}

/// Recognition hardware: one named stream for the recogniser, one for the
/// audio captured once it fires, and a plain microphone.
fn recognition_routes(routes: &MockRouteConfig) {
    routes.add_named(VOICE_RECOGNITION_STREAM, StreamCaps::pcm(0, 5));
    routes.add_named(VOICE_RECOGNITION_STREAM, StreamCaps::pcm(0, 6));
    routes.add_stream(AUDIO_DEVICE_IN_BUILTIN_MIC, StreamCaps::pcm(0, 0));
}

#[test]
fn test_output_uses_route_geometry() {
    let hal = TestHal::new();
    hal.speaker(StreamCaps::pcm(0, 0).with_geometry(48000, 256, 4));

    let out = hal
        .dev
        .open_output_stream(AUDIO_DEVICE_OUT_SPEAKER, 0, &stereo_44k())
        .unwrap();
    assert_eq!(out.sample_rate(), 44100);
    assert!(out.is_standby());

    // One period of stereo 16-bit frames
    assert_eq!(out.write(&[0u8; 256 * 4]).unwrap(), 1024);
    assert!(!out.is_standby());

    let opened = hal.pcm.opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].requested.rate, 48000);
    assert_eq!(opened[0].requested.period_size, 256);
    assert_eq!(opened[0].requested.period_count, 4);
    assert_eq!(out.hw_geometry(), (48000, 2));

    // 256 written - 1024 kernel buffer + 768 avail
    let pos = out.presentation_position().unwrap();
    assert_eq!(pos.frames, 0);
    assert!(pos.timestamp.is_some());
}

#[test]
fn test_position_not_ready_after_short_write() {
    let hal = TestHal::new();
    hal.speaker(StreamCaps::pcm(0, 0).with_geometry(48000, 256, 4));
    let out = hal
        .dev
        .open_output_stream(AUDIO_DEVICE_OUT_SPEAKER, 0, &stereo_44k())
        .unwrap();

    out.write(&[0u8; 256 * 4]).unwrap();
    out.standby();

    // 256 written - 1024 kernel buffer, nothing left in the hardware queue
    let err = out.presentation_position().unwrap_err();
    assert!(matches!(err, HalError::InvalidState(_)), "{:?}", err);
    assert_eq!(out.frames_written(), 256);
}

#[test]
fn test_write_without_routes_consumes_nothing() {
    let hal = TestHal::new();
    let hw = hal.speaker(StreamCaps::pcm(0, 0));
    let out = hal
        .dev
        .open_output_stream(AUDIO_DEVICE_OUT_SPEAKER, 0, &stereo_44k())
        .unwrap();

    out.set_parameters("routing=0");
    assert_eq!(hw.current_route(), 0);
    assert_eq!(out.write(&[0u8; 512]).unwrap(), 0);
    assert!(out.is_standby());
    assert!(hal.pcm.opened().is_empty());
    assert_eq!(out.frames_written(), 0);
}

#[test]
fn test_position_monotonic_across_standby() {
    let hal = TestHal::new();
    hal.speaker(StreamCaps::pcm(0, 0).with_geometry(48000, 256, 4));
    let out = hal
        .dev
        .open_output_stream(AUDIO_DEVICE_OUT_SPEAKER, 0, &stereo_44k())
        .unwrap();

    let period = [0u8; 256 * 4];
    for _ in 0..5 {
        out.write(&period).unwrap();
    }
    let before = out.presentation_position().unwrap().frames;
    assert_eq!(before, 256);

    out.standby();
    assert!(out.is_standby());
    assert_eq!(hal.pcm.open_count(), 0);
    assert_eq!(out.presentation_position().unwrap().frames, before);

    out.write(&period).unwrap();
    let after = out.presentation_position().unwrap().frames;
    assert!(after >= before, "{} < {}", after, before);
    assert_eq!(out.frames_written(), 6 * 256);
    // Rendered frames restart at each activation
    assert_eq!(out.render_position(), 256);
}

#[test]
fn test_close_output_releases_route() {
    let hal = TestHal::new();
    let hw = hal.speaker(StreamCaps::pcm(0, 0));
    let out = hal
        .dev
        .open_output_stream(AUDIO_DEVICE_OUT_SPEAKER, 0, &stereo_44k())
        .unwrap();
    assert!(hw.is_in_use());

    out.write(&[0u8; 64]).unwrap();
    hal.dev.close_output_stream(out);
    assert!(!hw.is_in_use());
    assert_eq!(hal.pcm.open_count(), 0);

    // The route can be resolved again
    let again = hal.dev.open_output_stream(AUDIO_DEVICE_OUT_SPEAKER, 0, &stereo_44k());
    assert!(again.is_ok());
}

#[test]
fn test_input_source_change_is_idempotent() {
    let hal = TestHal::new();
    hal.mic(StreamCaps::pcm(0, 0));
    let input = hal.open_input(16000);

    assert!(input.change_input_source(source::MIC, AUDIO_DEVICE_IN_BUILTIN_MIC).unwrap());
    assert!(!input.change_input_source(source::MIC, AUDIO_DEVICE_IN_BUILTIN_MIC).unwrap());
    input.set_parameters("input_source=1");
    assert_eq!(hal.routes.capability_lookups(), 1);
    assert_eq!(input.input_source(), Some(source::MIC));
}

#[test]
fn test_source_change_routes_and_captures() {
    let hal = TestHal::new();
    let hw = hal.mic(StreamCaps::pcm(0, 0));
    hal.pcm.set_capture_value(1234);
    let input = hal.open_input(48000);

    assert!(input.change_input_source(source::MIC, AUDIO_DEVICE_IN_BUILTIN_MIC).unwrap());
    assert_eq!(hw.current_route(), AUDIO_DEVICE_IN_BUILTIN_MIC);
    assert_eq!(hw.route_history(), vec![AUDIO_DEVICE_IN_BUILTIN_MIC]);

    let mut buf = [0u8; 96];
    assert_eq!(input.read(&mut buf), 96);
    assert_eq!(i16::from_le_bytes([buf[0], buf[1]]), 1234);
    assert_eq!(hal.pcm.opened().len(), 1);
}

#[test]
fn test_unresolvable_source_keeps_previous() {
    let hal = TestHal::new();
    let input = hal.open_input(16000);

    let err = input
        .change_input_source(source::MIC, AUDIO_DEVICE_IN_BUILTIN_MIC)
        .unwrap_err();
    assert!(matches!(err, HalError::NoMatchingRoute { .. }));
    assert_eq!(input.input_source(), None);
}

#[test]
fn test_recognition_audio_after_trigger() {
    let hal = TestHal::with_config(HalConfig::default(), recognition_routes);
    assert_eq!(hal.dev.voice_trigger_state(), VoiceState::RecogIdle);

    hal.dev.set_parameters("voice_trigger=1");
    assert_eq!(hal.dev.voice_trigger_state(), VoiceState::RecogArmed);
    hal.dev.set_parameters("voice_trigger=2");
    assert_eq!(hal.dev.voice_trigger_state(), VoiceState::RecogFired);

    let input = hal.open_input(16000);
    input.set_parameters("input_source=6");
    assert_eq!(input.input_source(), Some(source::VOICE_RECOGNITION));
    assert_eq!(hal.dev.voice_trigger_state(), VoiceState::RecogAudio);
    // The named stream was used, not a capability lookup
    assert_eq!(hal.routes.capability_lookups(), 0);
    // Global stream at open, the recogniser, then the audio stream
    assert_eq!(hal.routes.named_lookups(), 3);

    // Closing the stream ends the audio stage and drops the recogniser route
    hal.dev.close_input_stream(input);
    assert_eq!(hal.dev.voice_trigger_state(), VoiceState::RecogIdle);

    // Both named streams are free again
    hal.dev.set_parameters("voice_trigger=1");
    assert_eq!(hal.dev.voice_trigger_state(), VoiceState::RecogArmed);
    hal.dev.set_parameters("voice_trigger=2");
    let input = hal.open_input(16000);
    assert!(input
        .change_input_source(source::VOICE_RECOGNITION, AUDIO_DEVICE_IN_BUILTIN_MIC)
        .unwrap());
    assert_eq!(hal.routes.capability_lookups(), 0);
}

#[test]
fn test_rearm_deferred_until_audio_ends() {
    let mut recogniser = None;
    let hal = TestHal::with_config(HalConfig::default(), |routes| {
        recogniser = Some(routes.add_named(VOICE_RECOGNITION_STREAM, StreamCaps::pcm(0, 5)));
        routes.add_named(VOICE_RECOGNITION_STREAM, StreamCaps::pcm(0, 6));
    });
    let recogniser = recogniser.unwrap();

    hal.dev.set_parameters("voice_trigger=1");
    hal.dev.set_parameters("voice_trigger=2");
    let input = hal.open_input(16000);
    input.set_parameters("input_source=6");
    assert_eq!(hal.dev.voice_trigger_state(), VoiceState::RecogAudio);
    assert!(recogniser.is_in_use());

    hal.dev.set_parameters("voice_trigger=1");
    assert_eq!(hal.dev.voice_trigger_state(), VoiceState::RecogReArm);

    // The pending re-arm is applied without dropping the recogniser route
    hal.dev.close_input_stream(input);
    assert_eq!(hal.dev.voice_trigger_state(), VoiceState::RecogArmed);
    assert!(recogniser.is_in_use());
    assert_eq!(recogniser.release_count(), 0);

    hal.dev.set_parameters("voice_trigger=2");
    assert_eq!(hal.dev.voice_trigger_state(), VoiceState::RecogFired);
}

#[test]
fn test_recognition_source_before_trigger_uses_microphone() {
    let hal = TestHal::with_config(HalConfig::default(), recognition_routes);
    let input = hal.open_input(16000);

    // Nothing fired: the generic capture route is used and no audio stage starts
    input.set_parameters("input_source=6");
    assert_eq!(hal.routes.capability_lookups(), 1);
    assert_eq!(hal.dev.voice_trigger_state(), VoiceState::RecogIdle);

    // Voice control is held by this stream across standby
    input.standby();
    hal.dev.set_parameters("voice_trigger=1");
    assert_eq!(hal.dev.voice_trigger_state(), VoiceState::RecogArmed);

    hal.dev.close_input_stream(input);
    assert_eq!(hal.dev.voice_trigger_state(), VoiceState::RecogArmed);
}

#[test]
fn test_compressed_timeout_reads_paced_silence() {
    let hal = TestHal::new();
    hal.mic(StreamCaps::compressed(1, 2));
    let input = hal.open_input(16000);
    input.set_parameters("input_source=1");

    let mut buf = [0xffu8; 320];
    // First read starts the transport; nothing to pace against yet
    assert_eq!(input.read(&mut buf), 320);
    assert!(buf.iter().all(|&b| b == 0));
    assert_eq!(hal.compress.started(), 1);

    // 160 frames at 16kHz = 10ms of silence
    let start = Instant::now();
    assert_eq!(input.read(&mut buf), 320);
    assert!(start.elapsed() >= Duration::from_millis(9));
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn test_compressed_data_passes_through() {
    let hal = TestHal::new();
    hal.mic(StreamCaps::compressed(1, 2));
    let input = hal.open_input(16000);
    input.set_parameters("input_source=1");

    hal.compress.push_reads([200]);
    let mut buf = [0u8; 320];
    assert_eq!(input.read(&mut buf), 200);
    assert!(buf[..200].iter().all(|&b| b == MockCompressBackend::FILL));
}

#[test]
fn test_mic_mute_yields_silence() {
    let hal = TestHal::new();
    hal.mic(StreamCaps::pcm(0, 0));
    hal.pcm.set_capture_value(1234);
    let input = hal.open_input(48000);
    input.set_parameters("input_source=1");

    let mut buf = [0u8; 96];
    assert_eq!(input.read(&mut buf), 96);
    assert_eq!(i16::from_le_bytes([buf[0], buf[1]]), 1234);

    hal.dev.set_mic_mute(true);
    assert!(hal.dev.get_mic_mute());
    assert_eq!(input.read(&mut buf), 96);
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn test_resampled_stereo_hardware_to_mono() {
    let hal = TestHal::new();
    hal.mic(StreamCaps::pcm(0, 0).with_geometry(48000, 256, 4));
    hal.pcm.force_geometry(48000, 2);
    hal.pcm.set_capture_value(-500);
    let input = hal.open_input(16000);
    input.set_parameters("input_source=1");

    let mut buf = vec![0u8; 2 * 200];
    assert_eq!(input.read(&mut buf), buf.len());
    // 256 * 16000 / 48000 = 85.33, aligned to 96 frames
    assert_eq!(input.buffer_size(), 96 * 2);

    let last = buf.len() - 2;
    assert_eq!(i16::from_le_bytes([buf[last], buf[last + 1]]), -500);
    assert!(hal.pcm.reads() >= 2);
}

#[test]
fn test_input_without_source_reads_silence() {
    let hal = TestHal::new();
    hal.mic(StreamCaps::pcm(0, 0));
    let input = hal.open_input(16000);

    let mut buf = [0x11u8; 64];
    assert_eq!(input.read(&mut buf), 64);
    assert!(buf.iter().all(|&b| b == 0));
    assert!(hal.pcm.opened().is_empty());
}

#[test]
fn test_disabled_audio_opens_no_transport() {
    let config = HalConfig {
        disable_audio: true,
        ..HalConfig::default()
    };
    let hal = TestHal::with_config(config, |_| {});
    hal.speaker(StreamCaps::pcm(0, 0).with_geometry(48000, 256, 4));
    hal.mic(StreamCaps::pcm(0, 0));

    let out = hal
        .dev
        .open_output_stream(AUDIO_DEVICE_OUT_SPEAKER, 0, &stereo_44k())
        .unwrap();
    // 441 frames at 44.1kHz = 10ms
    let start = Instant::now();
    assert_eq!(out.write(&[0u8; 441 * 4]).unwrap(), 441 * 4);
    assert!(start.elapsed() >= Duration::from_millis(9));
    assert_eq!(out.frames_written(), 441);

    let input = hal.open_input(16000);
    input.set_parameters("input_source=1");
    let mut buf = [0x7fu8; 320];
    assert_eq!(input.read(&mut buf), 320);
    assert!(buf.iter().all(|&b| b == 0));

    assert!(hal.pcm.opened().is_empty());
}

#[test]
fn test_device_use_cases_reach_global_stream() {
    let mut global = None;
    let hal = TestHal::with_config(HalConfig::default(), |routes| {
        let stream = routes.add_named("global", StreamCaps::pcm(0, 0));
        stream.accept_use_case("hdmi");
        global = Some(stream);
    });
    let global = global.unwrap();
    assert!(global.is_in_use());

    hal.dev.set_parameters("hdmi=on;unknown=1");
    assert_eq!(global.applied_use_cases(), vec![("hdmi".to_string(), "on".to_string())]);

    // No playback route was declared
    assert!(matches!(
        hal.dev.open_output_stream(AUDIO_DEVICE_OUT_SPEAKER, 0, &stereo_44k()),
        Err(HalError::NoMatchingRoute { .. })
    ));

    hal.dev.close();
    assert!(!global.is_in_use());
}
