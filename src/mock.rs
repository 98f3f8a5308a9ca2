//! In-memory routing configuration and transports.
//!
//! Lets a host (or a test) drive the device coordinator and the stream state
//! machines without sound hardware. Every mock records the calls it receives
//! so they can be asserted on afterwards.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI16, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::audio::transport::{
    CodecDescriptor, CompressBackend, CompressTransport, PcmBackend, PcmConfig, PcmDirection,
    PcmTransport,
};
use crate::error::{HalError, Result, errno};
use crate::route::{HwStream, RouteConfig, StreamCaps};
use crate::types::{AUDIO_DEVICE_BIT_IN, DeviceMask, StreamConfig};

// ===== Routing =====

/// A hardware stream of the mock configuration.
#[derive(Debug)]
pub struct MockHwStream {
    caps: StreamCaps,
    /// Devices this stream can carry when resolved by capability
    devices: DeviceMask,
    known_use_cases: Mutex<Vec<String>>,
    in_use: AtomicBool,
    route: AtomicU32,
    route_history: Mutex<Vec<DeviceMask>>,
    use_cases: Mutex<Vec<(String, String)>>,
    volume: Mutex<Option<(i32, i32)>>,
    releases: AtomicUsize,
}

impl MockHwStream {
    fn new(caps: StreamCaps, devices: DeviceMask) -> Self {
        Self {
            caps,
            devices,
            known_use_cases: Mutex::new(Vec::new()),
            in_use: AtomicBool::new(false),
            route: AtomicU32::new(0),
            route_history: Mutex::new(Vec::new()),
            use_cases: Mutex::new(Vec::new()),
            volume: Mutex::new(None),
            releases: AtomicUsize::new(0),
        }
    }

    /// Accept `key` in `apply_use_case`. Unknown keys are rejected.
    pub fn accept_use_case(&self, key: &str) {
        self.known_use_cases.lock().push(key.to_string());
    }

    fn serves(&self, devices: DeviceMask) -> bool {
        let direction = devices & AUDIO_DEVICE_BIT_IN;
        let bits = devices & !AUDIO_DEVICE_BIT_IN;
        (self.devices & AUDIO_DEVICE_BIT_IN) == direction && (bits == 0 || self.devices & bits != 0)
    }

    fn claim(&self) -> bool {
        !self.in_use.swap(true, Ordering::SeqCst)
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Device mask of the last `apply_route`.
    pub fn current_route(&self) -> DeviceMask {
        self.route.load(Ordering::SeqCst)
    }

    pub fn route_history(&self) -> Vec<DeviceMask> {
        self.route_history.lock().clone()
    }

    /// Use-cases accepted so far, in order.
    pub fn applied_use_cases(&self) -> Vec<(String, String)> {
        self.use_cases.lock().clone()
    }

    pub fn volume(&self) -> Option<(i32, i32)> {
        *self.volume.lock()
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl HwStream for MockHwStream {
    fn caps(&self) -> StreamCaps {
        self.caps
    }

    fn apply_route(&self, devices: DeviceMask) {
        log::trace!("mock apply_route {:#x}", devices);
        self.route.store(devices, Ordering::SeqCst);
        self.route_history.lock().push(devices);
    }

    fn apply_use_case(&self, key: &str, value: &str) -> Result<()> {
        if !self.known_use_cases.lock().iter().any(|k| k == key) {
            return Err(HalError::NotSupported("unknown use-case"));
        }
        self.use_cases.lock().push((key.to_string(), value.to_string()));
        Ok(())
    }

    fn current_routes(&self) -> DeviceMask {
        self.current_route()
    }

    fn routed_devices(&self) -> DeviceMask {
        self.current_route()
    }

    fn set_volume(&self, left_pct: i32, right_pct: i32) -> Result<()> {
        *self.volume.lock() = Some((left_pct, right_pct));
        Ok(())
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.in_use.store(false, Ordering::SeqCst);
    }
}

struct MockEntry {
    name: Option<String>,
    stream: Arc<MockHwStream>,
}

/// Routing configuration holding a fixed list of streams.
///
/// A stream is handed out to one owner at a time until it is released.
#[derive(Default)]
pub struct MockRouteConfig {
    entries: Mutex<Vec<MockEntry>>,
    capability_lookups: AtomicUsize,
    named_lookups: AtomicUsize,
}

impl MockRouteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stream resolvable by capability for `devices`.
    pub fn add_stream(&self, devices: DeviceMask, caps: StreamCaps) -> Arc<MockHwStream> {
        let stream = Arc::new(MockHwStream::new(caps, devices));
        self.entries.lock().push(MockEntry {
            name: None,
            stream: stream.clone(),
        });
        stream
    }

    /// Add a stream resolvable only by name.
    pub fn add_named(&self, name: &str, caps: StreamCaps) -> Arc<MockHwStream> {
        let stream = Arc::new(MockHwStream::new(caps, 0));
        self.entries.lock().push(MockEntry {
            name: Some(name.to_string()),
            stream: stream.clone(),
        });
        stream
    }

    pub fn capability_lookups(&self) -> usize {
        self.capability_lookups.load(Ordering::SeqCst)
    }

    pub fn named_lookups(&self) -> usize {
        self.named_lookups.load(Ordering::SeqCst)
    }
}

impl RouteConfig for MockRouteConfig {
    fn resolve_by_capability(
        &self,
        devices: DeviceMask,
        flags: u32,
        config: &StreamConfig,
    ) -> Option<Arc<dyn HwStream>> {
        self.capability_lookups.fetch_add(1, Ordering::SeqCst);
        log::trace!(
            "mock resolve devices={:#x} flags={:#x} rate={}",
            devices,
            flags,
            config.sample_rate
        );
        self.entries
            .lock()
            .iter()
            .filter(|e| e.name.is_none() && e.stream.serves(devices))
            .find(|e| e.stream.claim())
            .map(|e| e.stream.clone() as Arc<dyn HwStream>)
    }

    fn resolve_by_name(&self, name: &str) -> Option<Arc<dyn HwStream>> {
        self.named_lookups.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .iter()
            .filter(|e| e.name.as_deref() == Some(name))
            .find(|e| e.stream.claim())
            .map(|e| e.stream.clone() as Arc<dyn HwStream>)
    }

    fn is_named_defined(&self, name: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|e| e.name.as_deref() == Some(name))
    }
}

// ===== Raw PCM =====

/// One `open` call seen by [`MockPcmBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockPcmOpen {
    pub card: u32,
    pub device: u32,
    pub direction: PcmDirection,
    pub requested: PcmConfig,
}

#[derive(Default)]
struct MockPcmShared {
    opened: Mutex<Vec<MockPcmOpen>>,
    /// Hardware rate/channels forced onto every open
    forced: Mutex<Option<(u32, u32)>>,
    fail_open: AtomicBool,
    fail_io: AtomicBool,
    capture_value: AtomicI16,
    bytes_written: AtomicU64,
    reads: AtomicUsize,
    closed: AtomicUsize,
}

/// PCM back end whose devices accept writes instantly and capture a
/// constant sample value.
#[derive(Default, Clone)]
pub struct MockPcmBackend {
    shared: Arc<MockPcmShared>,
}

impl MockPcmBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the "hardware" negotiate this rate and channel count whatever
    /// is requested.
    pub fn force_geometry(&self, rate: u32, channels: u32) {
        *self.shared.forced.lock() = Some((rate, channels));
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.shared.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make every read and write fail with EIO.
    pub fn set_fail_io(&self, fail: bool) {
        self.shared.fail_io.store(fail, Ordering::SeqCst);
    }

    pub fn set_capture_value(&self, value: i16) {
        self.shared.capture_value.store(value, Ordering::SeqCst);
    }

    pub fn opened(&self) -> Vec<MockPcmOpen> {
        self.shared.opened.lock().clone()
    }

    /// Transports opened and not yet dropped.
    pub fn open_count(&self) -> usize {
        self.shared.opened.lock().len() - self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn bytes_written(&self) -> u64 {
        self.shared.bytes_written.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.shared.reads.load(Ordering::SeqCst)
    }
}

impl PcmBackend for MockPcmBackend {
    fn open(
        &self,
        card: u32,
        device: u32,
        direction: PcmDirection,
        config: &PcmConfig,
    ) -> Result<Box<dyn PcmTransport>> {
        if self.shared.fail_open.load(Ordering::SeqCst) {
            return Err(HalError::transport(
                errno::ENODEV,
                format!("hw:{},{} unavailable", card, device),
            ));
        }

        self.shared.opened.lock().push(MockPcmOpen {
            card,
            device,
            direction,
            requested: *config,
        });

        let mut negotiated = *config;
        if let Some((rate, channels)) = *self.shared.forced.lock() {
            negotiated.rate = rate;
            negotiated.channels = channels;
        }

        Ok(Box::new(MockPcm {
            config: negotiated,
            frames_written: 0,
            opened_at: Instant::now(),
            shared: self.shared.clone(),
        }))
    }
}

struct MockPcm {
    config: PcmConfig,
    frames_written: u64,
    opened_at: Instant,
    shared: Arc<MockPcmShared>,
}

impl MockPcm {
    fn check_io(&self, op: &str) -> Result<()> {
        if self.shared.fail_io.load(Ordering::SeqCst) {
            return Err(HalError::transport(errno::EIO, format!("mock {} failed", op)));
        }
        Ok(())
    }
}

impl PcmTransport for MockPcm {
    fn negotiated(&self) -> PcmConfig {
        self.config
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.check_io("read")?;
        self.shared.reads.fetch_add(1, Ordering::SeqCst);
        let value = self.shared.capture_value.load(Ordering::SeqCst).to_le_bytes();
        for sample in buf.chunks_exact_mut(2) {
            sample.copy_from_slice(&value);
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.check_io("write")?;
        self.frames_written += (buf.len() / self.config.frame_bytes()) as u64;
        self.shared
            .bytes_written
            .fetch_add(buf.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    fn hardware_timestamp(&mut self) -> Result<(u32, Duration)> {
        // Nothing drains; the ring fills up as frames are written
        let buffer = self.config.buffer_frames();
        let avail = buffer - self.frames_written.min(buffer);
        Ok((avail as u32, self.opened_at.elapsed()))
    }
}

impl Drop for MockPcm {
    fn drop(&mut self) {
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ===== Compressed =====

#[derive(Default)]
struct MockCompressShared {
    opened: Mutex<Vec<CodecDescriptor>>,
    /// Byte counts returned by successive reads; empty means timeout
    reads: Mutex<VecDeque<usize>>,
    poll_wait: Mutex<Option<Duration>>,
    started: AtomicUsize,
    stopped: AtomicUsize,
    closed: AtomicUsize,
}

/// Compressed-codec back end replaying scripted read sizes.
#[derive(Default, Clone)]
pub struct MockCompressBackend {
    shared: Arc<MockCompressShared>,
}

impl MockCompressBackend {
    /// Byte filled into captured compressed data.
    pub const FILL: u8 = 0x5a;

    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the byte counts the next reads return. Once the queue is empty
    /// reads time out with 0 bytes.
    pub fn push_reads(&self, sizes: impl IntoIterator<Item = usize>) {
        self.shared.reads.lock().extend(sizes);
    }

    pub fn opened(&self) -> Vec<CodecDescriptor> {
        self.shared.opened.lock().clone()
    }

    pub fn poll_wait(&self) -> Option<Duration> {
        *self.shared.poll_wait.lock()
    }

    pub fn started(&self) -> usize {
        self.shared.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl CompressBackend for MockCompressBackend {
    fn open(
        &self,
        card: u32,
        device: u32,
        codec: &CodecDescriptor,
    ) -> Result<Box<dyn CompressTransport>> {
        log::trace!("mock compress open hw:{},{} {:?}", card, device, codec);
        self.shared.opened.lock().push(*codec);
        Ok(Box::new(MockCompress {
            shared: self.shared.clone(),
        }))
    }
}

struct MockCompress {
    shared: Arc<MockCompressShared>,
}

impl CompressTransport for MockCompress {
    fn start(&mut self) -> Result<()> {
        self.shared.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.shared.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.shared.reads.lock().pop_front().unwrap_or(0).min(buf.len());
        buf[..n].fill(MockCompressBackend::FILL);
        Ok(n)
    }

    fn set_max_poll_wait(&mut self, timeout: Duration) {
        *self.shared.poll_wait.lock() = Some(timeout);
    }
}

impl Drop for MockCompress {
    fn drop(&mut self) {
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::transport::PcmFormat;
    use crate::types::{AUDIO_DEVICE_IN_BUILTIN_MIC, AUDIO_DEVICE_OUT_SPEAKER};

    #[test]
    fn test_resolver_is_exclusive() {
        let routes = MockRouteConfig::new();
        let hw = routes.add_stream(AUDIO_DEVICE_OUT_SPEAKER, StreamCaps::pcm(0, 0));
        let cfg = StreamConfig::default();

        let first = routes.resolve_by_capability(AUDIO_DEVICE_OUT_SPEAKER, 0, &cfg);
        assert!(first.is_some());
        assert!(routes.resolve_by_capability(AUDIO_DEVICE_OUT_SPEAKER, 0, &cfg).is_none());

        first.unwrap().release();
        assert!(!hw.is_in_use());
        assert!(routes.resolve_by_capability(AUDIO_DEVICE_OUT_SPEAKER, 0, &cfg).is_some());
    }

    #[test]
    fn test_resolver_respects_direction() {
        let routes = MockRouteConfig::new();
        routes.add_stream(AUDIO_DEVICE_OUT_SPEAKER, StreamCaps::pcm(0, 0));
        let cfg = StreamConfig::default();
        assert!(routes.resolve_by_capability(AUDIO_DEVICE_IN_BUILTIN_MIC, 0, &cfg).is_none());
    }

    #[test]
    fn test_playback_avail_shrinks() {
        let backend = MockPcmBackend::new();
        let config = PcmConfig {
            channels: 2,
            rate: 48000,
            period_size: 256,
            period_count: 4,
            format: PcmFormat::S16Le,
        };
        let mut pcm = backend.open(0, 0, PcmDirection::Playback, &config).unwrap();
        assert_eq!(pcm.hardware_timestamp().unwrap().0, 1024);

        pcm.write(&vec![0u8; 256 * 4]).unwrap();
        assert_eq!(pcm.hardware_timestamp().unwrap().0, 768);
        assert_eq!(backend.bytes_written(), 1024);

        drop(pcm);
        assert_eq!(backend.open_count(), 0);
    }
}
