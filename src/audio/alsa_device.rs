//! ALSA PCM back end.

use std::time::Duration;

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use super::transport::{PcmBackend, PcmConfig, PcmDirection, PcmFormat, PcmTransport};
use crate::error::{HalError, Result};

/// Retries after an XRUN before the write is reported as failed.
const MAX_RECOVERY_RETRIES: u32 = 3;

fn alsa_err(context: &str, e: alsa::Error) -> HalError {
    HalError::transport(e.errno(), format!("{}: {}", context, e))
}

/// Opens `hw:<card>,<device>` through libasound.
#[derive(Debug, Default)]
pub struct AlsaPcmBackend;

impl AlsaPcmBackend {
    pub fn new() -> Self {
        Self
    }
}

impl PcmBackend for AlsaPcmBackend {
    fn open(
        &self,
        card: u32,
        device: u32,
        direction: PcmDirection,
        config: &PcmConfig,
    ) -> Result<Box<dyn PcmTransport>> {
        let name = format!("hw:{},{}", card, device);
        let pcm = open_pcm(&name, direction, config)?;
        Ok(Box::new(pcm))
    }
}

pub struct AlsaPcm {
    pcm: PCM,
    params: PcmConfig,
}

fn open_pcm(device: &str, direction: PcmDirection, config: &PcmConfig) -> Result<AlsaPcm> {
    let (alsa_dir, dir_name) = match direction {
        PcmDirection::Playback => (Direction::Playback, "Playback"),
        PcmDirection::Capture => (Direction::Capture, "Capture"),
    };

    let pcm = PCM::new(device, alsa_dir, false)
        .map_err(|e| alsa_err(&format!("open '{}' for {}", device, dir_name), e))?;

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm).map_err(|e| alsa_err("HwParams::any", e))?;
        hwp.set_access(Access::RWInterleaved)
            .map_err(|e| alsa_err("set_access", e))?;
        let format = match config.format {
            PcmFormat::S16Le => Format::S16LE,
            PcmFormat::S32Le => Format::S32LE,
        };
        hwp.set_format(format).map_err(|e| alsa_err("set_format", e))?;
        hwp.set_channels(config.channels)
            .map_err(|e| alsa_err("set_channels", e))?;
        hwp.set_rate_near(config.rate, ValueOr::Nearest)
            .map_err(|e| alsa_err("set_rate_near", e))?;
        hwp.set_period_size_near(config.period_size as alsa::pcm::Frames, ValueOr::Nearest)
            .map_err(|e| alsa_err("set_period_size_near", e))?;
        hwp.set_periods(config.period_count, ValueOr::Nearest)
            .map_err(|e| alsa_err("set_periods", e))?;
        pcm.hw_params(&hwp).map_err(|e| alsa_err("hw_params", e))?;
    }

    // Read back actual negotiated parameters
    let params = {
        let hwp = pcm
            .hw_params_current()
            .map_err(|e| alsa_err("hw_params_current", e))?;
        PcmConfig {
            channels: hwp.get_channels().map_err(|e| alsa_err("get_channels", e))?,
            rate: hwp.get_rate().map_err(|e| alsa_err("get_rate", e))?,
            period_size: hwp
                .get_period_size()
                .map_err(|e| alsa_err("get_period_size", e))? as u32,
            period_count: hwp.get_periods().map_err(|e| alsa_err("get_periods", e))?,
            format: config.format,
        }
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}, period_count={}",
        dir_name,
        device,
        params.rate,
        params.channels,
        params.period_size,
        params.period_count,
    );

    Ok(AlsaPcm { pcm, params })
}

impl PcmTransport for AlsaPcm {
    fn negotiated(&self) -> PcmConfig {
        self.params
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        let frame_bytes = self.params.frame_bytes();
        let io = self.pcm.io_bytes();
        let mut offset = 0;
        while offset < buf.len() {
            match io.readi(&mut buf[offset..]) {
                Ok(frames) => offset += frames * frame_bytes,
                Err(e) => {
                    log::warn!("ALSA capture error: {}, recovering...", e);
                    if let Err(e2) = self.pcm.prepare() {
                        log::error!("Failed to recover PCM capture: {}", e2);
                    }
                    return Err(alsa_err("pcm read", e));
                }
            }
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        let frame_bytes = self.params.frame_bytes();
        let io = self.pcm.io_bytes();
        let mut offset = 0;
        let mut retry_count = 0u32;
        while offset < buf.len() {
            match io.writei(&buf[offset..]) {
                Ok(frames) => {
                    offset += frames * frame_bytes;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    if let Err(e2) = self.pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        return Err(alsa_err("pcm write", e));
                    }
                    if retry_count >= MAX_RECOVERY_RETRIES {
                        log::error!(
                            "Max recovery retries ({}) reached with {} bytes unwritten",
                            retry_count,
                            buf.len() - offset
                        );
                        return Err(alsa_err("pcm write", e));
                    }
                }
            }
        }
        Ok(())
    }

    fn hardware_timestamp(&mut self) -> Result<(u32, Duration)> {
        let status = self.pcm.status().map_err(|e| alsa_err("pcm status", e))?;
        let ts = status.get_htstamp();
        let avail = status.get_avail().max(0) as u32;
        Ok((avail, Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)))
    }
}
