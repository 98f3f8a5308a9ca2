//! Framework-level audio types: sample formats, channel masks, device masks
//! and the stream configuration exchanged at open time.

/// Bitmask of logical audio devices (speaker, headset, builtin mic, ...).
pub type DeviceMask = u32;

/// Marks a device mask as describing input devices.
pub const AUDIO_DEVICE_BIT_IN: DeviceMask = 0x8000_0000;
pub const AUDIO_DEVICE_OUT_EARPIECE: DeviceMask = 0x1;
pub const AUDIO_DEVICE_OUT_SPEAKER: DeviceMask = 0x2;
pub const AUDIO_DEVICE_OUT_WIRED_HEADSET: DeviceMask = 0x4;
pub const AUDIO_DEVICE_IN_BUILTIN_MIC: DeviceMask = AUDIO_DEVICE_BIT_IN | 0x4;
pub const AUDIO_DEVICE_IN_WIRED_HEADSET: DeviceMask = AUDIO_DEVICE_BIT_IN | 0x10;
pub const AUDIO_DEVICE_IN_BACK_MIC: DeviceMask = AUDIO_DEVICE_BIT_IN | 0x80;

/// Restrict a device mask to output devices.
pub fn output_devices(devices: DeviceMask) -> DeviceMask {
    if devices & AUDIO_DEVICE_BIT_IN != 0 {
        0
    } else {
        devices
    }
}

/// Restrict a device mask to input devices.
pub fn input_devices(devices: DeviceMask) -> DeviceMask {
    if devices & AUDIO_DEVICE_BIT_IN != 0 {
        devices
    } else {
        0
    }
}

pub const AUDIO_CHANNEL_OUT_FRONT_LEFT: u32 = 0x1;
pub const AUDIO_CHANNEL_OUT_FRONT_RIGHT: u32 = 0x2;
pub const AUDIO_CHANNEL_OUT_MONO: u32 = AUDIO_CHANNEL_OUT_FRONT_LEFT;
pub const AUDIO_CHANNEL_OUT_STEREO: u32 =
    AUDIO_CHANNEL_OUT_FRONT_LEFT | AUDIO_CHANNEL_OUT_FRONT_RIGHT;
pub const AUDIO_CHANNEL_IN_LEFT: u32 = 0x4;
pub const AUDIO_CHANNEL_IN_RIGHT: u32 = 0x8;
pub const AUDIO_CHANNEL_IN_FRONT: u32 = 0x10;
pub const AUDIO_CHANNEL_IN_MONO: u32 = AUDIO_CHANNEL_IN_FRONT;
pub const AUDIO_CHANNEL_IN_STEREO: u32 = AUDIO_CHANNEL_IN_LEFT | AUDIO_CHANNEL_IN_RIGHT;

/// Number of channels described by a channel mask.
pub fn channel_count(mask: u32) -> u32 {
    mask.count_ones()
}

/// Logical capture sources, as sent in the `input_source` parameter.
pub mod source {
    pub const DEFAULT: i32 = 0;
    pub const MIC: i32 = 1;
    pub const VOICE_UPLINK: i32 = 2;
    pub const VOICE_DOWNLINK: i32 = 3;
    pub const VOICE_CALL: i32 = 4;
    pub const CAMCORDER: i32 = 5;
    pub const VOICE_RECOGNITION: i32 = 6;
    pub const VOICE_COMMUNICATION: i32 = 7;
}

/// Sample formats the framework can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    #[default]
    Default,
    Pcm16Bit,
    Pcm8Bit,
    Pcm32Bit,
    Pcm8_24Bit,
    PcmFloat,
    Pcm24BitPacked,
    /// Any non-PCM or unknown format code.
    Other(u32),
}

impl AudioFormat {
    /// Bytes per sample for PCM formats; unknown formats count as 16-bit.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Pcm8Bit => 1,
            Self::Pcm24BitPacked => 3,
            Self::Pcm32Bit | Self::Pcm8_24Bit | Self::PcmFloat => 4,
            Self::Default | Self::Pcm16Bit | Self::Other(_) => 2,
        }
    }

    /// Symbolic name used by the supported-formats stream query.
    pub fn symbolic_name(self) -> &'static str {
        match self {
            Self::Pcm16Bit => "AUDIO_FORMAT_PCM_16_BIT",
            Self::Pcm8Bit => "AUDIO_FORMAT_PCM_8_BIT",
            Self::Pcm32Bit => "AUDIO_FORMAT_PCM_32_BIT",
            Self::Pcm8_24Bit => "AUDIO_FORMAT_PCM_8_24_BIT",
            Self::PcmFloat => "AUDIO_FORMAT_PCM_FLOAT",
            Self::Pcm24BitPacked => "AUDIO_FORMAT_PCM_24_BIT_PACKED",
            Self::Default | Self::Other(_) => "AUDIO_FORMAT_INVALID",
        }
    }

    fn or_pcm16(self) -> Self {
        match self {
            Self::Default => Self::Pcm16Bit,
            other => other,
        }
    }
}

/// Audio mode of the device (normal, ringtone, call...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    Normal,
    Ringtone,
    InCall,
    InCommunication,
    Other(i32),
}

/// Stream configuration requested by the caller and returned after negotiation.
///
/// Zero fields mean "no preference".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamConfig {
    pub sample_rate: u32,
    pub channel_mask: u32,
    pub format: AudioFormat,
}

impl StreamConfig {
    pub fn new(sample_rate: u32, channel_mask: u32, format: AudioFormat) -> Self {
        Self {
            sample_rate,
            channel_mask,
            format,
        }
    }

    pub fn channel_count(&self) -> u32 {
        channel_count(self.channel_mask)
    }

    /// Bytes per interleaved frame.
    pub fn frame_size(&self) -> usize {
        self.channel_count() as usize * self.format.bytes_per_sample()
    }

    /// Fill unspecified fields with the given defaults.
    pub(crate) fn with_defaults(self, sample_rate: u32, channel_mask: u32) -> Self {
        Self {
            sample_rate: if self.sample_rate != 0 {
                self.sample_rate
            } else {
                sample_rate
            },
            channel_mask: if self.channel_mask != 0 {
                self.channel_mask
            } else {
                channel_mask
            },
            format: self.format.or_pcm16(),
        }
    }
}

/// Description of a microphone reported to the framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicrophoneInfo {
    pub device_id: String,
    pub device: DeviceMask,
}
