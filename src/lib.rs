//! Control core of a configurable audio HAL.
//!
//! An [`AudioDevice`] resolves playback and capture streams to hardware
//! routes supplied by a [`RouteConfig`], drives the PCM or compressed
//! transports behind them and tracks the voice-trigger state machine.

pub mod audio;
pub mod config;
pub mod device;
pub mod error;
pub mod mock;
pub mod parms;
pub mod route;
pub mod stream;
pub mod types;
pub mod voice_trigger;

pub use config::HalConfig;
pub use device::{AudioDevice, Backends};
pub use error::{HalError, Result};
pub use route::{HwStream, RouteConfig, RouteHandle, StreamCaps, TransportKind};
pub use stream::{InputStream, OutputStream, PresentationPosition};
pub use types::{AudioFormat, AudioMode, DeviceMask, MicrophoneInfo, StreamConfig};
pub use voice_trigger::{RouteAction, VoiceEvent, VoiceState};
