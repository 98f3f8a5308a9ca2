//! audio - Transport back ends and the capture resampling path
//!
//! Raw PCM and compressed-codec devices are reached through the traits in
//! [`transport`]. The ALSA implementation is built with the `alsa-backend`
//! feature. Input streams whose hardware rate differs from the caller's rate
//! pull through a [`resampler::Resampler`] fed by the provider adapter.

#[cfg(feature = "alsa-backend")]
mod alsa_device;
pub(crate) mod provider;
pub mod resampler;
pub mod transport;

#[cfg(feature = "alsa-backend")]
pub use alsa_device::{AlsaPcm, AlsaPcmBackend};
pub use resampler::{
    BufferProvider, LinearResampler, LinearResamplerFactory, Resampler, ResamplerFactory,
};
pub use transport::{
    CodecDescriptor, CompressBackend, CompressTransport, PcmBackend, PcmConfig, PcmDirection,
    PcmFormat, PcmTransport,
};
