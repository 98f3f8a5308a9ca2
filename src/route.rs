//! Interface to the routing configuration.
//!
//! The configuration subsystem parses the device/route description and hands
//! out hardware stream handles. This crate only consumes it.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{DeviceMask, StreamConfig};

/// Transport a hardware stream is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    RawPcm,
    Compressed,
}

/// Fixed capabilities of a hardware stream. Zero means "use the default".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamCaps {
    pub card_number: u32,
    pub device_number: u32,
    pub rate: u32,
    pub period_size: u32,
    pub period_count: u32,
    pub kind: TransportKind,
}

impl StreamCaps {
    pub fn pcm(card_number: u32, device_number: u32) -> Self {
        Self {
            card_number,
            device_number,
            rate: 0,
            period_size: 0,
            period_count: 0,
            kind: TransportKind::RawPcm,
        }
    }

    pub fn compressed(card_number: u32, device_number: u32) -> Self {
        Self {
            kind: TransportKind::Compressed,
            ..Self::pcm(card_number, device_number)
        }
    }

    pub fn with_geometry(mut self, rate: u32, period_size: u32, period_count: u32) -> Self {
        self.rate = rate;
        self.period_size = period_size;
        self.period_count = period_count;
        self
    }

    pub fn is_compressed(&self) -> bool {
        self.kind == TransportKind::Compressed
    }
}

/// A hardware stream handed out by the routing configuration.
pub trait HwStream: Send + Sync {
    fn caps(&self) -> StreamCaps;

    /// Route the stream to `devices`; 0 disconnects it from everything.
    fn apply_route(&self, devices: DeviceMask);

    /// Apply a named use-case. Errors mean the key/value is not known to this stream.
    fn apply_use_case(&self, key: &str, value: &str) -> Result<()>;

    /// Devices currently connected by the active routes.
    fn current_routes(&self) -> DeviceMask;

    /// Devices last requested through `apply_route`.
    fn routed_devices(&self) -> DeviceMask;

    fn set_volume(&self, left_pct: i32, right_pct: i32) -> Result<()>;

    /// Give the stream back to the configuration.
    fn release(&self);
}

/// Resolver for hardware streams.
pub trait RouteConfig: Send + Sync {
    /// Find a stream able to carry `config` to `devices`.
    fn resolve_by_capability(
        &self,
        devices: DeviceMask,
        flags: u32,
        config: &StreamConfig,
    ) -> Option<Arc<dyn HwStream>>;

    /// Open a stream declared by name in the configuration.
    fn resolve_by_name(&self, name: &str) -> Option<Arc<dyn HwStream>>;

    fn is_named_defined(&self, name: &str) -> bool;
}

/// Exclusive binding to a hardware stream; releases it on drop.
pub struct RouteHandle {
    stream: Arc<dyn HwStream>,
}

impl RouteHandle {
    pub fn new(stream: Arc<dyn HwStream>) -> Self {
        Self { stream }
    }
}

impl Deref for RouteHandle {
    type Target = dyn HwStream;

    fn deref(&self) -> &Self::Target {
        self.stream.as_ref()
    }
}

impl fmt::Debug for RouteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteHandle")
            .field("caps", &self.stream.caps())
            .finish()
    }
}

impl Drop for RouteHandle {
    fn drop(&mut self) {
        self.stream.release();
    }
}
