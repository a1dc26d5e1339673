//! Driver vtable capability set and the audio packet carried between a
//! driver back-end and the ring-buffer engine.
//!
//! `AudioDriver` is the Rust expression of the "driver vtable" design note:
//! a capability set any back-end implements, stored behind a uniform
//! interface in the [`crate::audio::registry::DriverRegistry`].

use thiserror::Error;

use crate::time::Timestamp;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device not found: {0}")]
    NotFound(String),

    #[error("device unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("initialization failed: {0}")]
    InitializationFailed(String),
}

impl From<DeviceError> for crate::error::RtError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::NotFound(m) => crate::error::RtError::InvalidArg(m),
            DeviceError::Unavailable(m) => crate::error::RtError::ResourceNotAvailable(m),
            DeviceError::UnsupportedFormat(m) => crate::error::RtError::InvalidArg(m),
            DeviceError::Stream(m) => crate::error::RtError::InvalidOp(m),
            DeviceError::InitializationFailed(m) => crate::error::RtError::InvalidOp(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;

/// bit0 = interleaved, bit1 = float, matching the wire layout in §6.
pub mod packet_flags {
    pub const INTERLEAVED: u32 = 1 << 0;
    pub const FLOAT: u32 = 1 << 1;
}

/// The driver ↔ client carrier (`audio_packet` in §6). Always
/// single-precision float once it reaches this layer — native-format
/// conversion happens inside the driver back-end.
pub struct AudioPacket<'a> {
    pub device_idx: u32,
    pub begin_channel: u32,
    pub channel_count: u32,
    pub frame_count: u32,
    pub bits_per_sample: u32,
    pub flags: u32,
    pub bytes: &'a mut [f32],
    pub cb_arg: u64,
    pub timestamp: Timestamp,
}

impl<'a> AudioPacket<'a> {
    pub fn new(device_idx: u32, begin_channel: u32, channel_count: u32, frame_count: u32, bytes: &'a mut [f32], timestamp: Timestamp) -> Self {
        Self {
            device_idx,
            begin_channel,
            channel_count,
            frame_count,
            bits_per_sample: 32,
            flags: packet_flags::INTERLEAVED | packet_flags::FLOAT,
            bytes,
            cb_arg: 0,
            timestamp,
        }
    }
}

/// Direction a driver operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// A callback invoked by a driver back-end when a packet is ready
/// (input) or needs filling (output). Must be cheap — it runs on the
/// driver thread.
pub type DriverCallback = std::sync::Arc<dyn Fn(&mut AudioPacket<'_>) + Send + Sync>;

/// Capability set any back-end implements (§4.2's driver vtable).
pub trait AudioDriver: Send + Sync {
    /// Number of devices this driver exposes.
    fn device_count(&self) -> usize;

    /// Driver-local device label, returned verbatim (label matching is
    /// byte-exact per §6).
    fn device_label(&self, local_idx: usize) -> Result<String>;

    fn channel_count(&self, local_idx: usize, dir: Direction) -> Result<u32>;

    fn sample_rate(&self, local_idx: usize) -> Result<u32>;

    fn frames_per_cycle(&self, local_idx: usize, dir: Direction) -> Result<u32>;

    /// Configure a device and register the callback that receives/fills
    /// packets once started.
    fn setup(
        &self,
        local_idx: usize,
        sample_rate: u32,
        frames_per_cycle: u32,
        callback: DriverCallback,
    ) -> Result<()>;

    fn start(&self, local_idx: usize) -> Result<()>;

    fn stop(&self, local_idx: usize) -> Result<()>;

    fn is_started(&self, local_idx: usize) -> Result<bool>;

    /// Diagnostic snapshot: fault counters and PCM state per device, the
    /// concrete shape behind `real_time_report`.
    fn real_time_report(&self) -> Vec<DriverDeviceReport>;
}

#[derive(Debug, Clone)]
pub struct DriverDeviceReport {
    pub local_idx: usize,
    pub label: String,
    pub fault_count: u32,
    pub state: String,
}
