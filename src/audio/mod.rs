//! Audio subsystem: the device vtable, driver back-ends, and the
//! lock-free ring-buffer engine that sits between them and the rest of
//! the crate.

#[cfg(unix)]
pub mod alsa_backend;
pub mod backend;
pub mod registry;
pub mod ringbuf;

#[cfg(unix)]
pub use alsa_backend::AlsaBackend;
pub use backend::{AudioDriver, AudioPacket, DeviceError, Direction, DriverCallback, DriverDeviceReport};
pub use registry::DriverRegistry;
pub use ringbuf::{RingBufferEngine, Side};
