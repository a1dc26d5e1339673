//! Real-time audio and device-I/O core: a lock-free ring-buffer engine,
//! an ALSA driver back-end behind a small device-registry abstraction, a
//! MIDI running-status parser and device layer, and an mDNS/DNS-SD
//! responder paired with a TCP control-surface session state machine.

pub mod audio;
pub mod config;
pub mod error;
pub mod midi;
pub mod surface;
pub mod thread_priority;
pub mod time;

pub use error::{ErrorContext, Result, RtError};
