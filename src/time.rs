//! Wall-clock timestamp type shared by the ring-buffer engine, MIDI parser,
//! and control-surface session.
//!
//! Mirrors the `{sec, nsec}` pair carried by `cwAudioBuf.cpp`'s packets
//! rather than reaching for `std::time::Instant`, since these timestamps
//! cross the driver/application boundary and are compared for equality with
//! "unset" (`0, 0`).

use std::time::Duration;

/// A `{sec, nsec}` timestamp, matching the wire/packet representation used
/// throughout the audio and MIDI layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub sec: u64,
    pub nsec: u32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { sec: 0, nsec: 0 };

    pub fn new(sec: u64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    /// A timestamp is "unset" when both fields are zero, matching the
    /// original's `sec==0 && nsec==0` sentinel check.
    pub fn is_unset(&self) -> bool {
        self.sec == 0 && self.nsec == 0
    }

    pub fn from_duration(d: Duration) -> Self {
        Self {
            sec: d.as_secs(),
            nsec: d.subsec_nanos(),
        }
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.sec as f64 + self.nsec as f64 / 1_000_000_000.0
    }

    /// `base_timestamp + io_frame_count / sample_rate`, carrying the
    /// fractional part into `nsec` with overflow into `sec`.
    pub fn advanced_by_frames(&self, frame_count: u64, sample_rate: u32) -> Self {
        let seconds = frame_count as f64 / sample_rate as f64;
        let total_nsec = self.nsec as f64 + seconds.fract() * 1_000_000_000.0;
        let extra_sec = seconds.trunc() as u64 + (total_nsec / 1_000_000_000.0).floor() as u64;
        let nsec = (total_nsec % 1_000_000_000.0).round() as u32;
        Self {
            sec: self.sec + extra_sec,
            nsec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_detection() {
        assert!(Timestamp::ZERO.is_unset());
        assert!(!Timestamp::new(1, 0).is_unset());
    }

    #[test]
    fn advance_carries_into_seconds() {
        let base = Timestamp::new(0, 900_000_000);
        let advanced = base.advanced_by_frames(44_100, 44_100);
        assert_eq!(advanced.sec, 1);
        assert_eq!(advanced.nsec, 900_000_000);
    }
}
