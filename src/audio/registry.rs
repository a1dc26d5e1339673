//! Flat device-index namespace backed by one or more driver vtables.
//!
//! Grounded in `AudioDeviceManager` (`manager.rs`) for the public-facing
//! shape, but the dispatch itself follows §4.2 exactly: each registered
//! driver is assigned a contiguous `[begin_idx, end_idx]` range of global
//! indices, and every operation resolves global → local via a linear scan
//! of registered ranges.

use std::sync::Arc;

use crate::audio::backend::{AudioDriver, Direction, DriverCallback, DriverDeviceReport};
use crate::error::{Result, RtError};

struct RegistryEntry {
    begin_idx: usize,
    end_idx: usize,
    driver: Arc<dyn AudioDriver>,
}

/// Maps a contiguous range of global device indices to each registered
/// driver. Immutable after the registry is shared across threads — drivers
/// may only be added up to that point, per §5's shared-resource policy.
pub struct DriverRegistry {
    entries: Vec<RegistryEntry>,
    next_idx: usize,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_idx: 0,
        }
    }

    /// Appends `driver` to the registry, assigning it the next contiguous
    /// range of global indices.
    pub fn register_driver(&mut self, driver: Arc<dyn AudioDriver>) -> (usize, usize) {
        let count = driver.device_count();
        let begin = self.next_idx;
        let end = begin + count.saturating_sub(1);
        self.next_idx = begin + count;
        self.entries.push(RegistryEntry {
            begin_idx: begin,
            end_idx: end,
            driver,
        });
        (begin, end)
    }

    pub fn total_device_count(&self) -> usize {
        self.next_idx
    }

    fn resolve(&self, global_idx: usize) -> Result<(&RegistryEntry, usize)> {
        for entry in &self.entries {
            if global_idx >= entry.begin_idx && global_idx <= entry.end_idx {
                return Ok((entry, global_idx - entry.begin_idx));
            }
        }
        Err(RtError::invalid_arg(format!(
            "no driver owns global device index {global_idx}"
        )))
    }

    /// Linear scan matching a driver-local label against every registered
    /// device (byte-exact, per §6).
    pub fn label_to_index(&self, label: &str) -> Result<usize> {
        for entry in &self.entries {
            for local in 0..=entry.end_idx - entry.begin_idx {
                if let Ok(l) = entry.driver.device_label(local) {
                    if l == label {
                        return Ok(entry.begin_idx + local);
                    }
                }
            }
        }
        Err(RtError::invalid_arg(format!("no device labeled {label:?}")))
    }

    pub fn device_label(&self, global_idx: usize) -> Result<String> {
        let (entry, local) = self.resolve(global_idx)?;
        Ok(entry.driver.device_label(local)?)
    }

    pub fn channel_count(&self, global_idx: usize, dir: Direction) -> Result<u32> {
        let (entry, local) = self.resolve(global_idx)?;
        Ok(entry.driver.channel_count(local, dir)?)
    }

    pub fn sample_rate(&self, global_idx: usize) -> Result<u32> {
        let (entry, local) = self.resolve(global_idx)?;
        Ok(entry.driver.sample_rate(local)?)
    }

    pub fn frames_per_cycle(&self, global_idx: usize, dir: Direction) -> Result<u32> {
        let (entry, local) = self.resolve(global_idx)?;
        Ok(entry.driver.frames_per_cycle(local, dir)?)
    }

    pub fn setup(
        &self,
        global_idx: usize,
        sample_rate: u32,
        frames_per_cycle: u32,
        callback: DriverCallback,
    ) -> Result<()> {
        let (entry, local) = self.resolve(global_idx)?;
        Ok(entry.driver.setup(local, sample_rate, frames_per_cycle, callback)?)
    }

    pub fn start(&self, global_idx: usize) -> Result<()> {
        let (entry, local) = self.resolve(global_idx)?;
        Ok(entry.driver.start(local)?)
    }

    pub fn stop(&self, global_idx: usize) -> Result<()> {
        let (entry, local) = self.resolve(global_idx)?;
        Ok(entry.driver.stop(local)?)
    }

    pub fn is_started(&self, global_idx: usize) -> Result<bool> {
        let (entry, local) = self.resolve(global_idx)?;
        Ok(entry.driver.is_started(local)?)
    }

    pub fn real_time_report(&self) -> Vec<DriverDeviceReport> {
        self.entries
            .iter()
            .flat_map(|e| e.driver.real_time_report())
            .collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::{DriverCallback, Result as DriverResult};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeDriver {
        count: usize,
        label_prefix: &'static str,
        started: Vec<AtomicBool>,
    }

    impl FakeDriver {
        fn new(count: usize, label_prefix: &'static str) -> Self {
            Self {
                count,
                label_prefix,
                started: (0..count).map(|_| AtomicBool::new(false)).collect(),
            }
        }
    }

    impl AudioDriver for FakeDriver {
        fn device_count(&self) -> usize {
            self.count
        }

        fn device_label(&self, local_idx: usize) -> DriverResult<String> {
            Ok(format!("{}{local_idx}", self.label_prefix))
        }

        fn channel_count(&self, _local_idx: usize, _dir: Direction) -> DriverResult<u32> {
            Ok(2)
        }

        fn sample_rate(&self, _local_idx: usize) -> DriverResult<u32> {
            Ok(44100)
        }

        fn frames_per_cycle(&self, _local_idx: usize, _dir: Direction) -> DriverResult<u32> {
            Ok(64)
        }

        fn setup(&self, _local_idx: usize, _sr: u32, _fpc: u32, _cb: DriverCallback) -> DriverResult<()> {
            Ok(())
        }

        fn start(&self, local_idx: usize) -> DriverResult<()> {
            self.started[local_idx].store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self, local_idx: usize) -> DriverResult<()> {
            self.started[local_idx].store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_started(&self, local_idx: usize) -> DriverResult<bool> {
            Ok(self.started[local_idx].load(Ordering::SeqCst))
        }

        fn real_time_report(&self) -> Vec<DriverDeviceReport> {
            Vec::new()
        }
    }

    #[test]
    fn contiguous_ranges_assigned_in_registration_order() {
        let mut reg = DriverRegistry::new();
        let (b0, e0) = reg.register_driver(Arc::new(FakeDriver::new(2, "alsa:")));
        let (b1, e1) = reg.register_driver(Arc::new(FakeDriver::new(3, "loop:")));
        assert_eq!((b0, e0), (0, 1));
        assert_eq!((b1, e1), (2, 4));
        assert_eq!(reg.total_device_count(), 5);
    }

    #[test]
    fn dispatch_resolves_to_owning_driver() {
        let mut reg = DriverRegistry::new();
        reg.register_driver(Arc::new(FakeDriver::new(2, "alsa:")));
        reg.register_driver(Arc::new(FakeDriver::new(3, "loop:")));

        assert_eq!(reg.device_label(0).unwrap(), "alsa:0");
        assert_eq!(reg.device_label(3).unwrap(), "loop:1");
        assert!(reg.device_label(5).is_err());
    }

    #[test]
    fn label_to_index_scans_all_drivers() {
        let mut reg = DriverRegistry::new();
        reg.register_driver(Arc::new(FakeDriver::new(2, "alsa:")));
        reg.register_driver(Arc::new(FakeDriver::new(3, "loop:")));
        assert_eq!(reg.label_to_index("loop:2").unwrap(), 4);
        assert!(reg.label_to_index("nope").is_err());
    }

    #[test]
    fn start_stop_routes_to_local_index() {
        let mut reg = DriverRegistry::new();
        reg.register_driver(Arc::new(FakeDriver::new(2, "alsa:")));
        reg.start(1).unwrap();
        assert!(reg.is_started(1).unwrap());
        reg.stop(1).unwrap();
        assert!(!reg.is_started(1).unwrap());
    }
}
