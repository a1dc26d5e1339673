//! ALSA driver back-end: hardware negotiation, sample-format conversion,
//! polling-thread dispatch, and xrun/suspend recovery.
//!
//! Grounded in `cwAudioDeviceAlsa.cpp` and §4.3. Polling mode is the only
//! dispatch strategy implemented, per the design note that it's preferred
//! over async callback mode for tighter ordering and simpler recovery.

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use alsa::pcm::{Access, Format, HwParams, State, PCM};
use alsa::{Direction as AlsaDirection, ValueOr};

use crate::audio::backend::{
    AudioDriver, DeviceError, Direction, DriverCallback, DriverDeviceReport, Result,
};
use crate::audio::backend::AudioPacket;
use crate::thread_priority::AudioThreadPriority;
use crate::time::Timestamp;

/// `[S32_LE, S32_BE, S24_LE, S24_BE, S24_3LE, S24_3BE, S16_LE, S16_BE]`,
/// tried in order until one is accepted (§4.3 step 4).
const FORMAT_PREFERENCE: &[(Format, u32, u32, bool)] = &[
    (Format::S32LE, 32, 32, false),
    (Format::S32BE, 32, 32, true),
    (Format::S24LE, 32, 24, false),
    (Format::S24BE, 32, 24, true),
    (Format::S243LE, 24, 24, false),
    (Format::S243BE, 24, 24, true),
    (Format::S16LE, 16, 16, false),
    (Format::S16BE, 16, 16, true),
];

#[derive(Debug, Clone, Copy)]
struct FormatInfo {
    format: Format,
    bits: u32,
    significant_bits: u32,
    swap_endian: bool,
}

/// One card/device pair discovered at construction time.
struct AlsaDeviceDescriptor {
    card_idx: i32,
    device_idx: u32,
    label: String,
    can_capture: bool,
    can_playback: bool,
    max_channels_capture: u32,
    max_channels_playback: u32,
    sample_rate: u32,
}

struct DirectionRuntime {
    pcm: PCM,
    format: FormatInfo,
    channels: u32,
    period_size: usize,
    native_buf: Vec<u8>,
}

struct DeviceRuntime {
    capture: Option<DirectionRuntime>,
    playback: Option<DirectionRuntime>,
    callback: Option<DriverCallback>,
    poll_thread: Option<JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
    started: AtomicBool,
    fault_count: AtomicU32,
}

pub struct AlsaBackend {
    devices: Vec<AlsaDeviceDescriptor>,
    runtimes: Vec<Mutex<DeviceRuntime>>,
    periods_per_buffer: u32,
    poll_timeout_ms: i32,
}

impl AlsaBackend {
    /// Enumerate cards, then devices per card, opening each briefly in both
    /// directions to read hw-param ranges (§4.3 "Enumeration").
    pub fn enumerate(periods_per_buffer: u32, poll_timeout_ms: i32) -> Result<Self> {
        let mut devices = Vec::new();
        for card in alsa::card::Iter::new().flatten() {
            let card_idx = card.get_index();
            let card_name = card.get_name().unwrap_or_else(|_| format!("card{card_idx}"));
            for device_idx in 0..8u32 {
                let ident = format!("hw:{card_idx},{device_idx}");
                let capture = Self::probe(&ident, AlsaDirection::Capture);
                let playback = Self::probe(&ident, AlsaDirection::Playback);
                if capture.is_none() && playback.is_none() {
                    continue;
                }
                let (can_capture, max_in, in_rate) =
                    capture.map(|(ch, sr)| (true, ch, sr)).unwrap_or((false, 0, 0));
                let (can_playback, max_out, out_rate) =
                    playback.map(|(ch, sr)| (true, ch, sr)).unwrap_or((false, 0, 0));
                devices.push(AlsaDeviceDescriptor {
                    card_idx,
                    device_idx,
                    label: format!("{card_name} ({ident})"),
                    can_capture,
                    can_playback,
                    max_channels_capture: max_in,
                    max_channels_playback: max_out,
                    sample_rate: if in_rate != 0 { in_rate } else { out_rate },
                });
            }
        }
        let runtimes = devices
            .iter()
            .map(|_| {
                Mutex::new(DeviceRuntime {
                    capture: None,
                    playback: None,
                    callback: None,
                    poll_thread: None,
                    stop_flag: Arc::new(AtomicBool::new(false)),
                    started: AtomicBool::new(false),
                    fault_count: AtomicU32::new(0),
                })
            })
            .collect();
        Ok(Self {
            devices,
            runtimes,
            periods_per_buffer,
            poll_timeout_ms,
        })
    }

    fn probe(ident: &str, dir: AlsaDirection) -> Option<(u32, u32)> {
        let pcm = PCM::new(ident, dir, false).ok()?;
        let hwp = HwParams::any(&pcm).ok()?;
        let max_channels = hwp.get_channels_max().unwrap_or(2);
        let rate = hwp.get_rate_max().unwrap_or(48000);
        Some((max_channels, rate))
    }

    fn descriptor(&self, local_idx: usize) -> Result<&AlsaDeviceDescriptor> {
        self.devices
            .get(local_idx)
            .ok_or_else(|| DeviceError::NotFound(format!("alsa device index {local_idx}")))
    }

    fn ident(&self, local_idx: usize) -> Result<String> {
        let d = self.descriptor(local_idx)?;
        Ok(format!("hw:{},{}", d.card_idx, d.device_idx))
    }

    /// §4.3 "Setup", one direction. Returns the negotiated format, channel
    /// count, and period size alongside the opened PCM.
    fn open_direction(
        &self,
        ident: &str,
        dir: AlsaDirection,
        sample_rate: u32,
        channels: u32,
        frames_per_cycle: u32,
    ) -> Result<DirectionRuntime> {
        let pcm = PCM::new(ident, dir, false)
            .map_err(|e| DeviceError::Unavailable(format!("open {ident}: {e}")))?;
        let hwp = HwParams::any(&pcm)
            .map_err(|e| DeviceError::InitializationFailed(format!("hw_params_any: {e}")))?;
        hwp.set_access(Access::RWInterleaved)
            .map_err(|e| DeviceError::UnsupportedFormat(format!("access: {e}")))?;
        hwp.set_rate_resample(false).ok();
        hwp.set_channels(channels)
            .map_err(|e| DeviceError::UnsupportedFormat(format!("channels: {e}")))?;
        hwp.set_rate(sample_rate, ValueOr::Nearest)
            .map_err(|e| DeviceError::UnsupportedFormat(format!("rate: {e}")))?;

        let mut chosen = None;
        for &(fmt, bits, sig, swap) in FORMAT_PREFERENCE {
            if hwp.set_format(fmt).is_ok() {
                chosen = Some(FormatInfo {
                    format: fmt,
                    bits,
                    significant_bits: sig,
                    swap_endian: swap,
                });
                break;
            }
        }
        let format = chosen.ok_or_else(|| {
            DeviceError::UnsupportedFormat("no format in preference list accepted".into())
        })?;

        let period_size = hwp
            .set_period_size_near(frames_per_cycle as alsa::pcm::Frames, ValueOr::Nearest)
            .map_err(|e| DeviceError::InitializationFailed(format!("period_size: {e}")))?
            as usize;
        let periods = self.periods_per_buffer.max(1);
        let buffer_size = period_size as i64 * periods as i64 + 1;
        hwp.set_buffer_size_near(buffer_size)
            .map_err(|e| DeviceError::InitializationFailed(format!("buffer_size: {e}")))?;
        pcm.hw_params(&hwp)
            .map_err(|e| DeviceError::InitializationFailed(format!("hw_params: {e}")))?;

        let swp = pcm
            .sw_params_current()
            .map_err(|e| DeviceError::InitializationFailed(format!("sw_params_current: {e}")))?;
        match dir {
            AlsaDirection::Capture => {
                swp.set_start_threshold(i32::MAX as alsa::pcm::Frames).ok();
            }
            AlsaDirection::Playback => {
                swp.set_start_threshold(period_size as alsa::pcm::Frames).ok();
            }
        }
        swp.set_stop_threshold((2 * buffer_size) as alsa::pcm::Frames).ok();
        swp.set_avail_min(period_size as alsa::pcm::Frames).ok();
        pcm.sw_params(&swp)
            .map_err(|e| DeviceError::InitializationFailed(format!("sw_params: {e}")))?;

        let native_buf = vec![0u8; period_size * channels as usize * (format.bits as usize / 8)];

        Ok(DirectionRuntime {
            pcm,
            format,
            channels,
            period_size,
            native_buf,
        })
    }

    /// §4.3 "Runtime dispatch": the single polling thread for one device.
    fn spawn_poll_thread(&self, local_idx: usize) -> Result<()> {
        let mut guard = self.runtimes[local_idx]
            .lock()
            .expect("alsa runtime mutex poisoned");
        let stop_flag = guard.stop_flag.clone();
        stop_flag.store(false, Ordering::SeqCst);
        let callback = guard.callback.clone();
        let Some(callback) = callback else {
            return Err(DeviceError::InitializationFailed(
                "setup() must be called before start()".into(),
            ));
        };

        let timeout_ms = self.poll_timeout_ms;
        let fault_count = Arc::new(AtomicU32::new(0));

        // The runtime's PCM handles are moved into the thread; the mutex
        // guard is dropped before spawning so the thread can reacquire it.
        drop(guard);
        let runtimes_idx = local_idx;
        let device_idx_u32 = local_idx as u32;
        let stop_flag_thread = stop_flag.clone();
        let this_ptr: *const AlsaBackend = self;
        // SAFETY: AlsaBackend outlives every device thread it spawns; the
        // backend is only ever destroyed after every device is stopped
        // and its polling thread joined (see `stop`).
        let backend_ref: &'static AlsaBackend = unsafe { &*this_ptr };

        let handle = std::thread::Builder::new()
            .name(format!("alsa-poll-{runtimes_idx}"))
            .spawn(move || {
                AudioThreadPriority::set_realtime().ok();
                Self::poll_loop(
                    backend_ref,
                    runtimes_idx,
                    device_idx_u32,
                    callback,
                    timeout_ms,
                    stop_flag_thread,
                    fault_count,
                );
            })
            .map_err(|e| DeviceError::InitializationFailed(format!("spawn poll thread: {e}")))?;

        let mut guard = self.runtimes[local_idx]
            .lock()
            .expect("alsa runtime mutex poisoned");
        guard.poll_thread = Some(handle);
        guard.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn poll_loop(
        backend: &AlsaBackend,
        local_idx: usize,
        device_idx: u32,
        callback: DriverCallback,
        timeout_ms: i32,
        stop_flag: Arc<AtomicBool>,
        fault_count: Arc<AtomicU32>,
    ) {
        while !stop_flag.load(Ordering::Relaxed) {
            let mut guard = backend.runtimes[local_idx]
                .lock()
                .expect("alsa runtime mutex poisoned");

            if let Some(capture) = guard.capture.as_mut() {
                match Self::service_capture(capture, device_idx, &callback) {
                    Ok(()) => {}
                    Err(RecoveryOutcome::Fault) => {
                        fault_count.fetch_add(1, Ordering::Relaxed);
                        guard.fault_count.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(RecoveryOutcome::Fatal(e)) => {
                        tracing::warn!(device_idx, error = %e, "alsa capture disconnected");
                    }
                }
            }
            if let Some(playback) = guard.playback.as_mut() {
                match Self::service_playback(playback, device_idx, &callback) {
                    Ok(()) => {}
                    Err(RecoveryOutcome::Fault) => {
                        fault_count.fetch_add(1, Ordering::Relaxed);
                        guard.fault_count.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(RecoveryOutcome::Fatal(e)) => {
                        tracing::warn!(device_idx, error = %e, "alsa playback disconnected");
                    }
                }
            }
            drop(guard);
            std::thread::sleep(Duration::from_millis(timeout_ms.max(1) as u64 / 4));
        }
    }

    fn service_capture(
        rt: &mut DirectionRuntime,
        device_idx: u32,
        callback: &DriverCallback,
    ) -> std::result::Result<(), RecoveryOutcome> {
        match rt.pcm.state() {
            State::XRun => {
                rt.pcm.recover(-32, true).map_err(RecoveryOutcome::fatal)?;
                rt.pcm.prepare().map_err(RecoveryOutcome::fatal)?;
                rt.pcm.start().map_err(RecoveryOutcome::fatal)?;
                return Err(RecoveryOutcome::Fault);
            }
            State::Suspended => {
                rt.pcm.recover(-77, true).map_err(RecoveryOutcome::fatal)?;
                return Err(RecoveryOutcome::Fault);
            }
            State::Disconnected => {
                return Err(RecoveryOutcome::Fatal("device disconnected".into()));
            }
            _ => {}
        }

        let timestamp = hw_timestamp(&rt.pcm);
        let io = rt
            .pcm
            .io_checked::<u8>()
            .map_err(RecoveryOutcome::fatal)?;
        match io.readi(&mut rt.native_buf) {
            Ok(_frames) => {
                let mut floats = native_to_float(&rt.native_buf, rt.format, rt.channels as usize, rt.period_size);
                let mut packet = AudioPacket::new(
                    device_idx,
                    0,
                    rt.channels,
                    rt.period_size as u32,
                    &mut floats,
                    timestamp,
                );
                callback(&mut packet);
                Ok(())
            }
            Err(e) => {
                if let Some(errno) = e.errno() {
                    if errno as i32 == libc::EPIPE {
                        rt.pcm.prepare().ok();
                        rt.pcm.start().ok();
                        return Err(RecoveryOutcome::Fault);
                    }
                }
                Err(RecoveryOutcome::fatal(e))
            }
        }
    }

    fn service_playback(
        rt: &mut DirectionRuntime,
        device_idx: u32,
        callback: &DriverCallback,
    ) -> std::result::Result<(), RecoveryOutcome> {
        match rt.pcm.state() {
            State::XRun => {
                rt.pcm.recover(-32, true).map_err(RecoveryOutcome::fatal)?;
                return Err(RecoveryOutcome::Fault);
            }
            State::Suspended => {
                rt.pcm.recover(-77, true).map_err(RecoveryOutcome::fatal)?;
                return Err(RecoveryOutcome::Fault);
            }
            State::Disconnected => {
                return Err(RecoveryOutcome::Fatal("device disconnected".into()));
            }
            _ => {}
        }

        let timestamp = hw_timestamp(&rt.pcm);
        let mut floats = vec![0.0f32; rt.period_size * rt.channels as usize];
        let mut packet = AudioPacket::new(
            device_idx,
            0,
            rt.channels,
            rt.period_size as u32,
            &mut floats,
            timestamp,
        );
        callback(&mut packet);
        let produced = packet.frame_count as usize;
        if produced < rt.period_size {
            for s in floats[produced * rt.channels as usize..].iter_mut() {
                *s = 0.0;
            }
        }
        float_to_native(&floats, rt.format, &mut rt.native_buf);

        let io = rt
            .pcm
            .io_checked::<u8>()
            .map_err(RecoveryOutcome::fatal)?;
        match io.writei(&rt.native_buf) {
            Ok(_) => Ok(()),
            Err(e) => {
                if let Some(errno) = e.errno() {
                    if errno as i32 == libc::EPIPE {
                        rt.pcm.prepare().ok();
                        return Err(RecoveryOutcome::Fault);
                    }
                }
                Err(RecoveryOutcome::fatal(e))
            }
        }
    }
}

enum RecoveryOutcome {
    Fault,
    Fatal(String),
}

impl RecoveryOutcome {
    fn fatal(e: impl std::fmt::Display) -> Self {
        RecoveryOutcome::Fatal(e.to_string())
    }
}

impl std::fmt::Display for RecoveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryOutcome::Fault => write!(f, "transient fault"),
            RecoveryOutcome::Fatal(s) => write!(f, "{s}"),
        }
    }
}

/// Fetch the hardware capture/playback timestamp via `snd_pcm_htimestamp`
/// (§4.3 "Runtime dispatch"), falling back to the unset sentinel on error so
/// `IoSide::maybe_set_base_timestamp` simply never latches a base from this
/// cycle rather than latching a bogus one.
fn hw_timestamp(pcm: &PCM) -> Timestamp {
    match pcm.status() {
        Ok(status) => {
            let ts = status.get_htstamp();
            if ts.tv_sec <= 0 && ts.tv_nsec <= 0 {
                Timestamp::ZERO
            } else {
                Timestamp::new(ts.tv_sec as u64, ts.tv_nsec as u32)
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "snd_pcm_htimestamp failed");
            Timestamp::ZERO
        }
    }
}

/// §4.3 "Format conversion", reading native samples into `[-1, 1]` floats.
fn native_to_float(native: &[u8], fmt: FormatInfo, channels: usize, frames: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; channels * frames];
    match fmt.bits {
        8 => {
            for (i, b) in native.iter().take(out.len()).enumerate() {
                out[i] = (*b as i8) as f32 / 0x7f as f32;
            }
        }
        16 => {
            for (i, chunk) in native.chunks_exact(2).take(out.len()).enumerate() {
                let mut bytes = [chunk[0], chunk[1]];
                if fmt.swap_endian {
                    bytes.reverse();
                }
                let v = i16::from_le_bytes(bytes);
                out[i] = v as f32 / 0x7fff as f32;
            }
        }
        // Packed 24-bit, 3 bytes/sample (S24_3LE/S24_3BE): always a plain
        // 24-bit two's-complement value, divisor 0x7fffff.
        24 => {
            for (i, chunk) in native.chunks_exact(3).take(out.len()).enumerate() {
                let mut bytes = [chunk[0], chunk[1], chunk[2]];
                if fmt.swap_endian {
                    bytes.reverse();
                }
                let raw = (bytes[0] as i32) | ((bytes[1] as i32) << 8) | ((bytes[2] as i32) << 16);
                let v = (raw << 8) >> 8; // sign-extend from bit 23
                out[i] = v as f32 / 0x7fffff as f32;
            }
        }
        // 24-or-32 significant bits stored in a 4-byte container
        // (S32_LE/S32_BE, S24_LE/S24_BE): divisor depends on which.
        32 => {
            let divisor = if fmt.significant_bits == 24 {
                0x7fffff00u32 as f32
            } else {
                0x7fffffffu32 as f32
            };
            for (i, chunk) in native.chunks_exact(4).take(out.len()).enumerate() {
                let mut bytes = [chunk[0], chunk[1], chunk[2], chunk[3]];
                if fmt.swap_endian {
                    bytes.reverse();
                }
                let v = i32::from_le_bytes(bytes);
                out[i] = v as f32 / divisor;
            }
        }
        _ => {}
    }
    out
}

/// Inverse of [`native_to_float`], truncating toward zero.
fn float_to_native(floats: &[f32], fmt: FormatInfo, out: &mut [u8]) {
    match fmt.bits {
        8 => {
            for (i, s) in floats.iter().enumerate() {
                if let Some(b) = out.get_mut(i) {
                    *b = (s.clamp(-1.0, 1.0) * 0x7f as f32) as i8 as u8;
                }
            }
        }
        16 => {
            for (i, s) in floats.iter().enumerate() {
                let v = (s.clamp(-1.0, 1.0) * 0x7fff as f32) as i16;
                let mut bytes = v.to_le_bytes();
                if fmt.swap_endian {
                    bytes.reverse();
                }
                let off = i * 2;
                if off + 2 <= out.len() {
                    out[off..off + 2].copy_from_slice(&bytes);
                }
            }
        }
        24 => {
            for (i, s) in floats.iter().enumerate() {
                let v = (s.clamp(-1.0, 1.0) * 0x7fffff as f32) as i32;
                let mut bytes = [(v & 0xff) as u8, ((v >> 8) & 0xff) as u8, ((v >> 16) & 0xff) as u8];
                if fmt.swap_endian {
                    bytes.reverse();
                }
                let off = i * 3;
                if off + 3 <= out.len() {
                    out[off..off + 3].copy_from_slice(&bytes);
                }
            }
        }
        32 => {
            let mult = if fmt.significant_bits == 24 {
                0x7fffff00u32 as f32
            } else {
                0x7fffffffu32 as f32
            };
            for (i, s) in floats.iter().enumerate() {
                let v = (s.clamp(-1.0, 1.0) * mult) as i32;
                let mut bytes = v.to_le_bytes();
                if fmt.swap_endian {
                    bytes.reverse();
                }
                let off = i * 4;
                if off + 4 <= out.len() {
                    out[off..off + 4].copy_from_slice(&bytes);
                }
            }
        }
        _ => {}
    }
}

impl AudioDriver for AlsaBackend {
    fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn device_label(&self, local_idx: usize) -> Result<String> {
        Ok(self.descriptor(local_idx)?.label.clone())
    }

    fn channel_count(&self, local_idx: usize, dir: Direction) -> Result<u32> {
        let d = self.descriptor(local_idx)?;
        Ok(match dir {
            Direction::Input => d.max_channels_capture,
            Direction::Output => d.max_channels_playback,
        })
    }

    fn sample_rate(&self, local_idx: usize) -> Result<u32> {
        Ok(self.descriptor(local_idx)?.sample_rate)
    }

    fn frames_per_cycle(&self, _local_idx: usize, _dir: Direction) -> Result<u32> {
        Ok(256)
    }

    fn setup(
        &self,
        local_idx: usize,
        sample_rate: u32,
        frames_per_cycle: u32,
        callback: DriverCallback,
    ) -> Result<()> {
        let ident = self.ident(local_idx)?;
        let d = self.descriptor(local_idx)?;
        let can_capture = d.can_capture;
        let can_playback = d.can_playback;
        let max_in = d.max_channels_capture;
        let max_out = d.max_channels_playback;

        let capture = if can_capture {
            Some(self.open_direction(&ident, AlsaDirection::Capture, sample_rate, max_in.max(1), frames_per_cycle)?)
        } else {
            None
        };
        let playback = if can_playback {
            Some(self.open_direction(&ident, AlsaDirection::Playback, sample_rate, max_out.max(1), frames_per_cycle)?)
        } else {
            None
        };

        let mut guard = self.runtimes[local_idx]
            .lock()
            .expect("alsa runtime mutex poisoned");
        guard.capture = capture;
        guard.playback = playback;
        guard.callback = Some(callback);
        Ok(())
    }

    fn start(&self, local_idx: usize) -> Result<()> {
        {
            let guard = self.runtimes[local_idx]
                .lock()
                .expect("alsa runtime mutex poisoned");
            if let Some(c) = &guard.capture {
                c.pcm.prepare().ok();
                c.pcm.start().ok();
            }
            if let Some(p) = &guard.playback {
                p.pcm.prepare().ok();
                // Write one period of silence before starting, per §4.3.
                let silence = vec![0.0f32; p.period_size * p.channels as usize];
                let mut native = vec![0u8; p.native_buf.len()];
                float_to_native(&silence, p.format, &mut native);
                if let Ok(io) = p.pcm.io_checked::<u8>() {
                    io.writei(&native).ok();
                }
                p.pcm.start().ok();
            }
        }
        self.spawn_poll_thread(local_idx)
    }

    fn stop(&self, local_idx: usize) -> Result<()> {
        let (stop_flag, handle) = {
            let mut guard = self.runtimes[local_idx]
                .lock()
                .expect("alsa runtime mutex poisoned");
            guard.started.store(false, Ordering::SeqCst);
            if let Some(c) = &guard.capture {
                c.pcm.drop().ok();
            }
            if let Some(p) = &guard.playback {
                p.pcm.drop().ok();
            }
            (guard.stop_flag.clone(), guard.poll_thread.take())
        };
        stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = handle {
            handle.join().ok();
        }
        Ok(())
    }

    fn is_started(&self, local_idx: usize) -> Result<bool> {
        Ok(self.runtimes[local_idx]
            .lock()
            .expect("alsa runtime mutex poisoned")
            .started
            .load(Ordering::SeqCst))
    }

    fn real_time_report(&self) -> Vec<DriverDeviceReport> {
        self.devices
            .iter()
            .enumerate()
            .map(|(idx, d)| DriverDeviceReport {
                local_idx: idx,
                label: d.label.clone(),
                fault_count: self.runtimes[idx]
                    .lock()
                    .map(|g| g.fault_count.load(Ordering::Relaxed))
                    .unwrap_or(0),
                state: self.runtimes[idx]
                    .lock()
                    .map(|g| {
                        if g.started.load(Ordering::SeqCst) {
                            "running".to_string()
                        } else {
                            "stopped".to_string()
                        }
                    })
                    .unwrap_or_else(|_| "unknown".to_string()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_to_float_16_bit_round_trips_sign() {
        let fmt = FormatInfo {
            format: Format::S16LE,
            bits: 16,
            significant_bits: 16,
            swap_endian: false,
        };
        let native = 1000i16.to_le_bytes();
        let floats = native_to_float(&native, fmt, 1, 1);
        assert!((floats[0] - 1000.0 / 0x7fff as f32).abs() < 1e-6);
    }

    #[test]
    fn float_to_native_16_bit_clamps() {
        let fmt = FormatInfo {
            format: Format::S16LE,
            bits: 16,
            significant_bits: 16,
            swap_endian: false,
        };
        let mut out = [0u8; 2];
        float_to_native(&[2.0], fmt, &mut out);
        assert_eq!(i16::from_le_bytes(out), i16::MAX);
    }

    /// Packed 24-bit (S24_3LE) is a 3-byte container, not a 4-byte one,
    /// and its divisor is 0x7fffff regardless of `significant_bits`.
    #[test]
    fn packed_24_bit_round_trips_over_a_3_byte_container() {
        let fmt = FormatInfo {
            format: Format::S243LE,
            bits: 24,
            significant_bits: 24,
            swap_endian: false,
        };
        let mut native = vec![0u8; 6];
        float_to_native(&[0.5, -0.5], fmt, &mut native);
        let floats = native_to_float(&native, fmt, 1, 2);
        assert!((floats[0] - 0.5).abs() < 1e-4);
        assert!((floats[1] + 0.5).abs() < 1e-4);
    }

    /// S24_LE (24 significant bits right-justified in a 4-byte word) uses
    /// the 0x7fffff00 divisor, distinct from the packed-24 case above and
    /// from plain S32's 0x7fffffff.
    #[test]
    fn s24_le_in_32_bit_container_uses_the_container_divisor() {
        let fmt = FormatInfo {
            format: Format::S24LE,
            bits: 32,
            significant_bits: 24,
            swap_endian: false,
        };
        let mut native = vec![0u8; 4];
        float_to_native(&[1.0], fmt, &mut native);
        let floats = native_to_float(&native, fmt, 1, 1);
        assert!((floats[0] - 1.0).abs() < 1e-4);
    }
}
