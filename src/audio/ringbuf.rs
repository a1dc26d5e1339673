//! Lock-free, per-channel ring-buffer engine mediating between driver
//! threads and the application thread.
//!
//! Grounded directly in `cwAudioBuf.cpp`: one [`RingBufferEngine`] owns a
//! fixed array of devices, each with an input and an output [`IoSide`], each
//! side holding one [`Channel`] per audio channel. `fill_cnt` is the only
//! field that needs an atomic RMW — `in_idx`/`out_idx` have exactly one
//! writer per the documented concurrency contract, so they're plain atomics
//! used with `Relaxed` ordering purely so the type is `Sync`, not because
//! multiple writers race on them.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::audio::backend::AudioPacket;
use crate::error::{Result, RtError};
use crate::time::Timestamp;

/// Which side of a device a call addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Input,
    Output,
}

pub mod flags {
    pub const ENABLED: u32 = 1 << 0;
    pub const MUTED: u32 = 1 << 1;
    pub const TONE: u32 = 1 << 2;
    pub const METER: u32 = 1 << 3;
    pub const PASS: u32 = 1 << 4;
}

/// Lock-free backing store for one channel's sample buffer. Reads and
/// writes are unsynchronized memory accesses; correctness relies on the
/// documented single-writer-per-region discipline, the same way the
/// original's raw `float*` array does.
struct ChannelBuf {
    data: Box<[UnsafeCell<f32>]>,
}

// SAFETY: callers only ever read a region the driver/app-thread write
// discipline guarantees is not concurrently written, per the ring buffer's
// documented single-writer invariant.
unsafe impl Sync for ChannelBuf {}

impl ChannelBuf {
    fn new(len: usize) -> Self {
        let data = (0..len).map(|_| UnsafeCell::new(0.0_f32)).collect();
        Self { data }
    }

    #[inline]
    fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn write(&self, idx: usize, v: f32) {
        // SAFETY: idx is always produced modulo self.len() by the caller.
        unsafe {
            *self.data[idx].get() = v;
        }
    }

    #[inline]
    fn read(&self, idx: usize) -> f32 {
        // SAFETY: see `write`.
        unsafe { *self.data[idx].get() }
    }
}

struct MeterRing {
    window: Box<[AtomicU32]>,
    idx: AtomicUsize,
}

impl MeterRing {
    fn new(len: usize) -> Self {
        Self {
            window: (0..len).map(|_| AtomicU32::new(0)).collect(),
            idx: AtomicUsize::new(0),
        }
    }

    fn push(&self, mean_square: f32) {
        let i = self.idx.fetch_add(1, Ordering::Relaxed) % self.window.len();
        self.window[i].store(mean_square.to_bits(), Ordering::Relaxed);
    }

    /// `sqrt(sum(window) / window_len)`, matching `_cmApMeterValue`.
    fn value(&self) -> f32 {
        let sum: f32 = self
            .window
            .iter()
            .map(|c| f32::from_bits(c.load(Ordering::Relaxed)))
            .sum();
        (sum / self.window.len() as f32).sqrt()
    }
}

/// One audio channel's circular buffer plus the per-channel processing
/// state (`cmApCh` in the original).
pub struct Channel {
    buf: ChannelBuf,
    in_idx: AtomicUsize,
    out_idx: AtomicUsize,
    fill_cnt: AtomicU32,
    flags: AtomicU32,
    gain_bits: AtomicU32,
    tone_hz_bits: AtomicU32,
    tone_phase: UnsafeCell<f64>,
    meter: MeterRing,
}

// SAFETY: `tone_phase` is only ever mutated from the driver thread inside
// `RingBufferEngine::update`, which is the sole writer for a given channel
// on a given side, matching the documented single-writer invariant.
unsafe impl Sync for Channel {}

impl Channel {
    fn new(n: usize, meter_len: usize) -> Self {
        Self {
            buf: ChannelBuf::new(n),
            in_idx: AtomicUsize::new(0),
            out_idx: AtomicUsize::new(0),
            fill_cnt: AtomicU32::new(0),
            flags: AtomicU32::new(flags::ENABLED),
            gain_bits: AtomicU32::new(1.0_f32.to_bits()),
            tone_hz_bits: AtomicU32::new(440.0_f32.to_bits()),
            tone_phase: UnsafeCell::new(0.0),
            meter: MeterRing::new(meter_len),
        }
    }

    fn n(&self) -> usize {
        self.buf.len()
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn tone_hz(&self) -> f32 {
        f32::from_bits(self.tone_hz_bits.load(Ordering::Relaxed))
    }

    pub fn set_tone_hz(&self, hz: f32) {
        self.tone_hz_bits.store(hz.to_bits(), Ordering::Relaxed);
    }

    pub fn is_flag(&self, mask: u32) -> bool {
        self.flags.load(Ordering::Relaxed) & mask != 0
    }

    pub fn set_flag(&self, mask: u32, on: bool) {
        if on {
            self.flags.fetch_or(mask, Ordering::Relaxed);
        } else {
            self.flags.fetch_and(!mask, Ordering::Relaxed);
        }
    }

    pub fn fill_cnt(&self) -> u32 {
        self.fill_cnt.load(Ordering::Acquire)
    }

    pub fn meter_value(&self) -> f32 {
        self.meter.value()
    }
}

/// Metadata and the channel array for one direction of one device
/// (`cmApIO` in the original).
pub struct IoSide {
    pub sample_rate: u32,
    pub frames_per_cycle: u32,
    pub dsp_frame_count: u32,
    channels: Vec<Channel>,
    /// Packed `sec*1e9 + nsec`; `0` means unset. Set exactly once via CAS.
    base_timestamp_nanos: AtomicU64,
    io_frame_count: AtomicU64,
    fault_count: AtomicU32,
}

impl IoSide {
    fn new(sample_rate: u32, dsp_frame_count: u32, channel_count: usize, fpc: u32, n: usize, meter_len: usize) -> Self {
        Self {
            sample_rate,
            frames_per_cycle: fpc,
            dsp_frame_count,
            channels: (0..channel_count).map(|_| Channel::new(n, meter_len)).collect(),
            base_timestamp_nanos: AtomicU64::new(0),
            io_frame_count: AtomicU64::new(0),
            fault_count: AtomicU32::new(0),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, idx: usize) -> Result<&Channel> {
        self.channels
            .get(idx)
            .ok_or_else(|| RtError::invalid_arg(format!("channel index {idx} out of range")))
    }

    pub fn fault_count(&self) -> u32 {
        self.fault_count.load(Ordering::Relaxed)
    }

    fn maybe_set_base_timestamp(&self, ts: Timestamp) {
        if ts.is_unset() {
            return;
        }
        let nanos = ts.sec as u64 * 1_000_000_000 + ts.nsec as u64;
        let _ = self
            .base_timestamp_nanos
            .compare_exchange(0, nanos, Ordering::AcqRel, Ordering::Relaxed);
    }

    fn base_timestamp(&self) -> Timestamp {
        let nanos = self.base_timestamp_nanos.load(Ordering::Acquire);
        Timestamp::new(nanos / 1_000_000_000, (nanos % 1_000_000_000) as u32)
    }

    fn has_base_timestamp(&self) -> bool {
        self.base_timestamp_nanos.load(Ordering::Acquire) != 0
    }

    pub fn current_timestamp(&self) -> Timestamp {
        let frames = self.io_frame_count.load(Ordering::Acquire);
        self.base_timestamp()
            .advanced_by_frames(frames, self.sample_rate)
    }

    /// Per-side readiness: every channel has enough headroom for one DSP
    /// cycle on this side.
    pub fn is_ready(&self, side: Side) -> bool {
        self.channels.iter().all(|ch| match side {
            Side::Input => ch.fill_cnt() >= self.dsp_frame_count,
            Side::Output => (ch.n() as u32).saturating_sub(ch.fill_cnt()) >= self.dsp_frame_count,
        })
    }
}

struct DeviceRecord {
    input: IoSide,
    output: IoSide,
}

/// Owns the per-device ring buffers. Devices are configured once by
/// [`RingBufferEngine::setup`] before the handle is shared across threads;
/// after that every other operation only touches per-channel atomics, so
/// no locking is needed on the hot path.
pub struct RingBufferEngine {
    devices: Box<[UnsafeCell<Option<DeviceRecord>>]>,
    meter_window_ms: u32,
}

// SAFETY: `devices[i]` is written only during `setup`, which the caller is
// required to complete before publishing the handle to other threads (the
// same discipline §5 requires of the driver registry). After that point all
// access is read-only plus per-channel atomics.
unsafe impl Sync for RingBufferEngine {}

#[derive(Debug, Clone, Copy)]
pub struct DeviceReport {
    pub device_idx: usize,
    pub side: &'static str,
    pub in_idx: usize,
    pub out_idx: usize,
    pub fill_cnt: u32,
    pub n: usize,
    pub fault_count: u32,
    pub mean_meter: f32,
}

impl RingBufferEngine {
    /// `meter_window_ms` is clamped to `[10, 1000]`.
    pub fn create(device_count: usize, meter_window_ms: u32) -> Self {
        let meter_window_ms = meter_window_ms.clamp(10, 1000);
        let devices = (0..device_count)
            .map(|_| UnsafeCell::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            devices,
            meter_window_ms,
        }
    }

    fn device_slot(&self, dev_idx: usize) -> Result<&UnsafeCell<Option<DeviceRecord>>> {
        self.devices
            .get(dev_idx)
            .ok_or_else(|| RtError::invalid_arg(format!("device index {dev_idx} out of range")))
    }

    fn device(&self, dev_idx: usize) -> Result<&DeviceRecord> {
        let slot = self.device_slot(dev_idx)?;
        // SAFETY: populated by `setup` before any concurrent access begins.
        unsafe { &*slot.get() }
            .as_ref()
            .ok_or_else(|| RtError::invalid_op(format!("device {dev_idx} not set up")))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn setup(
        &self,
        dev_idx: usize,
        sample_rate: u32,
        dsp_frame_count: u32,
        buf_cycles: u32,
        in_ch: usize,
        in_fpc: u32,
        out_ch: usize,
        out_fpc: u32,
    ) -> Result<()> {
        if dsp_frame_count == 0 {
            return Err(RtError::invalid_arg("dsp_frame_count must be nonzero"));
        }
        let slot = self.device_slot(dev_idx)?;
        let round_up = |raw: u32| -> usize {
            let rem = raw % dsp_frame_count;
            if rem == 0 {
                raw as usize
            } else {
                (raw + (dsp_frame_count - rem)) as usize
            }
        };
        let n_in = round_up(buf_cycles * in_fpc);
        let n_out = round_up(buf_cycles * out_fpc);
        let meter_len = ((sample_rate as u64 * self.meter_window_ms as u64)
            / (1000 * out_fpc.max(1) as u64))
            .max(1) as usize;

        let record = DeviceRecord {
            input: IoSide::new(sample_rate, dsp_frame_count, in_ch, in_fpc, n_in, meter_len),
            output: IoSide::new(sample_rate, dsp_frame_count, out_ch, out_fpc, n_out, meter_len),
        };
        // SAFETY: caller's responsibility per the single-configurer contract.
        unsafe {
            *slot.get() = Some(record);
        }
        Ok(())
    }

    pub fn prime_output(&self, dev_idx: usize, cycle_count: u32) -> Result<()> {
        let dev = self.device(dev_idx)?;
        let frames = dev.output.frames_per_cycle * cycle_count;
        for ch in &dev.output.channels {
            let n = ch.n();
            ch.in_idx.store(frames as usize % n.max(1), Ordering::Relaxed);
            ch.fill_cnt.store(frames, Ordering::Release);
        }
        Ok(())
    }

    /// Drive the input side of `update()` for one device with a batch of
    /// incoming driver packets.
    pub fn update_input(&self, dev_idx: usize, packets: &[AudioPacket<'_>]) -> Result<()> {
        let dev = self.device(dev_idx)?;
        let side = &dev.input;
        for packet in packets {
            side.maybe_set_base_timestamp(packet.timestamp);
            for j in 0..packet.channel_count as usize {
                let chan_idx = packet.begin_channel as usize + j;
                let Ok(ch) = side.channel(chan_idx) else {
                    side.fault_count.fetch_add(1, Ordering::Relaxed);
                    continue;
                };
                let frames = packet.frame_count as usize;
                let n = ch.n();
                let fill = ch.fill_cnt() as usize;
                if fill + frames > n {
                    side.fault_count.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                let enabled = ch.is_flag(flags::ENABLED) && !ch.is_flag(flags::MUTED);
                let stride = packet.channel_count as usize;
                let mean_sq = if ch.is_flag(flags::METER) {
                    let mut acc = 0.0_f32;
                    for f in 0..frames {
                        let s = if enabled {
                            packet.bytes[f * stride + j]
                        } else {
                            0.0
                        };
                        acc += s * s;
                    }
                    Some(acc / frames.max(1) as f32)
                } else {
                    None
                };
                if let Some(m) = mean_sq {
                    ch.meter.push(m);
                }

                let ii = ch.in_idx.load(Ordering::Relaxed);
                let gain = ch.gain();
                let tone_on = enabled && ch.is_flag(flags::TONE);
                if tone_on {
                    let hz = ch.tone_hz() as f64;
                    // SAFETY: driver thread is the sole writer of tone_phase
                    // for this channel.
                    let phase = unsafe { &mut *ch.tone_phase.get() };
                    for f in 0..frames {
                        let sample = gain * (2.0 * std::f64::consts::PI * hz * *phase / side.sample_rate as f64).sin() as f32;
                        ch.buf.write((ii + f) % n, sample);
                        *phase += 1.0;
                    }
                } else {
                    for f in 0..frames {
                        let s = if enabled {
                            packet.bytes[f * stride + j]
                        } else {
                            0.0
                        };
                        ch.buf.write((ii + f) % n, s * gain);
                    }
                }

                ch.in_idx.store((ii + frames) % n, Ordering::Relaxed);
                ch.fill_cnt.fetch_add(frames as u32, Ordering::AcqRel);
            }
        }
        Ok(())
    }

    /// Drive the output side of `update()` for one device, filling the
    /// caller's packets from the ring buffer.
    pub fn update_output(&self, dev_idx: usize, packets: &mut [AudioPacket<'_>]) -> Result<()> {
        let dev = self.device(dev_idx)?;
        let side = &dev.output;
        for packet in packets.iter_mut() {
            side.maybe_set_base_timestamp(packet.timestamp);
            let stride = packet.channel_count as usize;
            for j in 0..packet.channel_count as usize {
                let chan_idx = packet.begin_channel as usize + j;
                let Ok(ch) = side.channel(chan_idx) else {
                    side.fault_count.fetch_add(1, Ordering::Relaxed);
                    continue;
                };
                let n = ch.n();
                let fill = ch.fill_cnt() as usize;
                let mut frames = packet.frame_count as usize;
                if frames > fill {
                    side.fault_count.fetch_add(1, Ordering::Relaxed);
                    if fill == 0 {
                        for f in 0..frames {
                            packet.bytes[f * stride + j] = 0.0;
                        }
                        continue;
                    }
                    frames = fill;
                    packet.frame_count = frames as u32;
                }

                let enabled = ch.is_flag(flags::ENABLED) && !ch.is_flag(flags::MUTED);
                let oi = ch.out_idx.load(Ordering::Relaxed);
                let gain = ch.gain();
                let tone_on = enabled && ch.is_flag(flags::TONE);
                if tone_on {
                    let hz = ch.tone_hz() as f64;
                    // SAFETY: see update_input.
                    let phase = unsafe { &mut *ch.tone_phase.get() };
                    for f in 0..frames {
                        let sample = gain * (2.0 * std::f64::consts::PI * hz * *phase / side.sample_rate as f64).sin() as f32;
                        packet.bytes[f * stride + j] = sample;
                        *phase += 1.0;
                    }
                } else {
                    for f in 0..frames {
                        let s = ch.buf.read((oi + f) % n);
                        packet.bytes[f * stride + j] = if enabled { s * gain } else { 0.0 };
                    }
                }

                if ch.is_flag(flags::METER) {
                    let mean_sq: f32 = (0..frames)
                        .map(|f| {
                            let s = packet.bytes[f * stride + j];
                            s * s
                        })
                        .sum::<f32>()
                        / frames.max(1) as f32;
                    ch.meter.push(mean_sq);
                }

                ch.out_idx.store((oi + frames) % n, Ordering::Relaxed);
                ch.fill_cnt.fetch_sub(frames as u32, Ordering::AcqRel);
            }
        }
        Ok(())
    }

    /// `is_device_ready`: per-side readiness check, advisory (may false
    /// negative by one cycle under concurrent update).
    pub fn is_device_ready(&self, dev_idx: usize, side: Side) -> Result<bool> {
        let dev = self.device(dev_idx)?;
        Ok(match side {
            Side::Input => dev.input.is_ready(Side::Input),
            Side::Output => dev.output.is_ready(Side::Output),
        })
    }

    /// `advance`: move the consumer/producer cursor of every channel on
    /// `side` forward by `dsp_frame_count`, and bump `io_frame_count` if a
    /// base timestamp has been established.
    pub fn advance(&self, dev_idx: usize, side: Side) -> Result<()> {
        let dev = self.device(dev_idx)?;
        let io = match side {
            Side::Input => &dev.input,
            Side::Output => &dev.output,
        };
        let dsp = io.dsp_frame_count;
        for ch in &io.channels {
            let n = ch.n();
            match side {
                Side::Input => {
                    let oi = ch.out_idx.load(Ordering::Relaxed);
                    ch.out_idx.store((oi + dsp as usize) % n, Ordering::Relaxed);
                    ch.fill_cnt.fetch_sub(dsp, Ordering::AcqRel);
                }
                Side::Output => {
                    let ii = ch.in_idx.load(Ordering::Relaxed);
                    ch.in_idx.store((ii + dsp as usize) % n, Ordering::Relaxed);
                    ch.fill_cnt.fetch_add(dsp, Ordering::AcqRel);
                }
            }
        }
        if io.has_base_timestamp() {
            io.io_frame_count.fetch_add(dsp as u64, Ordering::AcqRel);
        }
        Ok(())
    }

    /// `get`: one DSP cycle's worth of samples per channel at the consumer
    /// cursor, or `None` for a disabled channel. Does not mutate state.
    pub fn get(&self, dev_idx: usize, side: Side, channels: &[usize]) -> Result<Vec<Option<Vec<f32>>>> {
        let dev = self.device(dev_idx)?;
        let io = match side {
            Side::Input => &dev.input,
            Side::Output => &dev.output,
        };
        let dsp = io.dsp_frame_count as usize;
        let mut out = Vec::with_capacity(channels.len());
        for &idx in channels {
            let ch = io.channel(idx)?;
            if !ch.is_flag(flags::ENABLED) {
                out.push(None);
                continue;
            }
            let n = ch.n();
            let cursor = match side {
                Side::Input => ch.out_idx.load(Ordering::Relaxed),
                Side::Output => ch.in_idx.load(Ordering::Relaxed),
            };
            let samples = (0..dsp).map(|f| ch.buf.read((cursor + f) % n)).collect();
            out.push(Some(samples));
        }
        Ok(out)
    }

    /// Write one DSP cycle's worth of samples per channel at the producer
    /// cursor. The write-side counterpart of [`get`](Self::get): the
    /// original exposes `get` as a raw pointer into the live buffer, so a
    /// `memcpy` through that pointer is itself the write; here the copy
    /// comes back from `get` so callers need an explicit way to commit it.
    pub fn put(&self, dev_idx: usize, side: Side, channels: &[usize], samples: &[Vec<f32>]) -> Result<()> {
        let dev = self.device(dev_idx)?;
        let io = match side {
            Side::Input => &dev.input,
            Side::Output => &dev.output,
        };
        let dsp = io.dsp_frame_count as usize;
        for (&idx, src) in channels.iter().zip(samples.iter()) {
            let ch = io.channel(idx)?;
            let n = ch.n();
            let cursor = match side {
                Side::Input => ch.out_idx.load(Ordering::Relaxed),
                Side::Output => ch.in_idx.load(Ordering::Relaxed),
            };
            for f in 0..dsp.min(src.len()) {
                ch.buf.write((cursor + f) % n, src[f]);
            }
        }
        Ok(())
    }

    /// `get_io`: combine `get(in_dev)` and `get(out_dev)`, apply
    /// pass-through (copy input straight into output and null the output
    /// slot so the caller can't clobber it), zero non-pass-through outputs,
    /// and compute per-side timestamps.
    pub fn get_io(
        &self,
        in_dev: usize,
        in_channels: &[usize],
        out_dev: usize,
        out_channels: &[usize],
    ) -> Result<GetIoResult> {
        let in_samples = self.get(in_dev, Side::Input, in_channels)?;
        let mut out_samples = self.get(out_dev, Side::Output, out_channels)?;

        let in_dev_rec = self.device(in_dev)?;
        let out_dev_rec = self.device(out_dev)?;
        let dsp_out = out_dev_rec.output.dsp_frame_count as usize;

        let pair_count = in_channels.len().min(out_channels.len());
        for i in 0..pair_count {
            let in_idx = in_channels[i];
            let out_idx = out_channels[i];
            let in_pass = in_dev_rec
                .input
                .channel(in_idx)
                .map(|c| c.is_flag(flags::PASS))
                .unwrap_or(false);
            let out_pass = out_dev_rec
                .output
                .channel(out_idx)
                .map(|c| c.is_flag(flags::PASS))
                .unwrap_or(false);
            if in_pass || out_pass {
                let src = in_samples.get(i).and_then(|s| s.clone()).unwrap_or_else(|| vec![0.0; dsp_out]);
                // Mirrors the original's memcpy through the raw pointer
                // `get` would have returned: the copy is committed straight
                // into the output channel's live buffer, not just handed
                // back to the caller.
                self.put(out_dev, Side::Output, &[out_idx], std::slice::from_ref(&src))?;
                out_samples[i] = Some(src);
            } else if let Some(slot) = out_samples.get_mut(i) {
                if slot.is_none() {
                    *slot = Some(vec![0.0; dsp_out]);
                }
            }
        }
        // Channels beyond the paired count that came back enabled but
        // aren't passthrough-eligible are zeroed rather than left stale.
        for slot in out_samples.iter_mut().skip(pair_count) {
            if slot.is_some() {
                *slot = Some(vec![0.0; dsp_out]);
            }
        }

        Ok(GetIoResult {
            input: in_samples,
            output: out_samples,
            input_timestamp: in_dev_rec.input.current_timestamp(),
            output_timestamp: out_dev_rec.output.current_timestamp(),
        })
    }

    /// `report`: diagnostic dump of every device/side's cursors, fault
    /// count, and mean meter value (`cwAudioBuf.cpp::report`).
    pub fn report(&self) -> Vec<DeviceReport> {
        let mut reports = Vec::new();
        for (idx, slot) in self.devices.iter().enumerate() {
            // SAFETY: read-only snapshot; devices are immutable after setup.
            let dev = unsafe { &*slot.get() };
            let Some(dev) = dev.as_ref() else { continue };
            for (side_name, io) in [("input", &dev.input), ("output", &dev.output)] {
                for ch in &io.channels {
                    reports.push(DeviceReport {
                        device_idx: idx,
                        side: side_name,
                        in_idx: ch.in_idx.load(Ordering::Relaxed),
                        out_idx: ch.out_idx.load(Ordering::Relaxed),
                        fill_cnt: ch.fill_cnt(),
                        n: ch.n(),
                        fault_count: io.fault_count(),
                        mean_meter: ch.meter_value(),
                    });
                }
            }
        }
        reports
    }

    /// `copy_through`: synchronously drain `in_dev` straight to `out_dev`
    /// while both sides remain ready, the same loop `inputToOutput` in the
    /// original runs as a self-test / integration harness.
    pub fn copy_through(&self, in_dev: usize, out_dev: usize) -> Result<usize> {
        let in_chan_count = self.device(in_dev)?.input.channel_count();
        let out_chan_count = self.device(out_dev)?.output.channel_count();
        let chan_count = in_chan_count.min(out_chan_count);
        let in_channels: Vec<usize> = (0..chan_count).collect();
        let out_channels: Vec<usize> = (0..chan_count).collect();

        let mut cycles = 0;
        while self.is_device_ready(in_dev, Side::Input)? && self.is_device_ready(out_dev, Side::Output)? {
            let result = self.get_io(in_dev, &in_channels, out_dev, &out_channels)?;
            let _ = result;
            self.advance(in_dev, Side::Input)?;
            self.advance(out_dev, Side::Output)?;
            cycles += 1;
        }
        Ok(cycles)
    }

    pub fn set_gain(&self, dev_idx: usize, side: Side, ch_idx: Option<usize>, gain: f32) -> Result<()> {
        self.for_channels(dev_idx, side, ch_idx, |ch| ch.set_gain(gain))
    }

    pub fn set_flag(&self, dev_idx: usize, side: Side, ch_idx: Option<usize>, mask: u32, on: bool) -> Result<()> {
        self.for_channels(dev_idx, side, ch_idx, |ch| ch.set_flag(mask, on))
    }

    pub fn enable_channel(&self, dev_idx: usize, side: Side, ch_idx: Option<usize>, on: bool) -> Result<()> {
        self.set_flag(dev_idx, side, ch_idx, flags::ENABLED, on)
    }

    pub fn enable_mute(&self, dev_idx: usize, side: Side, ch_idx: Option<usize>, on: bool) -> Result<()> {
        self.set_flag(dev_idx, side, ch_idx, flags::MUTED, on)
    }

    pub fn enable_tone(&self, dev_idx: usize, side: Side, ch_idx: Option<usize>, on: bool) -> Result<()> {
        self.set_flag(dev_idx, side, ch_idx, flags::TONE, on)
    }

    pub fn enable_meter(&self, dev_idx: usize, side: Side, ch_idx: Option<usize>, on: bool) -> Result<()> {
        self.set_flag(dev_idx, side, ch_idx, flags::METER, on)
    }

    pub fn enable_pass(&self, dev_idx: usize, side: Side, ch_idx: Option<usize>, on: bool) -> Result<()> {
        self.set_flag(dev_idx, side, ch_idx, flags::PASS, on)
    }

    pub fn meter_value(&self, dev_idx: usize, side: Side, ch_idx: usize) -> Result<f32> {
        let dev = self.device(dev_idx)?;
        let io = match side {
            Side::Input => &dev.input,
            Side::Output => &dev.output,
        };
        Ok(io.channel(ch_idx)?.meter_value())
    }

    /// Applies `f` to a single channel, or to every channel on `side` when
    /// `ch_idx` is `None` — mirrors `_cmApSetFlag`'s "omit `chIdx` to mean
    /// all channels" convention.
    fn for_channels(
        &self,
        dev_idx: usize,
        side: Side,
        ch_idx: Option<usize>,
        f: impl Fn(&Channel),
    ) -> Result<()> {
        let dev = self.device(dev_idx)?;
        let io = match side {
            Side::Input => &dev.input,
            Side::Output => &dev.output,
        };
        match ch_idx {
            Some(idx) => f(io.channel(idx)?),
            None => io.channels.iter().for_each(|ch| f(ch)),
        }
        Ok(())
    }
}

/// Result of [`RingBufferEngine::get_io`].
pub struct GetIoResult {
    pub input: Vec<Option<Vec<f32>>>,
    pub output: Vec<Option<Vec<f32>>>,
    pub input_timestamp: Timestamp,
    pub output_timestamp: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_from(bytes: &mut [f32], channel_count: u32, frame_count: u32) -> AudioPacket<'_> {
        AudioPacket::new(0, 0, channel_count, frame_count, bytes, Timestamp::ZERO)
    }

    /// S1: feed 75 frames over three 25-frame cycles on two channels, bridge
    /// input straight through to output via `get_io`'s pass-through (the
    /// same "read input pointer, memcpy into output pointer" loop the
    /// original test harness runs by hand), and verify what comes out the
    /// output side is the same sequence.
    #[test]
    fn round_trip_matches_input_sequence() {
        let engine = RingBufferEngine::create(1, 50);
        engine.setup(0, 48_000, 25, 4, 2, 25, 2, 25).unwrap();
        engine.enable_pass(0, Side::Input, None, true).unwrap();

        let mut produced = vec![Vec::new(); 2];
        let mut consumed = vec![Vec::new(); 2];

        for cycle in 0..3u32 {
            let mut in_bytes: Vec<f32> = (0..50)
                .map(|i| (cycle * 25 + i / 2) as f32)
                .collect();
            for ch in 0..2 {
                for f in 0..25usize {
                    produced[ch].push(in_bytes[f * 2 + ch]);
                }
            }
            let packets = [packet_from(&mut in_bytes, 2, 25)];
            engine.update_input(0, &packets).unwrap();

            engine.get_io(0, &[0, 1], 0, &[0, 1]).unwrap();
            engine.advance(0, Side::Input).unwrap();
            engine.advance(0, Side::Output).unwrap();

            let mut out_bytes = vec![0.0f32; 50];
            let mut out_packets = [packet_from(&mut out_bytes, 2, 25)];
            engine.update_output(0, &mut out_packets).unwrap();
            for ch in 0..2 {
                for f in 0..25usize {
                    consumed[ch].push(out_bytes[f * 2 + ch]);
                }
            }
        }

        assert_eq!(produced, consumed);
    }

    /// S6: muting a channel zeros the samples that reach the output, but
    /// `fill_cnt` still advances as if real audio flowed through.
    #[test]
    fn mute_zeros_output_but_fill_cnt_still_advances() {
        let engine = RingBufferEngine::create(1, 50);
        engine.setup(0, 48_000, 10, 4, 1, 10, 1, 10).unwrap();
        engine.enable_mute(0, Side::Input, Some(0), true).unwrap();
        engine.enable_pass(0, Side::Input, Some(0), true).unwrap();

        let mut in_bytes = vec![1.0f32; 10];
        let packets = [packet_from(&mut in_bytes, 1, 10)];
        engine.update_input(0, &packets).unwrap();

        let dev = engine.device(0).unwrap();
        assert_eq!(dev.input.channel(0).unwrap().fill_cnt(), 10);

        engine.get_io(0, &[0], 0, &[0]).unwrap();
        engine.advance(0, Side::Output).unwrap();
        let mut out_bytes = vec![9.0f32; 10];
        let mut out_packets = [packet_from(&mut out_bytes, 1, 10)];
        engine.update_output(0, &mut out_packets).unwrap();
        assert!(out_bytes.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn gain_scales_output_linearly() {
        let engine = RingBufferEngine::create(1, 50);
        engine.setup(0, 48_000, 10, 4, 1, 10, 1, 10).unwrap();
        engine.set_gain(0, Side::Input, Some(0), 2.0).unwrap();
        engine.enable_pass(0, Side::Input, Some(0), true).unwrap();

        let mut in_bytes = vec![0.5f32; 10];
        let packets = [packet_from(&mut in_bytes, 1, 10)];
        engine.update_input(0, &packets).unwrap();

        engine.get_io(0, &[0], 0, &[0]).unwrap();
        engine.advance(0, Side::Output).unwrap();

        let mut out_bytes = vec![0.0f32; 10];
        let mut out_packets = [packet_from(&mut out_bytes, 1, 10)];
        engine.update_output(0, &mut out_packets).unwrap();
        assert!(out_bytes.iter().all(|&s| (s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn pass_through_copies_input_straight_to_output() {
        let engine = RingBufferEngine::create(2, 50);
        engine.setup(0, 48_000, 10, 4, 1, 10, 1, 10).unwrap();
        engine.setup(1, 48_000, 10, 4, 1, 10, 1, 10).unwrap();
        engine.enable_pass(0, Side::Input, Some(0), true).unwrap();

        let mut in_bytes: Vec<f32> = (0..10).map(|i| i as f32 * 0.1).collect();
        let packets = [packet_from(&mut in_bytes, 1, 10)];
        engine.update_input(0, &packets).unwrap();

        let result = engine.get_io(0, &[0], 1, &[0]).unwrap();
        assert_eq!(result.output[0].as_ref().unwrap(), result.input[0].as_ref().unwrap());
    }

    /// Testable property: a sine of amplitude A converges to a meter
    /// reading of A/sqrt(2) once the window has filled.
    #[test]
    fn meter_converges_to_rms_of_sine() {
        let engine = RingBufferEngine::create(1, 10);
        engine.setup(0, 48_000, 20, 4, 1, 20, 1, 20).unwrap();
        engine.enable_meter(0, Side::Input, Some(0), true).unwrap();

        let amplitude = 0.8f32;
        for cycle in 0..50u32 {
            let mut in_bytes: Vec<f32> = (0..20)
                .map(|f| {
                    let t = (cycle * 20 + f) as f32;
                    amplitude * (2.0 * std::f32::consts::PI * 440.0 * t / 48_000.0).sin()
                })
                .collect();
            let packets = [packet_from(&mut in_bytes, 1, 20)];
            engine.update_input(0, &packets).unwrap();
            engine.advance(0, Side::Input).unwrap();
        }

        let rms = engine.meter_value(0, Side::Input, 0).unwrap();
        let expected = amplitude / std::f32::consts::SQRT_2;
        assert!((rms - expected).abs() < 0.05, "rms={rms} expected={expected}");
    }

    #[test]
    fn disabled_channel_is_none_in_get() {
        let engine = RingBufferEngine::create(1, 50);
        engine.setup(0, 48_000, 10, 4, 1, 10, 1, 10).unwrap();
        engine.enable_channel(0, Side::Input, Some(0), false).unwrap();
        let result = engine.get(0, Side::Input, &[0]).unwrap();
        assert!(result[0].is_none());
    }

    #[test]
    fn unknown_device_index_is_invalid_arg() {
        let engine = RingBufferEngine::create(1, 50);
        assert!(matches!(engine.meter_value(5, Side::Input, 0), Err(RtError::InvalidArg(_))));
    }
}
