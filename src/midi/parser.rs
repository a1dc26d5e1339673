//! Running-status MIDI byte-stream parser.
//!
//! Reassembles fragmented channel-voice, system-realtime, and SysEx bytes
//! into complete, timestamped messages. Grounded in the per-byte state
//! machine `cwMidiAlsa.cpp`'s ALSA raw-MIDI read loop drives, expressed
//! here as a standalone, driver-agnostic parser so it can be fed from
//! any byte source.

use std::sync::Arc;

use crate::midi::message::{MessageBody, MidiMessage, Status};
use crate::time::Timestamp;

/// Subscriber callback: receives one transmit batch at a time. Must be
/// cheap and non-blocking — it runs on whatever thread calls `transmit`.
pub type MidiSubscriber = Arc<dyn Fn(&[MidiMessage]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Idle,
    InSysEx,
}

struct InFlight {
    status: u8,
    timestamp: Timestamp,
    d0: Option<u8>,
    expected: usize,
}

/// One running-status parser instance, owning its own packet buffer and
/// subscriber list (`{device_idx, port_idx, packet_buf, ..., subscribers[]}`).
pub struct MidiParser {
    device_idx: u32,
    port_idx: u32,
    packet_buf: Vec<MidiMessage>,
    packet_buf_capacity: usize,
    running_status: Option<u8>,
    in_flight: Option<InFlight>,
    state: ParserState,
    sysex_accum: Vec<u8>,
    sysex_timestamp: Timestamp,
    error_count: u32,
    subscribers: Vec<MidiSubscriber>,
}

impl MidiParser {
    pub fn new(device_idx: u32, port_idx: u32, packet_buf_capacity: usize) -> Self {
        Self {
            device_idx,
            port_idx,
            packet_buf: Vec::with_capacity(packet_buf_capacity),
            packet_buf_capacity,
            running_status: None,
            in_flight: None,
            state: ParserState::Idle,
            sysex_accum: Vec::with_capacity(packet_buf_capacity),
            sysex_timestamp: Timestamp::ZERO,
            error_count: 0,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, f: MidiSubscriber) {
        self.subscribers.push(f);
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Feed one byte of a fragment carrying timestamp `ts`. Complete
    /// messages are appended to the internal packet buffer; call
    /// [`MidiParser::transmit`] to flush them to subscribers.
    pub fn feed_byte(&mut self, byte: u8, ts: Timestamp) {
        if byte >= 0x80 {
            if Status::is_realtime(byte) {
                self.emit(MessageBody::Realtime { status: byte }, ts);
                return;
            }
            if byte == 0xF0 {
                self.state = ParserState::InSysEx;
                self.sysex_accum.clear();
                self.sysex_timestamp = ts;
                return;
            }
            if byte == 0xF7 && self.state == ParserState::InSysEx {
                let bytes = std::mem::take(&mut self.sysex_accum);
                let sysex_ts = self.sysex_timestamp;
                self.state = ParserState::Idle;
                self.emit(MessageBody::SysEx { bytes, complete: true }, sysex_ts);
                return;
            }
            // Channel voice / mode message.
            self.running_status = Some(byte);
            self.in_flight = Some(InFlight {
                status: byte,
                timestamp: ts,
                d0: None,
                expected: Status::channel_voice_data_len(byte),
            });
            return;
        }

        // Data byte.
        if self.state == ParserState::InSysEx {
            self.sysex_accum.push(byte);
            if self.sysex_accum.len() >= self.packet_buf_capacity {
                let bytes = std::mem::take(&mut self.sysex_accum);
                let sysex_ts = self.sysex_timestamp;
                self.error_count += 1;
                self.sysex_timestamp = ts;
                self.emit(MessageBody::SysEx { bytes, complete: false }, sysex_ts);
            }
            return;
        }

        let Some(status) = self.running_status else {
            self.error_count += 1;
            return;
        };
        let slot = self.in_flight.get_or_insert_with(|| InFlight {
            status,
            timestamp: ts,
            d0: None,
            expected: Status::channel_voice_data_len(status),
        });
        if slot.d0.is_none() {
            slot.d0 = Some(byte);
            if slot.expected == 1 {
                let (status, timestamp, d0) = (slot.status, slot.timestamp, slot.d0.unwrap());
                self.in_flight = None;
                self.emit(MessageBody::ChannelVoice { status, d0, d1: None }, timestamp);
            }
        } else {
            let (status, timestamp, d0) = (slot.status, slot.timestamp, slot.d0.unwrap());
            self.in_flight = None;
            self.emit(MessageBody::ChannelVoice { status, d0, d1: Some(byte) }, timestamp);
        }
    }

    fn emit(&mut self, body: MessageBody, timestamp: Timestamp) {
        self.packet_buf.push(MidiMessage {
            device_idx: self.device_idx,
            port_idx: self.port_idx,
            timestamp,
            body,
        });
        if self.packet_buf.len() >= self.packet_buf_capacity {
            self.transmit();
        }
    }

    /// Flush the packet buffer to every subscriber as one batch.
    pub fn transmit(&mut self) {
        if self.packet_buf.is_empty() {
            return;
        }
        for sub in &self.subscribers {
            sub(&self.packet_buf);
        }
        self.packet_buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn feed_all(parser: &mut MidiParser, bytes: &[u8]) {
        for &b in bytes {
            parser.feed_byte(b, Timestamp::ZERO);
        }
        parser.transmit();
    }

    /// S5: `[0x90 0x3C 0x40 0xF8 0x3D 0x41 0xF0 0x7E 0x00 0xF7]` yields
    /// NoteOn(60,64), Clock, NoteOn(61,65), SysEx([0x7E,0x00]).
    #[test]
    fn running_status_scenario_matches_s5() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut parser = MidiParser::new(0, 0, 64);
        let r = received.clone();
        parser.subscribe(Arc::new(move |batch: &[MidiMessage]| {
            r.lock().unwrap().extend(batch.iter().map(|m| m.body.clone()));
        }));

        feed_all(&mut parser, &[0x90, 0x3C, 0x40, 0xF8, 0x3D, 0x41, 0xF0, 0x7E, 0x00, 0xF7]);

        let got = received.lock().unwrap();
        assert_eq!(got.len(), 4);
        match &got[0] {
            MessageBody::ChannelVoice { status, d0, d1 } => {
                assert_eq!(*status, 0x90);
                assert_eq!(*d0, 0x3C);
                assert_eq!(*d1, Some(0x40));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(got[1], MessageBody::Realtime { status: 0xF8 }));
        match &got[2] {
            MessageBody::ChannelVoice { status, d0, d1 } => {
                assert_eq!(*status, 0x90);
                assert_eq!(*d0, 0x3D);
                assert_eq!(*d1, Some(0x41));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &got[3] {
            MessageBody::SysEx { bytes, complete } => {
                assert_eq!(bytes, &[0x7E, 0x00]);
                assert!(complete);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn program_change_takes_one_data_byte() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut parser = MidiParser::new(0, 0, 64);
        let r = received.clone();
        parser.subscribe(Arc::new(move |batch: &[MidiMessage]| {
            r.lock().unwrap().extend(batch.iter().map(|m| m.body.clone()));
        }));
        feed_all(&mut parser, &[0xC0, 0x05, 0x07]);
        let got = received.lock().unwrap();
        // running status repeats: 0x05 completes {C0,0x05}; 0x07 starts the next.
        assert_eq!(got.len(), 1);
        assert!(matches!(got[0], MessageBody::ChannelVoice { status: 0xC0, d0: 0x05, d1: None }));
    }

    #[test]
    fn unexpected_data_with_no_status_increments_error_count() {
        let mut parser = MidiParser::new(0, 0, 64);
        parser.feed_byte(0x40, Timestamp::ZERO);
        assert_eq!(parser.error_count(), 1);
    }

    #[test]
    fn sysex_accumulator_overflow_flushes_partial_fragment() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut parser = MidiParser::new(0, 0, 4);
        let r = received.clone();
        parser.subscribe(Arc::new(move |batch: &[MidiMessage]| {
            r.lock().unwrap().extend(batch.iter().map(|m| m.body.clone()));
        }));
        feed_all(&mut parser, &[0xF0, 0x01, 0x02, 0x03, 0x04, 0x05, 0xF7]);
        let got = received.lock().unwrap();
        assert_eq!(got.len(), 2);
        match &got[0] {
            MessageBody::SysEx { bytes, complete } => {
                assert_eq!(bytes, &[0x01, 0x02, 0x03, 0x04]);
                assert!(!complete);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &got[1] {
            MessageBody::SysEx { bytes, complete } => {
                assert_eq!(bytes, &[0x05]);
                assert!(complete);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(parser.error_count(), 1);
    }
}
