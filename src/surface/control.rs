//! TCP control-surface session state machine.
//!
//! Grounded in `apps/fdr/dns_sd/fader.h`'s `fader` class: one state
//! machine drives a single connected peer through a two-stage handshake
//! and then a steady heartbeat, while channel state (`ch_t`) tracks
//! fader position, mute, and touch per channel.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::Result;

const HANDSHAKE_TRIGGER: u8 = 0x0a;
const HANDSHAKE1_TRIGGER: u8 = 0x0c;
const RESPONSE_0_LEN: usize = 72;
const RESPONSE_1_LEN: usize = 8;
pub const HEARTBEAT_FRAME: [u8; 4] = [0x03, 0x00, 0x00, 0x00];
const HANDSHAKE_TICK_DELAY: Duration = Duration::from_millis(20);
const HEARTBEAT_PERIOD: Duration = Duration::from_millis(4000);

/// Type id of the one variable-length message kind; every other type id
/// has a fixed frame length from [`fixed_frame_len`].
const VARIABLE_LEN_TYPE: u8 = 0x19;

/// Little-endian type-length-value framing (§4.5.3): the expected frame
/// length is a function of the first byte (type id), fixed for every type
/// except `0x19`, whose length instead comes from a field inside the
/// message and must be read back out of the buffered bytes.
fn fixed_frame_len(type_id: u8) -> Option<usize> {
    match type_id {
        HANDSHAKE_TRIGGER | HANDSHAKE1_TRIGGER => Some(1),
        0x03 => Some(4), // heartbeat
        0x00 | 0x01 | 0x02 => Some(3), // physical touch/fader/mute relay
        _ => None,
    }
}

/// `0x19`'s length field: a little-endian `u16` payload length immediately
/// following the type byte, so the full frame is that 3-byte header plus
/// the payload. Returns `None` if fewer than 3 bytes are buffered yet.
fn variable_frame_len(buffered: &[u8]) -> Option<usize> {
    if buffered.len() < 3 {
        return None;
    }
    Some(3 + u16::from_le_bytes([buffered[1], buffered[2]]) as usize)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoState {
    WaitHandshake0,
    WaitHandshakeTick,
    WaitHandshake1,
    WaitHeartbeat,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelState {
    pub position: i16,
    pub mute: bool,
    pub touch: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Noop,
    Send(Vec<u8>),
    TimedOutReset,
}

/// Session state for exactly one connected peer (§4.5.3's invariant:
/// "exactly one TCP peer connected at a time" is enforced by the listener
/// that owns this session, not by the session itself).
pub struct ControlSurfaceSession {
    mac: [u8; 6],
    inet_addr: Ipv4Addr,
    state: ProtoState,
    elapsed_in_state: Duration,
    ticks_since_progress: u32,
    timeout_ticks: u32,
    pub channels: Vec<ChannelState>,
    /// Bytes received but not yet assembled into a complete TLV frame
    /// (mirrors the original's 8-byte `_msg` lookahead buffer, grown as
    /// large as the longest in-flight frame actually needs).
    pending: Vec<u8>,
}

impl ControlSurfaceSession {
    pub fn new(mac: [u8; 6], inet_addr: Ipv4Addr, channel_count: usize, timeout_ticks: u32) -> Self {
        Self {
            mac,
            inet_addr,
            state: ProtoState::WaitHandshake0,
            elapsed_in_state: Duration::ZERO,
            ticks_since_progress: 0,
            timeout_ticks,
            channels: vec![ChannelState::default(); channel_count],
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> ProtoState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = ProtoState::WaitHandshake0;
        self.elapsed_in_state = Duration::ZERO;
        self.ticks_since_progress = 0;
    }

    fn enter(&mut self, state: ProtoState) {
        self.state = state;
        self.elapsed_in_state = Duration::ZERO;
        self.ticks_since_progress = 0;
    }

    /// `response_0`: a fixed 72-byte frame carrying the local MAC and
    /// IPv4 address. The IPv4 bytes are big-endian (network order) even
    /// though the rest of the handshake frame is little-endian-by-convention;
    /// only this embedded address follows network byte order.
    fn build_response_0(&self) -> Vec<u8> {
        let mut buf = vec![0u8; RESPONSE_0_LEN];
        buf[0] = 0x00;
        buf[1..7].copy_from_slice(&self.mac);
        buf[7..11].copy_from_slice(&self.inet_addr.octets());
        buf
    }

    fn build_response_1(&self) -> Vec<u8> {
        let mut buf = vec![0u8; RESPONSE_1_LEN];
        buf[0] = 0x01;
        buf
    }

    /// Feed newly-arrived TCP bytes into the framer. A single `read()` may
    /// deliver a partial message, several messages back to back, or both,
    /// so bytes accumulate in `pending` until `fixed_frame_len`/
    /// `variable_frame_len` say a whole frame is buffered; every complete
    /// frame found is dispatched in order. Returns the concatenated reply
    /// bytes for every frame dispatched this call, if any.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        self.pending.extend_from_slice(bytes);
        let mut reply = Vec::new();
        loop {
            let Some(type_id) = self.pending.first().copied() else {
                break;
            };
            let frame_len = match fixed_frame_len(type_id) {
                Some(len) => len,
                None if type_id == VARIABLE_LEN_TYPE => {
                    let probe_len = self.pending.len().min(8);
                    match variable_frame_len(&self.pending[..probe_len]) {
                        Some(len) => len,
                        None => break, // length field not fully buffered yet
                    }
                }
                None => 1, // unrecognized type id: treat the byte as the whole message
            };
            if self.pending.len() < frame_len {
                break;
            }
            let frame: Vec<u8> = self.pending.drain(..frame_len).collect();
            if let Some(bytes) = self.dispatch(&frame)? {
                reply.extend(bytes);
            }
        }
        Ok(if reply.is_empty() { None } else { Some(reply) })
    }

    /// Handle one complete, already-framed inbound message. Returns the
    /// bytes to send back to the peer, if any.
    fn dispatch(&mut self, msg: &[u8]) -> Result<Option<Vec<u8>>> {
        match (self.state, msg[0]) {
            (ProtoState::WaitHandshake0, HANDSHAKE_TRIGGER) => {
                let reply = self.build_response_0();
                self.enter(ProtoState::WaitHandshakeTick);
                Ok(Some(reply))
            }
            (ProtoState::WaitHandshake1, HANDSHAKE1_TRIGGER) => {
                let reply = self.build_response_1();
                self.enter(ProtoState::WaitHeartbeat);
                Ok(Some(reply))
            }
            _ => Ok(None),
        }
    }

    /// Drive time-dependent transitions forward by `dt`. The caller is
    /// expected to call this roughly once per tick interval; `dt` need not
    /// be exact.
    pub fn tick(&mut self, dt: Duration) -> TickOutcome {
        self.elapsed_in_state += dt;
        match self.state {
            ProtoState::WaitHandshakeTick if self.elapsed_in_state >= HANDSHAKE_TICK_DELAY => {
                self.enter(ProtoState::WaitHandshake1);
                TickOutcome::Send(HEARTBEAT_FRAME.to_vec())
            }
            ProtoState::WaitHeartbeat if self.elapsed_in_state >= HEARTBEAT_PERIOD => {
                self.elapsed_in_state = Duration::ZERO;
                self.ticks_since_progress = 0;
                TickOutcome::Send(HEARTBEAT_FRAME.to_vec())
            }
            ProtoState::WaitHandshake0 | ProtoState::WaitHandshake1 => {
                self.ticks_since_progress += 1;
                if self.ticks_since_progress > self.timeout_ticks {
                    tracing::warn!(state = ?self.state, "control surface handshake stalled, resetting");
                    self.reset();
                    TickOutcome::TimedOutReset
                } else {
                    TickOutcome::Noop
                }
            }
            _ => TickOutcome::Noop,
        }
    }

    pub fn virtual_fader_moved(&mut self, ch_idx: usize, new_position: i16) -> Result<()> {
        if let Some(ch) = self.channels.get_mut(ch_idx) {
            ch.position = new_position;
        }
        Ok(())
    }

    pub fn virtual_mute_switched(&mut self, ch_idx: usize, mute: bool) -> Result<()> {
        if let Some(ch) = self.channels.get_mut(ch_idx) {
            ch.mute = mute;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ControlSurfaceSession {
        ControlSurfaceSession::new([0, 1, 2, 3, 4, 5], Ipv4Addr::new(10, 0, 0, 5), 8, 50)
    }

    /// S4: handshake0 → response_0, then after 20ms a heartbeat is sent,
    /// then handshake1 → response_1, then heartbeats every 4000ms.
    #[test]
    fn scenario_s4_drives_full_handshake() {
        let mut s = session();
        let reply = s.receive(&[0x0a]).unwrap().unwrap();
        assert_eq!(reply.len(), RESPONSE_0_LEN);
        assert_eq!(&reply[1..7], &[0, 1, 2, 3, 4, 5]);
        assert_eq!(&reply[7..11], &[10, 0, 0, 5]);
        assert_eq!(s.state(), ProtoState::WaitHandshakeTick);

        let outcome = s.tick(Duration::from_millis(20));
        assert_eq!(outcome, TickOutcome::Send(HEARTBEAT_FRAME.to_vec()));
        assert_eq!(s.state(), ProtoState::WaitHandshake1);

        let reply = s.receive(&[0x0c]).unwrap().unwrap();
        assert_eq!(reply.len(), RESPONSE_1_LEN);
        assert_eq!(s.state(), ProtoState::WaitHeartbeat);

        assert_eq!(s.tick(Duration::from_millis(3999)), TickOutcome::Noop);
        assert_eq!(s.tick(Duration::from_millis(1)), TickOutcome::Send(HEARTBEAT_FRAME.to_vec()));
    }

    #[test]
    fn stalled_handshake_resets_after_timeout() {
        let mut s = session();
        for _ in 0..51 {
            s.tick(Duration::from_millis(1));
        }
        assert_eq!(s.state(), ProtoState::WaitHandshake0);
    }

    #[test]
    fn virtual_fader_moved_updates_channel_state() {
        let mut s = session();
        s.virtual_fader_moved(2, 500).unwrap();
        assert_eq!(s.channels[2].position, 500);
    }

    /// A handshake trigger split across two `read()` calls still frames
    /// correctly once the byte actually arrives.
    #[test]
    fn framer_reassembles_across_short_reads() {
        let mut s = session();
        assert_eq!(s.receive(&[]).unwrap(), None);
        let reply = s.receive(&[0x0a]).unwrap().unwrap();
        assert_eq!(reply.len(), RESPONSE_0_LEN);
    }

    /// A `0x19` frame's length lives in the two bytes after the type id;
    /// the framer must wait for the whole payload before dispatching, and
    /// leaves a following message queued in `pending` untouched until then.
    #[test]
    fn framer_waits_for_0x19_payload_length() {
        let mut s = session();
        let mut msg = vec![0x19, 0x02, 0x00]; // payload length = 2
        msg.extend_from_slice(&[0xaa]); // only half the payload so far
        assert_eq!(s.receive(&msg).unwrap(), None);
        assert_eq!(s.pending, vec![0x19, 0x02, 0x00, 0xaa]);

        // second half arrives, plus a queued handshake trigger
        let reply = s.receive(&[0xbb, 0x0a]).unwrap().unwrap();
        assert_eq!(reply.len(), RESPONSE_0_LEN);
        assert!(s.pending.is_empty());
    }

    /// Two fixed-length frames arriving back to back in one `read()` are
    /// both pulled off `pending` and dispatched in order.
    #[test]
    fn framer_dispatches_multiple_frames_in_one_read() {
        let mut s = session();
        s.enter(ProtoState::WaitHandshake1);
        // handshake1 trigger (1 byte) followed by an unrelated 3-byte
        // physical-relay frame the session doesn't act on in this state.
        let reply = s.receive(&[0x0c, 0x00, 0x01, 0x02]).unwrap().unwrap();
        assert_eq!(reply.len(), RESPONSE_1_LEN);
        assert_eq!(s.state(), ProtoState::WaitHeartbeat);
        assert!(s.pending.is_empty());
    }
}
