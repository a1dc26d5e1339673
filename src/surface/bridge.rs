//! Physical ↔ virtual control bridging (§4.5.4).
//!
//! Inbound bytes from the physical surface are 3-byte
//! `{type_id, channel, value}` messages; bridging them into the session
//! produces EuCon-bound frames. Bytes arriving from the peer go the other
//! way: a type-tagged message is reassembled and dispatched to
//! `on_eucon_recv_msg_complete`, which updates channel state and forwards
//! to the physical-control callback.

use std::sync::Arc;

use crate::surface::control::ControlSurfaceSession;

pub const PHYS_TOUCH: u8 = 0;
pub const PHYS_FADER: u8 = 1;
pub const PHYS_MUTE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalControlEvent {
    Touch { channel: u8, active: bool },
    Fader { channel: u8, position: u16 },
    Mute { channel: u8, muted: bool },
}

/// Callback invoked when a peer message resolves into a physical-control
/// update (drives motorized faders / LED rings on real hardware).
pub type PhysicalControlCallback = Arc<dyn Fn(PhysicalControlEvent) + Send + Sync>;

/// Parse one 3-byte physical-control message into the event it represents.
pub fn parse_physical_message(msg: &[u8; 3]) -> Option<PhysicalControlEvent> {
    let [type_id, channel, value] = *msg;
    match type_id {
        PHYS_TOUCH => Some(PhysicalControlEvent::Touch { channel, active: value != 0 }),
        PHYS_FADER => Some(PhysicalControlEvent::Fader { channel, position: (value as u16) << 7 }),
        PHYS_MUTE => Some(PhysicalControlEvent::Mute { channel, muted: value != 0 }),
        _ => None,
    }
}

/// Translate an inbound physical-control change into the bytes to send to
/// the EuCon peer (`_send_fader_to_eucon` / `_send_touch_to_eucon` /
/// `_send_mute_to_eucon`), and update the session's virtual channel state.
pub fn bridge_physical_to_session(session: &mut ControlSurfaceSession, event: PhysicalControlEvent) -> Vec<u8> {
    match event {
        PhysicalControlEvent::Fader { channel, position } => {
            let _ = session.virtual_fader_moved(channel as usize, position as i16);
            encode_fader_frame(channel, position)
        }
        PhysicalControlEvent::Mute { channel, muted } => {
            let _ = session.virtual_mute_switched(channel as usize, muted);
            encode_mute_frame(channel, muted)
        }
        PhysicalControlEvent::Touch { channel, active } => encode_touch_frame(channel, active),
    }
}

fn encode_fader_frame(channel: u8, position: u16) -> Vec<u8> {
    let mut b = vec![PHYS_FADER, channel];
    b.extend_from_slice(&position.to_le_bytes());
    b
}

fn encode_touch_frame(channel: u8, active: bool) -> Vec<u8> {
    vec![PHYS_TOUCH, channel, active as u8]
}

fn encode_mute_frame(channel: u8, muted: bool) -> Vec<u8> {
    vec![PHYS_MUTE, channel, muted as u8]
}

/// `_on_eucon_recv_msg_complete`: a fully reassembled peer message has
/// arrived; update channel state and notify the physical-control callback.
pub fn on_eucon_message_complete(
    session: &mut ControlSurfaceSession,
    type_id: u8,
    channel: u8,
    value: u16,
    phys_cb: &PhysicalControlCallback,
) {
    match type_id {
        PHYS_FADER => {
            let _ = session.virtual_fader_moved(channel as usize, value as i16);
            phys_cb(PhysicalControlEvent::Fader { channel, position: value });
        }
        PHYS_MUTE => {
            let muted = value != 0;
            let _ = session.virtual_mute_switched(channel as usize, muted);
            phys_cb(PhysicalControlEvent::Mute { channel, muted });
        }
        PHYS_TOUCH => {
            phys_cb(PhysicalControlEvent::Touch { channel, active: value != 0 });
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    #[test]
    fn physical_fader_message_updates_session_and_encodes_frame() {
        let mut session = ControlSurfaceSession::new([0; 6], Ipv4Addr::LOCALHOST, 8, 50);
        let event = parse_physical_message(&[PHYS_FADER, 2, 100]).unwrap();
        let frame = bridge_physical_to_session(&mut session, event);
        assert_eq!(frame[0], PHYS_FADER);
        assert_eq!(frame[1], 2);
        assert_eq!(session.channels[2].position, 100i16 << 7);
    }

    #[test]
    fn eucon_mute_message_invokes_physical_callback() {
        let mut session = ControlSurfaceSession::new([0; 6], Ipv4Addr::LOCALHOST, 8, 50);
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let cb: PhysicalControlCallback = Arc::new(move |e| *seen_clone.lock().unwrap() = Some(e));
        on_eucon_message_complete(&mut session, PHYS_MUTE, 3, 1, &cb);
        assert!(session.channels[3].mute);
        assert_eq!(*seen.lock().unwrap(), Some(PhysicalControlEvent::Mute { channel: 3, muted: true }));
    }
}
