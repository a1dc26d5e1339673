//! mDNS/DNS-SD responder: one advertised service, answered over a
//! multicast UDP socket joined to `224.0.0.251:5353`.
//!
//! Grounded in `cwAvahiSurface.cpp`'s group-create/commit/collision-retry
//! loop and `cwDnsSd.cpp`'s socket setup, expressed over `socket2` instead
//! of the platform mDNS daemon API — this crate owns its own responder
//! rather than shelling out to Avahi/Bonjour.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Result, RtError};
use crate::surface::wire::{self, Message};

pub const MDNS_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MDNS_PORT: u16 = 5353;

/// Everything needed to (re-)build this responder's answer, kept so a
/// collision rename can re-announce from scratch.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub instance_name: String,
    pub service_type: String,
    pub domain: String,
    pub host_name: String,
    pub port: u16,
    pub txt_fields: Vec<String>,
}

struct State {
    descriptor: ServiceDescriptor,
    collision_count: u32,
}

/// Owns the multicast socket and the current service descriptor. TXT
/// updates and collision renames both go through [`MdnsResponder::recommit`]
/// rather than mutating an outgoing record in place.
pub struct MdnsResponder {
    socket: Socket,
    state: Mutex<State>,
    transaction_id: AtomicU16,
}

impl MdnsResponder {
    /// Open a UDP socket bound to 5353, join the mDNS multicast group,
    /// and enable loopback + TTL=255 (§4.5.2).
    pub fn create(descriptor: ServiceDescriptor) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| RtError::op_fail("socket2::Socket::new", e))?;
        socket.set_reuse_address(true).map_err(|e| RtError::op_fail("SO_REUSEADDR", e))?;
        #[cfg(unix)]
        socket.set_reuse_port(true).map_err(|e| RtError::op_fail("SO_REUSEPORT", e))?;
        let bind_addr: SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT).into();
        socket
            .bind(&bind_addr.into())
            .map_err(|e| RtError::op_fail("bind 0.0.0.0:5353", e))?;
        socket
            .join_multicast_v4(&MDNS_MULTICAST_ADDR, &Ipv4Addr::UNSPECIFIED)
            .map_err(|e| RtError::op_fail("join_multicast_v4", e))?;
        socket
            .set_multicast_loop_v4(true)
            .map_err(|e| RtError::op_fail("set_multicast_loop_v4", e))?;
        socket
            .set_multicast_ttl_v4(255)
            .map_err(|e| RtError::op_fail("set_multicast_ttl_v4", e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| RtError::op_fail("set_nonblocking", e))?;

        Ok(Self {
            socket,
            state: Mutex::new(State { descriptor, collision_count: 0 }),
            transaction_id: AtomicU16::new(0),
        })
    }

    pub fn descriptor(&self) -> ServiceDescriptor {
        self.state.lock().descriptor.clone()
    }

    fn next_transaction_id(&self) -> u16 {
        self.transaction_id.fetch_add(1, Ordering::Relaxed)
    }

    fn build_reply(&self) -> Message {
        let state = self.state.lock();
        let d = &state.descriptor;
        wire::build_service_reply(
            self.next_transaction_id(),
            &d.instance_name,
            &d.service_type,
            &d.domain,
            &d.host_name,
            d.port,
            &d.txt_fields,
        )
    }

    /// Announce (or re-announce) the current descriptor to the multicast group.
    pub fn announce(&self) -> Result<()> {
        let msg = self.build_reply();
        let bytes = msg.serialize();
        let dest: SocketAddr = SocketAddrV4::new(MDNS_MULTICAST_ADDR, MDNS_PORT).into();
        self.socket
            .send_to(&bytes, &dest.into())
            .map_err(|e| RtError::op_fail("mdns send_to", e))?;
        Ok(())
    }

    /// `AVAHI_ENTRY_GROUP_COLLISION`: append `" - N+1"` to whatever name
    /// was last tried and re-announce. Repeated collisions keep growing
    /// the suffix (`"Foo"` → `"Foo - 2"` → `"Foo - 3"`).
    pub fn handle_collision(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.collision_count += 1;
            let base = strip_existing_suffix(&state.descriptor.instance_name);
            state.descriptor.instance_name = format!("{base} - {}", state.collision_count + 1);
        }
        self.announce()
    }

    /// TXT updates always re-serialize and recommit rather than patching
    /// the outgoing record in place (§4.5.2).
    pub fn update_service_txt(&self, txt_fields: Vec<String>) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.descriptor.txt_fields = txt_fields;
        }
        self.announce()
    }

    /// Poll the socket for an incoming query/response and parse it, or
    /// return `Ok(None)` if nothing is currently available.
    pub fn try_recv(&self) -> Result<Option<Message>> {
        let mut buf = [std::mem::MaybeUninit::uninit(); 2048];
        match self.socket.recv(&mut buf) {
            Ok(n) => {
                let bytes: Vec<u8> = buf[..n].iter().map(|b| unsafe { b.assume_init() }).collect();
                Ok(Some(Message::parse(&bytes)?))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(RtError::op_fail("mdns recv", e)),
        }
    }
}

fn strip_existing_suffix(name: &str) -> &str {
    match name.rfind(" - ") {
        Some(idx) if name[idx + 3..].chars().all(|c| c.is_ascii_digit()) && !name[idx + 3..].is_empty() => {
            &name[..idx]
        }
        _ => name,
    }
}

pub type SharedResponder = Arc<MdnsResponder>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collision_suffix_grows_each_time() {
        assert_eq!(strip_existing_suffix("Foo"), "Foo");
        assert_eq!(strip_existing_suffix("Foo - 2"), "Foo");
        assert_eq!(strip_existing_suffix("Foo - 12"), "Foo");
    }
}
