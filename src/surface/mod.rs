//! mDNS/DNS-SD responder and the TCP control-surface session it
//! advertises: wire codec, multicast responder, protocol state machine,
//! and physical/virtual control bridging.

pub mod bridge;
pub mod control;
pub mod responder;
pub mod wire;

pub use bridge::{PhysicalControlCallback, PhysicalControlEvent};
pub use control::{ChannelState, ControlSurfaceSession, ProtoState, TickOutcome};
pub use responder::{MdnsResponder, ServiceDescriptor};
pub use wire::{Message, Question, RData, ResourceRecord};
