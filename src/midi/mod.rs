//! MIDI parser and device layer: reassembles a running-status byte
//! stream into timestamped messages and dispatches them to subscribers.

pub mod device;
pub mod message;
pub mod parser;

pub use device::MidiDevice;
pub use message::{MessageBody, MidiMessage, Status};
pub use parser::{MidiParser, MidiSubscriber};
