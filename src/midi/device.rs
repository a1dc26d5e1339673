//! MIDI device layer: platform endpoint enumeration and the send path.
//!
//! Grounded in `cwMidiAlsa.cpp`'s port enumeration and event-send loop,
//! re-expressed over `midir` instead of a raw ALSA rawmidi/seq handle —
//! the parser and packet model above stay identical either way.

use std::sync::Arc;

use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;

use crate::error::{Result, RtError};
use crate::midi::message::MessageBody;
use crate::midi::parser::{MidiParser, MidiSubscriber};
use crate::time::Timestamp;

/// One input port: an open `midir` connection driving a parser.
struct InputPort {
    name: String,
    _connection: MidiInputConnection<()>,
    parser: Arc<Mutex<MidiParser>>,
}

/// The application's single MIDI endpoint: subscribed to every available
/// input port, and able to send on the default output (`{name, in_ports[],
/// out_ports[]}` in §3's MIDI Entities).
pub struct MidiDevice {
    name: String,
    input_ports: Vec<InputPort>,
    output: Option<MidiOutputConnection>,
    output_name: Option<String>,
}

impl MidiDevice {
    /// Enumerate platform MIDI endpoints and open every input port,
    /// plus the first available output port as the default.
    pub fn open(app_name: &str, packet_buf_capacity: usize) -> Result<Self> {
        let midi_in = MidiInput::new(app_name)
            .map_err(|e| RtError::unavailable(format!("MidiInput::new: {e}")))?;
        let in_ports = midi_in.ports();

        let mut input_ports = Vec::new();
        let midi_in = MidiInput::new(app_name)
            .map_err(|e| RtError::unavailable(format!("MidiInput::new: {e}")))?;
        for (idx, port) in in_ports.iter().enumerate() {
            let port_name = midi_in
                .port_name(port)
                .unwrap_or_else(|_| format!("in-{idx}"));
            let parser = Arc::new(Mutex::new(MidiParser::new(0, idx as u32, packet_buf_capacity)));
            let parser_for_cb = parser.clone();
            // Re-create per port since `connect` consumes the MidiInput.
            let connector = MidiInput::new(app_name)
                .map_err(|e| RtError::unavailable(format!("MidiInput::new: {e}")))?;
            let conn = connector
                .connect(
                    port,
                    "rt-audio-core-in",
                    move |stamp_us, bytes, _| {
                        let ts = Timestamp::from_duration(std::time::Duration::from_micros(stamp_us));
                        let mut p = parser_for_cb.lock();
                        for &b in bytes {
                            p.feed_byte(b, ts);
                        }
                        p.transmit();
                    },
                    (),
                )
                .map_err(|e| RtError::unavailable(format!("connect input {port_name}: {e}")))?;
            input_ports.push(InputPort {
                name: port_name,
                _connection: conn,
                parser,
            });
        }

        let midi_out = MidiOutput::new(app_name)
            .map_err(|e| RtError::unavailable(format!("MidiOutput::new: {e}")))?;
        let out_ports = midi_out.ports();
        let (output, output_name) = if let Some(port) = out_ports.first() {
            let name = midi_out.port_name(port).unwrap_or_else(|_| "out-0".to_string());
            let conn = midi_out
                .connect(port, "rt-audio-core-out")
                .map_err(|e| RtError::unavailable(format!("connect output {name}: {e}")))?;
            (Some(conn), Some(name))
        } else {
            (None, None)
        };

        Ok(Self {
            name: app_name.to_string(),
            input_ports,
            output,
            output_name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_port_count(&self) -> usize {
        self.input_ports.len()
    }

    pub fn input_port_name(&self, idx: usize) -> Result<&str> {
        self.input_ports
            .get(idx)
            .map(|p| p.name.as_str())
            .ok_or_else(|| RtError::invalid_arg(format!("midi input port {idx} out of range")))
    }

    pub fn output_name(&self) -> Option<&str> {
        self.output_name.as_deref()
    }

    /// Multiple subscribers may attach to any input port's parser.
    pub fn subscribe(&self, port_idx: usize, callback: MidiSubscriber) -> Result<()> {
        let port = self
            .input_ports
            .get(port_idx)
            .ok_or_else(|| RtError::invalid_arg(format!("midi input port {port_idx} out of range")))?;
        port.parser.lock().subscribe(callback);
        Ok(())
    }

    /// Send a channel voice message on the default output.
    pub fn send_channel_voice(&mut self, status: u8, d0: u8, d1: Option<u8>) -> Result<()> {
        let out = self
            .output
            .as_mut()
            .ok_or_else(|| RtError::unavailable("no MIDI output port connected"))?;
        let mut bytes = vec![status, d0];
        if let Some(d1) = d1 {
            bytes.push(d1);
        }
        out.send(&bytes)
            .map_err(|e| RtError::unavailable(format!("midi send: {e}")))
    }

    /// Send a raw SysEx byte sequence (expected to include the leading
    /// `0xF0` and trailing `0xF7`) on the default output.
    pub fn send_sysex(&mut self, bytes: &[u8]) -> Result<()> {
        let out = self
            .output
            .as_mut()
            .ok_or_else(|| RtError::unavailable("no MIDI output port connected"))?;
        out.send(bytes)
            .map_err(|e| RtError::unavailable(format!("midi sysex send: {e}")))
    }

    /// Send a fully-formed message body as constructed by a [`MidiParser`].
    pub fn send(&mut self, body: &MessageBody) -> Result<()> {
        match body {
            MessageBody::ChannelVoice { status, d0, d1 } => self.send_channel_voice(*status, *d0, *d1),
            MessageBody::Realtime { status } => {
                let out = self
                    .output
                    .as_mut()
                    .ok_or_else(|| RtError::unavailable("no MIDI output port connected"))?;
                out.send(&[*status])
                    .map_err(|e| RtError::unavailable(format!("midi send: {e}")))
            }
            MessageBody::SysEx { bytes, .. } => self.send_sysex(bytes),
        }
    }
}
