// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::fmt;

use midly::{
    live::{LiveEvent, SystemRealtime},
    num::{u4, u7},
    MidiMessage,
};

/// The largest encoded size of a message we put on the wire.
pub const MAX_MESSAGE_LEN: usize = 3;

/// A message travelling through a port.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Message {
    /// A channel voice message.
    Midi { channel: u4, message: MidiMessage },
    /// A system realtime message (clock, start, stop...).
    Realtime(SystemRealtime),
    /// A non-MIDI event. Routed like any other event but has no wire encoding.
    Custom { id: u16, value: i32 },
}

impl Message {
    /// Creates a note on message. Channels are given 1-indexed, as users see them.
    pub fn note_on(channel: u8, key: u8, velocity: u8) -> Message {
        Message::Midi {
            channel: channel_from_user(channel),
            message: MidiMessage::NoteOn {
                key: u7::from_int_lossy(key),
                vel: u7::from_int_lossy(velocity),
            },
        }
    }

    /// Creates a note off message.
    pub fn note_off(channel: u8, key: u8) -> Message {
        Message::Midi {
            channel: channel_from_user(channel),
            message: MidiMessage::NoteOff {
                key: u7::from_int_lossy(key),
                vel: u7::from_int_lossy(0),
            },
        }
    }

    /// Creates a control change message.
    pub fn control_change(channel: u8, controller: u8, value: u8) -> Message {
        Message::Midi {
            channel: channel_from_user(channel),
            message: MidiMessage::Controller {
                controller: u7::from_int_lossy(controller),
                value: u7::from_int_lossy(value),
            },
        }
    }

    /// Parses raw MIDI bytes. Anything other than channel voice and realtime
    /// messages is ignored.
    pub fn parse(raw: &[u8]) -> Option<Message> {
        match LiveEvent::parse(raw).ok()? {
            LiveEvent::Midi { channel, message } => Some(Message::Midi { channel, message }),
            LiveEvent::Realtime(realtime) => Some(Message::Realtime(realtime)),
            LiveEvent::Common(_) => None,
        }
    }

    /// Encodes the message into the given buffer without allocating. Returns the
    /// number of bytes written, or None for messages with no wire form.
    pub fn encode(&self, buf: &mut [u8; MAX_MESSAGE_LEN]) -> Option<usize> {
        match self {
            Message::Midi { channel, message } => {
                let channel = channel.as_int();
                let (status, data1, data2) = match *message {
                    MidiMessage::NoteOff { key, vel } => (0x80, key.as_int(), Some(vel.as_int())),
                    MidiMessage::NoteOn { key, vel } => (0x90, key.as_int(), Some(vel.as_int())),
                    MidiMessage::Aftertouch { key, vel } => {
                        (0xA0, key.as_int(), Some(vel.as_int()))
                    }
                    MidiMessage::Controller { controller, value } => {
                        (0xB0, controller.as_int(), Some(value.as_int()))
                    }
                    MidiMessage::ProgramChange { program } => (0xC0, program.as_int(), None),
                    MidiMessage::ChannelAftertouch { vel } => (0xD0, vel.as_int(), None),
                    MidiMessage::PitchBend { bend } => {
                        let raw = bend.0.as_int();
                        (0xE0, (raw & 0x7F) as u8, Some((raw >> 7) as u8))
                    }
                };
                buf[0] = status | channel;
                buf[1] = data1;
                match data2 {
                    Some(data2) => {
                        buf[2] = data2;
                        Some(3)
                    }
                    None => Some(2),
                }
            }
            Message::Realtime(realtime) => {
                buf[0] = match realtime {
                    SystemRealtime::TimingClock => 0xF8,
                    SystemRealtime::Start => 0xFA,
                    SystemRealtime::Continue => 0xFB,
                    SystemRealtime::Stop => 0xFC,
                    SystemRealtime::ActiveSensing => 0xFE,
                    SystemRealtime::Reset => 0xFF,
                    SystemRealtime::Undefined(status) => *status,
                };
                Some(1)
            }
            Message::Custom { .. } => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Midi { channel, message } => {
                let channel = channel.as_int() + 1;
                match message {
                    MidiMessage::NoteOn { key, vel } => {
                        write!(f, "note on  ch={} key={} vel={}", channel, key.as_int(), vel.as_int())
                    }
                    MidiMessage::NoteOff { key, vel } => {
                        write!(f, "note off ch={} key={} vel={}", channel, key.as_int(), vel.as_int())
                    }
                    MidiMessage::Controller { controller, value } => {
                        write!(
                            f,
                            "cc       ch={} cc={} value={}",
                            channel,
                            controller.as_int(),
                            value.as_int()
                        )
                    }
                    other => write!(f, "midi     ch={} {:?}", channel, other),
                }
            }
            Message::Realtime(realtime) => write!(f, "realtime {:?}", realtime),
            Message::Custom { id, value } => write!(f, "custom   id={} value={}", id, value),
        }
    }
}

/// A message placed at a frame offset within the current cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    /// Frame index within the cycle buffer.
    pub frame: u32,
    pub message: Message,
}

impl Event {
    pub fn new(frame: u32, message: Message) -> Event {
        Event { frame, message }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:<5} {}", self.frame, self.message)
    }
}

/// Converts a user facing channel in [1, 16] into a wire channel, clamping out of
/// range values.
pub(crate) fn channel_from_user(channel: u8) -> u4 {
    u4::from_int_lossy(channel.clamp(1, 16) - 1)
}

#[cfg(test)]
mod test {
    use super::*;

    fn encoded(message: Message) -> Option<Vec<u8>> {
        let mut buf = [0u8; MAX_MESSAGE_LEN];
        message.encode(&mut buf).map(|len| buf[..len].to_vec())
    }

    #[test]
    fn test_encode_channel_messages() {
        assert_eq!(Some(vec![0x90, 60, 100]), encoded(Message::note_on(1, 60, 100)));
        assert_eq!(Some(vec![0x8F, 64, 0]), encoded(Message::note_off(16, 64)));
        assert_eq!(
            Some(vec![0xB2, 7, 127]),
            encoded(Message::control_change(3, 7, 127))
        );
    }

    #[test]
    fn test_encode_pitch_bend_and_program() {
        let bend = Message::Midi {
            channel: u4::from_int_lossy(0),
            message: MidiMessage::PitchBend {
                bend: midly::PitchBend(midly::num::u14::from_int_lossy(0x2000)),
            },
        };
        assert_eq!(Some(vec![0xE0, 0x00, 0x40]), encoded(bend));

        let program = Message::Midi {
            channel: u4::from_int_lossy(1),
            message: MidiMessage::ProgramChange {
                program: u7::from_int_lossy(5),
            },
        };
        assert_eq!(Some(vec![0xC1, 5]), encoded(program));
    }

    #[test]
    fn test_custom_has_no_encoding() {
        assert_eq!(None, encoded(Message::Custom { id: 1, value: -4 }));
    }

    #[test]
    fn test_parse() {
        assert_eq!(Some(Message::note_on(1, 61, 90)), Message::parse(&[0x90, 61, 90]));
        assert_eq!(
            Some(Message::Realtime(SystemRealtime::Start)),
            Message::parse(&[0xFA])
        );
        assert_eq!(None, Message::parse(&[0xF0, 0x7E, 0xF7]));
        assert_eq!(None, Message::parse(&[]));
    }

    #[test]
    fn test_channel_clamping() {
        assert_eq!(0, channel_from_user(0).as_int());
        assert_eq!(0, channel_from_user(1).as_int());
        assert_eq!(15, channel_from_user(16).as_int());
        assert_eq!(15, channel_from_user(40).as_int());
    }
}
