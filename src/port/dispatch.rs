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

use midly::{live::SystemRealtime, MidiMessage};
use serde::{Deserialize, Serialize};

use crate::event::Message;

/// Inbound notes are measured from this key.
pub const MIDDLE_C: i32 = 60;

/// What an input port does with the notes it receives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InPortKind {
    /// Events are received and discarded.
    #[default]
    None,
    /// Transposes the target sequences by the distance from middle C.
    Transpose,
    /// Moves the playhead of the target sequences to a step.
    Playhead,
    /// Sets the clock divide of the target sequences.
    ClockDivide,
    /// Even notes mute the target sequences, odd notes unmute them.
    Mute,
    /// Sets the step the target sequences loop back to.
    First,
    /// Sets the last step the target sequences play before looping.
    Last,
    /// MIDI start, continue and stop drive the session transport.
    Transport,
}

impl fmt::Display for InPortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InPortKind::None => "none",
            InPortKind::Transpose => "transpose",
            InPortKind::Playhead => "playhead",
            InPortKind::ClockDivide => "clock_divide",
            InPortKind::Mute => "mute",
            InPortKind::First => "first",
            InPortKind::Last => "last",
            InPortKind::Transport => "transport",
        };
        write!(f, "{}", name)
    }
}

/// A transport change requested from an input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    /// Play from the top.
    Start,
    /// Play from the current position.
    Continue,
    /// Halt, keeping the position.
    Stop,
}

/// The effect of an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Transpose(i32),
    /// A step relative to the start of the loop. Wrapped to the loop length of
    /// each target.
    Playhead(i32),
    ClockDivide(u32),
    Mute(bool),
    /// Steps, wrapped like `Playhead`.
    First(i32),
    Last(i32),
    Transport(TransportCommand),
}

/// Maps an inbound message to its effect for a port of the given kind. Note
/// driven kinds only react to note on messages with a non-zero velocity on the
/// listening channel.
pub fn action(kind: InPortKind, channel: u8, message: &Message) -> Option<Action> {
    if kind == InPortKind::Transport {
        return match message {
            Message::Realtime(SystemRealtime::Start) => {
                Some(Action::Transport(TransportCommand::Start))
            }
            Message::Realtime(SystemRealtime::Continue) => {
                Some(Action::Transport(TransportCommand::Continue))
            }
            Message::Realtime(SystemRealtime::Stop) => {
                Some(Action::Transport(TransportCommand::Stop))
            }
            _ => None,
        };
    }

    let note = match message {
        Message::Midi {
            channel: received,
            message: MidiMessage::NoteOn { key, vel },
        } if received.as_int() + 1 == channel && vel.as_int() > 0 => key.as_int() as i32,
        _ => return None,
    };
    let distance = note - MIDDLE_C;

    match kind {
        InPortKind::None | InPortKind::Transport => None,
        InPortKind::Transpose => Some(Action::Transpose(distance)),
        InPortKind::Playhead => Some(Action::Playhead(distance)),
        InPortKind::ClockDivide => Some(Action::ClockDivide(1 + distance.unsigned_abs())),
        InPortKind::Mute => Some(Action::Mute(note % 2 == 0)),
        InPortKind::First => Some(Action::First(distance)),
        InPortKind::Last => Some(Action::Last(distance)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_transpose() {
        let kind = InPortKind::Transpose;
        assert_eq!(
            Some(Action::Transpose(7)),
            action(kind, 1, &Message::note_on(1, 67, 100))
        );
        assert_eq!(
            Some(Action::Transpose(-12)),
            action(kind, 1, &Message::note_on(1, 48, 100))
        );
    }

    #[test]
    fn test_listening_channel() {
        let kind = InPortKind::Transpose;
        assert_eq!(None, action(kind, 1, &Message::note_on(2, 67, 100)));
        assert_eq!(
            Some(Action::Transpose(7)),
            action(kind, 2, &Message::note_on(2, 67, 100))
        );
    }

    #[test]
    fn test_only_sounding_note_ons() {
        let kind = InPortKind::Transpose;
        assert_eq!(None, action(kind, 1, &Message::note_off(1, 67)));
        assert_eq!(None, action(kind, 1, &Message::note_on(1, 67, 0)));
        assert_eq!(None, action(kind, 1, &Message::control_change(1, 67, 10)));
    }

    #[test]
    fn test_playhead_and_clock_divide() {
        assert_eq!(
            Some(Action::Playhead(-3)),
            action(InPortKind::Playhead, 1, &Message::note_on(1, 57, 1))
        );
        assert_eq!(
            Some(Action::ClockDivide(1)),
            action(InPortKind::ClockDivide, 1, &Message::note_on(1, 60, 1))
        );
        assert_eq!(
            Some(Action::ClockDivide(4)),
            action(InPortKind::ClockDivide, 1, &Message::note_on(1, 57, 1))
        );
        assert_eq!(
            Some(Action::ClockDivide(4)),
            action(InPortKind::ClockDivide, 1, &Message::note_on(1, 63, 1))
        );
    }

    #[test]
    fn test_loop_points() {
        assert_eq!(
            Some(Action::First(4)),
            action(InPortKind::First, 1, &Message::note_on(1, 64, 100))
        );
        assert_eq!(
            Some(Action::Last(-1)),
            action(InPortKind::Last, 1, &Message::note_on(1, 59, 100))
        );
        assert_eq!(None, action(InPortKind::Last, 1, &Message::note_off(1, 59)));
        assert_eq!("first", InPortKind::First.to_string());
        assert_eq!("last", InPortKind::Last.to_string());
    }

    #[test]
    fn test_mute() {
        assert_eq!(
            Some(Action::Mute(true)),
            action(InPortKind::Mute, 1, &Message::note_on(1, 60, 100))
        );
        assert_eq!(
            Some(Action::Mute(false)),
            action(InPortKind::Mute, 1, &Message::note_on(1, 61, 100))
        );
    }

    #[test]
    fn test_transport() {
        let kind = InPortKind::Transport;
        assert_eq!(
            Some(Action::Transport(TransportCommand::Start)),
            action(kind, 1, &Message::Realtime(SystemRealtime::Start))
        );
        assert_eq!(
            Some(Action::Transport(TransportCommand::Continue)),
            action(kind, 1, &Message::Realtime(SystemRealtime::Continue))
        );
        assert_eq!(
            Some(Action::Transport(TransportCommand::Stop)),
            action(kind, 1, &Message::Realtime(SystemRealtime::Stop))
        );
        assert_eq!(
            None,
            action(kind, 1, &Message::Realtime(SystemRealtime::TimingClock))
        );
        assert_eq!(None, action(kind, 1, &Message::note_on(1, 60, 100)));
    }

    #[test]
    fn test_none_ignores_everything() {
        assert_eq!(
            None,
            action(InPortKind::None, 1, &Message::note_on(1, 60, 100))
        );
    }
}
