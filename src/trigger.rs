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

use crate::error::SequoiaError;
use crate::event::Message;

/// Identifies a trigger within its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerId(pub u32);

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A note to play. The note off follows `length` ticks later, or never if the
/// length is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    /// MIDI channel in [1, 16].
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    /// Length of the note in ticks.
    pub length: u32,
}

/// A control change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control {
    /// MIDI channel in [1, 16].
    pub channel: u8,
    pub controller: u8,
    pub value: u8,
}

/// An application defined event with no MIDI meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Custom {
    pub id: u16,
    pub value: i32,
}

/// What a trigger emits when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Note(Note),
    Control(Control),
    Custom(Custom),
}

impl Payload {
    pub fn note(channel: u8, note: u8, velocity: u8, length: u32) -> Payload {
        Payload::Note(Note {
            channel,
            note,
            velocity,
            length,
        })
    }

    pub fn control(channel: u8, controller: u8, value: u8) -> Payload {
        Payload::Control(Control {
            channel,
            controller,
            value,
        })
    }

    pub fn custom(id: u16, value: i32) -> Payload {
        Payload::Custom(Custom { id, value })
    }

    /// Checks the payload parameters against their MIDI ranges.
    pub fn validate(&self) -> Result<(), SequoiaError> {
        match self {
            Payload::Note(note) => {
                check_channel(note.channel)?;
                check_range("note", note.note, 127)?;
                check_range("velocity", note.velocity, 127)
            }
            Payload::Control(control) => {
                check_channel(control.channel)?;
                check_range("controller", control.controller, 119)?;
                check_range("control value", control.value, 127)
            }
            Payload::Custom(_) => Ok(()),
        }
    }

    /// The message emitted when the trigger fires, with notes shifted by the
    /// given number of semitones.
    pub fn message(&self, transpose: i32) -> Message {
        match self {
            Payload::Note(note) => {
                Message::note_on(note.channel, transposed(note.note, transpose), note.velocity)
            }
            Payload::Control(control) => {
                Message::control_change(control.channel, control.controller, control.value)
            }
            Payload::Custom(custom) => Message::Custom {
                id: custom.id,
                value: custom.value,
            },
        }
    }
}

/// Applies a transposition, keeping the result a valid MIDI note.
pub fn transposed(note: u8, transpose: i32) -> u8 {
    (note as i32 + transpose).clamp(0, 127) as u8
}

fn check_channel(channel: u8) -> Result<(), SequoiaError> {
    if !(1..=16).contains(&channel) {
        return Err(SequoiaError::invalid(format!(
            "MIDI channel must be within [1, 16], got {}",
            channel
        )));
    }
    Ok(())
}

fn check_range(what: &str, value: u8, max: u8) -> Result<(), SequoiaError> {
    if value > max {
        return Err(SequoiaError::invalid(format!(
            "{} must be within [0, {}], got {}",
            what, max, value
        )));
    }
    Ok(())
}

/// A payload scheduled at an offset within a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    id: TriggerId,
    offset: u64,
    payload: Payload,
    enabled: bool,
    probability: f32,
}

impl Trigger {
    pub fn new(id: TriggerId, offset: u64, payload: Payload) -> Trigger {
        Trigger {
            id,
            offset,
            payload,
            enabled: true,
            probability: 1.0,
        }
    }

    /// Sets the chance, in [0, 1], that the trigger fires when reached.
    pub fn with_probability(mut self, probability: f32) -> Result<Trigger, SequoiaError> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(SequoiaError::invalid(format!(
                "probability must be within [0, 1], got {}",
                probability
            )));
        }
        self.probability = probability;
        Ok(self)
    }

    pub fn id(&self) -> TriggerId {
        self.id
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn probability(&self) -> f32 {
        self.probability
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn with_id(mut self, id: TriggerId) -> Trigger {
        self.id = id;
        self
    }

    /// Whether the trigger fires given a uniform roll in [0, 1).
    pub(crate) fn fires(&self, roll: f32) -> bool {
        self.probability >= 1.0 || roll < self.probability
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} @{} ", self.id, self.offset)?;
        match &self.payload {
            Payload::Note(note) => write!(
                f,
                "note ch={} note={} vel={} len={}",
                note.channel, note.note, note.velocity, note.length
            )?,
            Payload::Control(control) => write!(
                f,
                "cc ch={} cc={} value={}",
                control.channel, control.controller, control.value
            )?,
            Payload::Custom(custom) => write!(f, "custom id={} value={}", custom.id, custom.value)?,
        }
        if self.probability < 1.0 {
            write!(f, " p={:.2}", self.probability)?;
        }
        if !self.enabled {
            write!(f, " (disabled)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(Payload::note(1, 60, 100, 48).validate().is_ok());
        assert!(Payload::note(0, 60, 100, 48).validate().is_err());
        assert!(Payload::note(17, 60, 100, 48).validate().is_err());
        assert!(Payload::note(1, 128, 100, 48).validate().is_err());
        assert!(Payload::note(1, 60, 128, 48).validate().is_err());
        assert!(Payload::control(16, 119, 127).validate().is_ok());
        assert!(Payload::control(16, 120, 0).validate().is_err());
        assert!(Payload::custom(9, -1).validate().is_ok());
    }

    #[test]
    fn test_message_transposes_notes_only() {
        let note = Payload::note(2, 60, 90, 0);
        assert_eq!(Message::note_on(2, 67, 90), note.message(7));
        assert_eq!(Message::note_on(2, 127, 90), note.message(100));
        assert_eq!(Message::note_on(2, 0, 90), note.message(-100));

        let control = Payload::control(1, 7, 64);
        assert_eq!(Message::control_change(1, 7, 64), control.message(12));
    }

    #[test]
    fn test_probability() {
        let trigger = Trigger::new(TriggerId(1), 0, Payload::custom(1, 1));
        assert!(trigger.fires(0.999));

        let trigger = trigger.with_probability(0.25).expect("valid probability");
        assert!(trigger.fires(0.1));
        assert!(!trigger.fires(0.25));
        assert!(!trigger.fires(0.9));

        let never = Trigger::new(TriggerId(2), 0, Payload::custom(1, 1))
            .with_probability(0.0)
            .expect("valid probability");
        assert!(!never.fires(0.0));

        assert!(Trigger::new(TriggerId(3), 0, Payload::custom(1, 1))
            .with_probability(1.5)
            .is_err());
    }

    #[test]
    fn test_display() {
        let mut trigger = Trigger::new(TriggerId(4), 96, Payload::note(1, 60, 100, 48));
        assert_eq!("#4 @96 note ch=1 note=60 vel=100 len=48", trigger.to_string());
        trigger.set_enabled(false);
        assert_eq!(
            "#4 @96 note ch=1 note=60 vel=100 len=48 (disabled)",
            trigger.to_string()
        );
    }
}
