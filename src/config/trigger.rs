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
use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::trigger::{Custom as CustomPayload, Payload, Trigger, TriggerId};

/// A YAML representation of a note payload.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Note {
    /// Defaults to the channel of the sequence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel: Option<u8>,
    note: u8,
    #[serde(default = "default_velocity")]
    velocity: u8,
    /// Length in ticks. Zero means no note off is sent.
    #[serde(default)]
    length: u32,
}

fn default_velocity() -> u8 {
    100
}

/// A YAML representation of a control change payload.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Control {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel: Option<u8>,
    controller: u8,
    value: u8,
}

/// A YAML representation of a custom payload.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Custom {
    id: u16,
    value: i32,
}

/// A YAML representation of a trigger. The offset is `step` steps plus `tick`
/// ticks, and exactly one of `note`, `control` or `custom` must be given.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct TriggerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tick: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    note: Option<Note>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    control: Option<Control>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    custom: Option<Custom>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    probability: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
}

impl TriggerConfig {
    /// Creates a note trigger at the given step.
    pub fn note(step: u32, note: u8, velocity: u8, length: u32) -> TriggerConfig {
        TriggerConfig {
            note: Some(Note {
                channel: None,
                note,
                velocity,
                length,
            }),
            ..TriggerConfig::at(Some(step), None)
        }
    }

    fn at(step: Option<u32>, tick: Option<u64>) -> TriggerConfig {
        TriggerConfig {
            step,
            tick,
            note: None,
            control: None,
            custom: None,
            probability: None,
            enabled: None,
        }
    }

    /// The offset of the trigger within its sequence, in ticks.
    pub fn offset(&self, ticks_per_step: u32) -> u64 {
        self.step.unwrap_or(0) as u64 * ticks_per_step as u64 + self.tick.unwrap_or(0)
    }

    /// Gets the payload, using `channel` for MIDI payloads that don't name one.
    pub fn payload(&self, channel: u8) -> Result<Payload, ConfigError> {
        match (&self.note, &self.control, &self.custom) {
            (Some(note), None, None) => Ok(Payload::note(
                note.channel.unwrap_or(channel),
                note.note,
                note.velocity,
                note.length,
            )),
            (None, Some(control), None) => Ok(Payload::control(
                control.channel.unwrap_or(channel),
                control.controller,
                control.value,
            )),
            (None, None, Some(custom)) => Ok(Payload::custom(custom.id, custom.value)),
            _ => Err(ConfigError::Invalid(format!(
                "trigger at tick {} needs exactly one of note, control or custom",
                self.offset(1)
            ))),
        }
    }

    /// Builds the trigger this configuration describes.
    pub fn to_trigger(
        &self,
        id: TriggerId,
        ticks_per_step: u32,
        channel: u8,
    ) -> Result<Trigger, ConfigError> {
        let mut trigger = Trigger::new(id, self.offset(ticks_per_step), self.payload(channel)?);
        if let Some(probability) = self.probability {
            trigger = trigger.with_probability(probability)?;
        }
        trigger.set_enabled(self.enabled.unwrap_or(true));
        Ok(trigger)
    }

    /// Describes an existing trigger. Offsets on a step boundary are written as
    /// steps alone.
    pub fn from_trigger(trigger: &Trigger, ticks_per_step: u32) -> TriggerConfig {
        let ticks_per_step = ticks_per_step.max(1) as u64;
        let step = (trigger.offset() / ticks_per_step) as u32;
        let tick = trigger.offset() % ticks_per_step;

        let mut config = TriggerConfig::at(Some(step), (tick != 0).then_some(tick));
        match trigger.payload() {
            Payload::Note(note) => {
                config.note = Some(Note {
                    channel: Some(note.channel),
                    note: note.note,
                    velocity: note.velocity,
                    length: note.length,
                })
            }
            Payload::Control(control) => {
                config.control = Some(Control {
                    channel: Some(control.channel),
                    controller: control.controller,
                    value: control.value,
                })
            }
            Payload::Custom(CustomPayload { id, value }) => {
                config.custom = Some(Custom {
                    id: *id,
                    value: *value,
                })
            }
        }
        if trigger.probability() < 1.0 {
            config.probability = Some(trigger.probability());
        }
        if !trigger.is_enabled() {
            config.enabled = Some(false);
        }
        config
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_offset() {
        let mut config = TriggerConfig::note(3, 60, 100, 0);
        assert_eq!(288, config.offset(96));
        config.tick = Some(5);
        assert_eq!(293, config.offset(96));
        config.step = None;
        assert_eq!(5, config.offset(96));
    }

    #[test]
    fn test_payload_channel_fallback() -> Result<(), Box<dyn Error>> {
        let config = TriggerConfig::note(0, 36, 90, 12);
        assert_eq!(Payload::note(10, 36, 90, 12), config.payload(10)?);

        let mut config = TriggerConfig::at(None, Some(4));
        config.control = Some(Control {
            channel: Some(2),
            controller: 7,
            value: 64,
        });
        assert_eq!(Payload::control(2, 7, 64), config.payload(10)?);
        Ok(())
    }

    #[test]
    fn test_exactly_one_payload() {
        let config = TriggerConfig::at(Some(1), None);
        assert!(matches!(config.payload(1), Err(ConfigError::Invalid(_))));

        let mut config = TriggerConfig::note(0, 36, 90, 12);
        config.custom = Some(Custom { id: 1, value: 1 });
        assert!(config.payload(1).is_err());
    }

    #[test]
    fn test_from_trigger() -> Result<(), Box<dyn Error>> {
        let mut trigger = Trigger::new(TriggerId(3), 100, Payload::control(1, 74, 20))
            .with_probability(0.5)?;
        trigger.set_enabled(false);

        let config = TriggerConfig::from_trigger(&trigger, 96);
        assert_eq!(Some(1), config.step);
        assert_eq!(Some(4), config.tick);
        assert_eq!(Some(0.5), config.probability);
        assert_eq!(Some(false), config.enabled);
        assert_eq!(trigger, config.to_trigger(TriggerId(3), 96, 1)?);
        Ok(())
    }
}
