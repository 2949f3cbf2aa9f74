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
use std::{collections::HashMap, ops::Range, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::{info, span, Level};

use super::error::ConfigError;
use super::trigger::TriggerConfig;
use crate::error::SequoiaError;
use crate::graph::AudioGraph;
use crate::port::{Direction, InPortKind, PortId, DEFAULT_LISTEN_CHANNEL};
use crate::sequence::{Sequence, SequenceId};
use crate::session::{Engine, Session, Settings};
use crate::transport::{DEFAULT_BPM, DEFAULT_TICKS_PER_STEP};
use crate::trigger::TriggerId;

fn default_bpm() -> f32 {
    DEFAULT_BPM
}

fn default_ticks_per_step() -> u32 {
    DEFAULT_TICKS_PER_STEP
}

/// Engine capacities. Anything left out keeps its default.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct EngineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    queue_capacity: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    note_off_capacity: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mutation_capacity: Option<usize>,
    /// Seeds trigger probability rolls so that renders repeat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

/// A YAML representation of an input port.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct InPortConfig {
    name: String,
    #[serde(default)]
    kind: InPortKind,
    /// The channel to listen on. Defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel: Option<u8>,
    /// Names of the sequences the port drives.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    sequences: Vec<String>,
}

impl InPortConfig {
    pub fn new(name: &str, kind: InPortKind, channel: u8, sequences: &[String]) -> InPortConfig {
        InPortConfig {
            name: name.to_string(),
            kind,
            channel: Some(channel),
            sequences: sequences.to_owned(),
        }
    }
}

/// A YAML representation of a sequence.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SequenceConfig {
    name: String,
    /// Loop length in steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    steps: Option<u32>,
    /// Loop length in ticks, for loops that don't end on a step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    /// Name of the output port to play through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    outport: Option<String>,
    /// MIDI channel for triggers that don't name one. Defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transpose: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mute: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    clock_divide: Option<u32>,
    /// The step playback loops back to. Defaults to the first one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    first: Option<u32>,
    /// The last step played before looping. Defaults to the final one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last: Option<u32>,
    #[serde(default)]
    triggers: Vec<TriggerConfig>,
}

impl SequenceConfig {
    pub fn new(
        name: &str,
        steps: u32,
        outport: Option<&str>,
        triggers: Vec<TriggerConfig>,
    ) -> SequenceConfig {
        SequenceConfig {
            name: name.to_string(),
            steps: Some(steps),
            length: None,
            outport: outport.map(str::to_string),
            channel: None,
            transpose: None,
            mute: None,
            clock_divide: None,
            first: None,
            last: None,
            triggers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn triggers(&self) -> &[TriggerConfig] {
        &self.triggers
    }

    /// Sets the steps playback loops between.
    pub fn with_loop(mut self, first: u32, last: u32) -> SequenceConfig {
        self.first = Some(first);
        self.last = Some(last);
        self
    }

    /// The loop length in ticks.
    fn length(&self, ticks_per_step: u32) -> Result<u64, ConfigError> {
        match (self.steps, self.length) {
            (Some(steps), None) => Ok(steps as u64 * ticks_per_step as u64),
            (None, Some(length)) => Ok(length),
            _ => Err(ConfigError::Invalid(format!(
                "sequence '{}' needs exactly one of steps or length",
                self.name
            ))),
        }
    }

    /// Builds the sequence, resolving the output port by name.
    fn to_sequence(
        &self,
        ticks_per_step: u32,
        outports: &HashMap<String, PortId>,
    ) -> Result<Sequence, ConfigError> {
        let mut sequence = Sequence::new(&self.name, self.length(ticks_per_step)?)?;
        if let Some(outport) = &self.outport {
            let id = outports.get(outport).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "sequence '{}' plays through unknown output port '{}'",
                    self.name, outport
                ))
            })?;
            sequence.set_outport(Some(*id));
        }
        sequence.set_transpose(self.transpose.unwrap_or(0));
        sequence.set_mute(self.mute.unwrap_or(false));
        sequence.set_clock_divide(self.clock_divide.unwrap_or(1))?;
        let loop_error = |e: SequoiaError| {
            ConfigError::Invalid(format!("sequence '{}': {}", self.name, e))
        };
        if let Some(first) = self.first {
            sequence
                .set_first(self.step_ticks(&sequence, first, ticks_per_step)?)
                .map_err(loop_error)?;
        }
        if let Some(last) = self.last {
            let ticks = self.step_ticks(&sequence, last, ticks_per_step)?;
            if ticks.start < sequence.first() {
                return Err(ConfigError::Invalid(format!(
                    "sequence '{}' loops back to a step after its last one",
                    self.name
                )));
            }
            sequence.set_last(ticks).map_err(loop_error)?;
        }

        let channel = self.channel.unwrap_or(1);
        for (i, trigger) in self.triggers.iter().enumerate() {
            let trigger = trigger.to_trigger(TriggerId(i as u32 + 1), ticks_per_step, channel)?;
            sequence.insert_trigger(trigger).map_err(|e| {
                ConfigError::Invalid(format!("sequence '{}': {}", self.name, e))
            })?;
        }
        Ok(sequence)
    }

    /// The ticks a loop point covers.
    fn step_ticks(
        &self,
        sequence: &Sequence,
        step: u32,
        ticks_per_step: u32,
    ) -> Result<Range<u64>, ConfigError> {
        if step as u64 >= sequence.steps(ticks_per_step) {
            return Err(ConfigError::Invalid(format!(
                "sequence '{}' has no step {} to loop on",
                self.name, step
            )));
        }
        let start = step as u64 * ticks_per_step as u64;
        Ok(start..(start + ticks_per_step as u64).min(sequence.length()))
    }

    fn from_sequence(
        sequence: &Sequence,
        ticks_per_step: u32,
        outport: Option<&str>,
    ) -> SequenceConfig {
        let ticks = ticks_per_step as u64;
        let (steps, length) = if sequence.length() % ticks == 0 {
            (Some((sequence.length() / ticks) as u32), None)
        } else {
            (None, Some(sequence.length()))
        };
        SequenceConfig {
            name: sequence.name().to_string(),
            steps,
            length,
            outport: outport.map(str::to_string),
            channel: None,
            transpose: (sequence.transpose() != 0).then_some(sequence.transpose()),
            mute: sequence.is_muted().then_some(true),
            clock_divide: (sequence.clock_divide() != 1).then_some(sequence.clock_divide()),
            first: (sequence.first() != 0).then_some((sequence.first() / ticks) as u32),
            last: (sequence.last() != sequence.length() - 1)
                .then_some((sequence.last() / ticks) as u32),
            triggers: sequence
                .triggers()
                .iter()
                .map(|trigger| TriggerConfig::from_trigger(trigger, ticks_per_step))
                .collect(),
        }
    }
}

/// A session file: everything needed to rebuild a session.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SessionFile {
    name: String,
    #[serde(default = "default_bpm")]
    bpm: f32,
    #[serde(default = "default_ticks_per_step")]
    ticks_per_step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    engine: Option<EngineConfig>,
    #[serde(default)]
    outports: Vec<String>,
    #[serde(default)]
    inports: Vec<InPortConfig>,
    #[serde(default)]
    sequences: Vec<SequenceConfig>,
}

impl SessionFile {
    /// Creates a new session file.
    pub fn new(
        name: &str,
        bpm: f32,
        outports: &[String],
        inports: Vec<InPortConfig>,
        sequences: Vec<SequenceConfig>,
    ) -> SessionFile {
        SessionFile {
            name: name.to_string(),
            bpm,
            ticks_per_step: DEFAULT_TICKS_PER_STEP,
            engine: None,
            outports: outports.to_owned(),
            inports,
            sequences,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    pub fn ticks_per_step(&self) -> u32 {
        self.ticks_per_step
    }

    pub fn sequences(&self) -> &[SequenceConfig] {
        &self.sequences
    }

    /// The session settings this file describes. The mutation queue is made
    /// large enough to take the whole file at once.
    pub fn settings(&self) -> Settings {
        let defaults = Settings::default();
        let engine = self.engine.clone().unwrap_or_default();
        Settings {
            name: self.name.clone(),
            bpm: self.bpm,
            ticks_per_step: self.ticks_per_step,
            queue_capacity: engine.queue_capacity.unwrap_or(defaults.queue_capacity),
            note_off_capacity: engine
                .note_off_capacity
                .unwrap_or(defaults.note_off_capacity),
            mutation_capacity: engine
                .mutation_capacity
                .unwrap_or(defaults.mutation_capacity)
                .max(self.mutations_needed()),
            seed: engine.seed,
        }
    }

    /// The changes `populate` queues before the engine has run a cycle, plus one
    /// to start the transport.
    fn mutations_needed(&self) -> usize {
        let inports: usize = self
            .inports
            .iter()
            .map(|inport| 2 + inport.sequences.len())
            .sum();
        self.outports.len() + self.sequences.len() + inports + 1
    }

    /// Creates the session this file describes on top of the given graph.
    pub fn build(&self, graph: Arc<dyn AudioGraph>) -> Result<(Session, Engine), ConfigError> {
        let (mut session, engine) = Session::create(self.settings(), graph)?;
        self.populate(&mut session)?;
        Ok((session, engine))
    }

    /// Adds the ports and sequences of this file to a session.
    pub fn populate(&self, session: &mut Session) -> Result<(), ConfigError> {
        let span = span!(Level::INFO, "populate session");
        let _enter = span.enter();

        let mut outports = HashMap::new();
        for name in self.outports.iter() {
            outports.insert(name.clone(), session.add_port(name, Direction::Out)?);
        }

        let mut sequences: HashMap<&str, SequenceId> = HashMap::new();
        for config in self.sequences.iter() {
            if sequences.contains_key(config.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "sequence name '{}' is used more than once",
                    config.name
                )));
            }
            let sequence = config.to_sequence(session.ticks_per_step(), &outports)?;
            sequences.insert(&config.name, session.insert_sequence(sequence)?);
        }

        for config in self.inports.iter() {
            let id = session.add_port(&config.name, Direction::In)?;
            session.set_inport_kind(
                id,
                config.kind,
                config.channel.unwrap_or(DEFAULT_LISTEN_CHANNEL),
            )?;
            for name in config.sequences.iter() {
                let sequence = sequences.get(name.as_str()).ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "input port '{}' drives unknown sequence '{}'",
                        config.name, name
                    ))
                })?;
                session.add_inport_sequence(id, *sequence)?;
            }
        }

        info!(
            session = self.name,
            outports = self.outports.len(),
            inports = self.inports.len(),
            sequences = self.sequences.len(),
            "Loaded session."
        );
        Ok(())
    }

    /// Describes the given session.
    pub fn from_session(session: &Session) -> Result<SessionFile, SequoiaError> {
        let settings = session.settings();
        let ticks_per_step = settings.ticks_per_step;

        let mut sequence_names: HashMap<SequenceId, &str> = HashMap::new();
        for sequence in session.sequences() {
            if sequence_names.values().any(|name| *name == sequence.name()) {
                return Err(SequoiaError::invalid(format!(
                    "sequence name '{}' is used more than once",
                    sequence.name()
                )));
            }
            sequence_names.insert(sequence.id(), sequence.name());
        }

        let outports: Vec<String> = session
            .ports()
            .filter(|port| port.direction() == Direction::Out)
            .map(|port| port.name().to_string())
            .collect();
        let inports = session
            .ports()
            .filter(|port| port.direction() == Direction::In)
            .map(|port| {
                let targets: Vec<String> = port
                    .targets()
                    .iter()
                    .filter_map(|id| sequence_names.get(id).map(|name| name.to_string()))
                    .collect();
                InPortConfig::new(port.name(), port.kind(), port.channel(), &targets)
            })
            .collect();
        let sequences = session
            .sequences()
            .map(|sequence| {
                let outport = sequence
                    .outport()
                    .and_then(|id| session.port(id).ok())
                    .map(|port| port.name());
                SequenceConfig::from_sequence(sequence, ticks_per_step, outport)
            })
            .collect();

        let defaults = Settings::default();
        let engine = EngineConfig {
            queue_capacity: (settings.queue_capacity != defaults.queue_capacity)
                .then_some(settings.queue_capacity),
            note_off_capacity: (settings.note_off_capacity != defaults.note_off_capacity)
                .then_some(settings.note_off_capacity),
            mutation_capacity: (settings.mutation_capacity != defaults.mutation_capacity)
                .then_some(settings.mutation_capacity),
            seed: settings.seed,
        };

        Ok(SessionFile {
            name: settings.name.clone(),
            bpm: session.tempo(),
            ticks_per_step,
            engine: (engine != EngineConfig::default()).then_some(engine),
            outports,
            inports,
            sequences,
        })
    }
}
