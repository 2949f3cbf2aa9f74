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
use std::{
    collections::BTreeMap,
    fmt,
    ops::Range,
    sync::{
        atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering},
        Arc,
    },
};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, info, span, warn, Level};

use crate::error::{Entity, SequoiaError};
use crate::graph::AudioGraph;
use crate::noteoff::DEFAULT_NOTE_OFF_CAPACITY;
use crate::port::{
    Direction, InPortKind, Port, PortId, DEFAULT_LISTEN_CHANNEL, DEFAULT_QUEUE_CAPACITY,
    INPORT_MAX_SEQUENCES,
};
use crate::sequence::{ScanGate, Sequence, SequenceId};
use crate::transport::{
    validate_tempo, Clock, Position, TransportState, DEFAULT_BPM, DEFAULT_TICKS_PER_STEP,
    MAX_TICKS_PER_STEP,
};
use crate::trigger::{Payload, Trigger, TriggerId};

mod engine;
mod mutation;

pub use engine::{CycleReport, Engine, MAX_PORTS, MAX_SEQUENCES};

use mutation::{Mutation, Retired};

/// How many mutations can wait for the engine unless configured otherwise.
pub const DEFAULT_MUTATION_CAPACITY: usize = 1024;

/// The fixed parameters of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub name: String,
    /// Initial tempo in beats per minute.
    pub bpm: f32,
    pub ticks_per_step: u32,
    /// Capacity of each port queue.
    pub queue_capacity: usize,
    /// How many note offs can be pending at once.
    pub note_off_capacity: usize,
    /// How many mutations can wait for the next cycle.
    pub mutation_capacity: usize,
    /// Seeds trigger probability rolls. Seeded from entropy if unset.
    pub seed: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            name: "sequoia".to_string(),
            bpm: DEFAULT_BPM,
            ticks_per_step: DEFAULT_TICKS_PER_STEP,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            note_off_capacity: DEFAULT_NOTE_OFF_CAPACITY,
            mutation_capacity: DEFAULT_MUTATION_CAPACITY,
            seed: None,
        }
    }
}

impl Settings {
    fn validate(&self) -> Result<(), SequoiaError> {
        validate_tempo(self.bpm)?;
        if self.ticks_per_step == 0 || self.ticks_per_step > MAX_TICKS_PER_STEP {
            return Err(SequoiaError::invalid(format!(
                "ticks per step must be between 1 and {}",
                MAX_TICKS_PER_STEP
            )));
        }
        if self.queue_capacity == 0 || self.note_off_capacity == 0 || self.mutation_capacity == 0
        {
            return Err(SequoiaError::invalid("capacities must be at least 1"));
        }
        Ok(())
    }
}

/// State published by the engine after every cycle.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    position: AtomicU64,
    state: AtomicU8,
    bpm: AtomicU32,
    cycles: AtomicU64,
}

/// The control side view of a port.
#[derive(Debug, Clone)]
pub struct PortInfo {
    id: PortId,
    name: String,
    direction: Direction,
    kind: InPortKind,
    channel: u8,
    targets: Vec<SequenceId>,
    dropped: Arc<AtomicU64>,
}

impl PortInfo {
    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// What the port does with inbound notes. Always `None` for outputs.
    pub fn kind(&self) -> InPortKind {
        self.kind
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// The sequences an input port drives.
    pub fn targets(&self) -> &[SequenceId] {
        &self.targets
    }

    /// Events the port has dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The control handle of a session.
///
/// Every call is checked against a model of the session kept here and then
/// queued for the engine, which applies it at the start of its next cycle. The
/// model is what the session will look like once the queue has been applied.
pub struct Session {
    settings: Settings,
    sample_rate: u32,
    graph: Arc<dyn AudioGraph>,
    mutations: Sender<Mutation>,
    retired: Receiver<Retired>,
    shared: Arc<SharedState>,
    gate: ScanGate,
    sequences: BTreeMap<SequenceId, Sequence>,
    ports: BTreeMap<PortId, PortInfo>,
    next_sequence: u32,
    next_port: u32,
}

impl Session {
    /// Creates a session on top of an audio graph, returning the control handle
    /// and the engine to run from the graph's process callback. Fails if the
    /// graph cannot be reached.
    pub fn create(
        settings: Settings,
        graph: Arc<dyn AudioGraph>,
    ) -> Result<(Session, Engine), SequoiaError> {
        let span = span!(Level::INFO, "create session");
        let _enter = span.enter();

        settings.validate()?;
        let sample_rate = graph.sample_rate()?;
        if sample_rate == 0 {
            return Err(SequoiaError::invalid(format!(
                "audio graph {} reported a sample rate of 0",
                graph
            )));
        }

        let (mutation_tx, mutation_rx) = crossbeam_channel::bounded(settings.mutation_capacity);
        // Every mutation retires at most one item, and the control side drains
        // before each send.
        let (retired_tx, retired_rx) =
            crossbeam_channel::bounded(settings.mutation_capacity * 2);
        let shared = Arc::new(SharedState::default());
        shared.bpm.store(settings.bpm.to_bits(), Ordering::Release);
        let gate = ScanGate::new();

        let engine = Engine::new(
            Clock::new(sample_rate, settings.ticks_per_step, settings.bpm),
            settings.note_off_capacity,
            settings.seed,
            gate.clone(),
            mutation_rx,
            settings.mutation_capacity,
            retired_tx,
            shared.clone(),
        );

        info!(
            session = settings.name,
            graph = %graph,
            sample_rate,
            bpm = settings.bpm,
            ticks_per_step = settings.ticks_per_step,
            "Created session."
        );

        Ok((
            Session {
                settings,
                sample_rate,
                graph,
                mutations: mutation_tx,
                retired: retired_rx,
                shared,
                gate,
                sequences: BTreeMap::new(),
                ports: BTreeMap::new(),
                next_sequence: 1,
                next_port: 1,
            },
            engine,
        ))
    }

    /// Tears the session down: stops the transport, removes every port from the
    /// graph and disconnects from it.
    pub fn destroy(self) -> Result<(), SequoiaError> {
        let span = span!(Level::INFO, "destroy session");
        let _enter = span.enter();

        if let Err(e) = self.send(Mutation::Stop) {
            debug!(err = %e, "Engine did not take the stop request.");
        }
        self.reclaim();
        for id in self.ports.keys() {
            if let Err(e) = self.graph.unregister_port(*id) {
                warn!(port = %id, err = %e, "Unable to unregister port.");
            }
        }
        // Ports still waiting for the engine to let go go with the graph.
        self.graph.shutdown()?;

        info!(session = self.settings.name, "Destroyed session.");
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn ticks_per_step(&self) -> u32 {
        self.settings.ticks_per_step
    }

    /// Starts playing from the current position. Does nothing if already playing.
    pub fn start(&self) -> Result<(), SequoiaError> {
        self.send(Mutation::Start)?;
        info!(session = self.settings.name, "Starting.");
        Ok(())
    }

    /// Stops playing and rewinds to the top.
    pub fn stop(&self) -> Result<(), SequoiaError> {
        self.send(Mutation::Stop)?;
        info!(session = self.settings.name, "Stopping.");
        Ok(())
    }

    /// Stops playing and keeps the position.
    pub fn pause(&self) -> Result<(), SequoiaError> {
        self.send(Mutation::Pause)?;
        info!(session = self.settings.name, "Pausing.");
        Ok(())
    }

    /// Changes the tempo from the next cycle on.
    pub fn set_tempo(&mut self, bpm: f32) -> Result<(), SequoiaError> {
        let bpm = validate_tempo(bpm)?;
        self.send(Mutation::SetTempo(bpm))?;
        self.settings.bpm = bpm;
        info!(session = self.settings.name, bpm, "Changed tempo.");
        Ok(())
    }

    /// The tempo most recently requested.
    pub fn tempo(&self) -> f32 {
        self.settings.bpm
    }

    /// The tempo the engine is running at.
    pub fn running_tempo(&self) -> f32 {
        f32::from_bits(self.shared.bpm.load(Ordering::Acquire))
    }

    /// The position as of the last completed cycle.
    pub fn position(&self) -> Position {
        Position::from_raw(self.shared.position.load(Ordering::Acquire))
    }

    /// The transport state as of the last completed cycle.
    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Cycles the engine has completed.
    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Acquire)
    }

    /// Whether the engine is scanning sequences right now.
    pub fn is_scanning(&self) -> bool {
        self.gate.is_held()
    }

    /// Adds an empty sequence of `length` ticks.
    pub fn add_sequence(&mut self, name: &str, length: u64) -> Result<SequenceId, SequoiaError> {
        self.insert_sequence(Sequence::new(name, length)?)
    }

    /// Adds a fully built sequence, triggers and all.
    pub fn insert_sequence(&mut self, mut sequence: Sequence) -> Result<SequenceId, SequoiaError> {
        if self.sequences.len() >= MAX_SEQUENCES {
            return Err(SequoiaError::invalid(format!(
                "session already holds {} sequences",
                MAX_SEQUENCES
            )));
        }
        if let Some(outport) = sequence.outport() {
            self.output(outport)?;
        }

        let id = SequenceId(self.next_sequence);
        let mut running = sequence.clone();
        running.attach(id, self.gate.clone());
        running.reserve();
        self.send(Mutation::AddSequence(Box::new(running)))?;

        sequence.attach(id, ScanGate::new());
        info!(
            session = self.settings.name,
            sequence = %id,
            name = sequence.name(),
            length = sequence.length(),
            triggers = sequence.triggers().len(),
            "Added sequence."
        );
        self.sequences.insert(id, sequence);
        self.next_sequence += 1;
        Ok(id)
    }

    pub fn remove_sequence(&mut self, id: SequenceId) -> Result<(), SequoiaError> {
        self.sequence(id)?;
        self.send(Mutation::RemoveSequence(id))?;
        self.sequences.remove(&id);
        for port in self.ports.values_mut() {
            port.targets.retain(|target| *target != id);
        }
        info!(session = self.settings.name, sequence = %id, "Removed sequence.");
        Ok(())
    }

    pub fn rename_sequence(&mut self, id: SequenceId, name: &str) -> Result<(), SequoiaError> {
        self.sequence(id)?;
        self.send(Mutation::RenameSequence(id, name.to_string()))?;
        self.sequence_mut(id)?.set_name(name);
        Ok(())
    }

    /// Gets the control side model of a sequence.
    pub fn sequence(&self, id: SequenceId) -> Result<&Sequence, SequoiaError> {
        self.sequences
            .get(&id)
            .ok_or(SequoiaError::NotFound(Entity::Sequence(id)))
    }

    pub fn sequences(&self) -> impl Iterator<Item = &Sequence> {
        self.sequences.values()
    }

    /// Adds a trigger to a sequence and returns its ID.
    pub fn add_trigger(
        &mut self,
        sequence: SequenceId,
        offset: u64,
        payload: Payload,
    ) -> Result<TriggerId, SequoiaError> {
        self.insert_trigger(sequence, Trigger::new(TriggerId(0), offset, payload))
    }

    /// Adds a prepared trigger to a sequence. The trigger is given a fresh ID,
    /// which is returned.
    pub fn insert_trigger(
        &mut self,
        sequence: SequenceId,
        trigger: Trigger,
    ) -> Result<TriggerId, SequoiaError> {
        let model = self.sequence(sequence)?;
        let id = model.peek_trigger_id();
        let trigger = trigger.with_id(id);
        model.check_insert(&trigger)?;

        self.send(Mutation::AddTrigger(sequence, trigger.clone()))?;
        self.sequence_mut(sequence)?.insert_trigger(trigger)?;
        Ok(id)
    }

    pub fn remove_trigger(
        &mut self,
        sequence: SequenceId,
        trigger: TriggerId,
    ) -> Result<(), SequoiaError> {
        self.trigger(sequence, trigger)?;
        self.send(Mutation::RemoveTrigger(sequence, trigger))?;
        self.sequence_mut(sequence)?.remove_trigger(trigger)?;
        Ok(())
    }

    pub fn set_trigger_enabled(
        &mut self,
        sequence: SequenceId,
        trigger: TriggerId,
        enabled: bool,
    ) -> Result<(), SequoiaError> {
        self.trigger(sequence, trigger)?;
        self.send(Mutation::SetTriggerEnabled(sequence, trigger, enabled))?;
        self.sequence_mut(sequence)?
            .set_trigger_enabled(trigger, enabled)
    }

    /// Points a sequence at an output port, or at nothing.
    pub fn set_sequence_outport(
        &mut self,
        sequence: SequenceId,
        outport: Option<PortId>,
    ) -> Result<(), SequoiaError> {
        self.sequence(sequence)?;
        if let Some(outport) = outport {
            self.output(outport)?;
        }
        self.send(Mutation::SetOutport(sequence, outport))?;
        self.sequence_mut(sequence)?.set_outport(outport);
        Ok(())
    }

    pub fn set_transpose(&mut self, sequence: SequenceId, transpose: i32) -> Result<(), SequoiaError> {
        self.sequence(sequence)?;
        self.send(Mutation::SetTranspose(sequence, transpose))?;
        self.sequence_mut(sequence)?.set_transpose(transpose);
        Ok(())
    }

    pub fn set_mute(&mut self, sequence: SequenceId, mute: bool) -> Result<(), SequoiaError> {
        self.sequence(sequence)?;
        self.send(Mutation::SetMute(sequence, mute))?;
        self.sequence_mut(sequence)?.set_mute(mute);
        Ok(())
    }

    pub fn set_clock_divide(&mut self, sequence: SequenceId, divide: u32) -> Result<(), SequoiaError> {
        self.sequence(sequence)?;
        if divide == 0 {
            return Err(SequoiaError::invalid("clock divide must be at least 1"));
        }
        self.send(Mutation::SetClockDivide(sequence, divide))?;
        self.sequence_mut(sequence)?.set_clock_divide(divide)
    }

    /// Moves the playhead of a sequence to the given tick of its loop.
    pub fn set_playhead(&mut self, sequence: SequenceId, tick: u64) -> Result<(), SequoiaError> {
        self.sequence(sequence)?;
        self.send(Mutation::SetPlayhead(sequence, tick))?;
        self.sequence_mut(sequence)?.set_playhead(tick);
        Ok(())
    }

    /// Makes a sequence loop back to `step` instead of its top. The last step
    /// moves along if it came before.
    pub fn set_first(&mut self, sequence: SequenceId, step: u32) -> Result<(), SequoiaError> {
        let ticks = self.step_ticks(sequence, step)?;
        self.send(Mutation::SetFirst(sequence, ticks.clone()))?;
        self.sequence_mut(sequence)?.set_first(ticks)
    }

    /// Makes a sequence loop after playing `step`. The first step moves along if
    /// it came after.
    pub fn set_last(&mut self, sequence: SequenceId, step: u32) -> Result<(), SequoiaError> {
        let ticks = self.step_ticks(sequence, step)?;
        self.send(Mutation::SetLast(sequence, ticks.clone()))?;
        self.sequence_mut(sequence)?.set_last(ticks)
    }

    fn step_ticks(&self, sequence: SequenceId, step: u32) -> Result<Range<u64>, SequoiaError> {
        let found = self.sequence(sequence)?;
        let ticks_per_step = self.settings.ticks_per_step as u64;
        if step as u64 >= found.steps(self.settings.ticks_per_step) {
            return Err(SequoiaError::invalid(format!(
                "step {} is outside of sequence '{}' ({} steps)",
                step,
                found.name(),
                found.steps(self.settings.ticks_per_step)
            )));
        }
        let start = step as u64 * ticks_per_step;
        Ok(start..(start + ticks_per_step).min(found.length()))
    }

    /// Registers a port with the audio graph and adds it to the session.
    pub fn add_port(&mut self, name: &str, direction: Direction) -> Result<PortId, SequoiaError> {
        if self.ports.len() >= MAX_PORTS {
            return Err(SequoiaError::invalid(format!(
                "session already holds {} ports",
                MAX_PORTS
            )));
        }
        if self.ports.values().any(|port| port.name == name) {
            return Err(SequoiaError::invalid(format!(
                "a port named '{}' already exists",
                name
            )));
        }

        let id = PortId(self.next_port);
        self.graph.register_port(id, name, direction)?;

        let dropped = Arc::new(AtomicU64::new(0));
        let port = Port::new(
            id,
            name,
            direction,
            self.settings.queue_capacity,
            dropped.clone(),
        );
        if let Err(e) = self.send(Mutation::AddPort(Box::new(port))) {
            if let Err(e) = self.graph.unregister_port(id) {
                warn!(port = %id, err = %e, "Unable to unregister port.");
            }
            return Err(e);
        }

        info!(
            session = self.settings.name,
            port = %id,
            name,
            %direction,
            "Added port."
        );
        self.ports.insert(
            id,
            PortInfo {
                id,
                name: name.to_string(),
                direction,
                kind: InPortKind::None,
                channel: DEFAULT_LISTEN_CHANNEL,
                targets: Vec::new(),
                dropped,
            },
        );
        self.next_port += 1;
        Ok(id)
    }

    /// Removes a port from the session. Sequences that targeted it fall silent.
    /// The graph endpoint stays until the engine has let go of the port at the
    /// next cycle boundary, and is unregistered by `reclaim`. Its name cannot be
    /// reused until then.
    pub fn remove_port(&mut self, id: PortId) -> Result<(), SequoiaError> {
        self.port(id)?;
        self.send(Mutation::RemovePort(id))?;
        self.ports.remove(&id);
        for sequence in self.sequences.values_mut() {
            if sequence.outport() == Some(id) {
                sequence.set_outport(None);
            }
        }
        info!(session = self.settings.name, port = %id, "Removed port.");
        Ok(())
    }

    pub fn rename_port(&mut self, id: PortId, name: &str) -> Result<(), SequoiaError> {
        self.port(id)?;
        if self
            .ports
            .values()
            .any(|port| port.id != id && port.name == name)
        {
            return Err(SequoiaError::invalid(format!(
                "a port named '{}' already exists",
                name
            )));
        }
        self.graph.rename_port(id, name)?;
        self.send(Mutation::RenamePort(id, name.to_string()))?;
        if let Some(port) = self.ports.get_mut(&id) {
            port.name = name.to_string();
        }
        Ok(())
    }

    /// Sets what an input port does with the notes it receives on `channel`.
    pub fn set_inport_kind(
        &mut self,
        id: PortId,
        kind: InPortKind,
        channel: u8,
    ) -> Result<(), SequoiaError> {
        self.input(id)?;
        if !(1..=16).contains(&channel) {
            return Err(SequoiaError::invalid(format!(
                "listening channel must be within [1, 16], got {}",
                channel
            )));
        }
        self.send(Mutation::SetInPortKind(id, kind, channel))?;
        if let Some(port) = self.ports.get_mut(&id) {
            port.kind = kind;
            port.channel = channel;
        }
        info!(session = self.settings.name, port = %id, %kind, channel, "Changed input port kind.");
        Ok(())
    }

    /// Makes an input port drive a sequence.
    pub fn add_inport_sequence(
        &mut self,
        id: PortId,
        sequence: SequenceId,
    ) -> Result<(), SequoiaError> {
        self.sequence(sequence)?;
        let port = self.input(id)?;
        if port.targets.contains(&sequence) {
            return Ok(());
        }
        if port.targets.len() >= INPORT_MAX_SEQUENCES {
            return Err(SequoiaError::invalid(format!(
                "input port '{}' already drives {} sequences",
                port.name, INPORT_MAX_SEQUENCES
            )));
        }
        self.send(Mutation::AddInPortSequence(id, sequence))?;
        if let Some(port) = self.ports.get_mut(&id) {
            port.targets.push(sequence);
        }
        Ok(())
    }

    pub fn port(&self, id: PortId) -> Result<&PortInfo, SequoiaError> {
        self.ports
            .get(&id)
            .ok_or(SequoiaError::NotFound(Entity::Port(id)))
    }

    pub fn ports(&self) -> impl Iterator<Item = &PortInfo> {
        self.ports.values()
    }

    /// Events a port has dropped because its queue was full.
    pub fn dropped_events(&self, id: PortId) -> Result<u64, SequoiaError> {
        Ok(self.port(id)?.dropped())
    }

    /// Builds a session file describing the session as modelled here.
    pub fn snapshot(&self) -> Result<crate::config::SessionFile, SequoiaError> {
        crate::config::SessionFile::from_session(self)
    }

    fn sequence_mut(&mut self, id: SequenceId) -> Result<&mut Sequence, SequoiaError> {
        self.sequences
            .get_mut(&id)
            .ok_or(SequoiaError::NotFound(Entity::Sequence(id)))
    }

    fn trigger(&self, sequence: SequenceId, trigger: TriggerId) -> Result<&Trigger, SequoiaError> {
        self.sequence(sequence)?
            .trigger(trigger)
            .ok_or(SequoiaError::NotFound(Entity::Trigger(sequence, trigger)))
    }

    fn output(&self, id: PortId) -> Result<&PortInfo, SequoiaError> {
        let port = self.port(id)?;
        if port.direction != Direction::Out {
            return Err(SequoiaError::invalid(format!("{} is not an output", id)));
        }
        Ok(port)
    }

    fn input(&self, id: PortId) -> Result<&PortInfo, SequoiaError> {
        let port = self.port(id)?;
        if port.direction != Direction::In {
            return Err(SequoiaError::invalid(format!("{} is not an input", id)));
        }
        Ok(port)
    }

    fn send(&self, mutation: Mutation) -> Result<(), SequoiaError> {
        self.reclaim();
        self.mutations.try_send(mutation).map_err(|e| match e {
            TrySendError::Full(_) => {
                SequoiaError::invalid("too many pending changes, wait for the next cycle")
            }
            TrySendError::Disconnected(_) => SequoiaError::invalid("the engine is gone"),
        })
    }

    /// Frees whatever the engine has handed back, unregistering removed ports
    /// from the graph now that no cycle can touch them. Runs before every change;
    /// call it directly to release ports while the session is otherwise idle.
    pub fn reclaim(&self) -> usize {
        let mut count = 0;
        for retired in self.retired.try_iter() {
            count += 1;
            if let Retired::Port(port) = retired {
                match self.graph.unregister_port(port.id()) {
                    Ok(()) => debug!(port = %port.id(), "Unregistered removed port."),
                    Err(e) => warn!(port = %port.id(), err = %e, "Unable to unregister port."),
                }
            }
        }
        if count > 0 {
            debug!(session = self.settings.name, count, "Freed retired items.");
        }
        count
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Session {} ({} BPM, {} ticks per step, {} Hz):",
            self.settings.name, self.settings.bpm, self.settings.ticks_per_step, self.sample_rate
        )?;
        for port in self.ports.values() {
            writeln!(f, "  - {} ({}, {})", port.name, port.id, port.direction)?;
        }
        for (id, sequence) in self.sequences.iter() {
            writeln!(f, "  - sequence {}: {}", id, sequence)?;
        }
        Ok(())
    }
}
