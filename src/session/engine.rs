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
use std::ops::Range;
use std::sync::{atomic::Ordering, Arc};

use crossbeam_channel::{Receiver, Sender};
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::mutation::{Mutation, Retired};
use super::SharedState;
use crate::error::{Entity, SequoiaError};
use crate::event::Event;
use crate::graph::CycleIo;
use crate::noteoff::{NoteOffPool, PendingOff};
use crate::port::{action, Action, Port, PortId, TransportCommand};
use crate::sequence::{ScanGate, Sequence, SequenceId};
use crate::transport::{Clock, Position, Span, TransportState};
use crate::trigger::{transposed, Payload};

/// The most sequences a session can hold.
pub const MAX_SEQUENCES: usize = 256;

/// The most ports a session can hold.
pub const MAX_PORTS: usize = 64;

/// What happened during one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// The stretch of the timeline the cycle covered.
    pub start: Position,
    pub end: Position,
    /// Mutations applied at the start of the cycle.
    pub applied: usize,
    /// Mutations that could not be applied.
    pub rejected: usize,
    /// Inbound events received on input ports.
    pub received: usize,
    /// Trigger payloads routed to output ports.
    pub fired: usize,
    /// Note offs routed to output ports.
    pub released: usize,
    /// Events lost to full queues, including note offs that did not fit in the
    /// pool.
    pub dropped: usize,
    /// Events the audio graph refused.
    pub write_errors: usize,
}

/// The real-time half of a session. Owned by whatever drives the audio graph,
/// which calls `process_cycle` once per cycle.
pub struct Engine {
    clock: Clock,
    state: TransportState,
    sequences: Vec<Box<Sequence>>,
    ports: Vec<Box<Port>>,
    note_offs: NoteOffPool,
    gate: ScanGate,
    rng: StdRng,
    /// Set when the transport leaves the playing state. Held notes are released
    /// at the start of the next cycle.
    release_pending: bool,
    mutations: Receiver<Mutation>,
    mutation_limit: usize,
    retired: Sender<Retired>,
    shared: Arc<SharedState>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        clock: Clock,
        note_off_capacity: usize,
        seed: Option<u64>,
        gate: ScanGate,
        mutations: Receiver<Mutation>,
        mutation_limit: usize,
        retired: Sender<Retired>,
        shared: Arc<SharedState>,
    ) -> Engine {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Engine {
            clock,
            state: TransportState::Stopped,
            sequences: Vec::with_capacity(MAX_SEQUENCES),
            ports: Vec::with_capacity(MAX_PORTS),
            note_offs: NoteOffPool::new(note_off_capacity),
            gate,
            rng,
            release_pending: false,
            mutations,
            mutation_limit,
            retired,
            shared,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn position(&self) -> Position {
        self.clock.position()
    }

    pub fn bpm(&self) -> f32 {
        self.clock.bpm()
    }

    pub fn sequences(&self) -> impl Iterator<Item = &Sequence> {
        self.sequences.iter().map(|sequence| sequence.as_ref())
    }

    pub fn sequence(&self, id: SequenceId) -> Option<&Sequence> {
        self.sequences().find(|sequence| sequence.id() == id)
    }

    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports
            .iter()
            .map(|port| port.as_ref())
            .find(|port| port.id() == id)
    }

    /// Note offs waiting to be sent.
    pub fn pending_note_offs(&self) -> usize {
        self.note_offs.len()
    }

    /// Runs one cycle of `n_frames` frames against the audio graph. Never blocks
    /// and never fails: anything that goes wrong is counted in the report.
    pub fn process_cycle(&mut self, n_frames: u32, io: &mut dyn CycleIo) -> CycleReport {
        let mut report = CycleReport::default();

        self.apply_mutations(&mut report);
        self.receive(io, &mut report);

        let span = if self.state == TransportState::Playing {
            self.clock.advance(n_frames)
        } else {
            Span::idle(self.clock.position(), n_frames)
        };
        report.start = span.start();
        report.end = span.end();

        self.release(&span, &mut report);
        if self.state == TransportState::Playing {
            self.scan(&span, &mut report);
        }
        self.flush(io, &mut report);
        self.publish();

        report
    }

    fn apply_mutations(&mut self, report: &mut CycleReport) {
        while report.applied + report.rejected < self.mutation_limit {
            let mutation = match self.mutations.try_recv() {
                Ok(mutation) => mutation,
                Err(_) => break,
            };
            match self.apply(mutation) {
                Ok(()) => report.applied += 1,
                Err(_) => report.rejected += 1,
            }
        }
    }

    fn apply(&mut self, mutation: Mutation) -> Result<(), SequoiaError> {
        match mutation {
            Mutation::Start => self.start(),
            Mutation::Stop => self.stop(),
            Mutation::Pause => self.pause(),
            Mutation::SetTempo(bpm) => self.clock.set_bpm(bpm)?,
            Mutation::AddSequence(sequence) => {
                if self.sequences.len() >= MAX_SEQUENCES {
                    self.retire(Retired::Sequence(sequence));
                    return Err(SequoiaError::invalid("session is full of sequences"));
                }
                self.sequences.push(sequence);
            }
            Mutation::RemoveSequence(id) => {
                let index = self
                    .sequences
                    .iter()
                    .position(|sequence| sequence.id() == id)
                    .ok_or(SequoiaError::NotFound(Entity::Sequence(id)))?;
                let sequence = self.sequences.remove(index);
                for port in self.ports.iter_mut() {
                    if let Port::In(port) = port.as_mut() {
                        port.remove_target(id);
                    }
                }
                self.retire(Retired::Sequence(sequence));
            }
            Mutation::RenameSequence(id, name) => {
                let old = self.sequence_mut(id)?.replace_name(name);
                self.retire(Retired::Name(old));
            }
            Mutation::AddTrigger(id, trigger) => self.sequence_mut(id)?.insert_trigger(trigger)?,
            Mutation::RemoveTrigger(id, trigger) => {
                self.sequence_mut(id)?.remove_trigger(trigger)?;
            }
            Mutation::SetTriggerEnabled(id, trigger, enabled) => {
                self.sequence_mut(id)?.set_trigger_enabled(trigger, enabled)?
            }
            Mutation::SetOutport(id, port) => self.sequence_mut(id)?.set_outport(port),
            Mutation::SetTranspose(id, transpose) => self.sequence_mut(id)?.set_transpose(transpose),
            Mutation::SetMute(id, mute) => self.sequence_mut(id)?.set_mute(mute),
            Mutation::SetClockDivide(id, divide) => self.sequence_mut(id)?.set_clock_divide(divide)?,
            Mutation::SetPlayhead(id, tick) => self.sequence_mut(id)?.set_playhead(tick),
            Mutation::SetFirst(id, tick) => self.sequence_mut(id)?.set_first(tick)?,
            Mutation::SetLast(id, tick) => self.sequence_mut(id)?.set_last(tick)?,
            Mutation::AddPort(port) => {
                if self.ports.len() >= MAX_PORTS {
                    self.retire(Retired::Port(port));
                    return Err(SequoiaError::invalid("session is full of ports"));
                }
                self.ports.push(port);
            }
            Mutation::RemovePort(id) => {
                let index = self
                    .ports
                    .iter()
                    .position(|port| port.id() == id)
                    .ok_or(SequoiaError::NotFound(Entity::Port(id)))?;
                let port = self.ports.remove(index);
                for sequence in self.sequences.iter_mut() {
                    if sequence.outport() == Some(id) {
                        sequence.set_outport(None);
                    }
                }
                self.note_offs.forget_port(id);
                self.retire(Retired::Port(port));
            }
            Mutation::RenamePort(id, name) => {
                let old = self.port_mut(id)?.replace_name(name);
                self.retire(Retired::Name(old));
            }
            Mutation::SetInPortKind(id, kind, channel) => match self.port_mut(id)? {
                Port::In(port) => port.set_kind(kind, channel)?,
                Port::Out(_) => return Err(SequoiaError::invalid(format!("{} is not an input", id))),
            },
            Mutation::AddInPortSequence(id, sequence) => match self.port_mut(id)? {
                Port::In(port) => port.add_target(sequence)?,
                Port::Out(_) => return Err(SequoiaError::invalid(format!("{} is not an input", id))),
            },
        }
        Ok(())
    }

    fn start(&mut self) {
        self.state = TransportState::Playing;
    }

    fn stop(&mut self) {
        if self.state == TransportState::Playing {
            self.release_pending = true;
        }
        self.state = TransportState::Stopped;
        self.clock.rewind();
        for sequence in self.sequences.iter_mut() {
            sequence.rewind();
        }
    }

    fn pause(&mut self) {
        if self.state == TransportState::Playing {
            self.release_pending = true;
            self.state = TransportState::Paused;
        }
    }

    fn transport(&mut self, command: TransportCommand) {
        match command {
            TransportCommand::Start => {
                self.stop();
                self.start();
            }
            TransportCommand::Continue => self.start(),
            TransportCommand::Stop => self.pause(),
        }
    }

    fn sequence_mut(&mut self, id: SequenceId) -> Result<&mut Sequence, SequoiaError> {
        self.sequences
            .iter_mut()
            .find(|sequence| sequence.id() == id)
            .map(|sequence| sequence.as_mut())
            .ok_or(SequoiaError::NotFound(Entity::Sequence(id)))
    }

    fn port_mut(&mut self, id: PortId) -> Result<&mut Port, SequoiaError> {
        self.ports
            .iter_mut()
            .find(|port| port.id() == id)
            .map(|port| port.as_mut())
            .ok_or(SequoiaError::NotFound(Entity::Port(id)))
    }

    /// Hands something back to the control side to be freed. If the control side
    /// has fallen behind it is freed here instead.
    fn retire(&self, retired: Retired) {
        let _ = self.retired.try_send(retired);
    }

    /// Pulls inbound events from the graph and applies them.
    fn receive(&mut self, io: &mut dyn CycleIo, report: &mut CycleReport) {
        let ticks_per_step = self.clock.ticks_per_step();
        let mut command = None;

        for port in self.ports.iter_mut() {
            let port = match port.as_mut() {
                Port::In(port) => port,
                Port::Out(_) => continue,
            };

            let mut dropped = 0;
            io.read(port.id(), &mut |event| {
                if port.push(event).is_err() {
                    dropped += 1;
                }
            });
            report.dropped += dropped;

            let kind = port.kind();
            let channel = port.channel();
            let (events, targets) = port.drain_for_targets();
            for event in events {
                report.received += 1;
                match action(kind, channel, &event.message) {
                    Some(Action::Transport(received)) => command = Some(received),
                    Some(action) => {
                        for sequence in self
                            .sequences
                            .iter_mut()
                            .filter(|sequence| targets.contains(&sequence.id()))
                        {
                            apply_action(sequence, action, ticks_per_step);
                        }
                    }
                    None => {}
                }
            }
        }

        if let Some(command) = command {
            self.transport(command);
        }
    }

    /// Routes the note offs that are due, or all of them if the transport just
    /// left the playing state.
    fn release(&mut self, span: &Span, report: &mut CycleReport) {
        let ports = &mut self.ports;
        let mut dropped = 0;

        if self.release_pending {
            self.release_pending = false;
            report.released += self.note_offs.release_all(|off| {
                if route(ports, off.port, Event::new(0, off.message())).is_err() {
                    dropped += 1;
                }
            });
        }

        if self.state == TransportState::Playing {
            report.released += self.note_offs.take_due(span.ticks().end, |off| {
                let event = Event::new(span.frame_of(off.due), off.message());
                if route(ports, off.port, event).is_err() {
                    dropped += 1;
                }
            });
        }

        report.dropped += dropped;
    }

    /// Fires every trigger that falls inside the span.
    fn scan(&mut self, span: &Span, report: &mut CycleReport) {
        let ticks = span.ticks();
        let pool_dropped = self.note_offs.dropped();
        let _guard = self.gate.enter();

        for sequence in self.sequences.iter_mut() {
            // Muted sequences keep their place.
            let window = sequence.advance(ticks.clone());
            let outport = match sequence.outport() {
                Some(outport) if !sequence.is_muted() => outport,
                _ => continue,
            };
            let transpose = sequence.transpose();

            for (local, trigger) in sequence.scan(window.local.clone()) {
                if trigger.probability() < 1.0 && !trigger.fires(self.rng.gen::<f32>()) {
                    continue;
                }

                let tick = window.session_tick(local);
                let event = Event::new(span.frame_of(tick), trigger.payload().message(transpose));
                if route(&mut self.ports, outport, event).is_err() {
                    report.dropped += 1;
                    continue;
                }
                report.fired += 1;

                if let Payload::Note(note) = trigger.payload() {
                    if note.length > 0 {
                        self.note_offs.schedule(PendingOff {
                            due: tick + note.length as u64 * window.divide,
                            port: outport,
                            channel: note.channel,
                            note: transposed(note.note, transpose),
                        });
                    }
                }
            }
        }

        report.dropped += (self.note_offs.dropped() - pool_dropped) as usize;
    }

    /// Writes the queued events of every output port to the graph.
    fn flush(&mut self, io: &mut dyn CycleIo, report: &mut CycleReport) {
        for port in self.ports.iter_mut() {
            if let Port::Out(port) = port.as_mut() {
                let id = port.id();
                for event in port.flush() {
                    if io.write(id, &event).is_err() {
                        report.write_errors += 1;
                    }
                }
            }
        }
    }

    fn publish(&self) {
        self.shared
            .position
            .store(self.clock.position().raw(), Ordering::Release);
        self.shared
            .state
            .store(self.state as u8, Ordering::Release);
        self.shared
            .bpm
            .store(self.clock.bpm().to_bits(), Ordering::Release);
        self.shared.cycles.fetch_add(1, Ordering::AcqRel);
    }
}

/// Queues an event on an output port.
fn route(ports: &mut [Box<Port>], id: PortId, event: Event) -> Result<(), SequoiaError> {
    match ports.iter_mut().find(|port| port.id() == id).map(|port| port.as_mut()) {
        Some(Port::Out(port)) => port.write(event),
        _ => Err(SequoiaError::NotFound(Entity::Port(id))),
    }
}

fn apply_action(sequence: &mut Sequence, action: Action, ticks_per_step: u32) {
    match action {
        Action::Transpose(transpose) => sequence.set_transpose(transpose),
        Action::Playhead(step) => {
            sequence.set_playhead(wrap_step(sequence, step, ticks_per_step).start);
        }
        // Wrapped steps always fall inside the sequence, so neither can fail.
        Action::First(step) => {
            let _ = sequence.set_first(wrap_step(sequence, step, ticks_per_step));
        }
        Action::Last(step) => {
            let _ = sequence.set_last(wrap_step(sequence, step, ticks_per_step));
        }
        Action::ClockDivide(divide) => {
            // Never zero, so this cannot fail.
            let _ = sequence.set_clock_divide(divide);
        }
        Action::Mute(mute) => sequence.set_mute(mute),
        Action::Transport(_) => {}
    }
}

/// The ticks of a step, counted from the top of the sequence and wrapped to its
/// number of steps.
fn wrap_step(sequence: &Sequence, step: i32, ticks_per_step: u32) -> Range<u64> {
    let steps = sequence.steps(ticks_per_step) as i64;
    let start = (step as i64).rem_euclid(steps) as u64 * ticks_per_step as u64;
    start..(start + ticks_per_step as u64).min(sequence.length())
}
