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
    fmt,
    sync::{atomic::AtomicU64, Arc},
};

use serde::{Deserialize, Serialize};

use crate::error::SequoiaError;
use crate::event::Event;
use crate::sequence::SequenceId;

mod dispatch;
mod queue;

pub use dispatch::{action, Action, InPortKind, TransportCommand, MIDDLE_C};
pub use queue::{EventQueue, DEFAULT_QUEUE_CAPACITY};

/// The most sequences a single input port can drive.
pub const INPORT_MAX_SEQUENCES: usize = 16;

/// The channel input ports listen on unless told otherwise.
pub const DEFAULT_LISTEN_CHANNEL: u8 = 1;

/// Identifies a port within its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u32);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {}", self.0)
    }
}

/// Which way events flow through a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => write!(f, "in"),
            Direction::Out => write!(f, "out"),
        }
    }
}

/// Carries fired trigger payloads out to the audio graph.
#[derive(Debug)]
pub struct OutPort {
    id: PortId,
    name: String,
    queue: EventQueue,
}

impl OutPort {
    pub fn new(id: PortId, name: &str, capacity: usize, dropped: Arc<AtomicU64>) -> OutPort {
        OutPort {
            id,
            name: name.to_string(),
            queue: EventQueue::new(capacity, dropped),
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues an event for the end of the cycle. Never blocks: if the queue is
    /// full the event is dropped and counted.
    pub fn write(&mut self, event: Event) -> Result<(), SequoiaError> {
        if self.queue.push(event) {
            Ok(())
        } else {
            Err(SequoiaError::QueueFull(self.id))
        }
    }

    /// Hands the queued events over in frame order.
    pub fn flush(&mut self) -> impl Iterator<Item = Event> + '_ {
        self.queue.drain_by_frame()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

/// Receives events from the audio graph and turns them into changes to the
/// session.
#[derive(Debug)]
pub struct InPort {
    id: PortId,
    name: String,
    queue: EventQueue,
    kind: InPortKind,
    /// Listening channel in [1, 16].
    channel: u8,
    targets: Vec<SequenceId>,
}

impl InPort {
    pub fn new(id: PortId, name: &str, capacity: usize, dropped: Arc<AtomicU64>) -> InPort {
        InPort {
            id,
            name: name.to_string(),
            queue: EventQueue::new(capacity, dropped),
            kind: InPortKind::None,
            channel: DEFAULT_LISTEN_CHANNEL,
            targets: Vec::with_capacity(INPORT_MAX_SEQUENCES),
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> InPortKind {
        self.kind
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn targets(&self) -> &[SequenceId] {
        &self.targets
    }

    /// Queues an inbound event. Fails with `QueueFull` if there is no room.
    pub fn push(&mut self, event: Event) -> Result<(), SequoiaError> {
        if self.queue.push(event) {
            Ok(())
        } else {
            Err(SequoiaError::QueueFull(self.id))
        }
    }

    /// Removes the inbound events received since the last drain, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = Event> + '_ {
        self.queue.drain()
    }

    /// Drains the inbound events alongside the sequences they are meant for.
    pub(crate) fn drain_for_targets(
        &mut self,
    ) -> (impl Iterator<Item = Event> + '_, &[SequenceId]) {
        (self.queue.drain(), &self.targets)
    }

    pub fn set_kind(&mut self, kind: InPortKind, channel: u8) -> Result<(), SequoiaError> {
        if !(1..=16).contains(&channel) {
            return Err(SequoiaError::invalid(format!(
                "listening channel must be within [1, 16], got {}",
                channel
            )));
        }
        self.kind = kind;
        self.channel = channel;
        Ok(())
    }

    /// Adds a sequence to those driven by this port. Adding a sequence twice is
    /// a no-op.
    pub fn add_target(&mut self, sequence: SequenceId) -> Result<(), SequoiaError> {
        if self.targets.contains(&sequence) {
            return Ok(());
        }
        if self.targets.len() >= INPORT_MAX_SEQUENCES {
            return Err(SequoiaError::invalid(format!(
                "input port '{}' already drives {} sequences",
                self.name, INPORT_MAX_SEQUENCES
            )));
        }
        self.targets.push(sequence);
        Ok(())
    }

    pub fn remove_target(&mut self, sequence: SequenceId) {
        self.targets.retain(|target| *target != sequence);
    }

    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

/// A port of either direction, as stored by a session.
#[derive(Debug)]
pub enum Port {
    In(InPort),
    Out(OutPort),
}

impl Port {
    pub fn new(
        id: PortId,
        name: &str,
        direction: Direction,
        capacity: usize,
        dropped: Arc<AtomicU64>,
    ) -> Port {
        match direction {
            Direction::In => Port::In(InPort::new(id, name, capacity, dropped)),
            Direction::Out => Port::Out(OutPort::new(id, name, capacity, dropped)),
        }
    }

    pub fn id(&self) -> PortId {
        match self {
            Port::In(port) => port.id,
            Port::Out(port) => port.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Port::In(port) => &port.name,
            Port::Out(port) => &port.name,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Port::In(_) => Direction::In,
            Port::Out(_) => Direction::Out,
        }
    }

    /// Swaps in a new name and returns the old one.
    pub(crate) fn replace_name(&mut self, name: String) -> String {
        match self {
            Port::In(port) => std::mem::replace(&mut port.name, name),
            Port::Out(port) => std::mem::replace(&mut port.name, name),
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name(), self.id(), self.direction())
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use super::*;
    use crate::event::Message;

    fn counter() -> Arc<AtomicU64> {
        Arc::new(AtomicU64::new(0))
    }

    #[test]
    fn test_outport_write_overflow() {
        let mut port = OutPort::new(PortId(3), "out", 4, counter());
        let mut full = 0;
        for i in 0..7 {
            match port.write(Event::new(i, Message::note_on(1, 60, 100))) {
                Ok(()) => {}
                Err(SequoiaError::QueueFull(id)) => {
                    assert_eq!(PortId(3), id);
                    full += 1;
                }
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(3, full);
        assert_eq!(4, port.pending());
        assert_eq!(3, port.dropped());
        assert_eq!(4, port.flush().count());
        assert_eq!(0, port.pending());
    }

    #[test]
    fn test_shared_drop_counter() {
        let dropped = counter();
        let mut port = OutPort::new(PortId(1), "out", 0, dropped.clone());
        assert!(port.write(Event::new(0, Message::note_off(1, 60))).is_err());
        assert_eq!(1, dropped.load(std::sync::atomic::Ordering::Relaxed));
    }

    #[test]
    fn test_inport_drain() -> Result<(), Box<dyn Error>> {
        let mut port = InPort::new(PortId(1), "in", 8, counter());
        port.push(Event::new(5, Message::note_on(1, 61, 90)))?;
        port.push(Event::new(2, Message::note_on(1, 62, 90)))?;

        let frames: Vec<u32> = port.drain().map(|event| event.frame).collect();
        assert_eq!(vec![5, 2], frames);
        assert_eq!(0, port.drain().count());
        Ok(())
    }

    #[test]
    fn test_inport_targets() -> Result<(), Box<dyn Error>> {
        let mut port = InPort::new(PortId(1), "in", 8, counter());
        for i in 0..INPORT_MAX_SEQUENCES as u32 {
            port.add_target(SequenceId(i))?;
        }
        // Already present.
        port.add_target(SequenceId(0))?;
        assert!(port.add_target(SequenceId(100)).is_err());

        port.remove_target(SequenceId(4));
        assert_eq!(INPORT_MAX_SEQUENCES - 1, port.targets().len());
        port.add_target(SequenceId(100))?;
        Ok(())
    }

    #[test]
    fn test_inport_kind_channel() -> Result<(), Box<dyn Error>> {
        let mut port = InPort::new(PortId(1), "in", 8, counter());
        assert_eq!(InPortKind::None, port.kind());
        assert_eq!(DEFAULT_LISTEN_CHANNEL, port.channel());

        port.set_kind(InPortKind::Mute, 10)?;
        assert_eq!(InPortKind::Mute, port.kind());
        assert_eq!(10, port.channel());
        assert!(port.set_kind(InPortKind::Mute, 0).is_err());
        assert!(port.set_kind(InPortKind::Mute, 17).is_err());
        Ok(())
    }

    #[test]
    fn test_display() {
        let port = Port::new(PortId(2), "drums", Direction::Out, 4, counter());
        assert_eq!("drums (port 2, out)", port.to_string());
    }
}
