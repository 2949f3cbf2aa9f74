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
use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::Mutex;
use tracing::debug;

use super::{AudioGraph, CycleIo, GraphError};
use crate::event::{Event, Message};
use crate::port::{Direction, PortId};

/// An event written to an output port of the mock graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Written {
    /// The cycle the event was written in, counting from zero.
    pub cycle: u64,
    pub port: PortId,
    pub event: Event,
}

#[derive(Debug, Default)]
struct Inner {
    ports: HashMap<PortId, (String, Direction)>,
    /// Raw bytes waiting to be read, per input port.
    inbound: HashMap<PortId, Vec<(u32, Vec<u8>)>>,
    written: Vec<Written>,
    cycle: u64,
    shut_down: bool,
}

/// A mock audio graph. Nothing is played; writes are recorded and reads are
/// replayed from injected bytes. Clones share state, so a test can keep one
/// clone while the session owns another.
#[derive(Clone)]
pub struct MockGraph {
    name: String,
    sample_rate: u32,
    connected: bool,
    inner: Arc<Mutex<Inner>>,
}

impl MockGraph {
    /// Gets a mock graph running at the given sample rate.
    pub fn new(name: &str, sample_rate: u32) -> MockGraph {
        MockGraph {
            name: name.to_string(),
            sample_rate,
            connected: true,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Gets a mock graph that cannot be connected to.
    pub fn unreachable(name: &str) -> MockGraph {
        MockGraph {
            connected: false,
            ..MockGraph::new(name, 0)
        }
    }

    /// Queues raw MIDI bytes for the given input port, to be read during the next
    /// cycle.
    pub fn inject(&self, port: PortId, frame: u32, bytes: &[u8]) {
        self.inner
            .lock()
            .inbound
            .entry(port)
            .or_default()
            .push((frame, bytes.to_vec()));
    }

    /// Queues a message for the given input port.
    pub fn inject_message(&self, port: PortId, frame: u32, message: Message) {
        let mut buf = [0u8; crate::event::MAX_MESSAGE_LEN];
        if let Some(len) = message.encode(&mut buf) {
            self.inject(port, frame, &buf[..len]);
        }
    }

    /// Removes and returns everything written so far.
    pub fn take_written(&self) -> Vec<Written> {
        std::mem::take(&mut self.inner.lock().written)
    }

    /// Marks the end of a cycle. Subsequent writes are tagged with the next cycle.
    pub fn end_cycle(&self) {
        self.inner.lock().cycle += 1;
    }

    /// Gets the name and direction of a registered port.
    pub fn port(&self, id: PortId) -> Option<(String, Direction)> {
        self.inner.lock().ports.get(&id).cloned()
    }

    /// The number of registered ports.
    pub fn port_count(&self) -> usize {
        self.inner.lock().ports.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().shut_down
    }
}

impl fmt::Display for MockGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock, {} Hz)", self.name, self.sample_rate)
    }
}

impl AudioGraph for MockGraph {
    fn sample_rate(&self) -> Result<u32, GraphError> {
        if !self.connected {
            return Err(GraphError::Connection(format!(
                "mock graph {} is unreachable",
                self.name
            )));
        }
        Ok(self.sample_rate)
    }

    fn register_port(
        &self,
        id: PortId,
        name: &str,
        direction: Direction,
    ) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        if inner.shut_down {
            return Err(GraphError::Shutdown);
        }
        if inner.ports.values().any(|(existing, _)| existing == name) {
            return Err(GraphError::Register {
                name: name.to_string(),
                direction,
                reason: "name already in use".to_string(),
            });
        }
        debug!(graph = self.name, port = %id, name, %direction, "Registered port.");
        inner.ports.insert(id, (name.to_string(), direction));
        Ok(())
    }

    fn unregister_port(&self, id: PortId) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        inner.inbound.remove(&id);
        match inner.ports.remove(&id) {
            Some(_) => Ok(()),
            None => Err(GraphError::UnknownPort(id)),
        }
    }

    fn rename_port(&self, id: PortId, name: &str) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        if inner
            .ports
            .iter()
            .any(|(other, (existing, _))| *other != id && existing == name)
        {
            return Err(GraphError::Rename {
                port: id,
                name: name.to_string(),
                reason: "name already in use".to_string(),
            });
        }
        match inner.ports.get_mut(&id) {
            Some(port) => {
                port.0 = name.to_string();
                Ok(())
            }
            None => Err(GraphError::UnknownPort(id)),
        }
    }

    fn shutdown(&self) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        inner.shut_down = true;
        inner.ports.clear();
        Ok(())
    }
}

impl CycleIo for MockGraph {
    fn read(&mut self, port: PortId, sink: &mut dyn FnMut(Event)) {
        let inbound = match self.inner.lock().inbound.remove(&port) {
            Some(inbound) => inbound,
            None => return,
        };
        for (frame, bytes) in inbound {
            if let Some(message) = Message::parse(&bytes) {
                sink(Event::new(frame, message));
            }
        }
    }

    fn write(&mut self, port: PortId, event: &Event) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        match inner.ports.get(&port) {
            Some((_, Direction::Out)) => {}
            _ => return Err(GraphError::UnknownPort(port)),
        }
        let cycle = inner.cycle;
        inner.written.push(Written {
            cycle,
            port,
            event: *event,
        });
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_register_and_write() -> Result<(), Box<dyn Error>> {
        let graph = MockGraph::new("test", 48_000);
        graph.register_port(PortId(1), "out", Direction::Out)?;
        assert_eq!(Some(("out".to_string(), Direction::Out)), graph.port(PortId(1)));

        let mut io = graph.clone();
        io.write(PortId(1), &Event::new(4, Message::note_on(1, 60, 100)))?;
        graph.end_cycle();
        io.write(PortId(1), &Event::new(2, Message::note_off(1, 60)))?;
        assert!(io
            .write(PortId(9), &Event::new(0, Message::note_off(1, 60)))
            .is_err());

        let written = graph.take_written();
        assert_eq!(2, written.len());
        assert_eq!(0, written[0].cycle);
        assert_eq!(1, written[1].cycle);
        assert!(graph.take_written().is_empty());
        Ok(())
    }

    #[test]
    fn test_inject_and_read() -> Result<(), Box<dyn Error>> {
        let graph = MockGraph::new("test", 48_000);
        graph.register_port(PortId(1), "in", Direction::In)?;
        graph.inject(PortId(1), 3, &[0x90, 64, 100]);
        graph.inject(PortId(1), 4, &[0xF0, 0x01, 0xF7]);
        graph.inject_message(PortId(1), 8, Message::note_off(1, 64));

        let mut io = graph.clone();
        let mut events = Vec::new();
        io.read(PortId(1), &mut |event| events.push(event));
        assert_eq!(
            vec![
                Event::new(3, Message::note_on(1, 64, 100)),
                Event::new(8, Message::note_off(1, 64)),
            ],
            events
        );

        events.clear();
        io.read(PortId(1), &mut |event| events.push(event));
        assert!(events.is_empty());
        Ok(())
    }

    #[test]
    fn test_duplicate_names_and_shutdown() -> Result<(), Box<dyn Error>> {
        let graph = MockGraph::new("test", 44_100);
        graph.register_port(PortId(1), "a", Direction::Out)?;
        assert!(graph.register_port(PortId(2), "a", Direction::In).is_err());
        graph.rename_port(PortId(1), "b")?;
        graph.register_port(PortId(2), "a", Direction::In)?;
        assert_eq!(2, graph.port_count());

        // Rename failures name the port, whichever way it points.
        let err = graph.rename_port(PortId(2), "b").err().ok_or("rename went through")?;
        assert!(matches!(err, GraphError::Rename { port: PortId(2), .. }));
        assert_eq!(
            "unable to rename port 2 to 'b': name already in use",
            err.to_string()
        );
        graph.rename_port(PortId(1), "b")?;

        graph.shutdown()?;
        assert!(graph.is_shut_down());
        assert!(matches!(
            graph.register_port(PortId(3), "c", Direction::Out),
            Err(GraphError::Shutdown)
        ));
        Ok(())
    }

    #[test]
    fn test_unreachable() {
        assert!(matches!(
            MockGraph::unreachable("gone").sample_rate(),
            Err(GraphError::Connection(_))
        ));
    }
}
