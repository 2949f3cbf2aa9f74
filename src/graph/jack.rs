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
use std::{collections::HashMap, fmt, mem};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use jack::{
    AsyncClient, Client, ClientOptions, Control, MidiIn, MidiOut, Port, ProcessHandler,
    ProcessScope, RawMidi,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{AudioGraph, CycleIo, GraphError};
use crate::event::{Event, MAX_MESSAGE_LEN};
use crate::port::{Direction, PortId};
use crate::session::{Engine, MAX_PORTS};

/// Events a single output port can take per cycle.
const EVENTS_PER_CYCLE: usize = 1024;

enum Command {
    AddIn(PortId, Port<MidiIn>),
    AddOut(PortId, Port<MidiOut>),
    Remove(PortId),
}

/// A port the process thread has let go of, ready to be unregistered.
enum Released {
    In(Port<MidiIn>),
    Out(Port<MidiOut>),
}

enum State {
    Inactive(Client),
    Active(AsyncClient<(), Processor>),
    Closed,
}

struct Inner {
    state: State,
    /// Full port names, used to look registered ports up again.
    names: HashMap<PortId, String>,
}

/// An audio graph backed by a JACK server. Ports can be registered before and
/// after activation; the engine starts receiving cycles once `activate` is called.
/// Port handles live on the process thread, which hands removed ports back so
/// they are only unregistered once no cycle can use them.
pub struct JackGraph {
    name: String,
    commands: Sender<Command>,
    receiver: Receiver<Command>,
    released_tx: Sender<Released>,
    released: Receiver<Released>,
    inner: Mutex<Inner>,
}

impl JackGraph {
    /// Connects to the running JACK server. The server is never started on demand.
    pub fn new(name: &str) -> Result<JackGraph, GraphError> {
        let (client, status) = Client::new(name, ClientOptions::NO_START_SERVER)
            .map_err(|e| GraphError::Connection(e.to_string()))?;
        info!(
            client = client.name(),
            sample_rate = client.sample_rate() as u64,
            ?status,
            "Connected to JACK."
        );

        let (commands, receiver) = crossbeam_channel::bounded(MAX_PORTS * 2);
        let (released_tx, released) = crossbeam_channel::bounded(MAX_PORTS * 2);
        Ok(JackGraph {
            name: client.name().to_string(),
            commands,
            receiver,
            released_tx,
            released,
            inner: Mutex::new(Inner {
                state: State::Inactive(client),
                names: HashMap::new(),
            }),
        })
    }

    /// Hands the engine to the JACK process thread and starts running cycles.
    pub fn activate(&self, engine: Engine) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        let client = match mem::replace(&mut inner.state, State::Closed) {
            State::Inactive(client) => client,
            State::Active(active) => {
                inner.state = State::Active(active);
                return Err(GraphError::Connection(format!(
                    "JACK client {} is already active",
                    self.name
                )));
            }
            State::Closed => return Err(GraphError::Shutdown),
        };

        let processor = Processor {
            engine,
            commands: self.receiver.clone(),
            released: self.released_tx.clone(),
            inputs: Vec::with_capacity(MAX_PORTS),
            outputs: Vec::with_capacity(MAX_PORTS),
            pending: Vec::with_capacity(EVENTS_PER_CYCLE * 4),
        };
        let active = client
            .activate_async((), processor)
            .map_err(|e| GraphError::Connection(e.to_string()))?;
        inner.state = State::Active(active);
        info!(client = self.name, "Activated JACK client.");
        Ok(())
    }

    /// Unregisters the ports the process thread has handed back.
    fn unregister_released(&self, client: &Client) {
        for released in self.released.try_iter() {
            let result = match released {
                Released::In(port) => client.unregister_port(port),
                Released::Out(port) => client.unregister_port(port),
            };
            if let Err(e) = result {
                warn!(client = self.name, err = %e, "Unable to unregister JACK port.");
            }
        }
    }

    fn send(&self, command: Command) -> Result<(), GraphError> {
        self.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => {
                GraphError::Connection("too many port changes in flight".to_string())
            }
            TrySendError::Disconnected(_) => GraphError::Shutdown,
        })
    }
}

fn client(state: &State) -> Result<&Client, GraphError> {
    match state {
        State::Inactive(client) => Ok(client),
        State::Active(active) => Ok(active.as_client()),
        State::Closed => Err(GraphError::Shutdown),
    }
}

impl fmt::Display for JackGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JACK ({})", self.name)
    }
}

impl AudioGraph for JackGraph {
    fn sample_rate(&self) -> Result<u32, GraphError> {
        let inner = self.inner.lock();
        Ok(client(&inner.state)?.sample_rate() as u32)
    }

    fn register_port(
        &self,
        id: PortId,
        name: &str,
        direction: Direction,
    ) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        let client = client(&inner.state)?;
        self.unregister_released(client);
        let register_error = |e: jack::Error| GraphError::Register {
            name: name.to_string(),
            direction,
            reason: e.to_string(),
        };

        let (full_name, command) = match direction {
            Direction::In => {
                let port = client
                    .register_port(name, MidiIn::default())
                    .map_err(register_error)?;
                (port.name().map_err(register_error)?, Command::AddIn(id, port))
            }
            Direction::Out => {
                let port = client
                    .register_port(name, MidiOut::default())
                    .map_err(register_error)?;
                (port.name().map_err(register_error)?, Command::AddOut(id, port))
            }
        };
        self.send(command)?;
        debug!(port = %id, name = full_name, %direction, "Registered JACK port.");
        inner.names.insert(id, full_name);
        Ok(())
    }

    fn unregister_port(&self, id: PortId) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        let full_name = inner.names.remove(&id).ok_or(GraphError::UnknownPort(id))?;
        self.send(Command::Remove(id))?;
        debug!(port = %id, name = full_name, "Released JACK port.");
        self.unregister_released(client(&inner.state)?);
        Ok(())
    }

    fn rename_port(&self, id: PortId, name: &str) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        let full_name = inner.names.get(&id).ok_or(GraphError::UnknownPort(id))?;
        let mut port = client(&inner.state)?
            .port_by_name(full_name)
            .ok_or(GraphError::UnknownPort(id))?;
        let rename_error = |e: jack::Error| GraphError::Rename {
            port: id,
            name: name.to_string(),
            reason: e.to_string(),
        };
        port.set_name(name).map_err(rename_error)?;
        let full_name = port.name().map_err(rename_error)?;
        inner.names.insert(id, full_name);
        Ok(())
    }

    fn shutdown(&self) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        inner.names.clear();
        if let State::Active(active) = mem::replace(&mut inner.state, State::Closed) {
            active
                .deactivate()
                .map_err(|e| GraphError::Connection(e.to_string()))?;
        }
        info!(client = self.name, "Closed JACK client.");
        Ok(())
    }
}

/// Owns the engine on the JACK process thread.
struct Processor {
    engine: Engine,
    commands: Receiver<Command>,
    released: Sender<Released>,
    inputs: Vec<(PortId, Port<MidiIn>)>,
    outputs: Vec<(PortId, Port<MidiOut>)>,
    /// Events written during the cycle, copied to the port buffers at the end.
    pending: Vec<(PortId, Event)>,
}

impl Processor {
    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::AddIn(id, port) => self.inputs.push((id, port)),
                Command::AddOut(id, port) => self.outputs.push((id, port)),
                Command::Remove(id) => {
                    if let Some(index) = self.inputs.iter().position(|(input, _)| *input == id) {
                        let (_, port) = self.inputs.swap_remove(index);
                        let _ = self.released.try_send(Released::In(port));
                    }
                    if let Some(index) = self.outputs.iter().position(|(output, _)| *output == id)
                    {
                        let (_, port) = self.outputs.swap_remove(index);
                        let _ = self.released.try_send(Released::Out(port));
                    }
                }
            }
        }
    }
}

impl ProcessHandler for Processor {
    fn process(&mut self, _: &Client, ps: &ProcessScope) -> Control {
        self.apply_commands();

        let n_frames = ps.n_frames();
        let mut cycle = JackCycle {
            ps,
            inputs: &self.inputs,
            outputs: &self.outputs,
            pending: &mut self.pending,
        };
        self.engine.process_cycle(n_frames, &mut cycle);

        // Every output buffer is cleared once per cycle, even when idle.
        let mut bytes = [0u8; MAX_MESSAGE_LEN];
        for (id, port) in self.outputs.iter_mut() {
            let mut writer = port.writer(ps);
            for (_, event) in self.pending.iter().filter(|(port, _)| port == id) {
                if let Some(len) = event.message.encode(&mut bytes) {
                    let _ = writer.write(&RawMidi {
                        time: event.frame.min(n_frames.saturating_sub(1)),
                        bytes: &bytes[..len],
                    });
                }
            }
        }
        self.pending.clear();

        Control::Continue
    }
}

struct JackCycle<'a> {
    ps: &'a ProcessScope,
    inputs: &'a [(PortId, Port<MidiIn>)],
    outputs: &'a [(PortId, Port<MidiOut>)],
    pending: &'a mut Vec<(PortId, Event)>,
}

impl CycleIo for JackCycle<'_> {
    fn read(&mut self, port: PortId, sink: &mut dyn FnMut(Event)) {
        let Some((_, input)) = self.inputs.iter().find(|(id, _)| *id == port) else {
            return;
        };
        for raw in input.iter(self.ps) {
            if let Some(message) = crate::event::Message::parse(raw.bytes) {
                sink(Event::new(raw.time, message));
            }
        }
    }

    fn write(&mut self, port: PortId, event: &Event) -> Result<(), GraphError> {
        if !self.outputs.iter().any(|(id, _)| *id == port) {
            return Err(GraphError::UnknownPort(port));
        }
        if self.pending.len() == self.pending.capacity() {
            return Err(GraphError::CycleFull(port));
        }
        self.pending.push((port, *event));
        Ok(())
    }
}
