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

//! The boundary between a session and the real-time audio graph that drives it.

use std::fmt;

use crate::event::Event;
use crate::port::{Direction, PortId};

#[cfg(feature = "jack")]
pub mod jack;
mod mock;

pub use mock::{MockGraph, Written};

/// Errors raised by an audio graph backend.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("unable to connect to the audio graph: {0}")]
    Connection(String),

    #[error("unable to register {direction} port '{name}': {reason}")]
    Register {
        name: String,
        direction: Direction,
        reason: String,
    },

    #[error("unable to rename {port} to '{name}': {reason}")]
    Rename {
        port: PortId,
        name: String,
        reason: String,
    },

    #[error("{0} is not registered with the audio graph")]
    UnknownPort(PortId),

    #[error("no room left this cycle for events on {0}")]
    CycleFull(PortId),

    #[error("the audio graph has been shut down")]
    Shutdown,
}

/// The control side of an audio graph. Called from ordinary threads, never from
/// the process callback.
pub trait AudioGraph: fmt::Display + Send + Sync {
    /// The sample rate of the graph. Fails if the graph cannot be reached.
    fn sample_rate(&self) -> Result<u32, GraphError>;

    /// Creates an endpoint in the graph for the given port.
    fn register_port(
        &self,
        id: PortId,
        name: &str,
        direction: Direction,
    ) -> Result<(), GraphError>;

    /// Removes the endpoint of the given port.
    fn unregister_port(&self, id: PortId) -> Result<(), GraphError>;

    /// Renames the endpoint of the given port.
    fn rename_port(&self, id: PortId, name: &str) -> Result<(), GraphError>;

    /// Disconnects from the graph. Ports can no longer be registered afterwards.
    fn shutdown(&self) -> Result<(), GraphError>;
}

/// The real-time side of an audio graph, valid for a single cycle.
pub trait CycleIo {
    /// Passes every event received on the given input port this cycle to `sink`.
    fn read(&mut self, port: PortId, sink: &mut dyn FnMut(Event));

    /// Sends an event out of the given output port. Events are written in frame
    /// order per port.
    fn write(&mut self, port: PortId, event: &Event) -> Result<(), GraphError>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            "no room left this cycle for events on port 3",
            GraphError::CycleFull(PortId(3)).to_string()
        );
        assert_eq!(
            "unable to rename port 1 to 'keys': bad name",
            GraphError::Rename {
                port: PortId(1),
                name: "keys".to_string(),
                reason: "bad name".to_string(),
            }
            .to_string()
        );
    }
}
