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

use crate::graph::GraphError;
use crate::port::PortId;
use crate::sequence::SequenceId;
use crate::trigger::TriggerId;

/// An entity that an operation referred to by ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Sequence(SequenceId),
    Trigger(SequenceId, TriggerId),
    Port(PortId),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Sequence(id) => write!(f, "sequence {}", id),
            Entity::Trigger(sequence, id) => write!(f, "trigger {} in sequence {}", id, sequence),
            Entity::Port(id) => write!(f, "port {}", id),
        }
    }
}

/// Errors produced by session, sequence and port operations. All of them are
/// recoverable at the call site.
#[derive(Debug, thiserror::Error)]
pub enum SequoiaError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("structural change attempted while a scan is in progress")]
    ConcurrentModification,

    #[error("queue for {0} is full, event dropped")]
    QueueFull(PortId),

    #[error("{0} not found")]
    NotFound(Entity),

    #[error("audio graph error: {0}")]
    Graph(#[from] GraphError),
}

impl SequoiaError {
    pub(crate) fn invalid(message: impl Into<String>) -> SequoiaError {
        SequoiaError::InvalidState(message.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            "sequence 3 not found",
            SequoiaError::NotFound(Entity::Sequence(SequenceId(3))).to_string()
        );
        assert_eq!(
            "trigger 7 in sequence 1 not found",
            SequoiaError::NotFound(Entity::Trigger(SequenceId(1), TriggerId(7))).to_string()
        );
        assert_eq!(
            "queue for port 2 is full, event dropped",
            SequoiaError::QueueFull(PortId(2)).to_string()
        );
        assert_eq!(
            "invalid state: tempo must be positive",
            SequoiaError::invalid("tempo must be positive").to_string()
        );
    }
}
