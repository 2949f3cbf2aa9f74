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

use crate::port::{InPortKind, Port, PortId};
use crate::sequence::{Sequence, SequenceId};
use crate::trigger::{Trigger, TriggerId};

/// A change requested by the control side, applied by the engine at the start
/// of a cycle. Anything that would need allocating on the real-time thread is
/// built beforehand and boxed.
#[derive(Debug)]
pub(crate) enum Mutation {
    Start,
    Stop,
    Pause,
    SetTempo(f32),
    AddSequence(Box<Sequence>),
    RemoveSequence(SequenceId),
    RenameSequence(SequenceId, String),
    AddTrigger(SequenceId, Trigger),
    RemoveTrigger(SequenceId, TriggerId),
    SetTriggerEnabled(SequenceId, TriggerId, bool),
    SetOutport(SequenceId, Option<PortId>),
    SetTranspose(SequenceId, i32),
    SetMute(SequenceId, bool),
    SetClockDivide(SequenceId, u32),
    SetPlayhead(SequenceId, u64),
    SetFirst(SequenceId, Range<u64>),
    SetLast(SequenceId, Range<u64>),
    AddPort(Box<Port>),
    RemovePort(PortId),
    RenamePort(PortId, String),
    SetInPortKind(PortId, InPortKind, u8),
    AddInPortSequence(PortId, SequenceId),
}

/// Something the engine no longer needs, returned to the control side to be
/// freed there.
#[derive(Debug)]
pub(crate) enum Retired {
    Sequence(Box<Sequence>),
    Port(Box<Port>),
    Name(String),
}
