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
use std::{fmt, ops::Range};

use crate::error::{Entity, SequoiaError};
use crate::port::PortId;
use crate::trigger::{Payload, Trigger, TriggerId};

mod scan;

pub use scan::{Scan, ScanGate, ScanGuard};

/// The most triggers a sequence can hold. Storage is reserved up front so that
/// inserting on the real-time thread never reallocates.
pub const MAX_TRIGGERS: usize = 512;

/// Identifies a sequence within its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceId(pub u32);

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The local ticks a sequence covers during one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    /// Local ticks, as handed to `scan`.
    pub local: Range<u64>,
    /// The session tick of the first local tick.
    pub first_tick: u64,
    /// Session ticks per local tick.
    pub divide: u64,
}

impl Window {
    /// Maps a local tick from this window back onto the session timeline.
    pub fn session_tick(&self, local: u64) -> u64 {
        self.first_tick + (local - self.local.start) * self.divide
    }
}

/// A looping timeline of triggers.
#[derive(Debug, Clone)]
pub struct Sequence {
    id: SequenceId,
    name: String,
    /// Loop length in ticks.
    length: u64,
    /// Sorted by offset. Equal offsets keep insertion order.
    triggers: Vec<Trigger>,
    next_trigger_id: u32,
    outport: Option<PortId>,
    transpose: i32,
    mute: bool,
    clock_divide: u32,
    /// Loop points, as inclusive offsets. Playback cycles between them.
    first: u64,
    last: u64,
    /// Local ticks elapsed since the playhead last jumped, counted from `first`.
    playhead: u64,
    /// Session ticks since the last local tick.
    divide_phase: u32,
    gate: ScanGate,
}

impl Sequence {
    /// Creates an empty sequence that loops every `length` ticks.
    pub fn new(name: &str, length: u64) -> Result<Sequence, SequoiaError> {
        if length == 0 {
            return Err(SequoiaError::invalid("sequence length must be at least one tick"));
        }

        Ok(Sequence {
            id: SequenceId(0),
            name: name.to_string(),
            length,
            triggers: Vec::with_capacity(MAX_TRIGGERS),
            next_trigger_id: 1,
            outport: None,
            transpose: 0,
            mute: false,
            clock_divide: 1,
            first: 0,
            last: length - 1,
            playhead: 0,
            divide_phase: 0,
            gate: ScanGate::new(),
        })
    }

    /// Creates an empty sequence of `steps` steps.
    pub fn with_steps(
        name: &str,
        steps: u32,
        ticks_per_step: u32,
    ) -> Result<Sequence, SequoiaError> {
        Sequence::new(name, steps as u64 * ticks_per_step as u64)
    }

    pub fn id(&self) -> SequenceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn trigger(&self, id: TriggerId) -> Option<&Trigger> {
        self.triggers.iter().find(|trigger| trigger.id() == id)
    }

    pub fn outport(&self) -> Option<PortId> {
        self.outport
    }

    pub fn transpose(&self) -> i32 {
        self.transpose
    }

    pub fn is_muted(&self) -> bool {
        self.mute
    }

    pub fn clock_divide(&self) -> u32 {
        self.clock_divide
    }

    /// The current position within the loop, in local ticks.
    pub fn playhead(&self) -> u64 {
        self.first + self.playhead % self.span()
    }

    /// The offset playback returns to after `last`.
    pub fn first(&self) -> u64 {
        self.first
    }

    /// The last offset played before returning to `first`.
    pub fn last(&self) -> u64 {
        self.last
    }

    fn span(&self) -> u64 {
        self.last - self.first + 1
    }

    /// The number of whole steps in the loop, never less than one.
    pub fn steps(&self, ticks_per_step: u32) -> u64 {
        (self.length / ticks_per_step.max(1) as u64).max(1)
    }

    /// Adds a trigger at the given offset and returns its ID.
    pub fn add_trigger(&mut self, offset: u64, payload: Payload) -> Result<TriggerId, SequoiaError> {
        let id = TriggerId(self.next_trigger_id);
        self.insert_trigger(Trigger::new(id, offset, payload))?;
        Ok(id)
    }

    /// Inserts a fully built trigger, keeping the trigger list sorted. Fails if a
    /// scan is in progress, if the offset is outside the loop or if the sequence
    /// is full.
    pub fn insert_trigger(&mut self, trigger: Trigger) -> Result<(), SequoiaError> {
        self.check_insert(&trigger)?;

        if trigger.id().0 >= self.next_trigger_id {
            self.next_trigger_id = trigger.id().0 + 1;
        }
        let index = self
            .triggers
            .partition_point(|existing| existing.offset() <= trigger.offset());
        self.triggers.insert(index, trigger);
        Ok(())
    }

    /// Verifies that the trigger could be inserted without changing anything.
    pub(crate) fn check_insert(&self, trigger: &Trigger) -> Result<(), SequoiaError> {
        if self.gate.is_held() {
            return Err(SequoiaError::ConcurrentModification);
        }
        if trigger.offset() >= self.length {
            return Err(SequoiaError::invalid(format!(
                "trigger offset {} is outside of sequence '{}' (length {})",
                trigger.offset(),
                self.name,
                self.length
            )));
        }
        if self.triggers.len() >= MAX_TRIGGERS {
            return Err(SequoiaError::invalid(format!(
                "sequence '{}' already holds {} triggers",
                self.name, MAX_TRIGGERS
            )));
        }
        if self.triggers.iter().any(|existing| existing.id() == trigger.id()) {
            return Err(SequoiaError::invalid(format!(
                "trigger {} already exists in sequence '{}'",
                trigger.id(),
                self.name
            )));
        }
        trigger.payload().validate()
    }

    /// Removes the trigger with the given ID.
    pub fn remove_trigger(&mut self, id: TriggerId) -> Result<Trigger, SequoiaError> {
        if self.gate.is_held() {
            return Err(SequoiaError::ConcurrentModification);
        }
        let index = self
            .triggers
            .iter()
            .position(|trigger| trigger.id() == id)
            .ok_or(SequoiaError::NotFound(Entity::Trigger(self.id, id)))?;
        Ok(self.triggers.remove(index))
    }

    /// Enables or disables a trigger. Disabled triggers stay addressable.
    pub fn set_trigger_enabled(&mut self, id: TriggerId, enabled: bool) -> Result<(), SequoiaError> {
        let sequence = self.id;
        let trigger = self
            .triggers
            .iter_mut()
            .find(|trigger| trigger.id() == id)
            .ok_or(SequoiaError::NotFound(Entity::Trigger(sequence, id)))?;
        trigger.set_enabled(enabled);
        Ok(())
    }

    /// Every enabled trigger whose offset matches a tick of the range. Ticks count
    /// from `first` and wrap back to it after `last`.
    pub fn scan(&self, range: Range<u64>) -> Scan<'_> {
        Scan::new(&self.triggers, self.first..self.last + 1, range)
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Swaps in a new name and returns the old one.
    pub(crate) fn replace_name(&mut self, name: String) -> String {
        std::mem::replace(&mut self.name, name)
    }

    pub fn set_outport(&mut self, outport: Option<PortId>) {
        self.outport = outport;
    }

    pub fn set_transpose(&mut self, transpose: i32) {
        self.transpose = transpose;
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.mute = mute;
    }

    pub fn set_clock_divide(&mut self, clock_divide: u32) -> Result<(), SequoiaError> {
        if clock_divide == 0 {
            return Err(SequoiaError::invalid("clock divide must be at least 1"));
        }
        self.clock_divide = clock_divide;
        Ok(())
    }

    /// Moves the playhead to the given local tick, modulo the loop length. A tick
    /// outside of the loop points moves it to `first`.
    pub fn set_playhead(&mut self, tick: u64) {
        let tick = tick % self.length;
        self.playhead = if (self.first..=self.last).contains(&tick) {
            tick - self.first
        } else {
            0
        };
    }

    /// Starts the loop at the beginning of `step`, a range of ticks. If the loop
    /// used to end before it, it now ends with the step.
    pub fn set_first(&mut self, step: Range<u64>) -> Result<(), SequoiaError> {
        self.check_step(&step)?;
        let playhead = self.playhead();
        self.first = step.start;
        if self.last < step.start {
            self.last = step.end - 1;
        }
        self.set_playhead(playhead);
        Ok(())
    }

    /// Ends the loop with the last tick of `step`. If the loop used to start
    /// after it, it now starts with the step.
    pub fn set_last(&mut self, step: Range<u64>) -> Result<(), SequoiaError> {
        self.check_step(&step)?;
        let playhead = self.playhead();
        self.last = step.end - 1;
        if self.first > self.last {
            self.first = step.start;
        }
        self.set_playhead(playhead);
        Ok(())
    }

    fn check_step(&self, step: &Range<u64>) -> Result<(), SequoiaError> {
        if step.start >= step.end || step.end > self.length {
            return Err(SequoiaError::invalid(format!(
                "loop point {}..{} is outside of sequence '{}' (length {})",
                step.start, step.end, self.name, self.length
            )));
        }
        Ok(())
    }

    /// Returns the playhead to the first loop point.
    pub fn rewind(&mut self) {
        self.playhead = 0;
        self.divide_phase = 0;
    }

    /// Consumes the session ticks of one cycle and returns the local ticks they
    /// cover after clock division.
    pub(crate) fn advance(&mut self, ticks: Range<u64>) -> Window {
        let elapsed = ticks.end.saturating_sub(ticks.start);
        let divide = self.clock_divide as u64;
        let phase = self.divide_phase as u64;

        let first = (divide - phase) % divide;
        let count = if first < elapsed {
            (elapsed - 1 - first) / divide + 1
        } else {
            0
        };

        let start = self.playhead;
        self.playhead += count;
        self.divide_phase = ((phase + elapsed) % divide) as u32;

        Window {
            local: start..start + count,
            first_tick: ticks.start + first,
            divide,
        }
    }

    /// Binds the sequence to a session.
    pub(crate) fn attach(&mut self, id: SequenceId, gate: ScanGate) {
        self.id = id;
        self.gate = gate;
    }

    /// The ID the next added trigger will get.
    pub(crate) fn peek_trigger_id(&self) -> TriggerId {
        TriggerId(self.next_trigger_id)
    }

    /// Makes sure the full trigger capacity is reserved. Clones only carry the
    /// storage they use.
    pub(crate) fn reserve(&mut self) {
        let missing = MAX_TRIGGERS.saturating_sub(self.triggers.len());
        self.triggers.reserve_exact(missing);
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (length={} triggers={}",
            self.name,
            self.length,
            self.triggers.len()
        )?;
        if self.transpose != 0 {
            write!(f, " transpose={}", self.transpose)?;
        }
        if self.clock_divide != 1 {
            write!(f, " divide={}", self.clock_divide)?;
        }
        if self.first != 0 || self.last != self.length - 1 {
            write!(f, " loop={}..={}", self.first, self.last)?;
        }
        if self.mute {
            write!(f, " muted")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use super::*;

    fn offsets(sequence: &Sequence, range: Range<u64>) -> Vec<u64> {
        sequence
            .scan(range)
            .map(|(_, trigger)| trigger.offset())
            .collect()
    }

    #[test]
    fn test_full_loop_scan_is_sorted() -> Result<(), Box<dyn Error>> {
        let mut sequence = Sequence::new("test", 16)?;
        for offset in [12, 3, 15, 0, 7] {
            sequence.add_trigger(offset, Payload::note(1, 60, 100, 0))?;
        }

        assert_eq!(vec![0, 3, 7, 12, 15], offsets(&sequence, 0..16));
        // Any full loop, wherever it starts.
        assert_eq!(vec![7, 12, 15, 0, 3], offsets(&sequence, 37..53));
        Ok(())
    }

    #[test]
    fn test_ties_keep_insertion_order() -> Result<(), Box<dyn Error>> {
        let mut sequence = Sequence::new("test", 8)?;
        let first = sequence.add_trigger(4, Payload::note(1, 60, 100, 0))?;
        let second = sequence.add_trigger(4, Payload::note(1, 64, 100, 0))?;
        let early = sequence.add_trigger(1, Payload::note(1, 67, 100, 0))?;

        let ids: Vec<TriggerId> = sequence.scan(0..8).map(|(_, t)| t.id()).collect();
        assert_eq!(vec![early, first, second], ids);
        Ok(())
    }

    #[test]
    fn test_disable_and_enable() -> Result<(), Box<dyn Error>> {
        let mut sequence = Sequence::new("test", 4)?;
        let id = sequence.add_trigger(2, Payload::control(1, 7, 100))?;

        sequence.set_trigger_enabled(id, false)?;
        assert!(offsets(&sequence, 2..3).is_empty());
        assert!(sequence.trigger(id).is_some());

        sequence.set_trigger_enabled(id, true)?;
        assert_eq!(vec![2], offsets(&sequence, 2..3));
        Ok(())
    }

    #[test]
    fn test_offsets_must_fit_loop() -> Result<(), Box<dyn Error>> {
        let mut sequence = Sequence::new("test", 4)?;
        assert!(matches!(
            sequence.add_trigger(4, Payload::custom(1, 1)),
            Err(SequoiaError::InvalidState(_))
        ));
        assert!(sequence.add_trigger(3, Payload::custom(1, 1)).is_ok());
        assert!(Sequence::new("empty", 0).is_err());
        Ok(())
    }

    #[test]
    fn test_invalid_payload_rejected() -> Result<(), Box<dyn Error>> {
        let mut sequence = Sequence::new("test", 4)?;
        assert!(sequence.add_trigger(0, Payload::note(0, 60, 100, 0)).is_err());
        assert!(sequence.triggers().is_empty());
        Ok(())
    }

    #[test]
    fn test_structural_changes_refused_during_scan() -> Result<(), Box<dyn Error>> {
        let gate = ScanGate::new();
        let mut sequence = Sequence::new("test", 4)?;
        sequence.attach(SequenceId(1), gate.clone());
        let id = sequence.add_trigger(0, Payload::custom(1, 1))?;

        {
            let _guard = gate.enter();
            assert!(matches!(
                sequence.add_trigger(1, Payload::custom(1, 2)),
                Err(SequoiaError::ConcurrentModification)
            ));
            assert!(matches!(
                sequence.remove_trigger(id),
                Err(SequoiaError::ConcurrentModification)
            ));
            // Enabling is not structural.
            sequence.set_trigger_enabled(id, false)?;
        }

        sequence.remove_trigger(id)?;
        assert!(sequence.triggers().is_empty());
        Ok(())
    }

    #[test]
    fn test_remove_unknown_trigger() -> Result<(), Box<dyn Error>> {
        let mut sequence = Sequence::new("test", 4)?;
        sequence.attach(SequenceId(9), ScanGate::new());
        assert!(matches!(
            sequence.remove_trigger(TriggerId(42)),
            Err(SequoiaError::NotFound(Entity::Trigger(SequenceId(9), TriggerId(42))))
        ));
        Ok(())
    }

    #[test]
    fn test_advance_without_division() -> Result<(), Box<dyn Error>> {
        let mut sequence = Sequence::new("test", 16)?;
        let window = sequence.advance(10..14);
        assert_eq!(0..4, window.local);
        assert_eq!(10, window.first_tick);
        assert_eq!(12, window.session_tick(2));

        let window = sequence.advance(14..20);
        assert_eq!(4..10, window.local);
        assert_eq!(10, sequence.playhead());
        Ok(())
    }

    #[test]
    fn test_advance_with_clock_divide() -> Result<(), Box<dyn Error>> {
        let mut sequence = Sequence::new("test", 16)?;
        sequence.set_clock_divide(3)?;

        // Local ticks land on session ticks 0, 3, 6...
        let window = sequence.advance(0..4);
        assert_eq!(0..2, window.local);
        assert_eq!(0, window.session_tick(0));
        assert_eq!(3, window.session_tick(1));

        let window = sequence.advance(4..7);
        assert_eq!(2..3, window.local);
        assert_eq!(6, window.session_tick(2));

        let window = sequence.advance(7..8);
        assert!(window.local.is_empty());

        let window = sequence.advance(8..10);
        assert_eq!(3..4, window.local);
        assert_eq!(9, window.session_tick(3));

        assert!(sequence.set_clock_divide(0).is_err());
        Ok(())
    }

    #[test]
    fn test_playhead_wraps() -> Result<(), Box<dyn Error>> {
        let mut sequence = Sequence::with_steps("test", 4, 2)?;
        assert_eq!(8, sequence.length());
        assert_eq!(4, sequence.steps(2));
        sequence.set_playhead(11);
        assert_eq!(3, sequence.playhead());
        sequence.rewind();
        assert_eq!(0, sequence.playhead());
        Ok(())
    }

    #[test]
    fn test_loop_points_bound_playback() -> Result<(), Box<dyn Error>> {
        let mut sequence = Sequence::new("test", 8)?;
        for offset in 0..8 {
            sequence.add_trigger(offset, Payload::custom(1, i32::from(offset as u8)))?;
        }
        sequence.set_first(2..3)?;
        sequence.set_last(4..5)?;
        assert_eq!(2, sequence.playhead());

        // Two passes through offsets 2, 3 and 4.
        let window = sequence.advance(0..6);
        assert_eq!(vec![2, 3, 4, 2, 3, 4], offsets(&sequence, window.local));
        assert_eq!(2, sequence.playhead());

        sequence.advance(6..8);
        assert_eq!(4, sequence.playhead());
        sequence.rewind();
        assert_eq!(2, sequence.playhead());
        Ok(())
    }

    #[test]
    fn test_loop_points_push_each_other() -> Result<(), Box<dyn Error>> {
        let mut sequence = Sequence::new("test", 16)?;
        sequence.set_last(4..6)?;
        assert_eq!((0, 5), (sequence.first(), sequence.last()));
        sequence.set_first(8..10)?;
        assert_eq!((8, 9), (sequence.first(), sequence.last()));

        sequence.set_last(2..4)?;
        assert_eq!((2, 3), (sequence.first(), sequence.last()));
        // Still ordered, so the other point stays.
        sequence.set_first(0..2)?;
        assert_eq!((0, 3), (sequence.first(), sequence.last()));

        assert!(sequence.set_first(16..17).is_err());
        assert!(sequence.set_last(14..18).is_err());
        assert!(sequence.set_last(3..3).is_err());
        assert_eq!((0, 3), (sequence.first(), sequence.last()));
        Ok(())
    }

    #[test]
    fn test_playhead_outside_loop_points() -> Result<(), Box<dyn Error>> {
        let mut sequence = Sequence::new("test", 16)?;
        sequence.set_playhead(6);
        sequence.set_first(4..5)?;
        sequence.set_last(7..8)?;
        // Still inside the loop, so it stays put.
        assert_eq!(6, sequence.playhead());

        sequence.set_playhead(12);
        assert_eq!(4, sequence.playhead());
        sequence.set_playhead(7);
        assert_eq!(7, sequence.playhead());
        sequence.set_last(5..6)?;
        assert_eq!(4, sequence.playhead());
        Ok(())
    }
}
