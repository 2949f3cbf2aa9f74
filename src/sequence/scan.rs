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
    ops::Range,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::trigger::Trigger;

/// Raised by a session for as long as it is scanning its sequences. Sequences
/// attached to the session refuse structural changes while it is held.
#[derive(Debug, Clone, Default)]
pub struct ScanGate {
    held: Arc<AtomicBool>,
}

impl ScanGate {
    pub fn new() -> ScanGate {
        ScanGate::default()
    }

    /// Returns true while a scan is in progress.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Holds the gate until the returned guard is dropped.
    pub fn enter(&self) -> ScanGuard<'_> {
        self.held.store(true, Ordering::Release);
        ScanGuard { gate: self }
    }
}

/// Releases the scan gate on drop.
pub struct ScanGuard<'a> {
    gate: &'a ScanGate,
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.gate.held.store(false, Ordering::Release);
    }
}

/// Walks the triggers of a looping sequence over a half open tick range.
///
/// The loop covers a range of trigger offsets. Tick zero is the start of that
/// range, and ticks are mapped onto it modulo its length, so a range that
/// crosses the loop boundary continues from the first offset again. Yields the
/// absolute tick the trigger lands on along with the trigger, in ascending
/// order. Disabled triggers are skipped.
pub struct Scan<'a> {
    triggers: &'a [Trigger],
    /// Offset of tick zero.
    first: u64,
    length: u64,
    end: u64,
    /// Absolute tick at which the current loop pass starts.
    pass_start: u64,
    /// Offsets below this bound are in range for the current pass.
    window_end: u64,
    index: usize,
}

impl<'a> Scan<'a> {
    pub(crate) fn new(triggers: &'a [Trigger], bounds: Range<u64>, range: Range<u64>) -> Scan<'a> {
        let first = bounds.start;
        let length = bounds.end.saturating_sub(bounds.start);
        if range.start >= range.end || length == 0 {
            return Scan {
                triggers,
                first,
                length,
                end: range.end,
                pass_start: u64::MAX,
                window_end: 0,
                index: 0,
            };
        }

        let pass_start = range.start - range.start % length;
        let from = first + range.start - pass_start;
        Scan {
            triggers,
            first,
            length,
            end: range.end,
            pass_start,
            window_end: first + (range.end - pass_start).min(length),
            index: triggers.partition_point(|trigger| trigger.offset() < from),
        }
    }
}

impl<'a> Iterator for Scan<'a> {
    type Item = (u64, &'a Trigger);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.pass_start >= self.end {
                return None;
            }

            match self.triggers.get(self.index) {
                Some(trigger) if trigger.offset() < self.window_end => {
                    self.index += 1;
                    if trigger.is_enabled() {
                        return Some((self.pass_start + trigger.offset() - self.first, trigger));
                    }
                }
                _ => {
                    // Move on to the next pass through the loop.
                    self.pass_start = self.pass_start.saturating_add(self.length);
                    if self.pass_start >= self.end {
                        return None;
                    }
                    self.window_end = self.first + (self.end - self.pass_start).min(self.length);
                    let first = self.first;
                    self.index = self.triggers.partition_point(|trigger| trigger.offset() < first);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::trigger::{Payload, TriggerId};

    fn triggers(offsets: &[u64]) -> Vec<Trigger> {
        offsets
            .iter()
            .enumerate()
            .map(|(i, offset)| Trigger::new(TriggerId(i as u32), *offset, Payload::custom(0, 0)))
            .collect()
    }

    fn ticks(scan: Scan) -> Vec<u64> {
        scan.map(|(tick, _)| tick).collect()
    }

    #[test]
    fn test_scan_within_pass() {
        let triggers = triggers(&[0, 4, 8, 12]);
        assert_eq!(vec![4, 8], ticks(Scan::new(&triggers, 0..16, 3..9)));
        assert_eq!(vec![0, 4, 8, 12], ticks(Scan::new(&triggers, 0..16, 0..16)));
        assert_eq!(Vec::<u64>::new(), ticks(Scan::new(&triggers, 0..16, 5..8)));
    }

    #[test]
    fn test_scan_wraps_loop_boundary() {
        let triggers = triggers(&[0, 1, 14, 15]);
        assert_eq!(vec![14, 15, 16, 17], ticks(Scan::new(&triggers, 0..16, 14..18)));
        assert_eq!(vec![30, 31, 32], ticks(Scan::new(&triggers, 0..16, 29..33)));
    }

    #[test]
    fn test_scan_repeats_over_several_passes() {
        let triggers = triggers(&[2]);
        assert_eq!(vec![2, 6, 10], ticks(Scan::new(&triggers, 0..4, 0..12)));
    }

    #[test]
    fn test_scan_empty_ranges() {
        let triggers = triggers(&[0, 1]);
        assert_eq!(0, Scan::new(&triggers, 0..4, 3..3).count());
        assert_eq!(0, Scan::new(&triggers, 0..4, 9..2).count());
        assert_eq!(0, Scan::new(&[], 0..4, 0..100).count());
        assert_eq!(0, Scan::new(&triggers, 0..0, 0..100).count());
    }

    #[test]
    fn test_scan_inside_loop_points() {
        let triggers = triggers(&[0, 2, 3, 5, 7]);
        // Offsets 2 to 5 play, with tick zero on offset 2.
        let offsets: Vec<u64> = Scan::new(&triggers, 2..6, 0..9)
            .map(|(_, trigger)| trigger.offset())
            .collect();
        assert_eq!(vec![2, 3, 5, 2, 3, 5, 2], offsets);
        assert_eq!(vec![3, 4, 5, 7, 8, 9], ticks(Scan::new(&triggers, 2..6, 3..10)));
    }

    #[test]
    fn test_scan_skips_disabled() {
        let mut triggers = triggers(&[0, 1, 2]);
        triggers[1].set_enabled(false);
        assert_eq!(vec![0, 2], ticks(Scan::new(&triggers, 0..3, 0..3)));
    }

    #[test]
    fn test_scan_gate() {
        let gate = ScanGate::new();
        assert!(!gate.is_held());
        {
            let _guard = gate.enter();
            assert!(gate.clone().is_held());
        }
        assert!(!gate.is_held());
    }
}
