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
use crate::event::Message;
use crate::port::PortId;

/// The number of note offs that can be pending unless configured otherwise.
pub const DEFAULT_NOTE_OFF_CAPACITY: usize = 256;

/// A note off waiting for its tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOff {
    /// Session tick at which the note is released.
    pub due: u64,
    pub port: PortId,
    pub channel: u8,
    pub note: u8,
}

impl PendingOff {
    pub fn message(&self) -> Message {
        Message::note_off(self.channel, self.note)
    }
}

/// A fixed size pool of pending note offs.
#[derive(Debug)]
pub struct NoteOffPool {
    capacity: usize,
    pending: Vec<PendingOff>,
    dropped: u64,
}

impl NoteOffPool {
    pub fn new(capacity: usize) -> NoteOffPool {
        NoteOffPool {
            capacity,
            pending: Vec::with_capacity(capacity),
            dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Note offs that did not fit in the pool.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Schedules a note off. Returns false if the pool is full, in which case the
    /// note off is lost.
    pub fn schedule(&mut self, off: PendingOff) -> bool {
        if self.pending.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }
        self.pending.push(off);
        true
    }

    /// Removes every note off due before `end`, passing each to `fire`. Order of
    /// removal is unspecified.
    pub fn take_due<F>(&mut self, end: u64, mut fire: F) -> usize
    where
        F: FnMut(PendingOff),
    {
        let mut fired = 0;
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].due < end {
                fire(self.pending.swap_remove(i));
                fired += 1;
            } else {
                i += 1;
            }
        }
        fired
    }

    /// Removes every pending note off regardless of when it is due.
    pub fn release_all<F>(&mut self, fire: F) -> usize
    where
        F: FnMut(PendingOff),
    {
        self.take_due(u64::MAX, fire)
    }

    /// Forgets the note offs headed for a port that no longer exists.
    pub fn forget_port(&mut self, port: PortId) {
        self.pending.retain(|off| off.port != port);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn off(due: u64, note: u8) -> PendingOff {
        PendingOff {
            due,
            port: PortId(1),
            channel: 1,
            note,
        }
    }

    #[test]
    fn test_take_due() {
        let mut pool = NoteOffPool::new(8);
        pool.schedule(off(10, 60));
        pool.schedule(off(4, 61));
        pool.schedule(off(12, 62));
        pool.schedule(off(9, 63));

        let mut fired = Vec::new();
        assert_eq!(2, pool.take_due(10, |off| fired.push(off.note)));
        fired.sort();
        assert_eq!(vec![61, 63], fired);
        assert_eq!(2, pool.len());

        let mut fired = Vec::new();
        pool.take_due(13, |off| fired.push(off.note));
        fired.sort();
        assert_eq!(vec![60, 62], fired);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_overflow() {
        let mut pool = NoteOffPool::new(2);
        assert!(pool.schedule(off(1, 60)));
        assert!(pool.schedule(off(1, 61)));
        assert!(!pool.schedule(off(1, 62)));
        assert_eq!(1, pool.dropped());
        assert_eq!(2, pool.release_all(|_| {}));
        assert!(pool.schedule(off(1, 62)));
    }

    #[test]
    fn test_forget_port() {
        let mut pool = NoteOffPool::new(4);
        pool.schedule(off(1, 60));
        pool.schedule(PendingOff {
            port: PortId(2),
            ..off(1, 61)
        });
        pool.forget_port(PortId(1));
        assert_eq!(1, pool.len());
        assert_eq!(1, pool.release_all(|off| assert_eq!(PortId(2), off.port)));
    }

    #[test]
    fn test_message() {
        assert_eq!(Message::note_off(1, 60), off(0, 60).message());
    }
}
