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
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::event::Event;

/// The capacity of a port queue unless configured otherwise.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A bounded FIFO of events. Storage is reserved up front and never grows.
/// Events that do not fit are dropped and counted.
#[derive(Debug)]
pub struct EventQueue {
    capacity: usize,
    /// Each event is tagged with its arrival number, which breaks ties between
    /// events on the same frame.
    events: Vec<(u32, Event)>,
    arrivals: u32,
    dropped: Arc<AtomicU64>,
}

impl EventQueue {
    pub fn new(capacity: usize, dropped: Arc<AtomicU64>) -> EventQueue {
        EventQueue {
            capacity,
            events: Vec::with_capacity(capacity),
            arrivals: 0,
            dropped,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total events dropped over the life of the queue.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Appends an event. Returns false, and counts the drop, if the queue is full.
    pub fn push(&mut self, event: Event) -> bool {
        if self.events.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.events.push((self.arrivals, event));
        self.arrivals = self.arrivals.wrapping_add(1);
        true
    }

    /// Removes every queued event in arrival order.
    pub fn drain(&mut self) -> impl Iterator<Item = Event> + '_ {
        self.arrivals = 0;
        self.events.drain(..).map(|(_, event)| event)
    }

    /// Removes every queued event ordered by frame, then by arrival.
    pub fn drain_by_frame(&mut self) -> impl Iterator<Item = Event> + '_ {
        self.events
            .sort_unstable_by_key(|(arrival, event)| (event.frame, *arrival));
        self.drain()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::event::Message;

    fn queue(capacity: usize) -> EventQueue {
        EventQueue::new(capacity, Arc::new(AtomicU64::new(0)))
    }

    #[test]
    fn test_overflow_keeps_capacity_and_counts_drops() {
        let mut queue = queue(4);
        let accepted = (0..10)
            .filter(|i| queue.push(Event::new(*i, Message::note_on(1, 60, 100))))
            .count();

        assert_eq!(4, accepted);
        assert_eq!(4, queue.len());
        assert_eq!(6, queue.dropped());

        let frames: Vec<u32> = queue.drain().map(|event| event.frame).collect();
        assert_eq!(vec![0, 1, 2, 3], frames);
        assert!(queue.is_empty());
        // Drops are not forgotten when the queue empties.
        assert_eq!(6, queue.dropped());
    }

    #[test]
    fn test_drain_by_frame_is_stable() {
        let mut queue = queue(8);
        queue.push(Event::new(10, Message::note_on(1, 60, 100)));
        queue.push(Event::new(3, Message::note_on(1, 61, 100)));
        queue.push(Event::new(10, Message::note_off(1, 62)));
        queue.push(Event::new(0, Message::note_on(1, 63, 100)));
        queue.push(Event::new(3, Message::note_off(1, 64)));

        let ordered: Vec<Event> = queue.drain_by_frame().collect();
        assert_eq!(
            vec![
                Event::new(0, Message::note_on(1, 63, 100)),
                Event::new(3, Message::note_on(1, 61, 100)),
                Event::new(3, Message::note_off(1, 64)),
                Event::new(10, Message::note_on(1, 60, 100)),
                Event::new(10, Message::note_off(1, 62)),
            ],
            ordered
        );
    }

    #[test]
    fn test_storage_never_grows() {
        let mut queue = queue(2);
        let reserved = queue.events.capacity();
        for _ in 0..5 {
            queue.push(Event::new(0, Message::Custom { id: 1, value: 1 }));
        }
        assert_eq!(reserved, queue.events.capacity());
    }
}
