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

//! Transport state and the conversion from audio frames to sequencer ticks.

use std::{fmt, ops::Range};

use crate::error::SequoiaError;

/// Sequencer steps in one beat (sixteenth notes).
pub const STEPS_PER_BEAT: u32 = 4;

/// The tempo a new session starts at.
pub const DEFAULT_BPM: f32 = 120.0;

/// The default tick resolution of a step.
pub const DEFAULT_TICKS_PER_STEP: u32 = 96;

/// The fastest tempo the clock accepts. Together with `MAX_TICKS_PER_STEP` this
/// bounds the ticks a single cycle can cover.
pub const MAX_BPM: f32 = 1_000.0;

/// The finest tick resolution of a step.
pub const MAX_TICKS_PER_STEP: u32 = 960;

const SECONDS_PER_MINUTE: f64 = 60.0;

/// Positions are kept in fixed point with this many fractional bits.
const FRACTION_BITS: u32 = 16;
const ONE_TICK: u64 = 1 << FRACTION_BITS;

/// Whether the session is moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    Stopped = 0,
    Playing = 1,
    Paused = 2,
}

impl TransportState {
    pub(crate) fn from_u8(raw: u8) -> TransportState {
        match raw {
            1 => TransportState::Playing,
            2 => TransportState::Paused,
            _ => TransportState::Stopped,
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Stopped => write!(f, "stopped"),
            TransportState::Playing => write!(f, "playing"),
            TransportState::Paused => write!(f, "paused"),
        }
    }
}

/// Checks that a tempo can be used to drive the clock: above zero and at most
/// `MAX_BPM` beats per minute.
pub fn validate_tempo(bpm: f32) -> Result<f32, SequoiaError> {
    if !bpm.is_finite() || bpm <= 0.0 || bpm > MAX_BPM {
        return Err(SequoiaError::invalid(format!(
            "tempo must be above 0 and at most {} beats per minute, got {}",
            MAX_BPM, bpm
        )));
    }
    Ok(bpm)
}

/// A point on the session timeline, in ticks with a fractional part.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position(u64);

impl Position {
    /// A position exactly on the given tick.
    pub fn from_ticks(ticks: u64) -> Position {
        Position(ticks << FRACTION_BITS)
    }

    pub(crate) fn from_raw(raw: u64) -> Position {
        Position(raw)
    }

    /// The fixed point representation.
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Whole ticks elapsed.
    pub fn ticks(&self) -> u64 {
        self.0 >> FRACTION_BITS
    }

    /// The first whole tick at or after this position.
    pub fn ceil_ticks(&self) -> u64 {
        self.0.saturating_add(ONE_TICK - 1) >> FRACTION_BITS
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / ONE_TICK as f64
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.as_f64())
    }
}

/// The stretch of the timeline covered by one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    start: Position,
    end: Position,
    n_frames: u32,
}

impl Span {
    pub fn new(start: Position, end: Position, n_frames: u32) -> Span {
        Span {
            start,
            end: end.max(start),
            n_frames,
        }
    }

    /// A span during which the timeline does not move.
    pub fn idle(at: Position, n_frames: u32) -> Span {
        Span::new(at, at, n_frames)
    }

    pub fn start(&self) -> Position {
        self.start
    }

    pub fn end(&self) -> Position {
        self.end
    }

    pub fn n_frames(&self) -> u32 {
        self.n_frames
    }

    /// The whole ticks that fall inside this span. Each tick of the timeline
    /// lands in exactly one span.
    pub fn ticks(&self) -> Range<u64> {
        self.start.ceil_ticks()..self.end.ceil_ticks()
    }

    /// The frame within the cycle at which the given tick occurs.
    pub fn frame_of(&self, tick: u64) -> u32 {
        let width = self.end.raw() - self.start.raw();
        if width == 0 || self.n_frames == 0 {
            return 0;
        }
        let offset = (tick << FRACTION_BITS).saturating_sub(self.start.raw());
        let frame = offset as u128 * self.n_frames as u128 / width as u128;
        (frame as u32).min(self.n_frames - 1)
    }
}

/// Converts audio frames into ticks at the current tempo.
#[derive(Debug, Clone)]
pub struct Clock {
    sample_rate: u32,
    ticks_per_step: u32,
    bpm: f32,
    position: Position,
}

impl Clock {
    pub fn new(sample_rate: u32, ticks_per_step: u32, bpm: f32) -> Clock {
        Clock {
            sample_rate: sample_rate.max(1),
            ticks_per_step: ticks_per_step.max(1),
            bpm,
            position: Position::default(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn ticks_per_step(&self) -> u32 {
        self.ticks_per_step
    }

    pub fn ticks_per_beat(&self) -> u32 {
        self.ticks_per_step * STEPS_PER_BEAT
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    pub fn set_bpm(&mut self, bpm: f32) -> Result<(), SequoiaError> {
        self.bpm = validate_tempo(bpm)?;
        Ok(())
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// Moves the timeline back to the start.
    pub fn rewind(&mut self) {
        self.position = Position::default();
    }

    /// The distance covered by a cycle of the given length at the current tempo.
    /// Rounded once to the fixed point grid, so equal inputs always advance the
    /// timeline by the same amount.
    pub fn delta(&self, n_frames: u32) -> u64 {
        let ticks = n_frames as f64 * self.bpm as f64 / SECONDS_PER_MINUTE
            * self.ticks_per_beat() as f64
            / self.sample_rate as f64;
        (ticks * ONE_TICK as f64).round() as u64
    }

    /// Advances the timeline by one cycle and returns the covered span.
    pub fn advance(&mut self, n_frames: u32) -> Span {
        let start = self.position;
        self.position = Position::from_raw(start.raw().saturating_add(self.delta(n_frames)));
        Span::new(start, self.position, n_frames)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validate_tempo() {
        assert!(validate_tempo(120.0).is_ok());
        assert!(validate_tempo(0.5).is_ok());
        assert!(matches!(
            validate_tempo(0.0),
            Err(SequoiaError::InvalidState(_))
        ));
        assert!(validate_tempo(-10.0).is_err());
        assert!(validate_tempo(f32::NAN).is_err());
        assert!(validate_tempo(f32::INFINITY).is_err());
        assert!(validate_tempo(MAX_BPM).is_ok());
        assert!(validate_tempo(MAX_BPM + 1.0).is_err());
        assert!(validate_tempo(1e9).is_err());
        assert!(validate_tempo(f32::MAX).is_err());
    }

    #[test]
    fn test_end_of_timeline_saturates() {
        let end = Position::from_raw(u64::MAX);
        assert_eq!(u64::MAX >> FRACTION_BITS, end.ceil_ticks());

        let mut clock = Clock::new(48_000, MAX_TICKS_PER_STEP, MAX_BPM);
        clock.position = Position::from_raw(u64::MAX - 1);
        let span = clock.advance(8192);
        assert_eq!(u64::MAX, clock.position().raw());
        assert!(span.ticks().count() <= 1);
    }

    #[test]
    fn test_fastest_cycle_is_bounded() {
        // 1000 BPM at 960 ticks per step, an 8192 frame cycle at 8 kHz.
        let mut clock = Clock::new(8_000, MAX_TICKS_PER_STEP, MAX_BPM);
        let span = clock.advance(8192);
        assert_eq!(65_536, span.ticks().count());
    }

    #[test]
    fn test_constant_delta_per_cycle() {
        let mut clock = Clock::new(48_000, DEFAULT_TICKS_PER_STEP, 120.0);
        clock.advance(512);
        let one_cycle = clock.position().raw();
        assert!(one_cycle > 0);
        clock.advance(512);
        assert_eq!(2 * one_cycle, clock.position().raw());

        // 120 BPM at 96 ticks per step is 768 ticks per second.
        assert_eq!(16, clock.position().ticks());
    }

    #[test]
    fn test_delta_tracks_tempo() {
        for bpm in [1.0f32, 60.0, 90.5, 120.0, 174.0, 300.0] {
            let mut clock = Clock::new(44_100, 24, DEFAULT_BPM);
            clock.set_bpm(bpm).expect("valid tempo");
            let expected = 1024.0 * bpm as f64 / 60.0 * 96.0 / 44_100.0;
            let span = clock.advance(1024);
            let covered = span.end().as_f64() - span.start().as_f64();
            assert!((covered - expected).abs() < 1e-4, "bpm {}", bpm);
        }
    }

    #[test]
    fn test_one_second_of_cycles() {
        let mut clock = Clock::new(48_000, 96, 120.0);
        let mut ticks = 0;
        // 48000 / 500 = 96 cycles in a second.
        for _ in 0..96 {
            ticks += clock.advance(500).ticks().count();
        }
        assert_eq!(768, ticks);
        assert_eq!(768, clock.position().ticks());
    }

    #[test]
    fn test_span_ticks_and_frames() {
        let span = Span::new(Position::from_ticks(10), Position::from_ticks(20), 100);
        assert_eq!(10..20, span.ticks());
        assert_eq!(0, span.frame_of(10));
        assert_eq!(50, span.frame_of(15));
        assert_eq!(90, span.frame_of(19));

        // Fractional boundaries: 10.5 to 12.5 contains ticks 11 and 12.
        let half = 1 << (FRACTION_BITS - 1);
        let span = Span::new(
            Position::from_raw(Position::from_ticks(10).raw() + half),
            Position::from_raw(Position::from_ticks(12).raw() + half),
            64,
        );
        assert_eq!(11..13, span.ticks());
        assert_eq!(16, span.frame_of(11));
        assert_eq!(48, span.frame_of(12));
    }

    #[test]
    fn test_idle_span_is_empty() {
        let span = Span::idle(Position::from_ticks(5), 256);
        assert!(span.ticks().is_empty());
        assert_eq!(0, span.frame_of(5));
    }

    #[test]
    fn test_rewind() {
        let mut clock = Clock::new(48_000, 96, 120.0);
        clock.advance(4096);
        assert!(clock.position().ticks() > 0);
        clock.rewind();
        assert_eq!(Position::default(), clock.position());
    }
}
