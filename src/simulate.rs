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

//! Renders a session offline against the mock graph, cycle by cycle, as a JACK
//! server would drive it.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use tracing::{info, span, Level};

use crate::config::{ConfigError, SessionFile};
use crate::event::Message;
use crate::graph::MockGraph;
use crate::session::CycleReport;
use crate::util::{duration_minutes_seconds, frames_to_duration};

/// How to drive a simulated graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Simulation {
    pub sample_rate: u32,
    /// Frames per cycle.
    pub buffer_size: u32,
    pub duration: Duration,
}

impl Default for Simulation {
    fn default() -> Self {
        Simulation {
            sample_rate: 48_000,
            buffer_size: 256,
            duration: Duration::from_secs(4),
        }
    }
}

/// An event written to an output port, placed on the absolute timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub frame: u64,
    pub port: String,
    pub message: Message,
}

/// The outcome of a simulation.
#[derive(Debug, Clone, Default)]
pub struct Render {
    pub sample_rate: u32,
    pub cycles: u64,
    pub events: Vec<Rendered>,
    pub fired: usize,
    pub released: usize,
    pub dropped: usize,
    pub write_errors: usize,
}

impl Render {
    fn add(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.fired += report.fired;
        self.released += report.released;
        self.dropped += report.dropped;
        self.write_errors += report.write_errors;
    }
}

impl fmt::Display for Render {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for event in self.events.iter() {
            let at = frames_to_duration(event.frame, self.sample_rate);
            writeln!(
                f,
                "{} +{:03}ms {:>10} {:<12} {}",
                duration_minutes_seconds(at),
                at.subsec_millis(),
                event.frame,
                event.port,
                event.message
            )?;
        }
        write!(
            f,
            "{} cycles, {} fired, {} released, {} dropped, {} write errors",
            self.cycles, self.fired, self.released, self.dropped, self.write_errors
        )
    }
}

/// Plays the session from the start for the configured duration, then stops it
/// and runs one more cycle so that held notes are released.
pub fn simulate(file: &SessionFile, simulation: &Simulation) -> Result<Render, ConfigError> {
    if simulation.sample_rate == 0 || simulation.buffer_size == 0 {
        return Err(ConfigError::Invalid(
            "sample rate and buffer size must be at least 1".to_string(),
        ));
    }

    let span = span!(Level::INFO, "simulate");
    let _enter = span.enter();

    let mut graph = MockGraph::new("simulate", simulation.sample_rate);
    let (session, mut engine) = file.build(Arc::new(graph.clone()))?;
    let names: HashMap<_, _> = session
        .ports()
        .map(|port| (port.id(), port.name().to_string()))
        .collect();

    let frames = (simulation.duration.as_secs_f64() * simulation.sample_rate as f64).ceil() as u64;
    let cycles = frames.div_ceil(simulation.buffer_size as u64);
    info!(
        session = session.name(),
        cycles,
        buffer_size = simulation.buffer_size,
        sample_rate = simulation.sample_rate,
        "Simulating."
    );

    let mut render = Render {
        sample_rate: simulation.sample_rate,
        ..Default::default()
    };
    session.start()?;
    for _ in 0..cycles {
        let report = engine.process_cycle(simulation.buffer_size, &mut graph);
        render.add(&report);
        graph.end_cycle();
    }
    session.stop()?;
    let report = engine.process_cycle(simulation.buffer_size, &mut graph);
    render.add(&report);

    render.events = graph
        .take_written()
        .into_iter()
        .map(|written| Rendered {
            frame: written.cycle * simulation.buffer_size as u64 + written.event.frame as u64,
            port: names
                .get(&written.port)
                .cloned()
                .unwrap_or_else(|| written.port.to_string()),
            message: written.event.message,
        })
        .collect();

    session.destroy()?;
    info!(
        events = render.events.len(),
        dropped = render.dropped,
        "Simulation finished."
    );
    Ok(render)
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use super::*;
    use crate::config::{SequenceConfig, TriggerConfig};
    use crate::testutil::session_asset;

    fn four_on_the_floor() -> SessionFile {
        SessionFile::new(
            "floor",
            120.0,
            &["out".to_string()],
            vec![],
            vec![SequenceConfig::new(
                "kick",
                4,
                Some("out"),
                vec![TriggerConfig::note(0, 36, 100, 48)],
            )],
        )
    }

    #[test]
    fn test_simulate_timeline() -> Result<(), Box<dyn Error>> {
        let render = simulate(
            &four_on_the_floor(),
            &Simulation {
                sample_rate: 48_000,
                buffer_size: 500,
                duration: Duration::from_secs(1),
            },
        )?;

        // 96 cycles of playback plus the cycle that stops.
        assert_eq!(97, render.cycles);
        assert_eq!(2, render.fired);
        assert_eq!(2, render.released);
        assert_eq!(0, render.dropped);

        let frames: Vec<u64> = render.events.iter().map(|event| event.frame).collect();
        assert_eq!(vec![0, 3_000, 24_000, 27_000], frames);
        assert!(render.events.iter().all(|event| event.port == "out"));
        assert_eq!(Message::note_on(1, 36, 100), render.events[0].message);
        assert_eq!(Message::note_off(1, 36), render.events[1].message);
        Ok(())
    }

    #[test]
    fn test_held_notes_released_on_stop() -> Result<(), Box<dyn Error>> {
        // Stops half way through the first note.
        let render = simulate(
            &four_on_the_floor(),
            &Simulation {
                sample_rate: 48_000,
                buffer_size: 500,
                duration: Duration::from_millis(30),
            },
        )?;
        assert_eq!(1, render.fired);
        assert_eq!(1, render.released);
        assert_eq!(Message::note_off(1, 36), render.events[1].message);
        assert_eq!(3 * 500, render.events[1].frame);
        Ok(())
    }

    #[test]
    fn test_simulate_asset_is_repeatable() -> Result<(), Box<dyn Error>> {
        let file = SessionFile::deserialize(&session_asset("backbeat.yaml"))?;
        let simulation = Simulation::default();
        let first = simulate(&file, &simulation)?;
        let second = simulate(&file, &simulation)?;
        assert!(first.fired > 0);
        assert_eq!(first.events, second.events);
        Ok(())
    }

    #[test]
    fn test_rejects_empty_buffer() {
        let simulation = Simulation {
            buffer_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            simulate(&four_on_the_floor(), &simulation),
            Err(ConfigError::Invalid(_))
        ));
    }
}
