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
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;
use sequoia::config::SessionFile;
use sequoia::graph::MockGraph;
use sequoia::simulate::{simulate, Simulation};
use sequoia::util::filename_display;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A real-time MIDI step sequencer."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Loads a session file and prints the session it describes.
    Check {
        /// The path to the session file.
        path: String,
    },
    /// Renders a session offline and prints every event it sends.
    Simulate {
        /// The path to the session file.
        path: String,
        /// The sample rate of the simulated graph.
        #[arg(short, long, default_value_t = 48_000)]
        sample_rate: u32,
        /// Frames per cycle.
        #[arg(short, long, default_value_t = 256)]
        buffer_size: u32,
        /// How long to play for, e.g. 4s or 1m30s.
        #[arg(short, long, default_value = "4s")]
        duration: String,
    },
    /// Converts a session file between YAML and JSON. The format is chosen by the
    /// file extension.
    Convert {
        /// The session file to read.
        input: String,
        /// The session file to write.
        output: String,
    },
    /// Plays a session through a running JACK server.
    #[cfg(feature = "jack")]
    Run {
        /// The path to the session file.
        path: String,
        /// The JACK client name. Defaults to the session name.
        #[arg(short, long)]
        client_name: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { path } => {
            let path = PathBuf::from(&path);
            let file = SessionFile::deserialize(&path)?;
            let (session, _engine) = file.build(Arc::new(MockGraph::new("check", 48_000)))?;

            println!("{} is valid.", filename_display(&path));
            println!("{}", session);
            session.destroy()?;
        }
        Commands::Simulate {
            path,
            sample_rate,
            buffer_size,
            duration,
        } => {
            let file = SessionFile::deserialize(&PathBuf::from(&path))?;
            let render = simulate(
                &file,
                &Simulation {
                    sample_rate,
                    buffer_size,
                    duration: DurationString::from_string(duration)?.into(),
                },
            )?;
            println!("{}", render);
        }
        Commands::Convert { input, output } => {
            let file = SessionFile::deserialize(&PathBuf::from(&input))?;
            let output = PathBuf::from(&output);
            file.save(&output)?;
            println!("Wrote {}.", filename_display(&output));
        }
        #[cfg(feature = "jack")]
        Commands::Run { path, client_name } => {
            use sequoia::graph::jack::JackGraph;

            let file = SessionFile::deserialize(&PathBuf::from(&path))?;
            let graph = Arc::new(JackGraph::new(
                client_name.as_deref().unwrap_or(file.name()),
            )?);
            let (session, engine) = file.build(graph.clone())?;
            graph.activate(engine)?;
            session.start()?;

            println!("Playing {}. Press enter to stop.", session.name());
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;

            session.stop()?;
            // Give the engine a few cycles to release held notes.
            std::thread::sleep(std::time::Duration::from_millis(100));
            session.destroy()?;
        }
    }

    Ok(())
}
