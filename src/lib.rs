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

//! A real-time MIDI step sequencer. A [`session::Session`] owns sequences of
//! timed triggers and the ports they play through, and hands an
//! [`session::Engine`] to whatever drives the audio graph.

pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod noteoff;
pub mod port;
pub mod sequence;
pub mod session;
pub mod simulate;
#[cfg(test)]
mod testutil;
pub mod transport;
pub mod trigger;
pub mod util;

pub use error::SequoiaError;
pub use session::{Engine, Session, Settings};
