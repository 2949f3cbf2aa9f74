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
use std::{fs, io::Write, path::Path};

use config::{Config, File};
use tracing::{debug, info};

mod error;
mod session;
mod trigger;

pub use error::ConfigError;
pub use session::{EngineConfig, InPortConfig, SequenceConfig, SessionFile};
pub use trigger::TriggerConfig;

/// The formats a session file can be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    /// JSON, also used for `.sqa` files.
    Json,
}

impl Format {
    /// Picks the format from a file extension. Anything that isn't JSON is YAML.
    pub fn from_path(path: &Path) -> Format {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") | Some("sqa") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

impl SessionFile {
    /// Deserializes a session file from the path.
    pub fn deserialize(path: &Path) -> Result<SessionFile, ConfigError> {
        match Format::from_path(path) {
            Format::Yaml => Ok(Config::builder()
                .add_source(File::from(path).format(config::FileFormat::Yaml))
                .build()?
                .try_deserialize::<SessionFile>()?),
            Format::Json => Ok(serde_json::from_str(&fs::read_to_string(path)?)?),
        }
    }

    /// Serializes the session file and saves it at the given path, in the format
    /// its extension implies.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let serialized = match Format::from_path(path) {
            Format::Yaml => serde_yml::to_string(self)?,
            Format::Json => serde_json::to_string_pretty(self)?,
        };
        debug!(serialized);

        let mut file = fs::File::create(path)?;
        file.write_all(serialized.as_bytes())?;
        info!(session = self.name(), path = %path.display(), "Saved session.");
        Ok(())
    }
}
