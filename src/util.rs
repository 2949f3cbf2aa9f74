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
use std::path::Path;
use std::time::Duration;

/// Extracts a displayable file name from a path, returning a fallback if the name is unreadable.
pub fn filename_display(path: &Path) -> &str {
    path.file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("unreadable file name")
}

/// The time covered by the given number of frames.
pub fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    let sample_rate = sample_rate.max(1) as u64;
    let secs = frames / sample_rate;
    let nanos = (frames % sample_rate) * 1_000_000_000 / sample_rate;
    Duration::new(secs, nanos as u32)
}

/// Outputs the given duration in a minutes:seconds format.
pub fn duration_minutes_seconds(duration: Duration) -> String {
    let minutes = duration.as_secs() / 60;
    let secs = duration.as_secs() - minutes * 60;
    format!("{}:{:02}", minutes, secs)
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use std::path::PathBuf;

    use crate::util::{duration_minutes_seconds, filename_display, frames_to_duration};

    #[test]
    fn test_frames_to_duration() {
        assert_eq!(Duration::ZERO, frames_to_duration(0, 48_000));
        assert_eq!(Duration::from_millis(500), frames_to_duration(24_000, 48_000));
        assert_eq!(Duration::from_secs(90), frames_to_duration(90 * 44_100, 44_100));
    }

    #[test]
    fn test_filename_display() {
        assert_eq!(
            "backbeat.yaml",
            filename_display(&PathBuf::from("/sessions/backbeat.yaml"))
        );
        assert_eq!("unreadable file name", filename_display(&PathBuf::from("/")));
    }

    #[test]
    fn test_duration_minutes_strings() {
        assert_eq!("0:00", duration_minutes_seconds(Duration::new(0, 0)));
        assert_eq!("0:05", duration_minutes_seconds(Duration::new(5, 0)));
        assert_eq!("0:55", duration_minutes_seconds(Duration::new(55, 0)));
        assert_eq!("1:00", duration_minutes_seconds(Duration::new(60, 0)));
        assert_eq!("2:05", duration_minutes_seconds(Duration::new(125, 0)));
        assert_eq!("60:06", duration_minutes_seconds(Duration::new(3606, 0)));
    }
}
