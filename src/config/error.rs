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

/// Typed error for project load, parse and validation failures so callers can tell a
/// missing file from a bad reference without string matching.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config load/parse error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("{context} refers to unknown instrument {instrument}")]
    UnknownInstrument { context: String, instrument: String },

    #[error("song position {position} refers to unknown pattern {pattern}")]
    UnknownPattern { position: usize, pattern: String },

    #[error("pattern {0} is defined more than once")]
    DuplicatePattern(String),

    #[error("song positions start at 1")]
    InvalidSongPosition,

    #[error(
        "pattern {pattern} has a step for {instrument} at quarter {quarter}, position {position} \
         that its rate can't play"
    )]
    InvalidStep {
        pattern: String,
        instrument: String,
        quarter: usize,
        position: usize,
    },
}
