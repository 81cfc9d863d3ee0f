use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal conditions. Any of these ends the process.
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} was spawned without a stdout pipe")]
    MissingStdout { program: String },

    #[error("failed to read command output: {0}")]
    Read(#[from] io::Error),

    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to publish {}: {source}", path.display())]
    Publish {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A line carried an `rtt` field ending in `us` whose value is not a number.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RttParseError {
    #[error("invalid rtt value {token:?}")]
    InvalidMicros { token: String },
}
