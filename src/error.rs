use std::{io, path::PathBuf};

use thiserror::Error;

/// Failures of the absolute deadline wait.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("couldn't create {what}: {source}")]
    Create {
        what: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("couldn't arm timer for {deadline}: {source}")]
    Arm {
        deadline: i64,
        #[source]
        source: io::Error,
    },
    #[error("waiting on timer failed: {0}")]
    Poll(#[source] io::Error),
    /// poll reported `POLLNVAL`, the timer handle is no longer usable
    #[error("timer handle is in an invalid state")]
    InvalidTimer,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("couldn't read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("couldn't write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("couldn't parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("couldn't serialize store: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("couldn't read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("couldn't write settings {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("couldn't parse settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("couldn't serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("couldn't find a home directory for the config")]
    NoProjectDirs,
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("couldn't open sound file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no media set")]
    NoMedia,
    #[error("audio backend: {0}")]
    Backend(String),
}
