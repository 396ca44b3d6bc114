//! Loading recorded sessions into typed in-memory tables.
//!
//! A raw session file has the columns `t_ms`, one column per channel and
//! `label`. The session id and source name are attached at load time and are
//! not part of the file format.

use csv::ReaderBuilder;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Timestamp column; also the header marker on the serial stream.
pub const TIME_COLUMN: &str = "t_ms";

/// Class label column.
pub const LABEL_COLUMN: &str = "label";

/// One timestamped reading with values in the session's channel order.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Milliseconds since device start
    pub t_ms: u64,
    /// Channel values, indexed like [`Session::channels`]
    pub values: Vec<f64>,
}

/// A loaded recording session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Position of the file in discovery order
    pub session_id: usize,
    /// Posture class (0 = bad, 1 = good)
    pub label: u8,
    /// File name the session came from
    pub source_name: String,
    /// Channel names in file column order
    pub channels: Vec<String>,
    /// Samples in recording order
    pub samples: Vec<Sample>,
}

impl Session {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Index of a channel within each sample's values.
    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c == name)
    }
}

/// Errors raised while loading session files.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no session files matching {patterns} in {dir:?}")]
    NoSessions { dir: PathBuf, patterns: String },

    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path:?} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: &'static str },

    #[error("{path:?} row {row}: invalid value '{value}' in column '{column}'")]
    InvalidValue {
        path: PathBuf,
        row: usize,
        column: String,
        value: String,
    },

    #[error("{path:?} row {row}: label {value} is not 0 or 1")]
    InvalidLabel { path: PathBuf, row: usize, value: String },

    #[error("{path:?} row {row}: label {found} differs from session label {expected}")]
    MixedLabels {
        path: PathBuf,
        row: usize,
        expected: u8,
        found: u8,
    },

    #[error("{path:?} contains no samples")]
    EmptySession { path: PathBuf },
}

/// Reads completed session files, assigning session ids in discovery order.
pub struct SessionLoader {
    label_groups: Vec<String>,
}

impl SessionLoader {
    /// Create a loader that discovers `<group>_*.csv` for each group in order.
    pub fn new(label_groups: Vec<String>) -> Self {
        Self { label_groups }
    }

    /// Find session files in `dir`: each group's files sorted by name, groups in order.
    pub fn discover(&self, dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
        let entries = std::fs::read_dir(dir).map_err(|source| LoadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();

        let mut paths = Vec::new();
        for group in &self.label_groups {
            let prefix = format!("{group}_");
            let mut matching: Vec<&String> = names
                .iter()
                .filter(|n| n.starts_with(&prefix) && n.ends_with(".csv"))
                .collect();
            matching.sort();
            paths.extend(matching.into_iter().map(|n| dir.join(n)));
        }

        if paths.is_empty() {
            let patterns = self
                .label_groups
                .iter()
                .map(|g| format!("{g}_*.csv"))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(LoadError::NoSessions {
                dir: dir.to_path_buf(),
                patterns,
            });
        }

        Ok(paths)
    }

    /// Discover and load every session under `dir`.
    pub fn load_dir(&self, dir: &Path) -> Result<Vec<Session>, LoadError> {
        let paths = self.discover(dir)?;
        self.load_all(&paths)
    }

    /// Load the given files; ids follow slice order.
    pub fn load_all(&self, paths: &[PathBuf]) -> Result<Vec<Session>, LoadError> {
        paths
            .iter()
            .enumerate()
            .map(|(session_id, path)| {
                info!("Loading {}", path.display());
                load_session(path, session_id)
            })
            .collect()
    }
}

/// Parse one raw session file.
pub fn load_session(path: &Path, session_id: usize) -> Result<Session, LoadError> {
    let csv_err = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(str::to_string)
        .collect();

    let time_idx = headers
        .iter()
        .position(|h| h == TIME_COLUMN)
        .ok_or_else(|| LoadError::MissingColumn {
            path: path.to_path_buf(),
            column: TIME_COLUMN,
        })?;
    let label_idx = headers
        .iter()
        .position(|h| h == LABEL_COLUMN)
        .ok_or_else(|| LoadError::MissingColumn {
            path: path.to_path_buf(),
            column: LABEL_COLUMN,
        })?;

    let channel_cols: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != time_idx && *i != label_idx)
        .map(|(i, h)| (i, h.clone()))
        .collect();

    let mut samples = Vec::new();
    let mut label: Option<u8> = None;
    let mut dropped = 0usize;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.map_err(csv_err)?;
        // Header is line 1
        let row = row_idx + 2;

        if record.iter().all(str::is_empty) {
            dropped += 1;
            continue;
        }

        let invalid = |column: &str, value: &str| LoadError::InvalidValue {
            path: path.to_path_buf(),
            row,
            column: column.to_string(),
            value: value.to_string(),
        };

        let t_raw = &record[time_idx];
        let t_ms: u64 = t_raw.parse().map_err(|_| invalid(TIME_COLUMN, t_raw))?;

        let row_label = parse_label(&record[label_idx]).ok_or_else(|| LoadError::InvalidLabel {
            path: path.to_path_buf(),
            row,
            value: record[label_idx].to_string(),
        })?;
        match label {
            None => label = Some(row_label),
            Some(expected) if expected != row_label => {
                return Err(LoadError::MixedLabels {
                    path: path.to_path_buf(),
                    row,
                    expected,
                    found: row_label,
                });
            }
            Some(_) => {}
        }

        let mut values = Vec::with_capacity(channel_cols.len());
        for (idx, name) in &channel_cols {
            let raw = &record[*idx];
            let value: f64 = raw.parse().map_err(|_| invalid(name, raw))?;
            values.push(value);
        }

        samples.push(Sample { t_ms, values });
    }

    let label = label.ok_or_else(|| LoadError::EmptySession {
        path: path.to_path_buf(),
    })?;

    if dropped > 0 {
        debug!("Dropped {dropped} empty rows from {}", path.display());
    }

    let source_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(Session {
        session_id,
        label,
        source_name,
        channels: channel_cols.into_iter().map(|(_, name)| name).collect(),
        samples,
    })
}

/// Coerce a label cell to a class; accepts `1` as well as `1.0`.
pub(crate) fn parse_label(raw: &str) -> Option<u8> {
    let value: f64 = raw.parse().ok()?;
    if value == 0.0 {
        Some(0)
    } else if value == 1.0 {
        Some(1)
    } else {
        None
    }
}
