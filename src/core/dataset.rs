//! Assembling per-session feature vectors into one labeled dataset.
//!
//! Row order is session discovery order, then window order within each
//! session. Nothing is reordered, deduplicated or filtered here.

use crate::core::features::{FeatureVector, SchemaMismatchError, WindowFeatureExtractor};
use crate::core::session::{parse_label, Session, LABEL_COLUMN};
use csv::{ReaderBuilder, WriterBuilder};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Session id column in the windowed dataset file.
pub const SESSION_ID_COLUMN: &str = "session_id";

/// Source file column in the windowed dataset file.
pub const SOURCE_COLUMN: &str = "source_file";

/// Columns that are never features.
pub const METADATA_COLUMNS: [&str; 3] = [LABEL_COLUMN, SESSION_ID_COLUMN, SOURCE_COLUMN];

/// Errors reading or writing a windowed dataset file.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error(transparent)]
    Schema(#[from] SchemaMismatchError),

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
}

/// All window feature vectors with their shared column names.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    feature_names: Vec<String>,
    rows: Vec<FeatureVector>,
}

impl Dataset {
    /// Build a dataset from rows that already follow `feature_names`.
    pub fn new(feature_names: Vec<String>, rows: Vec<FeatureVector>) -> Self {
        Self {
            feature_names,
            rows,
        }
    }

    /// Feature columns in authoritative order (metadata excluded).
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn rows(&self) -> &[FeatureVector] {
        &self.rows
    }

    pub fn feature_count(&self) -> usize {
        self.feature_names.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one feature column across all rows.
    pub fn column(&self, idx: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r.values[idx]).collect()
    }

    /// Labels of all rows, in row order.
    pub fn labels(&self) -> Vec<u8> {
        self.rows.iter().map(|r| r.label).collect()
    }

    /// Write the windowed dataset file: features, then label, session id, source.
    pub fn write_csv(&self, path: &Path) -> Result<(), DatasetError> {
        let csv_err = |source| DatasetError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut writer = WriterBuilder::new().from_path(path).map_err(csv_err)?;

        let header = self
            .feature_names
            .iter()
            .map(String::as_str)
            .chain(METADATA_COLUMNS);
        writer.write_record(header).map_err(csv_err)?;

        for row in &self.rows {
            let mut record: Vec<String> = row.values.iter().map(|v| v.to_string()).collect();
            record.push(row.label.to_string());
            record.push(row.session_id.to_string());
            record.push(row.source_name.clone());
            writer.write_record(&record).map_err(csv_err)?;
        }

        writer
            .flush()
            .map_err(|e| csv_err(csv::Error::from(e)))?;
        Ok(())
    }

    /// Read a windowed dataset file; every non-metadata column is a feature.
    pub fn read_csv(path: &Path) -> Result<Self, DatasetError> {
        let csv_err = |source| DatasetError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(csv_err)?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(str::to_string)
            .collect();

        let find = |column: &'static str| {
            headers
                .iter()
                .position(|h| h == column)
                .ok_or_else(|| DatasetError::MissingColumn {
                    path: path.to_path_buf(),
                    column,
                })
        };
        let label_idx = find(LABEL_COLUMN)?;
        let session_idx = find(SESSION_ID_COLUMN)?;
        let source_idx = find(SOURCE_COLUMN)?;

        let feature_cols: Vec<usize> = (0..headers.len())
            .filter(|i| !METADATA_COLUMNS.contains(&headers[*i].as_str()))
            .collect();
        let feature_names = feature_cols.iter().map(|&i| headers[i].clone()).collect();

        let mut rows = Vec::new();
        for (row_idx, result) in reader.records().enumerate() {
            let record = result.map_err(csv_err)?;
            let row = row_idx + 2;
            let invalid = |col: usize| DatasetError::InvalidValue {
                path: path.to_path_buf(),
                row,
                column: headers[col].clone(),
                value: record[col].to_string(),
            };

            let values = feature_cols
                .iter()
                .map(|&i| record[i].parse::<f64>().map_err(|_| invalid(i)))
                .collect::<Result<Vec<_>, _>>()?;
            let label = parse_label(&record[label_idx]).ok_or_else(|| invalid(label_idx))?;
            let session_id: usize = record[session_idx]
                .parse()
                .map_err(|_| invalid(session_idx))?;

            rows.push(FeatureVector {
                values,
                label,
                session_id,
                source_name: record[source_idx].to_string(),
            });
        }

        Ok(Self {
            feature_names,
            rows,
        })
    }
}

/// Concatenates the windows of every session into one [`Dataset`].
pub struct DatasetAssembler {
    extractor: WindowFeatureExtractor,
}

impl DatasetAssembler {
    pub fn new(extractor: WindowFeatureExtractor) -> Self {
        Self { extractor }
    }

    /// Assemble sessions in the given order.
    ///
    /// Every session is schema-checked before any windows are produced, so a
    /// mismatch never yields a partial dataset.
    pub fn assemble(&self, sessions: &[Session]) -> Result<Dataset, SchemaMismatchError> {
        for session in sessions {
            self.extractor.check_schema(session)?;
        }

        let mut rows = Vec::new();
        for session in sessions {
            let before = rows.len();
            rows.extend(self.extractor.extract(session)?);
            info!(
                "{}: {} samples -> {} windows",
                session.source_name,
                session.len(),
                rows.len() - before
            );
        }

        Ok(Dataset::new(self.extractor.feature_names(), rows))
    }
}
