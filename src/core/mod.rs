//! Core data pipeline for the posture pipeline.
//!
//! This module contains:
//! - Session loading from raw capture files
//! - Fixed-stride windowing over session samples
//! - Per-window feature computation
//! - Dataset assembly across sessions
//! - Linear model fitting and parameter export

pub mod dataset;
pub mod export;
pub mod features;
pub mod session;
pub mod windowing;

// Re-export commonly used types
pub use dataset::{Dataset, DatasetAssembler, DatasetError};
pub use export::{ExportedModel, FitError, Normalization, ParameterExporter};
pub use features::{
    feature_names, ChannelStats, FeatureVector, SchemaMismatchError, WindowFeatureExtractor,
};
pub use session::{LoadError, Sample, Session, SessionLoader};
pub use windowing::{Window, WindowSpec, Windows};
