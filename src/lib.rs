//! Posture Pipeline - session capture, window features and model export
//! for a wearable posture/balance sensor.
//!
//! The three stages must agree exactly: the embedded classifier recomputes the
//! window features on-device and indexes the exported parameters by position,
//! so window size, feature order and normalization constants are shared
//! through one [`PipelineConfig`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Posture Pipeline                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌──────────────┐            │
//! │  │   Capture   │──▶│   Session   │──▶│   Windowing  │            │
//! │  │  (serial)   │   │   Loader    │   │  + Features  │            │
//! │  └─────────────┘   └─────────────┘   └──────────────┘            │
//! │        │                                    │                    │
//! │        ▼                                    ▼                    │
//! │  session_*.csv                      ┌──────────────┐             │
//! │                                     │   Dataset    │──▶ export   │
//! │                                     │  Assembler   │   (LR C++)  │
//! │                                     └──────────────┘             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use posture_pipeline::{core, PipelineConfig};
//!
//! let config = PipelineConfig::default();
//! let sessions = core::SessionLoader::new(config.label_groups.clone())
//!     .load_dir(&config.data_dir)
//!     .expect("Failed to load sessions");
//!
//! let extractor = core::WindowFeatureExtractor::new(
//!     config.channels.clone(),
//!     core::WindowSpec::new(config.window_size, config.step_size),
//! );
//! let dataset = core::DatasetAssembler::new(extractor)
//!     .assemble(&sessions)
//!     .expect("Channel layout differs between sessions");
//!
//! let model = core::ParameterExporter::default()
//!     .export(&dataset)
//!     .expect("Failed to fit model");
//! println!("{}", model.render_source());
//! ```

pub mod capture;
pub mod config;
pub mod core;

// Re-export key types at crate root for convenience
pub use capture::{CaptureOutcome, IncompleteSession, SavedSession, SessionCaptureService};
pub use config::{ConfigError, PipelineConfig};
pub use self::core::{
    Dataset, DatasetAssembler, ExportedModel, FeatureVector, ParameterExporter, Session,
    SessionLoader, WindowFeatureExtractor, WindowSpec,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build the extractor described by a configuration.
pub fn extractor_for(config: &PipelineConfig) -> WindowFeatureExtractor {
    WindowFeatureExtractor::new(
        config.channels.clone(),
        WindowSpec::new(config.window_size, config.step_size),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_feature_layout() {
        let names = extractor_for(&PipelineConfig::default()).feature_names();
        assert_eq!(names.len(), 36);
        assert_eq!(names[0], "pitch1_mean");
        assert_eq!(names[1], "pitch1_std");
        assert_eq!(names[16], "delta_pitch_mean");
        assert_eq!(names[35], "fsr_balance_max");
    }
}
