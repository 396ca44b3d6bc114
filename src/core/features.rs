//! Feature computation from sample windows.
//!
//! Each window is reduced to four statistics per channel, in the fixed channel
//! order: mean, population standard deviation, min and max. The embedded
//! classifier recomputes the same values on-device, so both the order and the
//! N-divisor for the standard deviation must not change.

use crate::core::session::Session;
use crate::core::windowing::{Window, WindowSpec};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use thiserror::Error;

/// Statistic suffixes, in emission order.
pub const STAT_SUFFIXES: [&str; 4] = ["mean", "std", "min", "max"];

/// Number of features contributed by each channel.
pub const FEATURES_PER_CHANNEL: usize = STAT_SUFFIXES.len();

/// Feature column names for a channel list: `<channel>_<stat>` per channel.
pub fn feature_names<S: AsRef<str>>(channels: &[S]) -> Vec<String> {
    channels
        .iter()
        .flat_map(|c| {
            STAT_SUFFIXES
                .iter()
                .map(move |stat| format!("{}_{stat}", c.as_ref()))
        })
        .collect()
}

/// Summary statistics of one channel over one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl ChannelStats {
    /// Reduce a non-empty set of values.
    pub fn compute(values: &[f64]) -> Self {
        let mean = values.mean();
        Self {
            mean,
            std: population_std_about(values, mean),
            min: Statistics::min(values),
            max: Statistics::max(values),
        }
    }

    /// Values in feature column order.
    pub fn as_array(&self) -> [f64; FEATURES_PER_CHANNEL] {
        [self.mean, self.std, self.min, self.max]
    }
}

/// Population standard deviation around a precomputed mean.
///
/// Two-pass so that a constant column yields exactly 0.
pub(crate) fn population_std_about(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (sum_sq / values.len() as f64).sqrt()
}

/// The features of one window plus the metadata it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Feature values, ordered like [`feature_names`]
    pub values: Vec<f64>,
    pub label: u8,
    pub session_id: usize,
    pub source_name: String,
}

/// A session whose channels do not match the configured channel set.
#[derive(Debug, Error)]
#[error("{source_name}: channels {found:?} do not match expected {expected:?}")]
pub struct SchemaMismatchError {
    pub source_name: String,
    pub expected: Vec<String>,
    pub found: Vec<String>,
}

/// Turns sessions into per-window feature vectors.
#[derive(Debug, Clone)]
pub struct WindowFeatureExtractor {
    channels: Vec<String>,
    spec: WindowSpec,
}

impl WindowFeatureExtractor {
    pub fn new(channels: Vec<String>, spec: WindowSpec) -> Self {
        Self { channels, spec }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn spec(&self) -> WindowSpec {
        self.spec
    }

    /// Feature column names produced by this extractor.
    pub fn feature_names(&self) -> Vec<String> {
        feature_names(&self.channels)
    }

    /// Check that a session carries exactly the configured channel set.
    pub fn check_schema(&self, session: &Session) -> Result<(), SchemaMismatchError> {
        let mut expected: Vec<&str> = self.channels.iter().map(String::as_str).collect();
        let mut found: Vec<&str> = session.channels.iter().map(String::as_str).collect();
        expected.sort_unstable();
        found.sort_unstable();

        if expected == found {
            Ok(())
        } else {
            Err(SchemaMismatchError {
                source_name: session.source_name.clone(),
                expected: self.channels.clone(),
                found: session.channels.clone(),
            })
        }
    }

    /// Lazily extract one feature vector per window of `session`.
    ///
    /// Channels are looked up by name, so the session's column order does not
    /// affect the feature order.
    pub fn extract<'a>(
        &'a self,
        session: &'a Session,
    ) -> Result<impl Iterator<Item = FeatureVector> + 'a, SchemaMismatchError> {
        self.check_schema(session)?;

        let indices: Vec<usize> = self
            .channels
            .iter()
            .filter_map(|c| session.channel_index(c))
            .collect();

        Ok(self
            .spec
            .windows(session)
            .map(move |window| window_features(&window, &indices, session)))
    }
}

fn window_features(window: &Window<'_>, indices: &[usize], session: &Session) -> FeatureVector {
    let mut values = Vec::with_capacity(indices.len() * FEATURES_PER_CHANNEL);
    let mut column = Vec::with_capacity(window.len());

    for &idx in indices {
        column.clear();
        column.extend(window.channel_values(idx));
        values.extend(ChannelStats::compute(&column).as_array());
    }

    FeatureVector {
        values,
        label: session.label,
        session_id: session.session_id,
        source_name: session.source_name.clone(),
    }
}
