//! Linear model export for the embedded classifier.
//!
//! The exporter standardizes every feature over the whole dataset, fits an
//! L2-regularized logistic regression on the standardized values and renders
//! the weights, normalization constants and bias as C++ parameter arrays. The
//! firmware indexes features purely by position, so the printed manifest is
//! the only record of which value belongs to which feature.

use crate::core::dataset::Dataset;
use crate::core::features::population_std_about;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Values per emitted line in the parameter arrays.
pub const VALUES_PER_LINE: usize = 4;

/// Digits after the decimal point in scientific notation.
pub const EXPORT_PRECISION: usize = 8;

/// Errors that prevent an export artifact from being produced.
#[derive(Debug, Error)]
pub enum FitError {
    #[error("dataset is empty")]
    EmptyDataset,

    #[error("dataset has no feature columns")]
    NoFeatures,

    #[error("label {0} is not a binary class (0 or 1)")]
    NonBinaryLabel(u8),

    #[error("label column needs two classes, found only {0:?}")]
    SingleClass(Vec<u8>),

    #[error("feature {feature} is not finite in row {row}")]
    NonFinite { feature: String, row: usize },

    #[error("solver failed to converge: {0}")]
    Solver(String),
}

/// Per-feature standardization constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: Vec<f64>,
    /// Population standard deviation; zero entries are replaced with 1.0
    pub std: Vec<f64>,
}

impl Normalization {
    /// Compute mean and population std of every feature column.
    pub fn fit(dataset: &Dataset) -> Self {
        let mut mean = Vec::with_capacity(dataset.feature_count());
        let mut std = Vec::with_capacity(dataset.feature_count());

        for idx in 0..dataset.feature_count() {
            let column = dataset.column(idx);
            let m = column.as_slice().mean();
            let s = population_std_about(&column, m);
            mean.push(m);
            std.push(if s == 0.0 { 1.0 } else { s });
        }

        Self { mean, std }
    }

    /// Standardize one feature vector.
    pub fn apply(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }
}

/// Everything the embedded classifier needs, in dataset feature order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedModel {
    pub feature_names: Vec<String>,
    pub weights: Vec<f64>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    pub bias: f64,
}

impl ExportedModel {
    pub fn feature_count(&self) -> usize {
        self.feature_names.len()
    }

    /// Probability of label 1, computed the way the firmware does it.
    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        let z = features
            .iter()
            .enumerate()
            .fold(self.bias, |z, (i, x)| {
                z + self.weights[i] * (x - self.mean[i]) / self.std[i]
            });
        sigmoid(z)
    }

    /// Fraction of dataset rows classified correctly at the 0.5 threshold.
    pub fn accuracy(&self, dataset: &Dataset) -> f64 {
        if dataset.is_empty() {
            return 0.0;
        }
        let correct = dataset
            .rows()
            .iter()
            .filter(|r| (self.predict_proba(&r.values) >= 0.5) == (r.label == 1))
            .count();
        correct as f64 / dataset.len() as f64
    }

    /// `[i] name` lines, one per feature, in export order.
    pub fn render_manifest(&self) -> String {
        let mut out = String::new();
        for (i, name) in self.feature_names.iter().enumerate() {
            let _ = writeln!(out, "  [{i}] {name}");
        }
        out
    }

    /// Declarations for `model_params.h`.
    pub fn render_header(&self) -> String {
        format!(
            "#pragma once\n\
             #include <Arduino.h>\n\
             \n\
             constexpr int LR_NUM_FEATURES = {};\n\
             \n\
             extern const float LR_WEIGHTS[LR_NUM_FEATURES];\n\
             extern const float LR_MEAN[LR_NUM_FEATURES];\n\
             extern const float LR_STD[LR_NUM_FEATURES];\n\
             extern const float LR_BIAS;\n",
            self.feature_count()
        )
    }

    /// Definitions for `model_params.cpp`.
    pub fn render_source(&self) -> String {
        let mut out = String::from("#include \"model_params.h\"\n\n");
        render_array(&mut out, "LR_WEIGHTS", &self.weights);
        render_array(&mut out, "LR_MEAN", &self.mean);
        render_array(&mut out, "LR_STD", &self.std);
        let _ = writeln!(
            out,
            "const float LR_BIAS = {}f;",
            format_scientific(self.bias, EXPORT_PRECISION)
        );
        out
    }
}

fn render_array(out: &mut String, name: &str, values: &[f64]) {
    let _ = writeln!(out, "const float {name}[LR_NUM_FEATURES] = {{");
    for chunk in values.chunks(VALUES_PER_LINE) {
        let line = chunk
            .iter()
            .map(|v| format!("{}f", format_scientific(*v, EXPORT_PRECISION)))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "    {line},");
    }
    let _ = writeln!(out, "}};\n");
}

/// C-style `%.Ne` formatting: signed exponent with at least two digits.
pub fn format_scientific(value: f64, precision: usize) -> String {
    let raw = format!("{value:.precision$e}");
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        // inf and NaN have no exponent
        None => raw,
    }
}

/// Fits and serializes the deployable linear model.
#[derive(Debug, Clone)]
pub struct ParameterExporter {
    /// Inverse L2 regularization strength
    pub c: f64,
    pub max_iter: usize,
    pub tolerance: f64,
}

impl Default for ParameterExporter {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 100,
            tolerance: 1e-8,
        }
    }
}

impl ParameterExporter {
    /// Fit on the entire dataset and return the exportable parameters.
    pub fn export(&self, dataset: &Dataset) -> Result<ExportedModel, FitError> {
        if dataset.is_empty() {
            return Err(FitError::EmptyDataset);
        }
        if dataset.feature_count() == 0 {
            return Err(FitError::NoFeatures);
        }

        let mut classes = dataset.labels();
        classes.sort_unstable();
        classes.dedup();
        if let Some(&label) = classes.iter().find(|&&c| c > 1) {
            return Err(FitError::NonBinaryLabel(label));
        }
        if classes.len() < 2 {
            return Err(FitError::SingleClass(classes));
        }

        for (row, r) in dataset.rows().iter().enumerate() {
            if let Some(i) = r.values.iter().position(|v| !v.is_finite()) {
                return Err(FitError::NonFinite {
                    feature: dataset.feature_names()[i].clone(),
                    row,
                });
            }
        }

        let normalization = Normalization::fit(dataset);
        let x: Vec<Vec<f64>> = dataset
            .rows()
            .iter()
            .map(|r| normalization.apply(&r.values))
            .collect();
        let y: Vec<f64> = dataset.labels().iter().map(|&l| f64::from(l)).collect();

        let (weights, bias) = self.fit_logistic(&x, &y)?;

        let model = ExportedModel {
            feature_names: dataset.feature_names().to_vec(),
            weights,
            mean: normalization.mean,
            std: normalization.std,
            bias,
        };
        info!(
            "Exported {} features, training accuracy {:.3}",
            model.feature_count(),
            model.accuracy(dataset)
        );
        Ok(model)
    }

    /// Newton iterations on the mean regularized log-loss.
    ///
    /// Parameter layout is `[w_0 .. w_{d-1}, b]`; the bias is not penalized.
    fn fit_logistic(&self, x: &[Vec<f64>], y: &[f64]) -> Result<(Vec<f64>, f64), FitError> {
        let design = design_matrix(x);
        let y = DVector::from_column_slice(y);
        let d = design.ncols() - 1;
        let lambda = 1.0 / (self.c * design.nrows() as f64);

        let mut theta = DVector::zeros(d + 1);
        let mut loss = log_loss(&design, &y, &theta, lambda);

        for iter in 0..self.max_iter {
            let (grad, hess) = gradient_and_hessian(&design, &y, &theta, lambda);
            let grad_norm = grad.norm();
            debug!("iteration {iter}: loss {loss:.6e}, |grad| {grad_norm:.3e}");
            if grad_norm < self.tolerance {
                break;
            }

            // The penalized Hessian is symmetric positive definite.
            let step = hess
                .cholesky()
                .ok_or_else(|| FitError::Solver("Hessian is not positive definite".to_string()))?
                .solve(&grad);

            // Step halving keeps each update a descent step.
            let mut t = 1.0;
            loop {
                let candidate = &theta - &step * t;
                let candidate_loss = log_loss(&design, &y, &candidate, lambda);
                if candidate_loss <= loss || t < 1e-10 {
                    theta = candidate;
                    loss = candidate_loss;
                    break;
                }
                t *= 0.5;
            }

            if iter + 1 == self.max_iter {
                warn!("logistic fit stopped after {} iterations", self.max_iter);
            }
        }

        if theta.iter().any(|v| !v.is_finite()) {
            return Err(FitError::Solver("parameters diverged".to_string()));
        }

        let bias = theta[d];
        Ok((theta.rows(0, d).iter().copied().collect(), bias))
    }
}

/// Rows of standardized features with a trailing column of ones for the bias.
fn design_matrix(x: &[Vec<f64>]) -> DMatrix<f64> {
    let d = x.first().map_or(0, Vec::len);
    DMatrix::from_fn(x.len(), d + 1, |i, j| if j < d { x[i][j] } else { 1.0 })
}

/// Diagonal penalty vector: `lambda` for weights, zero for the bias.
fn penalty(p: usize, lambda: f64) -> DVector<f64> {
    DVector::from_fn(p, |i, _| if i + 1 < p { lambda } else { 0.0 })
}

fn log_loss(design: &DMatrix<f64>, y: &DVector<f64>, theta: &DVector<f64>, lambda: f64) -> f64 {
    let z = design * theta;
    // log(1 + e^z) - y z, computed without overflow
    let data_loss = z.zip_map(y, |z, label| softplus(z) - label * z).sum() / z.len() as f64;
    let d = theta.len() - 1;
    data_loss + 0.5 * lambda * theta.rows(0, d).norm_squared()
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

fn gradient_and_hessian(
    design: &DMatrix<f64>,
    y: &DVector<f64>,
    theta: &DVector<f64>,
    lambda: f64,
) -> (DVector<f64>, DMatrix<f64>) {
    let n = design.nrows() as f64;
    let prob = (design * theta).map(sigmoid);
    let weight = prob.map(|p| p * (1.0 - p));
    let ridge = penalty(theta.len(), lambda);

    let grad = design.tr_mul(&(&prob - y)) / n + ridge.component_mul(theta);

    let mut weighted = design.clone();
    for (mut row, w) in weighted.row_iter_mut().zip(weight.iter()) {
        row *= *w;
    }
    let hess = design.tr_mul(&weighted) / n + DMatrix::from_diagonal(&ridge);

    (grad, hess)
}
