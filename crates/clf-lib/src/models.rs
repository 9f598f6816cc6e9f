//! Core data models for the filter class predictor

use crate::cost::MAX_UNITS_NUM;
use crate::error::{ClfError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Descriptive statistics of one segment group, one value per feature column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow(Vec<f64>);

impl FeatureRow {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    /// Build a row from the integers carried by a predict message
    pub fn from_ints(values: &[i64]) -> Self {
        Self(values.iter().map(|&v| v as f64).collect())
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn width(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<f64>> for FeatureRow {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// One labeled row of a training dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub features: FeatureRow,
    /// Empirically optimal number of filter units
    pub true_class: usize,
    /// Lookups this sample represents; only used for cost evaluation
    pub weight: f64,
}

/// Ordered, non-empty set of samples sharing one feature schema
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingDataset {
    feature_names: Vec<String>,
    samples: Vec<TrainingSample>,
}

impl TrainingDataset {
    /// Validate and assemble a dataset
    ///
    /// Fails when there are no samples, when a row's width differs from the
    /// number of feature columns, when a weight is negative or not finite, or
    /// when a label exceeds [`MAX_UNITS_NUM`].
    pub fn new(feature_names: Vec<String>, samples: Vec<TrainingSample>) -> Result<Self> {
        if samples.is_empty() {
            return Err(ClfError::TrainingFailure("dataset has no rows".to_string()));
        }

        let width = feature_names.len();
        for (i, sample) in samples.iter().enumerate() {
            if sample.features.width() != width {
                return Err(ClfError::TrainingFailure(format!(
                    "row {} has {} features, expected {}",
                    i,
                    sample.features.width(),
                    width
                )));
            }
            if sample.true_class > MAX_UNITS_NUM {
                return Err(ClfError::TrainingFailure(format!(
                    "row {} has class {}, at most {} units are supported",
                    i, sample.true_class, MAX_UNITS_NUM
                )));
            }
            if !sample.weight.is_finite() || sample.weight < 0.0 {
                return Err(ClfError::TrainingFailure(format!(
                    "row {} has invalid weight {}",
                    i, sample.weight
                )));
            }
        }

        Ok(Self {
            feature_names,
            samples,
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn samples(&self) -> &[TrainingSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn feature_width(&self) -> usize {
        self.feature_names.len()
    }

    /// Distinct labels, ascending
    pub fn distinct_classes(&self) -> BTreeSet<usize> {
        self.samples.iter().map(|s| s.true_class).collect()
    }

    pub fn labels(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.true_class).collect()
    }
}
