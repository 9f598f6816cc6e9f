//! Decision tree trainer backed by linfa-trees
//!
//! Artifacts are stored as JSON envelopes so the input width and the class
//! set travel with the tree.

use super::{ClassModel, Trainer};
use crate::cost::MAX_UNITS_NUM;
use crate::models::FeatureRow;
use anyhow::{bail, Context, Result};
use linfa::prelude::*;
use linfa_trees::{DecisionTree, SplitQuality};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Version of the serialized envelope
pub const TREE_FORMAT_VERSION: u32 = 1;

const TRAINER_NAME: &str = "decision-tree";

/// CART trainer with Gini impurity and unbounded depth
#[derive(Debug, Clone)]
pub struct DecisionTreeTrainer {
    max_depth: Option<usize>,
    min_weight_split: f32,
    min_weight_leaf: f32,
}

impl Default for DecisionTreeTrainer {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_weight_split: 2.0,
            min_weight_leaf: 1.0,
        }
    }
}

impl DecisionTreeTrainer {
    /// Limit tree depth; `None` grows until leaves are pure
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Fitted decision tree plus the metadata needed to validate inputs
#[derive(Serialize, Deserialize)]
pub struct TreeModel {
    format_version: u32,
    trainer: String,
    input_width: usize,
    classes: Vec<usize>,
    tree: DecisionTree<f64, usize>,
}

impl TreeModel {
    /// Classes seen during fitting, ascending
    pub fn classes(&self) -> &[usize] {
        &self.classes
    }

    /// Name of the trainer that produced this model
    pub fn trainer(&self) -> &str {
        &self.trainer
    }

    fn predict_class(&self, row: &[f64]) -> Result<usize> {
        let records = Array2::from_shape_vec((1, row.len()), row.to_vec())
            .context("Failed to shape feature row")?;
        let predicted: Array1<usize> = self.tree.predict(&records);
        predicted
            .first()
            .copied()
            .context("Decision tree returned no prediction")
    }
}

impl ClassModel for TreeModel {
    fn input_width(&self) -> usize {
        self.input_width
    }

    /// One-hot distribution over `0..=max(classes)`
    fn class_scores(&self, row: &[f64]) -> Result<Vec<f64>> {
        let class = self.predict_class(row)?;
        let highest = self.classes.last().copied().unwrap_or(0).max(class);
        if highest > MAX_UNITS_NUM {
            bail!(
                "class {} exceeds the supported maximum of {} units",
                highest,
                MAX_UNITS_NUM
            );
        }
        let len = highest
            .checked_add(1)
            .context("class index overflows the score vector")?;

        let mut scores = vec![0.0; len];
        scores[class] = 1.0;
        Ok(scores)
    }
}

impl Trainer for DecisionTreeTrainer {
    type Model = TreeModel;

    fn name(&self) -> &str {
        TRAINER_NAME
    }

    fn fit(&self, features: &[FeatureRow], labels: &[usize]) -> Result<TreeModel> {
        if features.len() != labels.len() {
            bail!(
                "{} feature rows but {} labels",
                features.len(),
                labels.len()
            );
        }
        let width = features.first().map(|r| r.width()).unwrap_or(0);

        let flat: Vec<f64> = features
            .iter()
            .flat_map(|r| r.values().iter().copied())
            .collect();
        let records = Array2::from_shape_vec((features.len(), width), flat)
            .context("Feature rows do not form a rectangular matrix")?;
        let targets = Array1::from_vec(labels.to_vec());
        let dataset = Dataset::new(records, targets);

        let tree = DecisionTree::<f64, usize>::params()
            .split_quality(SplitQuality::Gini)
            .max_depth(self.max_depth)
            .min_weight_split(self.min_weight_split)
            .min_weight_leaf(self.min_weight_leaf)
            .fit(&dataset)
            .map_err(|e| anyhow::anyhow!("decision tree fit failed: {}", e))?;

        let mut classes = labels.to_vec();
        classes.sort_unstable();
        classes.dedup();

        Ok(TreeModel {
            format_version: TREE_FORMAT_VERSION,
            trainer: TRAINER_NAME.to_string(),
            input_width: width,
            classes,
            tree,
        })
    }

    fn encode(&self, model: &TreeModel) -> Result<Vec<u8>> {
        serde_json::to_vec(model).context("Failed to serialize decision tree")
    }

    fn decode(&self, bytes: &[u8]) -> Result<TreeModel> {
        let model: TreeModel =
            serde_json::from_slice(bytes).context("Failed to parse decision tree artifact")?;
        if model.format_version != TREE_FORMAT_VERSION {
            bail!(
                "unsupported artifact format version {} (expected {})",
                model.format_version,
                TREE_FORMAT_VERSION
            );
        }
        if let Some(&class) = model.classes.iter().find(|&&c| c > MAX_UNITS_NUM) {
            bail!(
                "artifact class {} exceeds the supported maximum of {} units",
                class,
                MAX_UNITS_NUM
            );
        }
        Ok(model)
    }
}
