//! Retrain policy engine
//!
//! This module provides:
//! - The process-wide active model, published as immutable generations
//! - Cost-based evaluation of the active model against new labeled data
//! - The retrain-or-skip decision and the atomic model swap
//! - Single-row prediction with the default class fallback

use crate::classifier::{infer, ClassModel, ClassifierAdapter, Trainer};
use crate::cost::{CostModel, DEFAULT_UNITS_NUM};
use crate::error::{ClfError, Result};
use crate::models::{FeatureRow, TrainingDataset};
use crate::observability::ClfMetrics;
use arc_swap::ArcSwapOption;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info};

/// Configuration for the retrain policy
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Directory holding the persisted model
    pub model_root: PathBuf,
    /// File name of the persisted model inside `model_root`
    pub model_file_name: String,
    /// Relative cost deviation at or above which the active model is replaced
    pub drift_threshold: f64,
    /// Class returned while no model has been trained
    pub default_class: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            model_root: PathBuf::from("/var/lib/filter-clf/models"),
            model_file_name: "filter_class_model.json".to_string(),
            drift_threshold: 0.10, // 10%
            default_class: DEFAULT_UNITS_NUM,
        }
    }
}

impl PolicyConfig {
    pub fn model_path(&self) -> PathBuf {
        self.model_root.join(&self.model_file_name)
    }
}

/// One published model generation; never mutated after publication
pub struct ActiveModel<M> {
    pub generation: u64,
    pub name: String,
    pub path: PathBuf,
    pub checksum: String,
    pub size_bytes: usize,
    pub trained_at: i64,
    pub model: M,
}

/// Best-achievable versus predicted cost of a dataset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEvaluation {
    pub best_cost: f64,
    pub predicted_cost: f64,
    pub relative_deviation: f64,
    pub samples: usize,
}

/// What `submit_training_data` did
#[derive(Debug, Clone, PartialEq)]
pub enum RetrainOutcome {
    /// A new generation was published. `evaluation` is `None` when there was
    /// no comparable model to evaluate.
    Trained {
        generation: u64,
        evaluation: Option<CostEvaluation>,
    },
    /// The active model was judged acceptable and kept
    Skipped {
        generation: u64,
        evaluation: CostEvaluation,
    },
}

impl RetrainOutcome {
    pub fn generation(&self) -> u64 {
        match self {
            RetrainOutcome::Trained { generation, .. } | RetrainOutcome::Skipped { generation, .. } => {
                *generation
            }
        }
    }

    pub fn is_trained(&self) -> bool {
        matches!(self, RetrainOutcome::Trained { .. })
    }
}

/// Snapshot of policy state for logs and health reporting
#[derive(Debug, Clone)]
pub struct PolicyStats {
    pub generation: Option<u64>,
    pub model_name: Option<String>,
    pub checksum: Option<String>,
    pub trained_at: Option<i64>,
    pub drift_threshold: f64,
    pub per_unit_fp_rate: f64,
}

/// Owns the active model and decides when to replace it
pub struct RetrainPolicy<T: Trainer> {
    config: PolicyConfig,
    cost: CostModel,
    adapter: ClassifierAdapter<T>,
    active: ArcSwapOption<ActiveModel<T::Model>>,
    // Serializes writers; readers never take it
    train_lock: Mutex<()>,
    metrics: ClfMetrics,
}

impl<T: Trainer> RetrainPolicy<T> {
    pub fn new(config: PolicyConfig, cost: CostModel, trainer: T) -> Result<Self> {
        if !config.drift_threshold.is_finite() || config.drift_threshold <= 0.0 {
            return Err(ClfError::Config(format!(
                "drift_threshold must be a positive number, got {}",
                config.drift_threshold
            )));
        }

        Ok(Self {
            config,
            cost,
            adapter: ClassifierAdapter::new(trainer),
            active: ArcSwapOption::empty(),
            train_lock: Mutex::new(()),
            metrics: ClfMetrics::new(),
        })
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.cost
    }

    pub fn adapter(&self) -> &ClassifierAdapter<T> {
        &self.adapter
    }

    /// Current generation, if any model has been published
    pub fn active(&self) -> Option<Arc<ActiveModel<T::Model>>> {
        self.active.load_full()
    }

    pub fn has_model(&self) -> bool {
        self.active.load().is_some()
    }

    pub fn generation(&self) -> Option<u64> {
        self.active.load_full().map(|m| m.generation)
    }

    /// Check if a relative deviation justifies a retrain
    pub fn exceeds_drift_threshold(&self, relative_deviation: f64) -> bool {
        relative_deviation >= self.config.drift_threshold
    }

    /// Feed a new labeled dataset; retrain if no model exists or the active
    /// one has drifted too far from the best achievable cost
    pub fn submit_training_data(&self, dataset: &TrainingDataset) -> Result<RetrainOutcome> {
        let _guard = self
            .train_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let current = match self.active.load_full() {
            Some(current) => current,
            None => {
                info!(rows = dataset.len(), "No active model, training first generation");
                let published = self.retrain(dataset, 1)?;
                return Ok(RetrainOutcome::Trained {
                    generation: published.generation,
                    evaluation: None,
                });
            }
        };

        let next_generation = current.generation + 1;

        let evaluation = self.evaluate(&current.model, dataset)?;
        self.metrics.set_last_deviation(evaluation.relative_deviation);

        if !self.exceeds_drift_threshold(evaluation.relative_deviation) {
            debug!(
                generation = current.generation,
                deviation = evaluation.relative_deviation,
                threshold = self.config.drift_threshold,
                "Active model within drift threshold"
            );
            self.metrics.inc_retrains_skipped();
            return Ok(RetrainOutcome::Skipped {
                generation: current.generation,
                evaluation,
            });
        }

        info!(
            generation = current.generation,
            deviation = evaluation.relative_deviation,
            threshold = self.config.drift_threshold,
            "Active model drifted, retraining"
        );
        let published = self.retrain(dataset, next_generation)?;
        Ok(RetrainOutcome::Trained {
            generation: published.generation,
            evaluation: Some(evaluation),
        })
    }

    /// Compare the cost of `model`'s predictions with the best achievable cost
    pub fn evaluate(&self, model: &T::Model, dataset: &TrainingDataset) -> Result<CostEvaluation> {
        let predicted = dataset
            .samples()
            .iter()
            .map(|s| infer(model, &s.features))
            .collect::<Result<Vec<usize>>>()?;

        let best_cost = self
            .cost
            .aggregate(dataset.samples(), |s| (s.true_class, s.weight));
        let predicted_cost = self
            .cost
            .aggregate(dataset.samples().iter().zip(&predicted), |(s, class)| {
                (**class, s.weight)
            });

        // Weights near f64::MAX sum to infinity and the deviation to NaN
        if best_cost == 0.0 || !best_cost.is_finite() || !predicted_cost.is_finite() {
            return Err(ClfError::DegenerateDataset);
        }

        Ok(CostEvaluation {
            best_cost,
            predicted_cost,
            relative_deviation: (predicted_cost - best_cost).abs() / best_cost,
            samples: dataset.len(),
        })
    }

    /// Predict the class of exactly one row
    pub fn predict(&self, rows: &[FeatureRow]) -> Result<usize> {
        match rows {
            [row] => self.predict_row(row),
            _ => Err(ClfError::UnsupportedBatchSize(rows.len())),
        }
    }

    /// Predict one row, falling back to the default class before any training
    pub fn predict_row(&self, row: &FeatureRow) -> Result<usize> {
        let start = Instant::now();

        let snapshot = self.active.load();
        let class = match &*snapshot {
            Some(active) => infer(&active.model, row)?,
            None => {
                debug!("No model trained, using default class");
                self.metrics.inc_default_fallbacks();
                self.config.default_class
            }
        };

        self.metrics.inc_predictions();
        self.metrics
            .observe_prediction_latency(start.elapsed().as_secs_f64());
        Ok(class)
    }

    /// Publish an artifact left on disk by a previous process as generation 1
    ///
    /// Returns `Ok(None)` when there is nothing to restore or a model is
    /// already active.
    pub fn restore_from_disk(&self) -> Result<Option<u64>> {
        let _guard = self
            .train_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let path = self.config.model_path();
        if self.active.load().is_some() || !path.exists() {
            return Ok(None);
        }

        let loaded = self.adapter.load(&path)?;
        let published = self.publish(1, path, loaded.checksum, loaded.size_bytes, loaded.model);
        info!(
            generation = published.generation,
            path = %published.path.display(),
            "Restored model from disk"
        );
        Ok(Some(published.generation))
    }

    pub fn stats(&self) -> PolicyStats {
        let snapshot = self.active.load_full();
        let active = snapshot.as_ref();
        PolicyStats {
            generation: active.map(|m| m.generation),
            model_name: active.map(|m| m.name.clone()),
            checksum: active.map(|m| m.checksum.clone()),
            trained_at: active.map(|m| m.trained_at),
            drift_threshold: self.config.drift_threshold,
            per_unit_fp_rate: self.cost.per_unit_fp_rate(),
        }
    }

    /// Fit, persist, reload and publish. Callers hold `train_lock`.
    fn retrain(
        &self,
        dataset: &TrainingDataset,
        generation: u64,
    ) -> Result<Arc<ActiveModel<T::Model>>> {
        let path = self.config.model_path();
        let loaded = match self.adapter.fit_and_reload(dataset, &path) {
            Ok(loaded) => loaded,
            Err(e) => {
                self.metrics.inc_training_failures();
                return Err(e);
            }
        };

        let published = self.publish(generation, path, loaded.checksum, loaded.size_bytes, loaded.model);
        self.metrics.inc_retrains();
        Ok(published)
    }

    fn publish(
        &self,
        generation: u64,
        path: PathBuf,
        checksum: String,
        size_bytes: usize,
        model: T::Model,
    ) -> Arc<ActiveModel<T::Model>> {
        let active = Arc::new(ActiveModel {
            generation,
            name: format!("{}-g{}", self.adapter.trainer().name(), generation),
            path,
            checksum,
            size_bytes,
            trained_at: chrono::Utc::now().timestamp(),
            model,
        });

        self.active.store(Some(Arc::clone(&active)));
        self.metrics.set_model_generation(generation);
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::DecisionTreeTrainer;
    use crate::models::TrainingSample;
    use std::thread;
    use tempfile::TempDir;

    fn sample(features: Vec<f64>, class: usize, weight: f64) -> TrainingSample {
        TrainingSample {
            features: FeatureRow::new(features),
            true_class: class,
            weight,
        }
    }

    fn dataset(samples: Vec<TrainingSample>) -> TrainingDataset {
        let width = samples[0].features.width();
        let names = (0..width).map(|i| format!("f{}", i)).collect();
        TrainingDataset::new(names, samples).unwrap()
    }

    /// Level feature decides the class: level 0 -> 1 unit, level 1 -> 3 units
    fn level_dataset(low: usize, high: usize) -> TrainingDataset {
        dataset(vec![
            sample(vec![0.0, 10.0, 1.0], low, 100.0),
            sample(vec![0.0, 20.0, 2.0], low, 50.0),
            sample(vec![1.0, 10.0, 3.0], high, 80.0),
            sample(vec![1.0, 30.0, 4.0], high, 20.0),
        ])
    }

    fn policy(dir: &TempDir) -> RetrainPolicy<DecisionTreeTrainer> {
        let config = PolicyConfig {
            model_root: dir.path().to_path_buf(),
            model_file_name: "model.json".to_string(),
            drift_threshold: 0.1,
            default_class: 2,
        };
        RetrainPolicy::new(config, CostModel::default(), DecisionTreeTrainer::default()).unwrap()
    }

    #[test]
    fn test_default_class_before_training() {
        let temp_dir = TempDir::new().unwrap();
        let policy = policy(&temp_dir);

        assert!(!policy.has_model());
        assert_eq!(policy.predict(&[FeatureRow::new(vec![1.0, 2.0, 3.0])]).unwrap(), 2);
        // Any width is fine while no model exists
        assert_eq!(policy.predict_row(&FeatureRow::new(vec![])).unwrap(), 2);
    }

    #[test]
    fn test_first_submission_trains() {
        let temp_dir = TempDir::new().unwrap();
        let policy = policy(&temp_dir);

        let outcome = policy.submit_training_data(&level_dataset(1, 3)).unwrap();
        assert_eq!(
            outcome,
            RetrainOutcome::Trained {
                generation: 1,
                evaluation: None
            }
        );
        assert!(temp_dir.path().join("model.json").exists());
        assert_eq!(policy.generation(), Some(1));

        let row = FeatureRow::new(vec![1.0, 10.0, 3.0]);
        assert_eq!(policy.predict(&[row]).unwrap(), 3);
    }

    #[test]
    fn test_identical_dataset_skips_retrain() {
        let temp_dir = TempDir::new().unwrap();
        let policy = policy(&temp_dir);
        let data = level_dataset(1, 3);

        assert!(policy.submit_training_data(&data).unwrap().is_trained());

        match policy.submit_training_data(&data).unwrap() {
            RetrainOutcome::Skipped {
                generation,
                evaluation,
            } => {
                assert_eq!(generation, 1);
                assert_eq!(evaluation.relative_deviation, 0.0);
                assert_eq!(evaluation.samples, 4);
            }
            other => panic!("expected skip, got {:?}", other),
        }
        assert_eq!(policy.generation(), Some(1));
    }

    #[test]
    fn test_drifted_dataset_retrains() {
        let temp_dir = TempDir::new().unwrap();
        let policy = policy(&temp_dir);

        policy.submit_training_data(&level_dataset(1, 3)).unwrap();
        let outcome = policy.submit_training_data(&level_dataset(4, 0)).unwrap();

        match outcome {
            RetrainOutcome::Trained {
                generation,
                evaluation: Some(evaluation),
            } => {
                assert_eq!(generation, 2);
                assert!(evaluation.relative_deviation >= 0.1);
            }
            other => panic!("expected retrain, got {:?}", other),
        }

        assert_eq!(policy.predict_row(&FeatureRow::new(vec![0.0, 10.0, 1.0])).unwrap(), 4);
        assert_eq!(policy.predict_row(&FeatureRow::new(vec![1.0, 10.0, 3.0])).unwrap(), 0);
    }

    #[test]
    fn test_evaluation_costs() {
        let temp_dir = TempDir::new().unwrap();
        let policy = policy(&temp_dir);
        policy.submit_training_data(&level_dataset(1, 3)).unwrap();

        let active = policy.active().unwrap();
        let data = level_dataset(0, 3);
        let evaluation = policy.evaluate(&active.model, &data).unwrap();

        let rate = CostModel::default().per_unit_fp_rate();
        let best = 100.0 + 50.0 + rate.powi(3) * 100.0;
        let predicted = rate * 150.0 + rate.powi(3) * 100.0;
        assert!((evaluation.best_cost - best).abs() < 1e-9);
        assert!((evaluation.predicted_cost - predicted).abs() < 1e-9);
        assert!(
            (evaluation.relative_deviation - (predicted - best).abs() / best).abs() < 1e-12
        );
    }

    #[test]
    fn test_zero_weights_are_degenerate() {
        let temp_dir = TempDir::new().unwrap();
        let policy = policy(&temp_dir);
        policy.submit_training_data(&level_dataset(1, 3)).unwrap();

        let zero = dataset(vec![
            sample(vec![0.0, 10.0, 1.0], 1, 0.0),
            sample(vec![1.0, 10.0, 3.0], 3, 0.0),
        ]);
        assert!(matches!(
            policy.submit_training_data(&zero),
            Err(ClfError::DegenerateDataset)
        ));
        assert_eq!(policy.generation(), Some(1));
    }

    #[test]
    fn test_overflowing_weights_are_degenerate() {
        let temp_dir = TempDir::new().unwrap();
        let policy = policy(&temp_dir);

        let heavy = |low: usize, high: usize| {
            dataset(vec![
                sample(vec![0.0, 10.0, 1.0], low, 1e308),
                sample(vec![0.0, 20.0, 2.0], low, 1e308),
                sample(vec![1.0, 10.0, 3.0], high, 1e308),
                sample(vec![1.0, 30.0, 4.0], high, 1e308),
            ])
        };
        assert!(policy.submit_training_data(&heavy(0, 5)).unwrap().is_trained());
        let checksum = policy.active().unwrap().checksum.clone();

        assert!(matches!(
            policy.evaluate(&policy.active().unwrap().model, &heavy(0, 0)),
            Err(ClfError::DegenerateDataset)
        ));
        assert!(matches!(
            policy.submit_training_data(&heavy(0, 0)),
            Err(ClfError::DegenerateDataset)
        ));

        let active = policy.active().unwrap();
        assert_eq!(active.generation, 1);
        assert_eq!(active.checksum, checksum);
    }

    #[test]
    fn test_failed_retrain_keeps_active_model() {
        let temp_dir = TempDir::new().unwrap();
        let policy = policy(&temp_dir);
        policy.submit_training_data(&level_dataset(1, 3)).unwrap();
        let checksum = policy.active().unwrap().checksum.clone();

        // Single class, far from what the active model predicts
        let single = dataset(vec![
            sample(vec![0.0, 10.0, 1.0], 5, 10.0),
            sample(vec![1.0, 10.0, 3.0], 5, 10.0),
        ]);
        assert!(matches!(
            policy.submit_training_data(&single),
            Err(ClfError::TrainingFailure(_))
        ));

        let active = policy.active().unwrap();
        assert_eq!(active.generation, 1);
        assert_eq!(active.checksum, checksum);
    }

    #[test]
    fn test_first_submission_single_class_fails() {
        let temp_dir = TempDir::new().unwrap();
        let policy = policy(&temp_dir);

        let single = dataset(vec![sample(vec![1.0], 2, 1.0), sample(vec![2.0], 2, 1.0)]);
        assert!(matches!(
            policy.submit_training_data(&single),
            Err(ClfError::TrainingFailure(_))
        ));
        assert!(!policy.has_model());
        assert_eq!(policy.predict_row(&FeatureRow::new(vec![1.0])).unwrap(), 2);
    }

    #[test]
    fn test_schema_change_is_shape_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let policy = policy(&temp_dir);
        policy.submit_training_data(&level_dataset(1, 3)).unwrap();
        let checksum = policy.active().unwrap().checksum.clone();

        let narrow = dataset(vec![sample(vec![0.0], 1, 1.0), sample(vec![1.0], 2, 1.0)]);
        assert!(matches!(
            policy.submit_training_data(&narrow),
            Err(ClfError::ShapeMismatch {
                expected: 3,
                actual: 1
            })
        ));

        let active = policy.active().unwrap();
        assert_eq!(active.generation, 1);
        assert_eq!(active.checksum, checksum);
        assert_eq!(policy.predict_row(&FeatureRow::new(vec![1.0, 10.0, 3.0])).unwrap(), 3);
    }

    #[test]
    fn test_predict_batch_size() {
        let temp_dir = TempDir::new().unwrap();
        let policy = policy(&temp_dir);
        let row = FeatureRow::new(vec![1.0]);

        assert!(matches!(
            policy.predict(&[]),
            Err(ClfError::UnsupportedBatchSize(0))
        ));
        assert!(matches!(
            policy.predict(&[row.clone(), row]),
            Err(ClfError::UnsupportedBatchSize(2))
        ));
    }

    #[test]
    fn test_predict_shape_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let policy = policy(&temp_dir);
        policy.submit_training_data(&level_dataset(1, 3)).unwrap();

        assert!(matches!(
            policy.predict_row(&FeatureRow::new(vec![1.0, 2.0])),
            Err(ClfError::ShapeMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_restore_from_disk() {
        let temp_dir = TempDir::new().unwrap();
        {
            let first = policy(&temp_dir);
            first.submit_training_data(&level_dataset(1, 3)).unwrap();
        }

        let second = policy(&temp_dir);
        assert_eq!(second.restore_from_disk().unwrap(), Some(1));
        assert_eq!(second.predict_row(&FeatureRow::new(vec![1.0, 30.0, 4.0])).unwrap(), 3);
        // Already active: nothing to do
        assert_eq!(second.restore_from_disk().unwrap(), None);
    }

    #[test]
    fn test_restore_without_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let policy = policy(&temp_dir);
        assert_eq!(policy.restore_from_disk().unwrap(), None);
        assert!(!policy.has_model());
    }

    #[test]
    fn test_rejects_invalid_threshold() {
        let config = PolicyConfig {
            drift_threshold: 0.0,
            ..Default::default()
        };
        assert!(RetrainPolicy::new(config, CostModel::default(), DecisionTreeTrainer::default()).is_err());
    }

    #[test]
    fn test_exceeds_drift_threshold() {
        let temp_dir = TempDir::new().unwrap();
        let policy = policy(&temp_dir);
        assert!(!policy.exceeds_drift_threshold(0.05));
        assert!(policy.exceeds_drift_threshold(0.1));
        assert!(policy.exceeds_drift_threshold(0.25));
    }

    #[test]
    fn test_concurrent_predicts_during_retrain() {
        let temp_dir = TempDir::new().unwrap();
        let policy = Arc::new(policy(&temp_dir));
        policy.submit_training_data(&level_dataset(1, 3)).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let policy = Arc::clone(&policy);
                thread::spawn(move || {
                    let row = FeatureRow::new(vec![0.0, 10.0, 1.0]);
                    for _ in 0..200 {
                        let class = policy.predict_row(&row).unwrap();
                        // Generation 1 predicts 1, later generations alternate
                        assert!(class == 1 || class == 4, "torn prediction {}", class);
                    }
                })
            })
            .collect();

        let writer = {
            let policy = Arc::clone(&policy);
            thread::spawn(move || {
                for i in 0..6 {
                    let data = if i % 2 == 0 {
                        level_dataset(4, 0)
                    } else {
                        level_dataset(1, 3)
                    };
                    assert!(policy.submit_training_data(&data).unwrap().is_trained());
                }
            })
        };

        for reader in readers {
            reader.join().unwrap();
        }
        writer.join().unwrap();
        assert_eq!(policy.generation(), Some(7));
    }
}
