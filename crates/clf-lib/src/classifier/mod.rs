//! Classifier adapter
//!
//! Wraps a pluggable trainer behind a stable fit / persist / load / infer
//! surface. A freshly fitted model is always persisted and reloaded before it
//! is used for inference; the in-memory object returned by the trainer is
//! never activated directly.

mod tree;

pub use tree::{DecisionTreeTrainer, TreeModel, TREE_FORMAT_VERSION};

use crate::error::{ClfError, Result};
use crate::models::{FeatureRow, TrainingDataset};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A fitted model that can score one feature row
pub trait ClassModel: Send + Sync + 'static {
    /// Number of features the model was fitted on
    fn input_width(&self) -> usize;

    /// Per-class scores for one row; index is the class label
    fn class_scores(&self, row: &[f64]) -> anyhow::Result<Vec<f64>>;
}

/// Trait for supervised trainers producing a [`ClassModel`]
pub trait Trainer: Send + Sync + 'static {
    type Model: ClassModel;

    /// Name recorded with every model this trainer produces
    fn name(&self) -> &str;

    /// Fit a model on feature rows and their labels
    fn fit(&self, features: &[FeatureRow], labels: &[usize]) -> anyhow::Result<Self::Model>;

    /// Serialize a model to bytes
    fn encode(&self, model: &Self::Model) -> anyhow::Result<Vec<u8>>;

    /// Deserialize a model previously produced by `encode`
    fn decode(&self, bytes: &[u8]) -> anyhow::Result<Self::Model>;
}

/// Location and fingerprint of a persisted model
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedArtifact {
    pub path: PathBuf,
    pub checksum: String,
    pub size_bytes: usize,
}

/// A model decoded from disk together with the fingerprint of its bytes
pub struct LoadedModel<M> {
    pub model: M,
    pub checksum: String,
    pub size_bytes: usize,
}

/// Adapter enforcing the dataset preconditions and the persist-then-reload rule
pub struct ClassifierAdapter<T: Trainer> {
    trainer: T,
}

impl<T: Trainer> ClassifierAdapter<T> {
    pub fn new(trainer: T) -> Self {
        Self { trainer }
    }

    pub fn trainer(&self) -> &T {
        &self.trainer
    }

    /// Fit a model on the dataset's features and `Target` column
    ///
    /// Weights are never passed to the trainer. Datasets with no rows or with
    /// fewer than two distinct classes are rejected before delegation.
    pub fn fit(&self, dataset: &TrainingDataset) -> Result<T::Model> {
        if dataset.is_empty() {
            return Err(ClfError::TrainingFailure("dataset has no rows".to_string()));
        }

        let classes = dataset.distinct_classes();
        if classes.len() < 2 {
            return Err(ClfError::TrainingFailure(format!(
                "dataset needs at least 2 distinct classes, found {:?}",
                classes
            )));
        }

        let features: Vec<FeatureRow> = dataset
            .samples()
            .iter()
            .map(|s| s.features.clone())
            .collect();
        let labels = dataset.labels();

        let model = self.trainer.fit(&features, &labels).map_err(|e| {
            ClfError::TrainingFailure(format!("{} trainer failed: {:#}", self.trainer.name(), e))
        })?;

        debug!(
            trainer = self.trainer.name(),
            rows = dataset.len(),
            classes = classes.len(),
            "Model fitted"
        );
        Ok(model)
    }

    /// Serialize `model` to `path`, replacing any previous artifact atomically
    pub fn persist(&self, model: &T::Model, path: &Path) -> Result<PersistedArtifact> {
        let (temp_path, artifact) = self.write_temp(model, path)?;
        fs::rename(&temp_path, path)?;
        Ok(artifact)
    }

    /// Write the encoded model next to `path` and fsync it; `path` is untouched
    fn write_temp(&self, model: &T::Model, path: &Path) -> Result<(PathBuf, PersistedArtifact)> {
        let bytes = self.trainer.encode(model).map_err(|e| {
            ClfError::TrainingFailure(format!("failed to encode model: {:#}", e))
        })?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = path.with_extension("tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        Ok((
            temp_path,
            PersistedArtifact {
                path: path.to_path_buf(),
                checksum: compute_checksum(&bytes),
                size_bytes: bytes.len(),
            },
        ))
    }

    /// Read and decode the artifact at `path`
    pub fn load(&self, path: &Path) -> Result<LoadedModel<T::Model>> {
        let bytes = fs::read(path)?;
        let model = self.trainer.decode(&bytes).map_err(|e| {
            ClfError::TrainingFailure(format!(
                "failed to decode model {}: {:#}",
                path.display(),
                e
            ))
        })?;

        Ok(LoadedModel {
            model,
            checksum: compute_checksum(&bytes),
            size_bytes: bytes.len(),
        })
    }

    /// Fit, persist, and reload; the reloaded model is the one to activate
    ///
    /// The artifact is reloaded and verified from the temp file before it is
    /// renamed over `path`, so a failure leaves the previous artifact in place.
    pub fn fit_and_reload(
        &self,
        dataset: &TrainingDataset,
        path: &Path,
    ) -> Result<LoadedModel<T::Model>> {
        let fitted = self.fit(dataset)?;
        let (temp_path, artifact) = self.write_temp(&fitted, path)?;
        drop(fitted);

        let loaded = match self.verify(&temp_path, &artifact) {
            Ok(loaded) => loaded,
            Err(e) => {
                if let Err(remove_err) = fs::remove_file(&temp_path) {
                    warn!(path = %temp_path.display(), error = %remove_err, "Failed to remove temp artifact");
                }
                return Err(e);
            }
        };
        fs::rename(&temp_path, path)?;

        info!(
            trainer = self.trainer.name(),
            path = %artifact.path.display(),
            size = artifact.size_bytes,
            checksum = %artifact.checksum,
            "Model persisted and reloaded"
        );
        Ok(loaded)
    }

    fn verify(&self, temp_path: &Path, artifact: &PersistedArtifact) -> Result<LoadedModel<T::Model>> {
        let loaded = self.load(temp_path)?;
        if loaded.checksum != artifact.checksum {
            return Err(ClfError::TrainingFailure(format!(
                "artifact {} changed between write and reload",
                temp_path.display()
            )));
        }
        Ok(loaded)
    }

    pub fn infer(&self, model: &T::Model, row: &FeatureRow) -> Result<usize> {
        infer(model, row)
    }
}

/// Predict the class of one row as the argmax of the model's class scores
///
/// Ties resolve to the lowest class.
pub fn infer<M: ClassModel + ?Sized>(model: &M, row: &FeatureRow) -> Result<usize> {
    let expected = model.input_width();
    if row.width() != expected {
        return Err(ClfError::ShapeMismatch {
            expected,
            actual: row.width(),
        });
    }

    let scores = model
        .class_scores(row.values())
        .map_err(|e| ClfError::Inference(format!("{:#}", e)))?;

    let mut best: Option<(usize, f64)> = None;
    for (class, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((class, score)),
        }
    }

    best.map(|(class, _)| class)
        .ok_or_else(|| ClfError::Inference("model produced no class scores".to_string()))
}

/// Compute SHA256 checksum of data
pub(crate) fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrainingSample;
    use tempfile::TempDir;

    struct FixedScores {
        width: usize,
        scores: Vec<f64>,
    }

    impl ClassModel for FixedScores {
        fn input_width(&self) -> usize {
            self.width
        }

        fn class_scores(&self, _row: &[f64]) -> anyhow::Result<Vec<f64>> {
            Ok(self.scores.clone())
        }
    }

    fn dataset(rows: Vec<(Vec<f64>, usize)>) -> TrainingDataset {
        let width = rows[0].0.len();
        let samples = rows
            .into_iter()
            .map(|(features, class)| TrainingSample {
                features: FeatureRow::new(features),
                true_class: class,
                weight: 1.0,
            })
            .collect();
        let names = (0..width).map(|i| format!("f{}", i)).collect();
        TrainingDataset::new(names, samples).unwrap()
    }

    #[test]
    fn test_infer_argmax() {
        let model = FixedScores {
            width: 2,
            scores: vec![0.1, 0.7, 0.2],
        };
        assert_eq!(infer(&model, &FeatureRow::new(vec![1.0, 2.0])).unwrap(), 1);
    }

    #[test]
    fn test_infer_tie_prefers_lowest_class() {
        let model = FixedScores {
            width: 1,
            scores: vec![0.0, 0.5, 0.5],
        };
        assert_eq!(infer(&model, &FeatureRow::new(vec![1.0])).unwrap(), 1);
    }

    #[test]
    fn test_infer_shape_mismatch() {
        let model = FixedScores {
            width: 3,
            scores: vec![1.0],
        };
        let result = infer(&model, &FeatureRow::new(vec![1.0, 2.0]));
        assert!(matches!(
            result,
            Err(ClfError::ShapeMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_infer_empty_scores() {
        let model = FixedScores {
            width: 1,
            scores: vec![],
        };
        assert!(matches!(
            infer(&model, &FeatureRow::new(vec![1.0])),
            Err(ClfError::Inference(_))
        ));
    }

    #[test]
    fn test_fit_rejects_single_class() {
        let adapter = ClassifierAdapter::new(DecisionTreeTrainer::default());
        let data = dataset(vec![(vec![1.0, 2.0], 3), (vec![2.0, 3.0], 3)]);
        assert!(matches!(
            adapter.fit(&data),
            Err(ClfError::TrainingFailure(_))
        ));
    }

    #[test]
    fn test_persist_then_load_matches_in_memory_predictions() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("models").join("model.json");
        let adapter = ClassifierAdapter::new(DecisionTreeTrainer::default());

        let data = dataset(vec![
            (vec![0.0, 10.0], 0),
            (vec![1.0, 20.0], 1),
            (vec![2.0, 30.0], 2),
            (vec![3.0, 40.0], 3),
        ]);

        let fitted = adapter.fit(&data).unwrap();
        let artifact = adapter.persist(&fitted, &path).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(artifact.checksum.len(), 64);

        let loaded = adapter.load(&path).unwrap();
        assert_eq!(loaded.checksum, artifact.checksum);

        for sample in data.samples() {
            let in_memory = adapter.infer(&fitted, &sample.features).unwrap();
            let reloaded = adapter.infer(&loaded.model, &sample.features).unwrap();
            assert_eq!(in_memory, reloaded);
            assert_eq!(reloaded, sample.true_class);
        }
    }

    /// Fits real trees but can never read an artifact back
    struct UnreadableTrainer(DecisionTreeTrainer);

    impl Trainer for UnreadableTrainer {
        type Model = TreeModel;

        fn name(&self) -> &str {
            "unreadable"
        }

        fn fit(&self, features: &[FeatureRow], labels: &[usize]) -> anyhow::Result<TreeModel> {
            self.0.fit(features, labels)
        }

        fn encode(&self, model: &TreeModel) -> anyhow::Result<Vec<u8>> {
            self.0.encode(model)
        }

        fn decode(&self, _bytes: &[u8]) -> anyhow::Result<TreeModel> {
            anyhow::bail!("artifact is unreadable")
        }
    }

    #[test]
    fn test_failed_reload_keeps_previous_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.json");
        let data = dataset(vec![(vec![0.0], 0), (vec![1.0], 1)]);

        ClassifierAdapter::new(DecisionTreeTrainer::default())
            .fit_and_reload(&data, &path)
            .unwrap();
        let previous = fs::read(&path).unwrap();

        let adapter = ClassifierAdapter::new(UnreadableTrainer(DecisionTreeTrainer::default()));
        assert!(matches!(
            adapter.fit_and_reload(&data, &path),
            Err(ClfError::TrainingFailure(_))
        ));

        assert_eq!(fs::read(&path).unwrap(), previous);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_load_missing_artifact_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let adapter = ClassifierAdapter::new(DecisionTreeTrainer::default());
        let result = adapter.load(&temp_dir.path().join("absent.json"));
        assert!(matches!(result, Err(ClfError::Io(_))));
    }

    #[test]
    fn test_load_garbage_is_training_failure() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.json");
        fs::write(&path, b"not a model").unwrap();

        let adapter = ClassifierAdapter::new(DecisionTreeTrainer::default());
        assert!(matches!(
            adapter.load(&path),
            Err(ClfError::TrainingFailure(_))
        ));
    }

    #[test]
    fn test_checksum_consistency() {
        let data = b"test model weights";
        assert_eq!(compute_checksum(data), compute_checksum(data));
        assert_eq!(compute_checksum(data).len(), 64);
    }
}
