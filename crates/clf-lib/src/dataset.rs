//! Training dataset loading
//!
//! Datasets are CSV files with a header row. The `Target` column holds the
//! optimal filter class, the optional `Count` column holds the sample weight,
//! and every other column is a feature.

use crate::error::{ClfError, Result};
use crate::models::{FeatureRow, TrainingDataset, TrainingSample};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Label column name
pub const TARGET_COLUMN: &str = "Target";

/// Weight column name
pub const COUNT_COLUMN: &str = "Count";

/// Weight given to every sample when the dataset has no `Count` column
const DEFAULT_WEIGHT: f64 = 1.0;

/// Resolves train directive tokens to files under a dataset root
#[derive(Debug, Clone)]
pub struct DatasetResolver {
    root: PathBuf,
}

impl DatasetResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a token to `<root>/<token>`, refusing anything that escapes the root
    pub fn resolve(&self, token: &str) -> Result<PathBuf> {
        let relative = Path::new(token);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });

        if token.is_empty() || escapes {
            return Err(ClfError::ProtocolViolation(format!(
                "dataset token {:?} must be a relative path inside the dataset root",
                token
            )));
        }

        Ok(self.root.join(relative))
    }

    /// Resolve and load a dataset in one step
    pub fn load(&self, token: &str) -> Result<TrainingDataset> {
        let path = self.resolve(token)?;
        load_csv(&path)
    }
}

/// Load a dataset from a CSV file
pub fn load_csv(path: &Path) -> Result<TrainingDataset> {
    let file = std::fs::File::open(path).map_err(|e| {
        ClfError::TrainingFailure(format!("cannot open dataset {}: {}", path.display(), e))
    })?;

    let dataset = parse_csv(file)?;
    debug!(
        path = %path.display(),
        rows = dataset.len(),
        features = dataset.feature_width(),
        "Loaded training dataset"
    );
    Ok(dataset)
}

/// Parse a dataset from any CSV source
pub fn parse_csv<R: Read>(source: R) -> Result<TrainingDataset> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ClfError::TrainingFailure(format!("CSV header error: {}", e)))?
        .iter()
        .map(|s| s.to_string())
        .collect();

    let target_idx = headers
        .iter()
        .position(|h| h == TARGET_COLUMN)
        .ok_or_else(|| {
            ClfError::TrainingFailure(format!("dataset has no {} column", TARGET_COLUMN))
        })?;
    let count_idx = headers.iter().position(|h| h == COUNT_COLUMN);

    let feature_idx: Vec<usize> = (0..headers.len())
        .filter(|&i| i != target_idx && Some(i) != count_idx)
        .collect();
    let feature_names: Vec<String> = feature_idx.iter().map(|&i| headers[i].clone()).collect();

    let mut samples = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record =
            result.map_err(|e| ClfError::TrainingFailure(format!("CSV record error: {}", e)))?;

        let field = |idx: usize| record.get(idx).unwrap_or("");

        let true_class = parse_class(field(target_idx)).ok_or_else(|| {
            ClfError::TrainingFailure(format!(
                "row {}: {} value {:?} is not a non-negative integer",
                row,
                TARGET_COLUMN,
                field(target_idx)
            ))
        })?;

        let weight = match count_idx {
            Some(idx) => parse_number(field(idx)).ok_or_else(|| {
                ClfError::TrainingFailure(format!(
                    "row {}: {} value {:?} is not a number",
                    row,
                    COUNT_COLUMN,
                    field(idx)
                ))
            })?,
            None => DEFAULT_WEIGHT,
        };

        let mut features = Vec::with_capacity(feature_idx.len());
        for &idx in &feature_idx {
            let value = parse_number(field(idx)).ok_or_else(|| {
                ClfError::TrainingFailure(format!(
                    "row {}: feature {} value {:?} is not a number",
                    row,
                    headers[idx],
                    field(idx)
                ))
            })?;
            features.push(value);
        }

        samples.push(TrainingSample {
            features: FeatureRow::new(features),
            true_class,
            weight,
        });
    }

    TrainingDataset::new(feature_names, samples)
}

fn parse_number(field: &str) -> Option<f64> {
    field.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Accepts `3` as well as `3.0`, which some dataset writers emit
fn parse_class(field: &str) -> Option<usize> {
    if let Ok(class) = field.parse::<usize>() {
        return Some(class);
    }
    let value = parse_number(field)?;
    if value >= 0.0 && value.fract() == 0.0 && value <= usize::MAX as f64 {
        Some(value as usize)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_parse_with_count_column() {
        let data = "Level,Range_0,Hotness_0,Count,Target\n0,5,1200,10,3\n1,7,800,4,2\n";
        let dataset = parse_csv(Cursor::new(data)).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.feature_names(), &["Level", "Range_0", "Hotness_0"]);
        assert_eq!(dataset.samples()[0].features.values(), &[0.0, 5.0, 1200.0]);
        assert_eq!(dataset.samples()[0].weight, 10.0);
        assert_eq!(dataset.samples()[1].true_class, 2);
    }

    #[test]
    fn test_parse_without_count_column_defaults_weight() {
        let data = "Target,a,b\n1,2,3\n0,4,5\n";
        let dataset = parse_csv(Cursor::new(data)).unwrap();

        assert_eq!(dataset.feature_names(), &["a", "b"]);
        assert!(dataset.samples().iter().all(|s| s.weight == 1.0));
        assert_eq!(dataset.samples()[0].features.values(), &[2.0, 3.0]);
    }

    #[test]
    fn test_parse_float_target() {
        let data = "a,Target\n1,2.0\n";
        let dataset = parse_csv(Cursor::new(data)).unwrap();
        assert_eq!(dataset.samples()[0].true_class, 2);
    }

    #[test]
    fn test_missing_target_column() {
        let data = "a,b\n1,2\n";
        let result = parse_csv(Cursor::new(data));
        assert!(matches!(result, Err(ClfError::TrainingFailure(_))));
    }

    #[test]
    fn test_negative_target_rejected() {
        let data = "a,Target\n1,-1\n";
        assert!(parse_csv(Cursor::new(data)).is_err());
    }

    #[test]
    fn test_target_above_max_units_rejected() {
        let data = "a,Target\n0,0\n1,4398046511104\n";
        assert!(matches!(
            parse_csv(Cursor::new(data)),
            Err(ClfError::TrainingFailure(_))
        ));

        let data = "a,Target\n0,0\n1,7\n";
        assert!(parse_csv(Cursor::new(data)).is_err());
    }

    #[test]
    fn test_non_numeric_feature_rejected() {
        let data = "a,Target\nhot,1\n";
        assert!(parse_csv(Cursor::new(data)).is_err());
    }

    #[test]
    fn test_header_only_is_empty_dataset() {
        let data = "a,Target\n";
        let result = parse_csv(Cursor::new(data));
        assert!(matches!(result, Err(ClfError::TrainingFailure(_))));
    }

    #[test]
    fn test_resolver_joins_root() {
        let resolver = DatasetResolver::new("/data/sets");
        assert_eq!(
            resolver.resolve("set1.csv").unwrap(),
            PathBuf::from("/data/sets/set1.csv")
        );
        assert_eq!(
            resolver.resolve("level0/set1.csv").unwrap(),
            PathBuf::from("/data/sets/level0/set1.csv")
        );
    }

    #[test]
    fn test_resolver_rejects_escape() {
        let resolver = DatasetResolver::new("/data/sets");
        assert!(matches!(
            resolver.resolve("../etc/passwd"),
            Err(ClfError::ProtocolViolation(_))
        ));
        assert!(resolver.resolve("/etc/passwd").is_err());
        assert!(resolver.resolve("").is_err());
    }

    #[test]
    fn test_load_missing_file_is_training_failure() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = DatasetResolver::new(temp_dir.path());
        assert!(matches!(
            resolver.load("missing.csv"),
            Err(ClfError::TrainingFailure(_))
        ));
    }

    #[test]
    fn test_load_from_disk() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("set1.csv"), "a,Count,Target\n1,3,0\n2,3,1\n").unwrap();

        let resolver = DatasetResolver::new(temp_dir.path());
        let dataset = resolver.load("set1.csv").unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.distinct_classes().len(), 2);
    }
}
