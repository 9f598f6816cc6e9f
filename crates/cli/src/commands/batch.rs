//! Batch predictions from a CSV file

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tabled::Tabled;

use crate::client::PredictorClient;
use crate::output::{format_features, print_json, print_table, OutputFormat};

/// Label and weight columns; everything else is a feature
const SKIPPED_COLUMNS: &[&str] = &["Target", "Count"];

#[derive(Serialize, Tabled)]
struct BatchRow {
    #[tabled(rename = "Row")]
    row: usize,
    #[tabled(rename = "Features")]
    features: String,
    #[tabled(rename = "Class")]
    class: usize,
}

/// Predict every row of `path` over one connection
pub async fn batch(addr: &str, path: &Path, timeout: Duration, format: OutputFormat) -> Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let rows = read_feature_rows(file)
        .with_context(|| format!("Failed to read feature rows from {}", path.display()))?;

    let mut client = PredictorClient::connect(addr, timeout).await?;
    let mut results = Vec::with_capacity(rows.len());
    for (index, features) in rows.iter().enumerate() {
        let class = client
            .predict(features)
            .await
            .with_context(|| format!("Prediction for row {} failed", index + 1))?;
        results.push(BatchRow {
            row: index + 1,
            features: format_features(features),
            class,
        });
    }
    client.close().await?;

    match format {
        OutputFormat::Plain => {
            for result in &results {
                println!("{}", result.class);
            }
        }
        OutputFormat::Table => print_table(&results),
        OutputFormat::Json => print_json(&results)?,
    }
    Ok(())
}

/// Read integer feature rows, dropping the `Target` and `Count` columns
fn read_feature_rows<R: Read>(source: R) -> Result<Vec<Vec<i64>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers = reader.headers()?.clone();
    let feature_columns: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(_, name)| !SKIPPED_COLUMNS.contains(name))
        .map(|(i, _)| i)
        .collect();
    if feature_columns.is_empty() {
        bail!("no feature columns in header");
    }

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let row = feature_columns
            .iter()
            .map(|&i| parse_feature(record.get(i).unwrap_or("")))
            .collect::<Result<Vec<i64>>>()
            .with_context(|| format!("row {}", line + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Accept integers and integral floats such as `12.0`
fn parse_feature(value: &str) -> Result<i64> {
    if let Ok(v) = value.parse::<i64>() {
        return Ok(v);
    }
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => Ok(v as i64),
        _ => bail!("feature value {:?} is not an integer", value),
    }
}
