//! Predict command

use anyhow::{bail, Result};
use serde::Serialize;
use std::time::Duration;

use crate::client::PredictorClient;
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct Prediction<'a> {
    features: &'a [i64],
    class: usize,
}

/// Predict the filter class of a single feature row
pub async fn predict(
    addr: &str,
    features: &[i64],
    timeout: Duration,
    format: OutputFormat,
) -> Result<()> {
    if features.is_empty() {
        bail!("at least one feature value is required");
    }

    let mut client = PredictorClient::connect(addr, timeout).await?;
    let class = client.predict(features).await?;
    client.close().await?;

    match format {
        OutputFormat::Json => print_json(&Prediction { features, class })?,
        OutputFormat::Plain | OutputFormat::Table => println!("{}", class),
    }
    Ok(())
}
