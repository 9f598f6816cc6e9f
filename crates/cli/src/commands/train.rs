//! Train command

use anyhow::{bail, Context, Result};
use std::time::Duration;

use crate::client::PredictorClient;
use crate::output::{print_info, print_success};

/// Ask the predictor to retrain from a dataset under its dataset root
pub async fn train(addr: &str, token: &str, timeout: Duration, verbose: bool) -> Result<()> {
    if token.is_empty() || token.chars().any(char::is_whitespace) {
        bail!("dataset token must be non-empty and contain no whitespace");
    }

    let client = PredictorClient::connect(addr, timeout).await?;
    if verbose {
        print_info(&format!("Connected to {}", addr));
    }

    client
        .train(token)
        .await
        .with_context(|| format!("Train directive for {} failed", token))?;

    print_success(&format!(
        "Train directive for {} processed; see server logs for the retrain decision",
        token
    ));
    Ok(())
}
