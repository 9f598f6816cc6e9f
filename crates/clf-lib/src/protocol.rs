//! Wire grammar for client directives
//!
//! ```text
//! message  = train / predict
//! train    = "t" SP token
//! predict  = "p" SP int *(SP int)
//! ```
//!
//! Messages are trimmed before parsing. The tag must be followed by exactly
//! one space and then a non-space character.

use crate::error::{ClfError, Result};
use crate::models::FeatureRow;
use std::fmt;

const TRAIN_TAG: char = 't';
const PREDICT_TAG: char = 'p';

/// One parsed client message
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Retrain from the dataset named by `token`
    Train { token: String },
    /// Predict the class of one feature row
    Predict { row: FeatureRow },
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Train { token } => write!(f, "train({})", token),
            Directive::Predict { row } => write!(f, "predict({} features)", row.width()),
        }
    }
}

fn violation(message: impl Into<String>) -> ClfError {
    ClfError::ProtocolViolation(message.into())
}

/// Parse one framed message into a [`Directive`]
pub fn parse_message(bytes: &[u8]) -> Result<Directive> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| violation(format!("message is not valid UTF-8: {}", e)))?
        .trim();

    let mut chars = text.chars();
    let tag = chars
        .next()
        .ok_or_else(|| violation("empty message"))?;
    let rest = chars.as_str();

    let body = match rest.strip_prefix(' ') {
        Some(body) if body.chars().next().is_some_and(|c| !c.is_whitespace()) => body,
        _ => {
            return Err(violation(format!(
                "expected a single space and an argument after '{}'",
                tag
            )))
        }
    };

    match tag {
        TRAIN_TAG => parse_train(body),
        PREDICT_TAG => parse_predict(body),
        other => Err(violation(format!("unknown directive tag '{}'", other))),
    }
}

fn parse_train(body: &str) -> Result<Directive> {
    if body.chars().any(char::is_whitespace) {
        return Err(violation(format!(
            "dataset token must not contain whitespace: {:?}",
            body
        )));
    }
    Ok(Directive::Train {
        token: body.to_string(),
    })
}

fn parse_predict(body: &str) -> Result<Directive> {
    let values = body
        .split(' ')
        .map(|token| {
            if token.is_empty() {
                return Err(violation("empty feature value"));
            }
            token
                .parse::<i64>()
                .map_err(|e| violation(format!("invalid feature value {:?}: {}", token, e)))
        })
        .collect::<Result<Vec<i64>>>()?;

    Ok(Directive::Predict {
        row: FeatureRow::from_ints(&values),
    })
}
