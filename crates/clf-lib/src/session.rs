//! Per-connection session handler
//!
//! Reads newline-framed directives, runs train directives on the blocking
//! pool and answers predict directives with the bare decimal class.

use crate::classifier::Trainer;
use crate::dataset::DatasetResolver;
use crate::error::{ClfError, Result};
use crate::models::FeatureRow;
use crate::observability::StructuredLogger;
use crate::policy::{RetrainOutcome, RetrainPolicy};
use crate::protocol::{parse_message, Directive};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

/// Default upper bound on one framed message, excluding the newline
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024;

/// State shared by every session of one server
pub struct ServiceContext<T: Trainer> {
    pub policy: RetrainPolicy<T>,
    pub resolver: DatasetResolver,
    pub max_message_bytes: usize,
    pub logger: StructuredLogger,
}

impl<T: Trainer> ServiceContext<T> {
    pub fn new(policy: RetrainPolicy<T>, resolver: DatasetResolver, logger: StructuredLogger) -> Self {
        Self {
            policy,
            resolver,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            logger,
        }
    }

    pub fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }
}

/// One client conversation
pub struct Session<T: Trainer> {
    peer: String,
    context: Arc<ServiceContext<T>>,
    messages: u64,
}

impl<T: Trainer> Session<T> {
    pub fn new(peer: impl Into<String>, context: Arc<ServiceContext<T>>) -> Self {
        Self {
            peer: peer.into(),
            context,
            messages: 0,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Directives handled so far
    pub fn messages(&self) -> u64 {
        self.messages
    }

    /// Serve directives until EOF, an empty message, or the first error
    pub async fn run<S>(&mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let limit = self.context.max_message_bytes;
        let mut buf = Vec::with_capacity(limit.min(DEFAULT_MAX_MESSAGE_BYTES) + 1);

        loop {
            buf.clear();
            let read = (&mut reader)
                .take(limit as u64 + 1)
                .read_until(b'\n', &mut buf)
                .await?;
            if read == 0 {
                debug!(peer = %self.peer, "Peer closed connection");
                return Ok(());
            }

            let payload = match buf.split_last() {
                Some((b'\n', payload)) => payload,
                _ => &buf[..],
            };
            if payload.len() > limit {
                return Err(ClfError::ProtocolViolation(format!(
                    "message exceeds {} bytes",
                    limit
                )));
            }
            if payload.iter().all(u8::is_ascii_whitespace) {
                debug!(peer = %self.peer, "Empty message, ending session");
                return Ok(());
            }

            let directive = parse_message(payload)?;
            self.messages += 1;
            debug!(peer = %self.peer, directive = %directive, "Received directive");

            match directive {
                Directive::Train { token } => {
                    self.train(token).await?;
                }
                Directive::Predict { row } => {
                    let class = self.predict(row)?;
                    writer.write_all(class.to_string().as_bytes()).await?;
                    writer.flush().await?;
                }
            }
        }
    }

    async fn train(&self, token: String) -> Result<RetrainOutcome> {
        let context = Arc::clone(&self.context);
        let dataset_token = token.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            let dataset = context.resolver.load(&dataset_token)?;
            context.policy.submit_training_data(&dataset)
        })
        .await
        .map_err(|e| ClfError::TrainingFailure(format!("training task aborted: {}", e)))??;

        self.context
            .logger
            .log_retrain(&self.peer, &token, &outcome);
        Ok(outcome)
    }

    fn predict(&self, row: FeatureRow) -> Result<usize> {
        self.context.policy.predict_row(&row)
    }
}
