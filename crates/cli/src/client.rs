//! TCP client for the filter class predictor line protocol

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Largest predict response read in one go
const RESPONSE_BUFFER_BYTES: usize = 1024;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server closed the connection; the previous directive was rejected")]
    ConnectionClosed,

    #[error("Invalid response from server: {0:?}")]
    InvalidResponse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// One session with the predictor
pub struct PredictorClient {
    stream: TcpStream,
    timeout: Duration,
}

impl PredictorClient {
    /// Connect to the predictor
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
            .map_err(|source| ClientError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;

        Ok(Self { stream, timeout })
    }

    /// Ask for the filter class of one feature row
    pub async fn predict(&mut self, features: &[i64]) -> Result<usize> {
        let values: Vec<String> = features.iter().map(|v| v.to_string()).collect();
        self.send(&format!("p {}\n", values.join(" "))).await?;

        let mut buf = [0u8; RESPONSE_BUFFER_BYTES];
        let read = tokio::time::timeout(self.timeout, self.stream.read(&mut buf))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))??;
        if read == 0 {
            return Err(ClientError::ConnectionClosed);
        }

        let text = String::from_utf8_lossy(&buf[..read]);
        text.trim()
            .parse::<usize>()
            .map_err(|_| ClientError::InvalidResponse(text.into_owned()))
    }

    /// Send a train directive and wait for the server to finish with it
    ///
    /// Train has no response, so this ends the session: the server closes the
    /// connection once the dataset has been processed.
    pub async fn train(mut self, token: &str) -> Result<()> {
        self.send(&format!("t {}\n", token)).await?;
        self.stream.shutdown().await?;

        let mut rest = Vec::new();
        tokio::time::timeout(self.timeout, self.stream.read_to_end(&mut rest))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))??;
        Ok(())
    }

    /// End the session cleanly
    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn send(&mut self, message: &str) -> Result<()> {
        self.stream.write_all(message.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
