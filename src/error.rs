//! Failure taxonomy of a single command exchange.

use std::{io, time::Duration};

use thiserror::Error;

use crate::transport::WriteStrategy;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open the device")]
    TransportOpen(#[source] io::Error),

    #[error("failed to write the frame using {strategy}")]
    Write {
        strategy: WriteStrategy,

        #[source]
        source: io::Error,
    },

    #[error("failed to read from the device")]
    Read(#[source] io::Error),

    #[error("no terminator within {timeout:?}, received {n_received} bytes")]
    ReadTimeout { timeout: Duration, n_received: usize },

    #[error("no write strategy to try")]
    NoWriteStrategy,

    #[error("the device rejected `{command}`: `{payload}`")]
    DeviceRejected { command: String, payload: String },

    #[error("`{command}` returned {actual} tokens while at least {expected} are expected")]
    InsufficientTokens { command: String, actual: usize, expected: usize },

    #[error("`{command}` failed after {attempts} attempts")]
    AttemptsExhausted {
        command: String,
        attempts: usize,

        #[source]
        last: Box<Self>,
    },
}

impl Error {
    /// Unwrap the retry envelope to the last underlying failure.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::AttemptsExhausted { last, .. } => last.root(),
            _ => self,
        }
    }
}
