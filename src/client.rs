//! Command execution with bounded retries.

use std::{collections::HashMap, time::Duration};

use bon::Builder;
use tokio::time::sleep;

use crate::{
    error::Error,
    prelude::*,
    protocol::{Command, frame},
    transport::{Connector, Session, WriteStrategy},
};

/// Executes commands against the device, one at a time.
///
/// Every attempt opens a fresh session. Taking `&mut self` in [`Client::execute`] keeps
/// at most one command in flight.
#[derive(Builder)]
pub struct Client<C> {
    connector: C,

    #[builder(default = Duration::from_secs(5))]
    read_timeout: Duration,

    #[builder(default = 3)]
    max_attempts: usize,

    #[builder(default = Duration::from_millis(100))]
    backoff: Duration,

    /// Last strategy that worked, per command name.
    #[builder(skip)]
    preferred_strategies: HashMap<String, WriteStrategy>,
}

impl<C: Connector> Client<C> {
    /// Execute the command and return its reply payload.
    #[instrument(skip_all, fields(command = %command.name))]
    pub async fn execute(&mut self, command: &Command) -> Result<String, Error> {
        let frame = frame::encode(&command.name);
        let mut attempt = 1;
        loop {
            match self.attempt(command, &frame).await {
                Ok(payload) => {
                    debug!(attempt, %payload, "executed");
                    return Ok(payload);
                }
                Err(error) if attempt < self.max_attempts => {
                    warn!(attempt, "attempt failed, retrying: {error:#}");
                    sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(error) => {
                    return Err(Error::AttemptsExhausted {
                        command: command.name.clone(),
                        attempts: attempt,
                        last: Box::new(error),
                    });
                }
            }
        }
    }

    async fn attempt(&mut self, command: &Command, frame: &[u8]) -> Result<String, Error> {
        let link = self.connector.open().map_err(Error::TransportOpen)?;
        let mut session = Session::new(link, self.read_timeout);
        let strategies = match command.forced_strategy {
            Some(strategy) => vec![strategy],
            None => WriteStrategy::ordered(self.preferred_strategies.get(&command.name).copied()),
        };
        let (strategy, response) = session.exchange(frame, command.terminator, &strategies).await?;
        drop(session);

        self.preferred_strategies.insert(command.name.clone(), strategy);
        let payload = frame::decode(&response);
        if payload.starts_with("NAK") {
            return Err(Error::DeviceRejected { command: command.name.clone(), payload });
        }
        Ok(payload)
    }
}
