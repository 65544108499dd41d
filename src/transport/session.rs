use std::{
    io::{ErrorKind, Read, Write},
    time::Duration,
};

use tokio::time::{Instant, sleep};

use crate::{error::Error, prelude::*, transport::WriteStrategy};

/// One exclusive open of the device, closed on drop.
pub struct Session<L> {
    link: L,
    read_timeout: Duration,
}

impl<L: Read + Write> Session<L> {
    const POLL_INTERVAL: Duration = Duration::from_millis(10);

    /// Upper bound on reads spent discarding stale bytes.
    const MAX_DRAIN_READS: usize = 64;

    pub const fn new(link: L, read_timeout: Duration) -> Self {
        Self { link, read_timeout }
    }

    /// Send the frame and wait for the terminated reply, trying the strategies in order.
    ///
    /// Returns the strategy that worked along with the raw reply.
    pub async fn exchange(
        &mut self,
        frame: &[u8],
        terminator: u8,
        strategies: &[WriteStrategy],
    ) -> Result<(WriteStrategy, Vec<u8>), Error> {
        let mut last_error = None;
        for &strategy in strategies {
            match self.exchange_with(frame, terminator, strategy).await {
                Ok(response) => return Ok((strategy, response)),
                Err(error) => {
                    debug!(%strategy, "strategy failed: {error:#}");
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.unwrap_or(Error::NoWriteStrategy))
    }

    async fn exchange_with(
        &mut self,
        frame: &[u8],
        terminator: u8,
        strategy: WriteStrategy,
    ) -> Result<Vec<u8>, Error> {
        self.drain()?;
        self.write(frame, strategy)?;
        self.read_until(terminator).await
    }

    /// Discard whatever a previous exchange left behind.
    fn drain(&mut self) -> Result<usize, Error> {
        let mut buffer = [0; 256];
        let mut n_drained = 0;
        for _ in 0..Self::MAX_DRAIN_READS {
            match self.link.read(&mut buffer) {
                Ok(0) => break,
                Ok(n_read) => n_drained += n_read,
                Err(error) if is_not_ready(&error) => break,
                Err(error) => return Err(Error::Read(error)),
            }
        }
        if n_drained != 0 {
            debug!(n_drained, "discarded stale bytes");
        }
        Ok(n_drained)
    }

    fn write(&mut self, frame: &[u8], strategy: WriteStrategy) -> Result<(), Error> {
        for chunk in strategy.chunks(frame) {
            self.link
                .write_all(&chunk)
                .and_then(|()| self.link.flush())
                .map_err(|source| Error::Write { strategy, source })?;
        }
        Ok(())
    }

    /// Accumulate bytes until the terminator, the reply is cut right after it.
    async fn read_until(&mut self, terminator: u8) -> Result<Vec<u8>, Error> {
        let deadline = Instant::now() + self.read_timeout;
        let mut response = Vec::new();
        let mut buffer = [0; 128];
        loop {
            let n_read = match self.link.read(&mut buffer) {
                Ok(n_read) => n_read,
                Err(error) if is_not_ready(&error) => 0,
                Err(error) => return Err(Error::Read(error)),
            };
            if n_read != 0 {
                let offset = response.len();
                response.extend_from_slice(&buffer[..n_read]);
                if let Some(position) =
                    response[offset..].iter().position(|byte| *byte == terminator)
                {
                    response.truncate(offset + position + 1);
                    trace!(n_bytes = response.len(), "received");
                    return Ok(response);
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::ReadTimeout {
                    timeout: self.read_timeout,
                    n_received: response.len(),
                });
            }
            if n_read == 0 {
                sleep(Self::POLL_INTERVAL).await;
            }
        }
    }
}

fn is_not_ready(error: &std::io::Error) -> bool {
    matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}
