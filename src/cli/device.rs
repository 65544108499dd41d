//! Inverter connection arguments.

use std::path::PathBuf;

use clap::Parser;

use crate::{client::Client, decoder::SchemaBook, prelude::*, transport::Hidraw};

#[derive(Parser)]
pub struct DeviceArgs {
    /// Inverter device path.
    #[clap(long = "device", env = "DEVICE", default_value = "/dev/hidraw0")]
    pub path: PathBuf,

    /// How long to wait for a terminated reply.
    #[clap(long, env = "READ_TIMEOUT", default_value = "5s")]
    pub read_timeout: humantime::Duration,

    /// Total attempts per command, including the first one.
    #[clap(long, env = "RETRY_ATTEMPTS", default_value = "3")]
    pub retry_attempts: usize,

    #[clap(long, env = "RETRY_BACKOFF", default_value = "100ms")]
    pub retry_backoff: humantime::Duration,

    /// TOML file overriding the built-in reply layouts.
    #[clap(long, env = "SCHEMA_FILE")]
    pub schema_file: Option<PathBuf>,
}

impl DeviceArgs {
    pub fn client(&self) -> Client<Hidraw> {
        Client::builder()
            .connector(Hidraw::new(&self.path))
            .read_timeout(self.read_timeout.into())
            .max_attempts(self.retry_attempts)
            .backoff(self.retry_backoff.into())
            .build()
    }

    pub fn schema_book(&self) -> Result<SchemaBook> {
        SchemaBook::load(self.schema_file.as_deref())
    }
}
