mod device;
mod monitor;
mod mqtt;
mod query;

use clap::{Parser, Subcommand};

pub use self::{monitor::MonitorArgs, query::QueryArgs};

#[derive(Parser)]
#[command(author, version, about, propagate_version = true)]
#[must_use]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Main command: poll the inverter and publish the telemetry until stopped.
    #[clap(name = "monitor")]
    Monitor(Box<MonitorArgs>),

    /// Execute a single command and print its decoded reply.
    #[clap(name = "query")]
    Query(QueryArgs),
}
