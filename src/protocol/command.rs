use std::sync::Arc;

use derive_more::Display;

use crate::{decoder::Schema, protocol::frame::TERMINATOR, transport::WriteStrategy};

/// Non-mutating queries the monitor knows how to decode.
#[derive(Copy, Clone, Debug, Display, Eq, Hash, PartialEq)]
pub enum Query {
    /// Device serial number.
    #[display("QID")]
    Identity,

    #[display("QPI")]
    ProtocolId,

    #[display("QVFW")]
    Firmware,

    /// Primary live telemetry.
    #[display("QPIGS")]
    Telemetry,

    /// Secondary PV input telemetry.
    #[display("QPIGS2")]
    ExpandedTelemetry,

    /// Rated information and current settings.
    #[display("QPIRI")]
    Settings,

    /// Per-unit telemetry of a parallel system, the unit number is appended to the name.
    #[display("QPGS")]
    Parallel,
}

impl Query {
    pub const ALL: [Self; 7] = [
        Self::Identity,
        Self::ProtocolId,
        Self::Firmware,
        Self::Telemetry,
        Self::ExpandedTelemetry,
        Self::Settings,
        Self::Parallel,
    ];

    /// Recognize the query behind a command name, along with the parallel unit number.
    #[must_use]
    pub fn parse(name: &str) -> Option<(Self, Option<u8>)> {
        if let Some(query) = Self::ALL
            .into_iter()
            .filter(|query| *query != Self::Parallel)
            .find(|query| query.to_string() == name)
        {
            return Some((query, None));
        }
        let unit = name.strip_prefix("QPGS")?.parse().ok()?;
        Some((Self::Parallel, Some(unit)))
    }
}

#[must_use]
#[derive(Clone, Debug)]
pub struct Command {
    pub name: String,
    pub query: Option<Query>,
    pub terminator: u8,
    pub forced_strategy: Option<WriteStrategy>,
    pub schema: Arc<Schema>,
}

impl Command {
    pub fn new(query: Query, schema: Arc<Schema>) -> Self {
        Self::with_name(query.to_string(), Some(query), schema)
    }

    pub fn parallel(unit: u8, schema: Arc<Schema>) -> Self {
        Self::with_name(format!("{}{unit}", Query::Parallel), Some(Query::Parallel), schema)
    }

    /// Command without a schema: its payload is passed through undecoded.
    pub fn raw(name: impl Into<String>) -> Self {
        Self::with_name(name.into(), None, Arc::new(Schema::default()))
    }

    fn with_name(name: String, query: Option<Query>, schema: Arc<Schema>) -> Self {
        // The expanded telemetry reply overflows the transport on a one-shot write.
        let forced_strategy = (query == Some(Query::ExpandedTelemetry))
            .then_some(WriteStrategy::SplitTerminatorPadded);
        Self { name, query, terminator: TERMINATOR, forced_strategy, schema }
    }

    #[must_use]
    pub fn min_tokens(&self) -> usize {
        self.schema.min_tokens
    }
}
