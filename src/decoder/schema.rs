//! Positional layouts of the query replies.
//!
//! Token indices drift between firmware revisions, so the built-in layouts can be
//! overridden per query from a TOML file:
//!
//! ```toml
//! [expanded-telemetry]
//! min_tokens = 3
//! fields = [
//!     { name = "Pv2InputCurrent", index = 0 },
//!     { name = "Pv2InputVoltage", index = 1 },
//!     { name = "Pv2InputPower", index = 2 },
//! ]
//! derived = [{ target = "Pv2InputPower", factors = ["Pv2InputVoltage", "Pv2InputCurrent"] }]
//! ```

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::Arc,
};

use serde::Deserialize;

use crate::{
    decoder::{Record, TableId, Value},
    prelude::*,
    protocol::{Command, Query},
};

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Schema {
    /// Replies with fewer tokens produce no record.
    pub min_tokens: usize,

    #[serde(default)]
    pub fields: Vec<Field>,

    #[serde(default)]
    pub derived: Vec<Derived>,
}

impl Schema {
    /// Check that every field is within the guaranteed tokens and derivations refer to known fields.
    pub fn validate(&self) -> Result {
        let mut names = HashSet::new();
        for field in &self.fields {
            ensure!(names.insert(field.name.as_str()), "duplicate field `{}`", field.name);
            ensure!(
                field.index < self.min_tokens,
                "`{}` refers to token #{} which is beyond the {} guaranteed tokens",
                field.name,
                field.index,
                self.min_tokens,
            );
        }
        for derived in &self.derived {
            for name in std::iter::once(&derived.target).chain(&derived.factors) {
                ensure!(names.contains(name.as_str()), "derivation refers to unknown `{name}`");
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Field {
    pub name: String,
    pub index: usize,

    #[serde(default)]
    pub kind: FieldKind,
}

impl Field {
    fn new(name: &str, index: usize, kind: FieldKind) -> Self {
        Self { name: name.to_owned(), index, kind }
    }

    fn number(name: &str, index: usize) -> Self {
        Self::new(name, index, FieldKind::Number)
    }

    fn text(name: &str, index: usize) -> Self {
        Self::new(name, index, FieldKind::Text)
    }

    fn label(name: &str, index: usize, table_id: TableId) -> Self {
        Self::new(name, index, FieldKind::Enum(table_id))
    }

    fn flag(name: &str, index: usize, expected: &str) -> Self {
        Self::new(name, index, FieldKind::Flag(expected.to_owned()))
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    /// Integer, decimal, or the raw token, whichever parses first.
    #[default]
    Number,

    /// Raw token.
    Text,

    /// Code resolved against the table.
    Enum(TableId),

    /// `1` if the token equals the string, `0` otherwise.
    Flag(String),
}

/// Replaces the target with the rounded product of two fields when the device reports it as non-positive.
///
/// Some firmware reports zero secondary input power while the voltage and current are fine.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Derived {
    pub target: String,
    pub factors: [String; 2],
}

impl Derived {
    pub fn apply(&self, record: &mut Record) {
        let Some(reported) = record.get(&self.target).and_then(|value| value.as_f64()) else {
            return;
        };
        if reported > 0.0 {
            return;
        }
        let [lhs, rhs] = &self.factors;
        let (Some(lhs), Some(rhs)) = (
            record.get(lhs).and_then(|value| value.as_f64()),
            record.get(rhs).and_then(|value| value.as_f64()),
        ) else {
            return;
        };
        let derived = (lhs * rhs * 10.0).round() / 10.0;
        debug!(field = %self.target, reported, derived, "derived");
        record.set(&self.target, Value::Decimal(derived));
    }
}

/// Schemas of all known queries.
#[derive(Clone)]
pub struct SchemaBook(HashMap<Query, Arc<Schema>>);

impl Default for SchemaBook {
    fn default() -> Self {
        Self(
            [
                (Query::Identity, identity()),
                (Query::ProtocolId, protocol_id()),
                (Query::Firmware, firmware()),
                (Query::Telemetry, telemetry()),
                (Query::ExpandedTelemetry, expanded_telemetry()),
                (Query::Settings, settings()),
                (Query::Parallel, parallel()),
            ]
            .into_iter()
            .map(|(query, schema)| (query, Arc::new(schema)))
            .collect(),
        )
    }
}

impl SchemaBook {
    /// Built-in schemas, optionally overridden from the file.
    #[instrument(skip_all)]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let book = Self::default();
        let Some(path) = path else {
            return Ok(book);
        };
        info!(path = %path.display(), "loading schema overrides…");
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read `{}`", path.display()))?;
        book.with_overrides(&contents)
            .with_context(|| format!("invalid schema overrides in `{}`", path.display()))
    }

    /// Replace the schemas defined in the TOML document.
    pub fn with_overrides(mut self, toml: &str) -> Result<Self> {
        let overrides: Overrides = toml::from_str(toml)?;
        for (query, schema) in overrides.into_schemas() {
            schema.validate().with_context(|| format!("invalid `{query}` schema"))?;
            info!(%query, n_fields = schema.fields.len(), "overridden");
            self.0.insert(query, Arc::new(schema));
        }
        Ok(self)
    }

    #[must_use]
    pub fn get(&self, query: Query) -> Arc<Schema> {
        self.0.get(&query).cloned().unwrap_or_default()
    }

    pub fn command(&self, query: Query) -> Command {
        Command::new(query, self.get(query))
    }

    pub fn parallel(&self, unit: u8) -> Command {
        Command::parallel(unit, self.get(Query::Parallel))
    }

    /// Resolve an arbitrary command name, unknown ones are left undecoded.
    pub fn command_by_name(&self, name: &str) -> Command {
        match Query::parse(name) {
            Some((Query::Parallel, Some(unit))) => self.parallel(unit),
            Some((query, _)) => self.command(query),
            None => Command::raw(name),
        }
    }
}

/// Schema overrides file, one optional table per query.
#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct Overrides {
    identity: Option<Schema>,
    protocol_id: Option<Schema>,
    firmware: Option<Schema>,
    telemetry: Option<Schema>,
    expanded_telemetry: Option<Schema>,
    settings: Option<Schema>,
    parallel: Option<Schema>,
}

impl Overrides {
    fn into_schemas(self) -> impl Iterator<Item = (Query, Schema)> {
        [
            (Query::Identity, self.identity),
            (Query::ProtocolId, self.protocol_id),
            (Query::Firmware, self.firmware),
            (Query::Telemetry, self.telemetry),
            (Query::ExpandedTelemetry, self.expanded_telemetry),
            (Query::Settings, self.settings),
            (Query::Parallel, self.parallel),
        ]
        .into_iter()
        .filter_map(|(query, schema)| Some((query, schema?)))
    }
}

fn identity() -> Schema {
    Schema { min_tokens: 1, fields: vec![Field::text("SerialNumber", 0)], derived: Vec::new() }
}

fn protocol_id() -> Schema {
    Schema { min_tokens: 1, fields: vec![Field::text("ProtocolId", 0)], derived: Vec::new() }
}

fn firmware() -> Schema {
    Schema { min_tokens: 1, fields: vec![Field::text("FirmwareVersion", 0)], derived: Vec::new() }
}

fn telemetry() -> Schema {
    Schema {
        min_tokens: 20,
        fields: vec![
            Field::number("GridVoltage", 0),
            Field::number("GridFrequency", 1),
            Field::number("AcOutputVoltage", 2),
            Field::number("AcOutputFrequency", 3),
            Field::number("AcOutputApparentPower", 4),
            Field::number("AcOutputActivePower", 5),
            Field::number("OutputLoadPercent", 6),
            Field::number("BusVoltage", 7),
            Field::number("BatteryVoltage", 8),
            Field::number("BatteryChargingCurrent", 9),
            Field::number("BatteryCapacity", 10),
            Field::number("InverterHeatsinkTemperature", 11),
            Field::number("PvInputCurrent", 12),
            Field::number("PvInputVoltage", 13),
            Field::number("BatteryVoltageFromScc", 14),
            Field::number("BatteryDischargeCurrent", 15),
            Field::text("DeviceStatus", 16),
            Field::number("PvInputPower", 19),
        ],
        derived: Vec::new(),
    }
}

fn expanded_telemetry() -> Schema {
    Schema {
        min_tokens: 3,
        fields: vec![
            Field::number("Pv2InputCurrent", 0),
            Field::number("Pv2InputVoltage", 1),
            Field::number("Pv2InputPower", 2),
        ],
        derived: vec![Derived {
            target: "Pv2InputPower".to_owned(),
            factors: ["Pv2InputVoltage".to_owned(), "Pv2InputCurrent".to_owned()],
        }],
    }
}

fn settings() -> Schema {
    Schema {
        min_tokens: 26,
        fields: vec![
            Field::number("AcInputVoltage", 0),
            Field::number("AcInputCurrent", 1),
            Field::number("AcOutputVoltage", 2),
            Field::number("AcOutputFrequency", 3),
            Field::number("AcOutputCurrent", 4),
            Field::number("AcOutputApparentPower", 5),
            Field::number("AcOutputActivePower", 6),
            Field::number("BatteryVoltage", 7),
            Field::number("BatteryRechargeVoltage", 8),
            Field::number("BatteryUnderVoltage", 9),
            Field::number("BatteryBulkVoltage", 10),
            Field::number("BatteryFloatVoltage", 11),
            Field::label("BatteryType", 12, TableId::BatteryType),
            Field::number("MaxAcChargingCurrent", 13),
            Field::number("MaxChargingCurrent", 14),
            Field::label("InputVoltageRange", 15, TableId::InputVoltageRange),
            Field::label("OutputSourcePriority", 16, TableId::OutputSourcePriority),
            Field::label("ChargerSourcePriority", 17, TableId::ChargerSourcePriority),
            Field::number("MaxParallelUnits", 18),
            Field::label("MachineType", 19, TableId::MachineType),
            Field::label("Topology", 20, TableId::Topology),
            Field::label("OutputMode", 21, TableId::OutputMode),
            Field::number("BatteryRedischargeVoltage", 22),
            Field::label("PvOkCondition", 23, TableId::PvOkCondition),
            Field::label("PvPowerBalance", 24, TableId::PvPowerBalance),
            Field::number("MaxBatteryCvChargingTime", 25),
        ],
        derived: Vec::new(),
    }
}

fn parallel() -> Schema {
    Schema {
        min_tokens: 27,
        fields: vec![
            Field::flag("Gridmode", 2, "L"),
            Field::number("SerialNumber", 1),
            Field::number("BatteryChargingCurrent", 12),
            Field::number("BatteryDischargeCurrent", 26),
            Field::number("TotalChargingCurrent", 15),
            Field::number("GridVoltage", 4),
            Field::number("GridFrequency", 5),
            Field::number("OutputVoltage", 6),
            Field::number("OutputFrequency", 7),
            Field::number("OutputAparentPower", 8),
            Field::number("OutputActivePower", 9),
            Field::number("LoadPercentage", 10),
            Field::number("BatteryVoltage", 11),
            Field::number("BatteryCapacity", 13),
            Field::number("PvInputVoltage", 14),
            Field::number("TotalAcOutputApparentPower", 16),
            Field::number("TotalAcOutputActivePower", 17),
            Field::number("TotalAcOutputPercentage", 18),
            Field::number("OutputMode", 20),
            Field::number("ChargerSourcePriority", 21),
            Field::number("MaxChargeCurrent", 22),
            Field::number("MaxChargerRange", 23),
            Field::number("MaxAcChargerCurrent", 24),
            Field::number("PvInputCurrentForBattery", 25),
            Field::flag("Solarmode", 2, "B"),
        ],
        derived: Vec::new(),
    }
}
