//! Enumerated settings codes.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use derive_more::Display;
use serde::Deserialize;

use crate::{decoder::Label, prelude::*};

/// Static code-to-label table.
#[derive(Debug)]
pub struct Table {
    /// Prefix of the sentinel produced for an unknown code.
    pub name: &'static str,
    pub entries: &'static [(&'static str, &'static str)],
}

impl Table {
    /// Total lookup: an unknown code resolves into `<name>_invalid(<code>)`.
    #[must_use]
    pub fn resolve(&self, code: &str) -> Label {
        self.entries.iter().find(|(known, _)| *known == code).map_or_else(
            || Label::Unknown(format!("{}_invalid({code})", self.name)),
            |&(_, label)| Label::Known(label),
        )
    }

    fn codes(&self) -> impl Iterator<Item = &'static str> {
        self.entries.iter().map(|(code, _)| *code)
    }
}

/// Table reference usable from a schema file.
#[derive(Copy, Clone, Debug, Display, Eq, Hash, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableId {
    BatteryType,
    InputVoltageRange,
    OutputSourcePriority,
    ChargerSourcePriority,
    MachineType,
    Topology,
    OutputMode,
    PvOkCondition,
    PvPowerBalance,
}

impl TableId {
    #[must_use]
    pub const fn table(self) -> &'static Table {
        match self {
            Self::BatteryType => &BATTERY_TYPES,
            Self::InputVoltageRange => &INPUT_VOLTAGE_RANGES,
            Self::OutputSourcePriority => &OUTPUT_SOURCE_PRIORITIES,
            Self::ChargerSourcePriority => &CHARGER_SOURCE_PRIORITIES,
            Self::MachineType => &MACHINE_TYPES,
            Self::Topology => &TOPOLOGIES,
            Self::OutputMode => &OUTPUT_MODES,
            Self::PvOkCondition => &PV_OK_CONDITIONS,
            Self::PvPowerBalance => &PV_POWER_BALANCE,
        }
    }
}

static BATTERY_TYPES: Table = Table {
    name: "BatteryType",
    entries: &[("0", "AGM"), ("1", "Flooded"), ("2", "User"), ("3", "Lithium")],
};

static INPUT_VOLTAGE_RANGES: Table =
    Table { name: "InputVoltageRange", entries: &[("0", "Appliance"), ("1", "UPS")] };

static OUTPUT_SOURCE_PRIORITIES: Table = Table {
    name: "OutputSourcePriority",
    entries: &[("0", "utility"), ("1", "solar"), ("2", "battery")],
};

static CHARGER_SOURCE_PRIORITIES: Table = Table {
    name: "ChargerSourcePriority",
    entries: &[
        ("0", "utility first"),
        ("1", "solar first"),
        ("2", "solar + utility"),
        ("3", "solar only"),
    ],
};

static MACHINE_TYPES: Table = Table {
    name: "MachineType",
    entries: &[("00", "Grid tie"), ("01", "Off Grid"), ("10", "Hybrid")],
};

static TOPOLOGIES: Table =
    Table { name: "Topology", entries: &[("0", "transformerless"), ("1", "transformer")] };

static OUTPUT_MODES: Table = Table {
    name: "OutputMode",
    entries: &[
        ("0", "single machine output"),
        ("1", "parallel output"),
        ("2", "Phase 1 of 3 Phase output"),
        ("3", "Phase 2 of 3 Phase output"),
        ("4", "Phase 3 of 3 Phase output"),
    ],
};

static PV_OK_CONDITIONS: Table = Table {
    name: "PvOkCondition",
    entries: &[
        (
            "0",
            "As long as one unit of inverters has connect PV, parallel system will consider PV OK",
        ),
        ("1", "Only All of inverters have connect PV, parallel system will consider PV OK"),
    ],
};

static PV_POWER_BALANCE: Table = Table {
    name: "PvPowerBalance",
    entries: &[
        ("0", "PV input max current will be the max charged current"),
        ("1", "PV input max power will be the sum of the max charged power and loads power"),
    ],
};

/// Rate-limited reporting of unknown codes.
pub struct Diagnostics {
    interval: Duration,
    last_reported_at: HashMap<(TableId, String), Instant>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

impl Diagnostics {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_reported_at: HashMap::new() }
    }

    /// Warn about the unknown code unless the same one was reported recently.
    ///
    /// Returns whether the warning was emitted.
    pub fn report(&mut self, table_id: TableId, code: &str) -> bool {
        let now = Instant::now();
        let key = (table_id, code.to_owned());
        if let Some(reported_at) = self.last_reported_at.get(&key)
            && now.duration_since(*reported_at) < self.interval
        {
            return false;
        }
        self.last_reported_at.insert(key, now);
        let table = table_id.table();
        warn!(
            table = table.name,
            code,
            known_codes = ?table.codes().collect::<Vec<_>>(),
            "unexpected code",
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_known() {
        assert_eq!(TableId::BatteryType.table().resolve("3"), Label::Known("Lithium"));
        assert_eq!(TableId::MachineType.table().resolve("10"), Label::Known("Hybrid"));
    }

    #[test]
    fn resolve_unknown() {
        assert_eq!(
            TableId::BatteryType.table().resolve("9"),
            Label::Unknown("BatteryType_invalid(9)".to_owned()),
        );
        assert_eq!(
            TableId::MachineType.table().resolve("1"),
            Label::Unknown("MachineType_invalid(1)".to_owned()),
        );
    }

    #[test]
    fn diagnostics_are_rate_limited() {
        let mut diagnostics = Diagnostics::new(Duration::from_secs(3600));
        assert!(diagnostics.report(TableId::BatteryType, "9"));
        assert!(!diagnostics.report(TableId::BatteryType, "9"));
        assert!(diagnostics.report(TableId::BatteryType, "8"));
        assert!(diagnostics.report(TableId::Topology, "9"));
    }

    #[test]
    fn diagnostics_repeat_after_interval() {
        let mut diagnostics = Diagnostics::new(Duration::ZERO);
        assert!(diagnostics.report(TableId::BatteryType, "9"));
        assert!(diagnostics.report(TableId::BatteryType, "9"));
    }
}
