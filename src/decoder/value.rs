use derive_more::Display;
use serde::Serialize;

/// Decoded field value.
#[derive(Clone, Debug, Display, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Decimal(f64),
    Label(Label),
    Raw(String),
}

impl Value {
    /// Integer if possible, otherwise decimal if possible, otherwise the raw token.
    #[must_use]
    pub fn coerce(token: &str) -> Self {
        if let Ok(integer) = token.parse() {
            return Self::Integer(integer);
        }
        match token.parse::<f64>() {
            Ok(decimal) if decimal.is_finite() => Self::Decimal(decimal),
            _ => Self::Raw(token.to_owned()),
        }
    }

    #[must_use]
    #[expect(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(integer) => Some(*integer as f64),
            Self::Decimal(decimal) => Some(*decimal),
            Self::Label(_) | Self::Raw(_) => None,
        }
    }
}

/// Enumerated code resolved against its table.
#[derive(Clone, Debug, Display, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Label {
    Known(&'static str),

    /// Sentinel for a code outside the table, e.g. `BatteryType_invalid(9)`.
    Unknown(String),
}
