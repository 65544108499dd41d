//! Positional decoding of reply payloads into records.

mod enums;
mod record;
mod schema;
mod value;

use itertools::Itertools;

pub use self::{
    enums::{Diagnostics, TableId},
    record::Record,
    schema::{FieldKind, Schema, SchemaBook},
    value::{Label, Value},
};
use crate::{error::Error, prelude::*, protocol::Command};

#[derive(Default)]
pub struct Decoder {
    diagnostics: Diagnostics,
}

impl Decoder {
    /// Map the payload tokens onto the command schema.
    ///
    /// Fails only when there are fewer tokens than the schema guarantees, unknown enumeration
    /// codes decode into their sentinels.
    #[instrument(skip_all, fields(command = %command.name))]
    pub fn decode(&mut self, command: &Command, payload: &str) -> Result<Record, Error> {
        let tokens = payload.split_whitespace().collect_vec();
        let schema = &command.schema;
        if tokens.len() < schema.min_tokens {
            return Err(Error::InsufficientTokens {
                command: command.name.clone(),
                actual: tokens.len(),
                expected: schema.min_tokens,
            });
        }

        let mut record = Record::with_capacity(schema.fields.len());
        for field in &schema.fields {
            let Some(token) = tokens.get(field.index).copied() else {
                continue;
            };
            let value = match &field.kind {
                FieldKind::Number => Value::coerce(token),
                FieldKind::Text => Value::Raw(token.to_owned()),
                FieldKind::Enum(table_id) => {
                    let label = table_id.table().resolve(token);
                    if matches!(label, Label::Unknown(_)) {
                        self.diagnostics.report(*table_id, token);
                    }
                    Value::Label(label)
                }
                FieldKind::Flag(expected) => Value::Integer(i64::from(token == expected.as_str())),
            };
            record.set(&field.name, value);
        }
        for derived in &schema.derived {
            derived.apply(&mut record);
        }
        debug!(n_tokens = tokens.len(), n_fields = record.len(), "decoded");
        Ok(record)
    }
}
