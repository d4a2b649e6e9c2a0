//! Typed custom attributes: coercion of incoming JSON against a company's definitions,
//! non-destructive merging into an application, and the uniform read projection.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use serde_json::Value;

use super::domain::{
    CustomFieldDefinition, CustomFieldId, CustomFieldValue, CustomFieldValues, FieldType,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CustomFieldError {
    #[error("unknown custom field '{0}'")]
    UnknownField(CustomFieldId),
    #[error("custom field '{field}' expects a {expected} value")]
    TypeMismatch {
        field: String,
        expected: &'static str,
    },
    #[error("'{value}' is not an option of custom field '{field}'")]
    InvalidOption { field: String, value: String },
}

impl CustomFieldValue {
    /// Plain JSON rendering used on the wire.
    pub fn to_json(&self) -> Value {
        match self {
            CustomFieldValue::Text(text) | CustomFieldValue::Selection(text) => {
                Value::String(text.clone())
            }
            CustomFieldValue::Number(number) => serde_json::Number::from_f64(*number)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            CustomFieldValue::Date(date) => Value::String(date.format("%Y-%m-%d").to_string()),
        }
    }
}

/// Coerce one raw value against its definition. `Ok(None)` means "clear the value".
pub fn coerce(
    definition: &CustomFieldDefinition,
    raw: &Value,
) -> Result<Option<CustomFieldValue>, CustomFieldError> {
    if raw.is_null() {
        return Ok(None);
    }

    let mismatch = || CustomFieldError::TypeMismatch {
        field: definition.name.clone(),
        expected: definition.field_type.label(),
    };

    let value = match definition.field_type {
        FieldType::Text => match raw {
            Value::String(text) => CustomFieldValue::Text(text.clone()),
            Value::Number(number) => CustomFieldValue::Text(number.to_string()),
            _ => return Err(mismatch()),
        },
        FieldType::Number => match raw {
            Value::Number(number) => {
                CustomFieldValue::Number(number.as_f64().ok_or_else(mismatch)?)
            }
            Value::String(text) => {
                let parsed = text.trim().parse::<f64>().map_err(|_| mismatch())?;
                if !parsed.is_finite() {
                    return Err(mismatch());
                }
                CustomFieldValue::Number(parsed)
            }
            _ => return Err(mismatch()),
        },
        FieldType::Date => match raw {
            Value::String(text) => CustomFieldValue::Date(parse_date(text).ok_or_else(mismatch)?),
            _ => return Err(mismatch()),
        },
        FieldType::Select => match raw {
            Value::String(choice) => {
                if !definition.options.iter().any(|option| option == choice) {
                    return Err(CustomFieldError::InvalidOption {
                        field: definition.name.clone(),
                        value: choice.clone(),
                    });
                }
                CustomFieldValue::Selection(choice.clone())
            }
            _ => return Err(mismatch()),
        },
    };

    Ok(Some(value))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|timestamp| timestamp.date_naive())
        })
}

/// Validated set of writes: `Some` sets a value, `None` removes the key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomFieldPatch {
    changes: BTreeMap<CustomFieldId, Option<CustomFieldValue>>,
}

impl CustomFieldPatch {
    /// Every key must name one of `definitions`; values are coerced to the declared type.
    pub fn resolve(
        definitions: &[CustomFieldDefinition],
        raw: &BTreeMap<String, Value>,
    ) -> Result<Self, CustomFieldError> {
        let mut changes = BTreeMap::new();
        for (key, value) in raw {
            let id = CustomFieldId(key.clone());
            let definition = definitions
                .iter()
                .find(|definition| definition.id == id)
                .ok_or_else(|| CustomFieldError::UnknownField(id.clone()))?;
            changes.insert(id, coerce(definition, value)?);
        }
        Ok(Self { changes })
    }

    /// Merge into the stored map. Keys absent from the patch are left untouched.
    pub fn apply(&self, stored: &mut CustomFieldValues) {
        for (id, change) in &self.changes {
            match change {
                Some(value) => {
                    stored.insert(id.clone(), value.clone());
                }
                None => {
                    stored.remove(id);
                }
            }
        }
    }
}

/// One definition joined with the value an application holds for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedField {
    pub id: CustomFieldId,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub options: Vec<String>,
    pub value: Value,
}

/// Join every definition with the stored values. Values whose definition is not in
/// `definitions` are not projected.
pub fn project(
    definitions: &[CustomFieldDefinition],
    stored: &CustomFieldValues,
) -> Vec<ProjectedField> {
    definitions
        .iter()
        .map(|definition| ProjectedField {
            id: definition.id.clone(),
            name: definition.name.clone(),
            field_type: definition.field_type,
            options: definition.options.clone(),
            value: stored
                .get(&definition.id)
                .map(CustomFieldValue::to_json)
                .unwrap_or(Value::Null),
        })
        .collect()
}
