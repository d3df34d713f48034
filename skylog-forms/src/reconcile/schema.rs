//! Declarative form definitions
//!
//! A form is an ordered list of field specs. Each spec declares the value
//! kind (used for coercion at the edges), whether registry lookups populate
//! the field, and where the value is persisted. The set of lookup-populated
//! fields is configuration: presets carry a default that `config.toml` can
//! replace per form.

use super::types::{FieldValue, ValidationFailure};
use skylog_common::{Error, Result};
use std::collections::HashSet;

/// Value kind of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Decimal,
}

/// Where a field value is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStorage {
    /// Stored by the backend record API
    Remote,
    /// Stored only on this device
    Local,
}

/// One field of a form definition
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    /// Inclusive bounds for Integer fields
    pub bounds: Option<(i64, i64)>,
    /// Populated by registry lookups
    pub lookup: bool,
    pub storage: FieldStorage,
}

impl FieldSpec {
    pub fn new(name: &str, label: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind,
            bounds: None,
            lookup: false,
            storage: FieldStorage::Remote,
        }
    }

    pub fn from_lookup(mut self) -> Self {
        self.lookup = true;
        self
    }

    pub fn local(mut self) -> Self {
        self.storage = FieldStorage::Local;
        self
    }

    pub fn bounded(mut self, min: i64, max: i64) -> Self {
        self.bounds = Some((min, max));
        self
    }

    /// Coerce a raw JSON value into this field's kind
    ///
    /// `null` and blank strings clear the field (`Ok(None)`).
    pub fn coerce(&self, raw: &serde_json::Value) -> std::result::Result<Option<FieldValue>, ValidationFailure> {
        use serde_json::Value;

        let reject = |reason: String| ValidationFailure::Coercion {
            field: self.name.clone(),
            reason,
        };

        if let Value::String(s) = raw {
            if s.trim().is_empty() {
                return Ok(None);
            }
        }

        let value = match (self.kind, raw) {
            (_, Value::Null) => return Ok(None),
            (FieldKind::Text, Value::String(s)) => FieldValue::Text(s.trim().to_string()),
            (FieldKind::Text, Value::Number(n)) => FieldValue::Text(n.to_string()),
            (FieldKind::Integer, Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Integer(i)
                } else {
                    match n.as_f64() {
                        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                            FieldValue::Integer(f as i64)
                        }
                        _ => return Err(reject(format!("{} is not a whole number", n))),
                    }
                }
            }
            (FieldKind::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|_| reject(format!("{:?} is not a whole number", s)))?,
            (FieldKind::Decimal, Value::Number(n)) => n
                .as_f64()
                .map(FieldValue::Decimal)
                .ok_or_else(|| reject(format!("{} is not a number", n)))?,
            (FieldKind::Decimal, Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(f) if f.is_finite() => FieldValue::Decimal(f),
                _ => return Err(reject(format!("{:?} is not a number", s))),
            },
            (kind, other) => {
                return Err(reject(format!("{:?} value expected, got {}", kind, json_type(other))))
            }
        };

        if let (FieldValue::Integer(i), Some((min, max))) = (&value, self.bounds) {
            if *i < min || *i > max {
                return Err(reject(format!("{} is outside {}..={}", i, min, max)));
            }
        }

        Ok(Some(value))
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// A named, ordered set of fields
#[derive(Debug, Clone, PartialEq)]
pub struct FormSchema {
    name: String,
    fields: Vec<FieldSpec>,
}

impl FormSchema {
    /// Build a schema; field names must be unique
    pub fn new(name: &str, fields: Vec<FieldSpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        for spec in &fields {
            if !seen.insert(spec.name.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "Form {} declares field {} twice",
                    name, spec.name
                )));
            }
        }
        Ok(Self {
            name: name.to_string(),
            fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn lookup_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.lookup)
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.field(name)
            .map(|f| f.storage == FieldStorage::Local)
            .unwrap_or(false)
    }

    /// Replace the lookup-populated set
    ///
    /// Every name must exist in the schema; an unknown name is a
    /// configuration error rather than a silently ignored entry.
    pub fn with_lookup_fields<S: AsRef<str>>(mut self, names: &[S]) -> Result<Self> {
        let wanted: HashSet<&str> = names.iter().map(|n| n.as_ref()).collect();
        for name in &wanted {
            if self.field(name).is_none() {
                return Err(Error::Config(format!(
                    "Form {} has no field named {}",
                    self.name, name
                )));
            }
        }
        for spec in &mut self.fields {
            spec.lookup = wanted.contains(spec.name.as_str());
        }
        Ok(self)
    }
}

/// Aircraft identity form
///
/// Registry lookups fill every Transport Canada register field by default.
/// Hour meters and notes are kept on the device only.
pub fn aircraft_identity() -> FormSchema {
    use FieldKind::*;

    let fields = vec![
        FieldSpec::new("registration", "Registration", Text),
        FieldSpec::new("manufacturer", "Manufacturer", Text).from_lookup(),
        FieldSpec::new("model", "Model", Text).from_lookup(),
        FieldSpec::new("serial_number", "Serial number", Text).from_lookup(),
        FieldSpec::new("year_of_manufacture", "Year of manufacture", Integer)
            .bounded(1903, 2100)
            .from_lookup(),
        FieldSpec::new("category", "Category", Text).from_lookup(),
        FieldSpec::new("engine_manufacturer", "Engine manufacturer", Text).from_lookup(),
        FieldSpec::new("engine_model", "Engine model", Text).from_lookup(),
        FieldSpec::new("owner_name", "Owner name", Text).from_lookup(),
        FieldSpec::new("owner_city", "Owner city", Text).from_lookup(),
        FieldSpec::new("owner_province", "Owner province", Text).from_lookup(),
        FieldSpec::new("airframe_hours", "Airframe hours", Decimal).local(),
        FieldSpec::new("engine_hours", "Engine hours", Decimal).local(),
        FieldSpec::new("propeller_hours", "Propeller hours", Decimal).local(),
        FieldSpec::new("notes", "Notes", Text).local(),
    ];

    FormSchema {
        name: "aircraft_identity".to_string(),
        fields,
    }
}
