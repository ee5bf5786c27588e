//! A small JSON-schema subset for plugin configuration.
//!
//! Supports `type`, `properties`, `required`, `additionalProperties`, `items`
//! and `enum`. Validation collects every problem as a string instead of
//! stopping at the first one.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ChartguardError, Result};

/// JSON value types a schema node can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
    Null,
}

impl SchemaType {
    fn matches(self, value: &Value) -> bool {
        match self {
            SchemaType::Object => value.is_object(),
            SchemaType::Array => value.is_array(),
            SchemaType::String => value.is_string(),
            SchemaType::Number => value.is_number(),
            SchemaType::Integer => value.is_i64() || value.is_u64(),
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Null => value.is_null(),
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchemaType::Object => "object",
            SchemaType::Array => "array",
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Integer => "integer",
            SchemaType::Boolean => "boolean",
            SchemaType::Null => "null",
        };
        f.write_str(s)
    }
}

/// Name of the JSON type of `value`, in schema vocabulary.
fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One node of a configuration schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, ConfigSchema>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    /// `Some(true)` allows properties not listed in `properties`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ConfigSchema>>,

    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<Value>,
}

impl ConfigSchema {
    #[must_use]
    pub fn of_type(schema_type: SchemaType) -> Self {
        Self {
            schema_type: Some(schema_type),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, schema: ConfigSchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    #[must_use]
    pub fn with_required(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    #[must_use]
    pub fn with_items(mut self, items: ConfigSchema) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    #[must_use]
    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.allowed_values = values;
        self
    }

    #[must_use]
    pub fn allow_additional(mut self) -> Self {
        self.additional_properties = Some(true);
        self
    }

    /// Parse a schema from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns a JSON error if `value` is not a valid schema document.
    pub fn from_json(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Structural sanity check: every required property must be declared
    /// when `properties` is non-empty, recursively.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn check_well_formed(&self) -> std::result::Result<(), String> {
        self.check_well_formed_at("config")
    }

    fn check_well_formed_at(&self, path: &str) -> std::result::Result<(), String> {
        if !self.properties.is_empty() {
            if let Some(missing) = self
                .required
                .iter()
                .find(|name| !self.properties.contains_key(*name))
            {
                return Err(format!(
                    "{path}: required property '{missing}' is not declared"
                ));
            }
        }
        for (name, child) in &self.properties {
            child.check_well_formed_at(&format!("{path}.{name}"))?;
        }
        if let Some(items) = &self.items {
            items.check_well_formed_at(&format!("{path}[]"))?;
        }
        Ok(())
    }

    /// Validate `value` against this schema, returning every problem found.
    #[must_use]
    pub fn validate(&self, value: &Value) -> Vec<String> {
        let mut errors = Vec::new();
        self.validate_at(value, "config", &mut errors);
        errors
    }

    fn validate_at(&self, value: &Value, path: &str, errors: &mut Vec<String>) {
        if let Some(expected) = self.schema_type {
            if !expected.matches(value) {
                errors.push(format!(
                    "{path}: expected {expected}, found {}",
                    type_name(value)
                ));
                return;
            }
        }

        if !self.allowed_values.is_empty() && !self.allowed_values.contains(value) {
            errors.push(format!("{path}: value {value} is not one of the allowed values"));
        }

        if let Value::Object(map) = value {
            for name in &self.required {
                if !map.contains_key(name) {
                    errors.push(format!("{path}: missing required property '{name}'"));
                }
            }
            let closed = !self.properties.is_empty() && self.additional_properties != Some(true);
            for (key, child_value) in map {
                match self.properties.get(key) {
                    Some(child) => child.validate_at(child_value, &format!("{path}.{key}"), errors),
                    None if closed => errors.push(format!("{path}: unknown property '{key}'")),
                    None => {}
                }
            }
        }

        if let (Value::Array(items), Some(item_schema)) = (value, &self.items) {
            for (i, item) in items.iter().enumerate() {
                item_schema.validate_at(item, &format!("{path}[{i}]"), errors);
            }
        }
    }
}

/// Validate `value` against `schema`, failing hard on any problem.
///
/// # Errors
///
/// Returns [`ChartguardError::Configuration`] listing every problem found.
pub fn validate_configuration(plugin: &str, schema: &ConfigSchema, value: &Value) -> Result<()> {
    let errors = schema.validate(value);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ChartguardError::Configuration {
            plugin: plugin.to_string(),
            errors,
        })
    }
}
