//! Reading manifests from YAML.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::errors::Result;

/// Parse a multi-document YAML stream into manifests.
///
/// Documents are separated by `---`. Empty documents (including those that
/// hold only comments) are skipped, so the output can be shorter than the
/// number of separators.
///
/// # Errors
///
/// Returns an error on the first document that is not valid YAML or cannot be
/// represented as JSON (e.g. a mapping with non-string keys).
pub fn parse_manifests(yaml: &str) -> Result<Vec<Value>> {
    let mut manifests = Vec::new();
    for document in serde_yaml_ng::Deserializer::from_str(yaml) {
        let value = Value::deserialize(document)?;
        if !value.is_null() {
            manifests.push(value);
        }
    }
    Ok(manifests)
}

/// Parse a single YAML document. An empty document yields `Value::Null`.
///
/// # Errors
///
/// Returns an error if `yaml` is not valid YAML or holds several documents.
pub fn parse_document(yaml: &str) -> Result<Value> {
    Ok(serde_yaml_ng::from_str(yaml)?)
}

/// Read and parse a manifest file; see [`parse_manifests`].
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn read_manifests(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)?;
    parse_manifests(&content)
}
