//! Every resource must carry a configured set of labels.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::config::schema::{ConfigSchema, SchemaType};
use crate::diagnostics::{resource_path_of, Violation};
use crate::errors::PluginError;
use crate::models::ValidationContext;
use crate::plugin::{Plugin, PluginMetadata};

pub const NAME: &str = "required-labels";

/// Label required when no configuration says otherwise.
pub const DEFAULT_LABEL: &str = "app.kubernetes.io/name";

/// Reports one error per missing label per manifest.
///
/// Config: `labels`, a list of label keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiredLabelsPlugin;

#[async_trait]
impl Plugin for RequiredLabelsPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> Option<&str> {
        Some("Requires a set of labels on every resource")
    }

    fn config_schema(&self) -> Option<ConfigSchema> {
        Some(
            ConfigSchema::of_type(SchemaType::Object).with_property(
                "labels",
                ConfigSchema::of_type(SchemaType::Array)
                    .with_items(ConfigSchema::of_type(SchemaType::String)),
            ),
        )
    }

    fn default_config(&self) -> Map<String, Value> {
        let mut config = Map::new();
        config.insert("labels".into(), json!([DEFAULT_LABEL]));
        config
    }

    fn metadata(&self) -> Option<PluginMetadata> {
        Some(PluginMetadata {
            tags: vec!["metadata".into(), "labels".into()],
            ..PluginMetadata::default()
        })
    }

    async fn validate(
        &self,
        manifests: &[Value],
        context: &ValidationContext,
    ) -> Result<Vec<Violation>, PluginError> {
        let labels: Vec<&str> = match context.config_value("labels") {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            Some(_) => return Err(PluginError::new("'labels' must be a list of strings")),
            None => vec![DEFAULT_LABEL],
        };

        let mut violations = Vec::new();
        for (index, manifest) in manifests.iter().enumerate() {
            if !manifest.is_object() {
                continue;
            }
            let present = manifest.pointer("/metadata/labels").and_then(Value::as_object);
            for label in &labels {
                if present.is_some_and(|map| map.contains_key(*label)) {
                    continue;
                }
                violations.push(
                    Violation::error(NAME, format!("Missing label {label}. Add it under metadata.labels."))
                        .with_resource_path(resource_path_of(manifest, index))
                        .with_field("metadata.labels")
                        .with_suggestion(format!("Add `{label}: <value>` to metadata.labels")),
                );
            }
        }
        Ok(violations)
    }
}
