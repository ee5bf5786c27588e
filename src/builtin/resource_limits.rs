//! Workload containers must declare CPU and memory limits.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::containers_of;
use crate::config::schema::{ConfigSchema, SchemaType};
use crate::diagnostics::{resource_path_of, Severity, Violation};
use crate::errors::PluginError;
use crate::models::ValidationContext;
use crate::plugin::Plugin;

pub const NAME: &str = "resource-limits";

const LIMITED_RESOURCES: [&str; 2] = ["cpu", "memory"];

/// Warns (or errors, with `strict: true`) for every container lacking
/// `resources.limits.cpu` or `resources.limits.memory`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceLimitsPlugin;

#[async_trait]
impl Plugin for ResourceLimitsPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> Option<&str> {
        Some("Requires CPU and memory limits on workload containers")
    }

    fn config_schema(&self) -> Option<ConfigSchema> {
        Some(
            ConfigSchema::of_type(SchemaType::Object)
                .with_property("strict", ConfigSchema::of_type(SchemaType::Boolean)),
        )
    }

    fn default_config(&self) -> Map<String, Value> {
        let mut config = Map::new();
        config.insert("strict".into(), Value::Bool(false));
        config
    }

    async fn validate(
        &self,
        manifests: &[Value],
        context: &ValidationContext,
    ) -> Result<Vec<Violation>, PluginError> {
        let severity = match context.config_value("strict") {
            Some(Value::Bool(true)) => Severity::Error,
            _ => Severity::Warning,
        };

        let mut violations = Vec::new();
        for (index, manifest) in manifests.iter().enumerate() {
            if context.is_cancelled() {
                break;
            }
            for container in containers_of(manifest) {
                let field = format!("{}.resources.limits", container.field);
                let Some(limits) = container
                    .spec
                    .pointer("/resources/limits")
                    .and_then(Value::as_object)
                else {
                    violations.push(
                        Violation::new(
                            NAME,
                            severity,
                            format!("Container '{}' has no resource limits", container.name),
                        )
                        .with_resource_path(resource_path_of(manifest, index))
                        .with_field(field)
                        .with_suggestion("Set resources.limits.cpu and resources.limits.memory"),
                    );
                    continue;
                };
                for resource in LIMITED_RESOURCES {
                    if limits.contains_key(resource) {
                        continue;
                    }
                    violations.push(
                        Violation::new(
                            NAME,
                            severity,
                            format!("Container '{}' has no {resource} limit", container.name),
                        )
                        .with_resource_path(resource_path_of(manifest, index))
                        .with_field(format!("{field}.{resource}"))
                        .with_suggestion(format!("Set resources.limits.{resource}")),
                    );
                }
            }
        }
        Ok(violations)
    }
}
