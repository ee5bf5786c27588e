//! Reference plugins shipped with the crate.

pub mod image_tag;
pub mod required_labels;
pub mod resource_limits;

use std::sync::Arc;

use serde_json::Value;

use crate::plugin::Plugin;

pub use image_tag::ImageTagPlugin;
pub use required_labels::RequiredLabelsPlugin;
pub use resource_limits::ResourceLimitsPlugin;

/// One instance of every built-in plugin.
#[must_use]
pub fn builtin_plugins() -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(RequiredLabelsPlugin),
        Arc::new(ResourceLimitsPlugin),
        Arc::new(ImageTagPlugin),
    ]
}

/// A container of a workload manifest and the JSON path leading to it.
pub(crate) struct ContainerRef<'a> {
    pub field: String,
    pub name: &'a str,
    pub spec: &'a Value,
}

/// Pointer to the pod spec of a workload kind.
fn pod_spec_pointer(kind: &str) -> Option<&'static str> {
    match kind {
        "Pod" => Some("/spec"),
        "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "ReplicationController"
        | "Job" => Some("/spec/template/spec"),
        "CronJob" => Some("/spec/jobTemplate/spec/template/spec"),
        _ => None,
    }
}

/// Containers and init containers of a workload, in declaration order.
/// Non-workload manifests have none.
pub(crate) fn containers_of(manifest: &Value) -> Vec<ContainerRef<'_>> {
    let Some(pointer) = manifest
        .get("kind")
        .and_then(Value::as_str)
        .and_then(pod_spec_pointer)
    else {
        return Vec::new();
    };
    let Some(pod_spec) = manifest.pointer(pointer) else {
        return Vec::new();
    };
    let prefix = pointer.trim_start_matches('/').replace('/', ".");

    let mut found = Vec::new();
    for list in ["initContainers", "containers"] {
        let Some(items) = pod_spec.get(list).and_then(Value::as_array) else {
            continue;
        };
        for (i, spec) in items.iter().enumerate() {
            found.push(ContainerRef {
                field: format!("{prefix}.{list}[{i}]"),
                name: spec.get("name").and_then(Value::as_str).unwrap_or("<unnamed>"),
                spec,
            });
        }
    }
    found
}
