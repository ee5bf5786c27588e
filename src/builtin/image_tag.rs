//! Container images must be pinned.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};

use super::containers_of;
use crate::config::schema::{ConfigSchema, SchemaType};
use crate::diagnostics::{resource_path_of, Violation};
use crate::errors::PluginError;
use crate::models::ValidationContext;
use crate::plugin::Plugin;

pub const NAME: &str = "image-tag";

/// `name[:tag][@sha256:digest]`. The tag may not contain `/`, so a registry
/// port (`host:5000/app`) stays part of the name.
static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<name>[^@\s]+?)(?::(?P<tag>\w[\w.-]{0,127}))?(?:@(?P<digest>sha256:[a-f0-9]{64}))?$")
        .expect("image reference regex must compile")
});

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference<'a> {
    pub name: &'a str,
    pub tag: Option<&'a str>,
    pub digest: Option<&'a str>,
}

/// Split an image reference into name, tag and digest.
#[must_use]
pub fn parse_image(image: &str) -> Option<ImageReference<'_>> {
    let caps = IMAGE_RE.captures(image)?;
    Some(ImageReference {
        name: caps.name("name")?.as_str(),
        tag: caps.name("tag").map(|m| m.as_str()),
        digest: caps.name("digest").map(|m| m.as_str()),
    })
}

/// Errors for `:latest`, untagged and unparsable images. With
/// `require_digest: true`, also an info finding for every image not pinned by
/// digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageTagPlugin;

#[async_trait]
impl Plugin for ImageTagPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> Option<&str> {
        Some("Rejects floating image tags")
    }

    fn config_schema(&self) -> Option<ConfigSchema> {
        Some(
            ConfigSchema::of_type(SchemaType::Object)
                .with_property("require_digest", ConfigSchema::of_type(SchemaType::Boolean)),
        )
    }

    fn default_config(&self) -> Map<String, Value> {
        let mut config = Map::new();
        config.insert("require_digest".into(), Value::Bool(false));
        config
    }

    async fn validate(
        &self,
        manifests: &[Value],
        context: &ValidationContext,
    ) -> Result<Vec<Violation>, PluginError> {
        let require_digest = matches!(context.config_value("require_digest"), Some(Value::Bool(true)));

        let mut violations = Vec::new();
        for (index, manifest) in manifests.iter().enumerate() {
            for container in containers_of(manifest) {
                let Some(image) = container.spec.get("image").and_then(Value::as_str) else {
                    continue;
                };
                let path = resource_path_of(manifest, index);
                let field = format!("{}.image", container.field);
                let finding = |violation: Violation| {
                    violation
                        .with_resource_path(path.clone())
                        .with_field(field.clone())
                };

                let Some(reference) = parse_image(image) else {
                    violations.push(finding(Violation::error(
                        NAME,
                        format!("Image '{image}' is not a valid image reference"),
                    )));
                    continue;
                };
                if reference.digest.is_some() {
                    continue;
                }
                match reference.tag {
                    None => violations.push(finding(
                        Violation::error(NAME, format!("Image '{image}' has no tag. It resolves to latest."))
                            .with_suggestion("Pin the image to a released version tag"),
                    )),
                    Some("latest") => violations.push(finding(
                        Violation::error(NAME, format!("Image '{image}' uses the latest tag"))
                            .with_suggestion("Pin the image to a released version tag"),
                    )),
                    Some(_) if require_digest => violations.push(finding(
                        Violation::info(NAME, format!("Image '{image}' is not pinned by digest"))
                            .with_suggestion("Reference the image as name@sha256:<digest>"),
                    )),
                    Some(_) => {}
                }
            }
        }
        Ok(violations)
    }
}
