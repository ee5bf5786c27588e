//! Name-keyed plugin registry with O(1) lookups.
//!
//! Plugins live in an arena of slots; a name index maps each plugin name to
//! its slot. Unregistering leaves a tombstone so the remaining plugins keep
//! their registration order, which the sequential execution path relies on.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::errors::{ChartguardError, Result};
use crate::plugin::Plugin;

/// Maximum plugin name length.
const MAX_NAME_LENGTH: usize = 64;

/// A registered plugin together with its resolved configuration.
#[derive(Clone)]
pub struct RegisteredPlugin {
    pub plugin: Arc<dyn Plugin>,
    pub config: Map<String, Value>,
}

impl RegisteredPlugin {
    #[must_use]
    pub fn name(&self) -> &str {
        self.plugin.name()
    }
}

impl std::fmt::Debug for RegisteredPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPlugin")
            .field("name", &self.plugin.name())
            .field("version", &self.plugin.version())
            .field("config", &self.config)
            .finish()
    }
}

/// Storage for registered plugins.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    slots: Vec<Option<RegisteredPlugin>>,
    index: HashMap<String, usize>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin with its resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ChartguardError::Registration`] if the plugin is malformed and
    /// [`ChartguardError::DuplicatePlugin`] if the name is taken.
    pub fn register(
        &mut self,
        plugin: Arc<dyn Plugin>,
        config: Option<Map<String, Value>>,
    ) -> Result<()> {
        validate_plugin_shape(plugin.as_ref())?;
        let name = plugin.name().to_string();
        if self.index.contains_key(&name) {
            return Err(ChartguardError::DuplicatePlugin { name });
        }
        self.slots.push(Some(RegisteredPlugin {
            plugin,
            config: config.unwrap_or_default(),
        }));
        self.index.insert(name, self.slots.len() - 1);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisteredPlugin> {
        self.index
            .get(name)
            .and_then(|&slot| self.slots[slot].as_ref())
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    #[must_use]
    pub fn get_config(&self, name: &str) -> Option<&Map<String, Value>> {
        self.get(name).map(|entry| &entry.config)
    }

    /// All plugins in registration order.
    #[must_use]
    pub fn get_all(&self) -> Vec<RegisteredPlugin> {
        self.slots.iter().flatten().cloned().collect()
    }

    /// Plugin names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.slots
            .iter()
            .flatten()
            .map(|entry| entry.name().to_string())
            .collect()
    }

    /// Remove a plugin. Returns `true` if it was registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        let Some(slot) = self.index.remove(name) else {
            return false;
        };
        self.slots[slot] = None;
        if self.slots.len() > 2 * self.index.len() + 8 {
            self.compact();
        }
        true
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Drop tombstones and rebuild the index, preserving order.
    fn compact(&mut self) {
        self.slots.retain(Option::is_some);
        self.index = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|entry| (entry.name().to_string(), i)))
            .collect();
    }
}

/// Check the structural requirements every plugin must meet.
///
/// # Errors
///
/// Returns [`ChartguardError::Registration`] describing the first problem found.
pub fn validate_plugin_shape(plugin: &dyn Plugin) -> Result<()> {
    let name = plugin.name();
    let fail = |message: String| Err(ChartguardError::Registration { message });

    if name.trim().is_empty() {
        return fail("plugin name must not be empty".into());
    }
    if name.chars().any(char::is_whitespace) {
        return fail(format!("plugin name '{name}' must not contain whitespace"));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return fail(format!(
            "plugin name '{name}' exceeds {MAX_NAME_LENGTH} characters"
        ));
    }
    if plugin.version().trim().is_empty() {
        return fail(format!("plugin '{name}' must declare a non-empty version"));
    }
    if plugin.description().is_some_and(|d| d.trim().is_empty()) {
        return fail(format!("plugin '{name}' has an empty description"));
    }
    if let Some(schema) = plugin.config_schema() {
        if let Err(problem) = schema.check_well_formed() {
            return fail(format!("plugin '{name}' has a malformed config schema: {problem}"));
        }
    }
    Ok(())
}
