//! Plugin interface and the name-keyed registry that stores plugins.

pub mod registry;
pub mod traits;

pub use registry::{PluginRegistry, RegisteredPlugin};
pub use traits::{Plugin, PluginMetadata};
