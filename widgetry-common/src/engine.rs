//! Template engine abstraction layer.
//!
//! This module defines the `TemplateEngine` trait that every pluggable
//! rendering engine implements, and the [`EnginePlugin`] record engines use to
//! make themselves discoverable by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::EngineError;
use crate::markup::Rendered;

/// Variables passed to a render call.
pub type Vars = serde_json::Map<String, serde_json::Value>;

/// Engine-specific options, e.g. `genshi.search_path`.
pub type EngineOptions = BTreeMap<String, String>;

/// Produces extra variables merged into every render of an engine.
pub type ExtraVarsFactory = Arc<dyn Fn() -> Vars + Send + Sync>;

/// Builds a live engine instance from extra-vars factory and options.
pub type EngineFactory = Arc<
    dyn Fn(Option<ExtraVarsFactory>, &EngineOptions) -> Result<Arc<dyn TemplateEngine>, EngineError>
        + Send
        + Sync,
>;

/// Plain-function form of [`EngineFactory`], usable in static plugin records.
pub type PluginFactory =
    fn(Option<ExtraVarsFactory>, &EngineOptions) -> Result<Arc<dyn TemplateEngine>, EngineError>;

/// A template loaded by an engine.
pub trait Template: Send + Sync {
    /// Render with the variables expanded as top-level names.
    fn render(&self, vars: &Vars) -> Result<Rendered, EngineError>;
}

/// Primary trait for template engines.
///
/// `transform` is optional: engines that can produce their own embeddable
/// representation in place override it together with `supports_transform`.
pub trait TemplateEngine: Send + Sync {
    /// Name the engine is registered under (e.g. "jinja").
    fn name(&self) -> &str;

    /// Load (and usually compile) the template at `path`.
    fn load_template(&self, path: &str) -> Result<Arc<dyn Template>, EngineError>;

    /// Render the template at `template` with `info` as its variables.
    fn render(&self, template: &str, info: &Vars) -> Result<Rendered, EngineError>;

    fn supports_transform(&self) -> bool {
        false
    }

    /// Render the template into the engine's native embeddable form.
    fn transform(&self, template: &str, info: &Vars) -> Result<Rendered, EngineError> {
        let _ = (template, info);
        Err(EngineError::Unsupported {
            engine: self.name().to_string(),
            operation: "transform",
        })
    }
}

/// Registration record for an engine discoverable by name.
///
/// Engines submit one with `inventory::submit!`:
///
/// ```ignore
/// inventory::submit! {
///     widgetry_common::EnginePlugin::new("jinja", jinja_factory)
/// }
/// ```
pub struct EnginePlugin {
    pub name: &'static str,
    pub factory: PluginFactory,
}

impl EnginePlugin {
    pub const fn new(name: &'static str, factory: PluginFactory) -> Self {
        Self { name, factory }
    }

    /// Find the plugin registered under `name`.
    pub fn find(name: &str) -> Option<&'static EnginePlugin> {
        inventory::iter::<EnginePlugin>
            .into_iter()
            .find(|plugin| plugin.name == name)
    }

    /// Names of every registered plugin.
    pub fn names() -> Vec<&'static str> {
        inventory::iter::<EnginePlugin>
            .into_iter()
            .map(|plugin| plugin.name)
            .collect()
    }

    pub fn factory(&self) -> EngineFactory {
        Arc::new(self.factory)
    }
}

inventory::collect!(EnginePlugin);
