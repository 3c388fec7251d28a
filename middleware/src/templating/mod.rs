//! Multi-engine template rendering.
//!
//! [`EngineManager`] ties the pieces together: the [`TemplateResolver`] picks
//! the engine owning a template, the [`EngineRegistry`] provides the engine,
//! and an [`Adaptor`] renders and coerces the output for the destination.

pub mod adapter;
pub mod engines;
pub mod placeholder;
pub mod registry;
pub mod resolver;

use std::sync::Arc;

use serde_json::Value;
use widgetry_common::{EngineError, Rendered, Template, TemplateEngine, Vars};

pub use adapter::{Adaptor, Embedding, SourceKind};
pub use registry::EngineRegistry;
pub use resolver::{FsProbe, TemplateProbe, TemplateResolver, DEFAULT_ENGINES};

use crate::config::Config;
use crate::resources::ResourceLocator;

type Loaded = (Arc<dyn TemplateEngine>, Arc<dyn Template>);

pub struct EngineManager {
    registry: EngineRegistry,
    resolver: TemplateResolver,
}

impl EngineManager {
    pub fn new(config: Option<Arc<Config>>, probe: Arc<dyn TemplateProbe>) -> Self {
        Self {
            registry: EngineRegistry::new(config.clone()),
            resolver: TemplateResolver::new(config, probe),
        }
    }

    /// Manager probing the filesystem below the configured resource paths.
    pub fn from_config(config: Arc<Config>) -> Self {
        let locator = ResourceLocator::new(config.resource_paths.clone());
        Self::new(Some(config), Arc::new(FsProbe::new(locator)))
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &TemplateResolver {
        &self.resolver
    }

    /// Render `template` for embedding in a template of engine `destination`.
    ///
    /// `template` is an engine-tagged (`"mako:demo.templates.page"`) or bare
    /// reference; for the `string` engine the part after the tag is the
    /// template text. Byte output is decoded as UTF-8.
    pub fn render(
        &self,
        template: &str,
        destination: &str,
        vars: &Vars,
    ) -> Result<Rendered, EngineError> {
        let (mut source, path) = self.resolver.split_engine_and_template(template)?;
        if source == "genshi" && path.contains('/') {
            source = "genshi_abs".to_string();
        }

        let loaded = if SourceKind::loads_templates(&source) {
            let engine = self.registry.get(&source)?;
            let loaded = engine.load_template(&path)?;
            Some((engine, loaded))
        } else {
            None
        };

        let output = match Adaptor::select(&source, destination) {
            Adaptor::Substitute => Rendered::Text(placeholder::substitute(&path, &widget_vars(vars))?),
            Adaptor::Template(embedding) => {
                let rendered = match &loaded {
                    Some((_, template)) => template.render(vars)?,
                    None => self.registry.get(&source)?.load_template(&path)?.render(vars)?,
                };
                embedding.wrap(rendered)?
            }
            Adaptor::Transform => self.engine(&source, &loaded)?.transform(&path, vars)?,
            Adaptor::Retree => {
                let transformed = self.engine(&source, &loaded)?.transform(&path, vars)?;
                Embedding::Tree.wrap(transformed)?
            }
            Adaptor::Render(embedding) => {
                let rendered = self.engine(&source, &loaded)?.render(&path, vars)?;
                embedding.wrap(rendered)?
            }
        };

        output.decode()
    }

    /// Forget which engine every bare template reference resolved to.
    pub fn reset_resolution_cache(&self) {
        self.resolver.reset_cache();
        engines::dotted_template_lookup().clear_cache();
    }

    fn engine(
        &self,
        name: &str,
        loaded: &Option<Loaded>,
    ) -> Result<Arc<dyn TemplateEngine>, EngineError> {
        match loaded {
            Some((engine, _)) => Ok(engine.clone()),
            None => self.registry.get(name),
        }
    }
}

/// The `w` sub-mapping literal templates substitute from.
fn widget_vars(vars: &Vars) -> Vars {
    match vars.get("w") {
        Some(Value::Object(widget)) => widget.clone(),
        _ => Vars::new(),
    }
}
