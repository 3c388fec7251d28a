//! Template-to-engine resolution.
//!
//! A reference is either tagged (`"mako:demo.templates.page"`) or bare
//! (`"demo.templates.page"`). Bare references are resolved by probing the
//! resource search path for a template file with one of each preferred
//! engine's extensions; the outcome is cached per reference.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use widgetry_common::EngineError;

use crate::config::Config;
use crate::resources::ResourceLocator;

/// Engines probed when no configuration is reachable, and by the lenient
/// fallback pass.
pub const DEFAULT_ENGINES: [&str; 4] = ["mako", "genshi", "cheetah", "kid"];

/// Extensions used for [`DEFAULT_ENGINES`] when no configuration is reachable.
const FALLBACK_EXTENSIONS: [(&str, &str); 4] = [
    ("mako", "mak"),
    ("genshi", "html"),
    ("cheetah", "tmpl"),
    ("kid", "kid"),
];

/// Checks whether a template file exists.
pub trait TemplateProbe: Send + Sync {
    /// `module` is the dotted module part of the reference (possibly empty),
    /// `filename` the template name with a candidate extension.
    fn exists(&self, module: &str, filename: &str) -> bool;
}

/// Probes the filesystem below the configured resource paths.
#[derive(Debug, Clone)]
pub struct FsProbe {
    locator: ResourceLocator,
}

impl FsProbe {
    pub fn new(locator: ResourceLocator) -> Self {
        Self { locator }
    }
}

impl TemplateProbe for FsProbe {
    fn exists(&self, module: &str, filename: &str) -> bool {
        self.locator.resource_filename(module, filename).is_file()
    }
}

pub struct TemplateResolver {
    config: Option<Arc<Config>>,
    probe: Arc<dyn TemplateProbe>,
    cache: RwLock<HashMap<String, String>>,
}

impl TemplateResolver {
    pub fn new(config: Option<Arc<Config>>, probe: Arc<dyn TemplateProbe>) -> Self {
        Self {
            config,
            probe,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Split a reference into `(engine_name, template_path)`.
    ///
    /// Tagged references are split without probing. Bare references are
    /// looked up in the cache, then probed against the preferred engines and,
    /// when strict selection is off, against [`DEFAULT_ENGINES`].
    pub fn split_engine_and_template(
        &self,
        reference: &str,
    ) -> Result<(String, String), EngineError> {
        if let Some((engine, path)) = reference.split_once(':') {
            return Ok((engine.to_string(), path.to_string()));
        }

        if let Some(engine) = self.cache.read().get(reference) {
            debug!(template = %reference, engine = %engine, "Template engine cache hit");
            return Ok((engine.clone(), reference.to_string()));
        }

        let preferred: Vec<&str> = match &self.config {
            Some(config) => config
                .preferred_rendering_engines
                .iter()
                .map(String::as_str)
                .collect(),
            None => DEFAULT_ENGINES.to_vec(),
        };
        let configured = self.config.as_deref().map(|c| &c.rendering_extension_lookup);

        for engine in preferred {
            let found = match configured {
                Some(lookup) => self.template_available(reference, lookup.get(engine)),
                None => self.template_available_default(reference, engine),
            };
            if found {
                return Ok(self.remember(reference, engine));
            }
        }

        let strict = self
            .config
            .as_deref()
            .map_or(true, |c| c.strict_engine_selection);
        if !strict {
            for engine in DEFAULT_ENGINES {
                if self.template_available_default(reference, engine) {
                    return Ok(self.remember(reference, engine));
                }
            }
        }

        Err(EngineError::TemplateNotFound(reference.to_string()))
    }

    /// Forget every cached resolution.
    pub fn reset_cache(&self) {
        self.cache.write().clear();
    }

    pub fn cached(&self, reference: &str) -> Option<String> {
        self.cache.read().get(reference).cloned()
    }

    fn remember(&self, reference: &str, engine: &str) -> (String, String) {
        debug!(template = %reference, engine = %engine, "Resolved template engine");
        self.cache
            .write()
            .insert(reference.to_string(), engine.to_string());
        (engine.to_string(), reference.to_string())
    }

    fn template_available_default(&self, reference: &str, engine: &str) -> bool {
        let ext = FALLBACK_EXTENSIONS
            .iter()
            .find(|(name, _)| *name == engine)
            .map(|(_, ext)| ext.to_string());
        self.template_available(reference, ext.map(|e| vec![e]).as_ref())
    }

    /// An engine without an extension entry never matches.
    fn template_available(&self, reference: &str, extensions: Option<&Vec<String>>) -> bool {
        let Some(extensions) = extensions else {
            return false;
        };
        let (module, name) = reference.rsplit_once('.').unwrap_or(("", reference));
        extensions
            .iter()
            .any(|ext| self.probe.exists(module, &format!("{}.{}", name, ext)))
    }
}
