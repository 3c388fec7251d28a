//! Dotted template lookup for the `mako` engine.
//!
//! Templates are referenced by dotted module path (`demo.templates.page`
//! finds `demo/templates/page.mak` or `.mako` under a search root) and use
//! `${dotted.path}` expressions. Sources are read as UTF-8 and rendered to
//! UTF-8 bytes; no default filters are applied to expression output.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::debug;
use widgetry_common::{EngineError, Rendered, Template, TemplateEngine, Vars};

use super::find_template;
use crate::templating::placeholder::interpolate;

const EXTENSIONS: [&str; 2] = ["mak", "mako"];

static LOOKUP: LazyLock<Arc<DottedTemplateLookup>> =
    LazyLock::new(|| Arc::new(DottedTemplateLookup::new()));

/// The process-wide lookup every middleware shares for `mako`.
pub fn dotted_template_lookup() -> Arc<DottedTemplateLookup> {
    LOOKUP.clone()
}

pub struct DottedTemplateLookup {
    search_path: RwLock<Vec<PathBuf>>,
    filesystem_checks: AtomicBool,
    cache: RwLock<HashMap<String, Arc<MakoTemplate>>>,
}

impl DottedTemplateLookup {
    pub fn new() -> Self {
        Self {
            search_path: RwLock::new(Vec::new()),
            filesystem_checks: AtomicBool::new(true),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Add roots to the search path, skipping ones already present.
    pub fn extend_search_path<P: AsRef<Path>>(&self, roots: &[P]) {
        let mut search_path = self.search_path.write();
        for root in roots {
            let root = root.as_ref();
            if !search_path.iter().any(|known| known == root) {
                search_path.push(root.to_path_buf());
            }
        }
    }

    pub fn search_path(&self) -> Vec<PathBuf> {
        self.search_path.read().clone()
    }

    /// Re-read templates whose file changed since they were cached.
    pub fn set_filesystem_checks(&self, enabled: bool) {
        self.filesystem_checks.store(enabled, Ordering::Relaxed);
    }

    /// Drop every cached template.
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    fn get_template(&self, reference: &str) -> Result<Arc<MakoTemplate>, EngineError> {
        let checks = self.filesystem_checks.load(Ordering::Relaxed);
        if let Some(cached) = self.cache.read().get(reference) {
            if !checks || !cached.is_stale() {
                return Ok(cached.clone());
            }
            debug!(template = %reference, "Template changed on disk, reloading");
        }

        let roots = self.search_path();
        let path = find_template(&roots, reference, &EXTENSIONS).ok_or_else(|| {
            EngineError::Load {
                path: reference.to_string(),
                reason: format!("not found on search path {:?}", roots),
            }
        })?;
        let template = Arc::new(MakoTemplate::read(path)?);
        self.cache
            .write()
            .insert(reference.to_string(), template.clone());
        Ok(template)
    }
}

impl Default for DottedTemplateLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine for DottedTemplateLookup {
    fn name(&self) -> &str {
        "mako"
    }

    fn load_template(&self, path: &str) -> Result<Arc<dyn Template>, EngineError> {
        let template: Arc<dyn Template> = self.get_template(path)?;
        Ok(template)
    }

    fn render(&self, template: &str, info: &Vars) -> Result<Rendered, EngineError> {
        self.get_template(template)?.render(info)
    }
}

pub struct MakoTemplate {
    path: PathBuf,
    source: String,
    modified: Option<SystemTime>,
}

impl MakoTemplate {
    fn read(path: PathBuf) -> Result<Self, EngineError> {
        let load_error = |err: std::io::Error| EngineError::Load {
            path: path.display().to_string(),
            reason: err.to_string(),
        };
        let bytes = fs::read(&path).map_err(load_error)?;
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok();
        let source = String::from_utf8(bytes).map_err(|err| EngineError::Load {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self {
            path,
            source,
            modified,
        })
    }

    fn is_stale(&self) -> bool {
        let current = fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        current != self.modified
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Template for MakoTemplate {
    fn render(&self, vars: &Vars) -> Result<Rendered, EngineError> {
        let text = interpolate(&self.source, vars)?;
        Ok(Rendered::Bytes(text.into_bytes()))
    }
}
