//! `jinja` engine backed by Tera.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tera::{Context, Tera};
use tracing::debug;
use widgetry_common::{
    EngineError, EngineOptions, EnginePlugin, ExtraVarsFactory, Rendered, Template,
    TemplateEngine, Vars,
};

use super::find_template;

/// Option holding the comma separated template roots.
pub const SEARCH_PATH_OPTION: &str = "jinja.search_path";

const EXTENSIONS: [&str; 2] = ["jinja", "html"];

inventory::submit! {
    EnginePlugin::new("jinja", jinja_factory)
}

/// Plugin factory for [`JinjaEngine`].
pub fn jinja_factory(
    extra_vars: Option<ExtraVarsFactory>,
    options: &EngineOptions,
) -> Result<Arc<dyn TemplateEngine>, EngineError> {
    let roots = options
        .get(SEARCH_PATH_OPTION)
        .map(|paths| {
            paths
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_else(|| vec![PathBuf::from(".")]);
    Ok(Arc::new(JinjaEngine::new(roots, extra_vars)))
}

#[derive(Default)]
struct Loaded {
    tera: Tera,
    names: HashSet<String>,
}

pub struct JinjaEngine {
    roots: Vec<PathBuf>,
    extra_vars: Option<ExtraVarsFactory>,
    state: Arc<RwLock<Loaded>>,
}

impl JinjaEngine {
    pub fn new(roots: Vec<PathBuf>, extra_vars: Option<ExtraVarsFactory>) -> Self {
        Self {
            roots,
            extra_vars,
            state: Arc::new(RwLock::new(Loaded::default())),
        }
    }

    fn ensure_loaded(&self, reference: &str) -> Result<(), EngineError> {
        if self.state.read().names.contains(reference) {
            return Ok(());
        }

        let path = find_template(&self.roots, reference, &EXTENSIONS).ok_or_else(|| {
            EngineError::Load {
                path: reference.to_string(),
                reason: format!("not found on search path {:?}", self.roots),
            }
        })?;
        let source = fs::read_to_string(&path).map_err(|err| EngineError::Load {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;

        let mut state = self.state.write();
        state
            .tera
            .add_raw_template(reference, &source)
            .map_err(|err| EngineError::Load {
                path: path.display().to_string(),
                reason: err.to_string(),
            })?;
        state.names.insert(reference.to_string());
        debug!(template = %reference, path = %path.display(), "Loaded jinja template");
        Ok(())
    }
}

impl TemplateEngine for JinjaEngine {
    fn name(&self) -> &str {
        "jinja"
    }

    fn load_template(&self, path: &str) -> Result<Arc<dyn Template>, EngineError> {
        self.ensure_loaded(path)?;
        Ok(Arc::new(JinjaTemplate {
            name: path.to_string(),
            extra_vars: self.extra_vars.clone(),
            state: self.state.clone(),
        }))
    }

    fn render(&self, template: &str, info: &Vars) -> Result<Rendered, EngineError> {
        self.load_template(template)?.render(info)
    }
}

struct JinjaTemplate {
    name: String,
    extra_vars: Option<ExtraVarsFactory>,
    state: Arc<RwLock<Loaded>>,
}

impl Template for JinjaTemplate {
    fn render(&self, vars: &Vars) -> Result<Rendered, EngineError> {
        let mut merged = self.extra_vars.as_ref().map(|f| f()).unwrap_or_default();
        merged.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));

        let context = Context::from_value(serde_json::Value::Object(merged))
            .map_err(|err| EngineError::Render(err.to_string()))?;
        let text = self
            .state
            .read()
            .tera
            .render(&self.name, &context)
            .map_err(|err| EngineError::Render(format!("{}: {:?}", self.name, err)))?;
        Ok(Rendered::Text(text))
    }
}
