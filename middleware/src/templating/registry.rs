//! Lazily populated engine registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use widgetry_common::{
    EngineError, EngineFactory, EngineOptions, EnginePlugin, ExtraVarsFactory, TemplateEngine,
};

use super::engines::dotted_template_lookup;
use crate::config::Config;

/// Option set on `genshi_abs` so templates resolve from the working directory.
pub const GENSHI_SEARCH_PATH_OPTION: &str = "genshi.search_path";

/// Engine instances by name.
///
/// Engines are created on first use. Factories are looked up in the
/// configuration's explicit table first, then among the registered
/// [`EnginePlugin`]s. `mako` always maps to the process-wide dotted lookup
/// and `genshi_abs` is `genshi` configured for path-style references.
pub struct EngineRegistry {
    config: Option<Arc<Config>>,
    engines: RwLock<HashMap<String, Arc<dyn TemplateEngine>>>,
}

impl EngineRegistry {
    pub fn new(config: Option<Arc<Config>>) -> Self {
        Self {
            config,
            engines: RwLock::new(HashMap::new()),
        }
    }

    /// Create and store the engine `name`.
    ///
    /// The factory runs while the registry's write lock is held; a factory
    /// must not reach back into this registry (for instance through
    /// `current_middleware().engines()`), or it deadlocks.
    ///
    /// Fails with [`EngineError::AlreadyLoaded`] when `name` is present and
    /// with [`EngineError::NoFactory`] when nothing can build it.
    pub fn load(
        &self,
        name: &str,
        options: EngineOptions,
        extra_vars: Option<ExtraVarsFactory>,
    ) -> Result<Arc<dyn TemplateEngine>, EngineError> {
        let mut engines = self.engines.write();
        self.load_into(&mut engines, name, options, extra_vars)
    }

    /// The engine `name`, loading it with default options on first access.
    ///
    /// A first access runs the factory under the write lock, with the same
    /// restriction as [`EngineRegistry::load`].
    pub fn get(&self, name: &str) -> Result<Arc<dyn TemplateEngine>, EngineError> {
        if let Some(engine) = self.engines.read().get(name) {
            return Ok(engine.clone());
        }

        // Re-check under the write lock: a concurrent first use may have won.
        let mut engines = self.engines.write();
        if let Some(engine) = engines.get(name) {
            return Ok(engine.clone());
        }
        self.load_into(&mut engines, name, EngineOptions::new(), None)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.engines.read().contains_key(name)
    }

    pub fn loaded_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.engines.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn load_into(
        &self,
        engines: &mut HashMap<String, Arc<dyn TemplateEngine>>,
        name: &str,
        mut options: EngineOptions,
        extra_vars: Option<ExtraVarsFactory>,
    ) -> Result<Arc<dyn TemplateEngine>, EngineError> {
        if engines.contains_key(name) {
            return Err(EngineError::AlreadyLoaded(name.to_string()));
        }

        let engine: Arc<dyn TemplateEngine> = if name == "mako" {
            dotted_template_lookup()
        } else {
            let factory_name = if name == "genshi_abs" {
                options.insert(GENSHI_SEARCH_PATH_OPTION.to_string(), ".".to_string());
                "genshi"
            } else {
                name
            };
            let factory = self.factory(factory_name)?;
            factory(extra_vars, &options)?
        };

        debug!(engine = %name, "Loaded template engine");
        engines.insert(name.to_string(), engine.clone());
        Ok(engine)
    }

    fn factory(&self, name: &str) -> Result<EngineFactory, EngineError> {
        if let Some(factory) = self
            .config
            .as_deref()
            .and_then(|config| config.available_rendering_engines.get(name))
        {
            return Ok(factory.clone());
        }
        EnginePlugin::find(name)
            .map(EnginePlugin::factory)
            .ok_or_else(|| EngineError::NoFactory(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, OnceLock, Weak};
    use widgetry_common::{Rendered, Template, Vars};

    /// Engine that records the options it was built with.
    struct OptionsEngine {
        options: EngineOptions,
    }

    impl TemplateEngine for OptionsEngine {
        fn name(&self) -> &str {
            "options"
        }

        fn load_template(&self, path: &str) -> Result<Arc<dyn Template>, EngineError> {
            Err(EngineError::Load {
                path: path.to_string(),
                reason: "no templates".to_string(),
            })
        }

        fn render(&self, _template: &str, _info: &Vars) -> Result<Rendered, EngineError> {
            Ok(Rendered::Text(format!("{:?}", self.options)))
        }
    }

    fn counting_factory(calls: Arc<AtomicUsize>) -> EngineFactory {
        Arc::new(
            move |_extra: Option<ExtraVarsFactory>,
                  options: &EngineOptions|
                  -> Result<Arc<dyn TemplateEngine>, EngineError> {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(OptionsEngine {
                    options: options.clone(),
                }))
            },
        )
    }

    fn registry_with(name: &str, factory: EngineFactory) -> EngineRegistry {
        let config = Config::default().with_engine_factory(name, factory);
        EngineRegistry::new(Some(Arc::new(config)))
    }

    #[test]
    fn test_duplicate_load_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with("genshi", counting_factory(calls.clone()));

        registry.load("genshi", EngineOptions::new(), None).unwrap();
        let err = registry
            .load("genshi", EngineOptions::new(), None)
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::AlreadyLoaded(ref name) if name == "genshi"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_get_loads_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with("genshi", counting_factory(calls.clone()));

        assert!(!registry.is_loaded("genshi"));
        let first = registry.get("genshi").unwrap();
        let second = registry.get("genshi").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_factory_runs_under_the_write_lock() {
        let registry_slot: Arc<OnceLock<Weak<EngineRegistry>>> = Arc::new(OnceLock::new());
        let lock_held = Arc::new(AtomicUsize::new(0));
        let factory: EngineFactory = {
            let registry_slot = registry_slot.clone();
            let lock_held = lock_held.clone();
            Arc::new(
                move |_extra: Option<ExtraVarsFactory>,
                      options: &EngineOptions|
                      -> Result<Arc<dyn TemplateEngine>, EngineError> {
                    let registry = registry_slot.get().and_then(Weak::upgrade).unwrap();
                    if registry.engines.try_read().is_none() {
                        lock_held.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(Arc::new(OptionsEngine {
                        options: options.clone(),
                    }))
                },
            )
        };
        let registry = Arc::new(registry_with("genshi", factory));
        registry_slot.set(Arc::downgrade(&registry)).unwrap();

        registry.get("genshi").unwrap();
        assert_eq!(lock_held.load(Ordering::SeqCst), 1);
        // Released once the factory returns
        assert!(registry.engines.try_read().is_some());
    }

    #[test]
    fn test_genshi_abs_uses_genshi_factory_with_search_path() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with("genshi", counting_factory(calls));

        let engine = registry.get("genshi_abs").unwrap();
        let out = engine.render("x", &Vars::new()).unwrap().into_text().unwrap();
        assert!(out.contains("genshi.search_path"));
        assert_eq!(registry.loaded_names(), vec!["genshi_abs"]);
    }

    #[test]
    fn test_mako_is_the_shared_lookup() {
        let registry = EngineRegistry::new(None);
        let engine = registry.get("mako").unwrap();
        assert_eq!(engine.name(), "mako");

        let other = EngineRegistry::new(None).get("mako").unwrap();
        assert!(Arc::ptr_eq(&engine, &other));
    }

    #[test]
    fn test_plugins_are_discovered() {
        let registry = EngineRegistry::new(None);
        assert_eq!(registry.get("jinja").unwrap().name(), "jinja");
    }

    #[test]
    fn test_missing_factory() {
        let registry = EngineRegistry::new(None);
        assert!(matches!(
            registry.get("velocity").err(),
            Some(EngineError::NoFactory(ref name)) if name == "velocity"
        ));
        assert!(!registry.is_loaded("velocity"));
    }

    #[test]
    fn test_concurrent_first_use_loads_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(registry_with("genshi", counting_factory(calls.clone())));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let errors = errors.clone();
                std::thread::spawn(move || {
                    if let Err(err) = registry.get("genshi") {
                        errors.lock().unwrap().push(err.to_string());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(errors.lock().unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
