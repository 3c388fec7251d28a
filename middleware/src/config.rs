//! Middleware configuration.
//!
//! A flat set of named options. Values arrive as strings (a deployment's
//! key/value settings, a config file or the environment) and are coerced to
//! their types when the [`Config`] is built; after that the Config is frozen
//! behind an `Arc` and shared read-only by every request.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use config::{Config as ConfigLoader, ConfigBuilder, Environment, File};
use config::builder::DefaultState;
use serde::{Deserialize, Deserializer, Serialize};
use widgetry_common::{EngineFactory, InjectLocation};

use crate::controller::Controller;
use crate::resources::{resource_path, ResourceInjector};

/// Environment variable prefix (`WIDGETRY__RES_PREFIX=/static/`).
pub const ENV_PREFIX: &str = "WIDGETRY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] config::ConfigError),

    #[error("Invalid {option} '{value}': must start and end with '/'")]
    InvalidPrefix { option: &'static str, value: String },
}

/// Raw option set as it is read from the configuration sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Settings {
    default_engine: String,
    inject_resources: bool,
    inject_resources_location: InjectLocation,
    serve_resources: bool,
    res_prefix: String,
    res_max_age: u64,
    controller_prefix: String,
    bufsize: usize,
    params_as_vars: bool,
    debug: bool,
    encoding: String,
    #[serde(default)]
    auto_reload_templates: Option<bool>,
    #[serde(deserialize_with = "list_setting")]
    preferred_rendering_engines: Vec<String>,
    strict_engine_selection: bool,
    #[serde(deserialize_with = "lookup_setting")]
    rendering_extension_lookup: HashMap<String, Vec<String>>,
    script_name: String,
    #[serde(deserialize_with = "list_setting")]
    resource_paths: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let lookup = [
            ("mako", &["mak", "mako"][..]),
            ("genshi", &["genshi", "html"][..]),
            ("genshi_abs", &["genshi", "html"][..]),
            ("jinja", &["jinja", "html"][..]),
            ("kajiki", &["kajiki", "html"][..]),
            ("chameleon", &["pt"][..]),
        ];
        Self {
            default_engine: "string".to_string(),
            inject_resources: true,
            inject_resources_location: InjectLocation::Head,
            serve_resources: true,
            res_prefix: "/resources/".to_string(),
            res_max_age: 3600,
            controller_prefix: "/controllers/".to_string(),
            bufsize: 4 * 1024,
            params_as_vars: false,
            debug: true,
            encoding: "utf-8".to_string(),
            auto_reload_templates: None,
            preferred_rendering_engines: ["mako", "genshi", "jinja", "kajiki"]
                .map(String::from)
                .to_vec(),
            strict_engine_selection: true,
            rendering_extension_lookup: lookup
                .iter()
                .map(|(engine, exts)| {
                    (engine.to_string(), exts.iter().map(|e| e.to_string()).collect())
                })
                .collect(),
            script_name: String::new(),
            resource_paths: vec![".".to_string()],
        }
    }
}

/// A list given either as a sequence or as a comma/whitespace separated string.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListSetting {
    List(Vec<String>),
    Text(String),
}

impl ListSetting {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::List(items) => items,
            Self::Text(text) => text
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|item| !item.is_empty())
                .map(String::from)
                .collect(),
        }
    }
}

fn list_setting<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    ListSetting::deserialize(deserializer).map(ListSetting::into_vec)
}

fn lookup_setting<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<HashMap<String, Vec<String>>, D::Error> {
    let raw = HashMap::<String, ListSetting>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.into_vec())).collect())
}

/// Response returned when a controller denies access.
#[derive(Debug, Clone)]
pub struct UnauthResponse {
    pub status: StatusCode,
    pub body: String,
}

impl UnauthResponse {
    pub fn to_response(&self) -> Response {
        (self.status, self.body.clone()).into_response()
    }
}

impl Default for UnauthResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: "401 Unauthorized".to_string(),
        }
    }
}

/// Widgetry configuration set.
///
/// See `Settings::default` for the default of each option. Options that are
/// not plain values (root controller, engine factories, injector,
/// unauthorized response) are attached with the `with_*` builder methods.
#[derive(Clone)]
pub struct Config {
    /// Engine whose templates parentless widgets render into.
    pub default_engine: String,
    /// Inject resource links into HTML responses.
    pub inject_resources: bool,
    pub inject_resources_location: InjectLocation,
    /// Serve registered static resources under `res_prefix`.
    pub serve_resources: bool,
    pub res_prefix: String,
    /// Seconds a cache may hold a served resource (Cache-Control max-age).
    pub res_max_age: u64,
    pub controller_prefix: String,
    /// Read chunk size of the static resource server.
    pub bufsize: usize,
    pub params_as_vars: bool,
    pub debug: bool,
    /// Charset assumed for bodies that do not declare one.
    pub encoding: String,
    /// Re-read changed template files. Follows `debug` unless set.
    pub auto_reload_templates: bool,
    pub preferred_rendering_engines: Vec<String>,
    /// Only consider `preferred_rendering_engines` when probing templates.
    pub strict_engine_selection: bool,
    /// Template file extensions per engine, in probing order.
    pub rendering_extension_lookup: HashMap<String, Vec<String>>,
    /// Prepended to every resource link.
    pub script_name: String,
    /// Roots searched for dotted module directories.
    pub resource_paths: Vec<PathBuf>,
    pub unauth_response: UnauthResponse,
    pub root_controller: Option<Arc<dyn Controller>>,
    /// Explicit engine factories, consulted before plugin discovery.
    pub available_rendering_engines: HashMap<String, EngineFactory>,
    /// Custom resource injector; the built-in one is used when unset.
    pub injector: Option<Arc<dyn ResourceInjector>>,
}

impl Config {
    /// Build a Config from a flat key/value mapping.
    ///
    /// Keys may be dotted to address nested options
    /// (`rendering_extension_lookup.mako`). Booleans accept
    /// true/false/yes/no/on/off/1/0, integers are parsed, lists are comma or
    /// whitespace separated.
    pub fn from_settings<I, K, V>(settings: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let builder = with_overrides(defaults_builder()?, settings)?;
        Self::from_loader(builder.build()?)
    }

    /// Load configuration from defaults, a config file and the environment.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (`WIDGETRY__KEY` format)
    /// 2. `<name>.toml` (or any format the `config` crate detects), if present
    /// 3. `defaults`
    /// 4. Built-in defaults
    ///
    /// Unlike [`Config::from_settings`], the pairs given here are defaults:
    /// the file and the environment override them.
    pub fn load<I, K, V>(name: &str, defaults: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let caller_defaults = with_overrides(ConfigLoader::builder(), defaults)?.build()?;
        let builder = defaults_builder()?
            .add_source(caller_defaults)
            .add_source(File::with_name(name).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));
        Self::from_loader(builder.build()?)
    }

    fn from_loader(loader: ConfigLoader) -> Result<Self, ConfigError> {
        let settings: Settings = loader.try_deserialize()?;
        validate_prefix("res_prefix", &settings.res_prefix)?;
        validate_prefix("controller_prefix", &settings.controller_prefix)?;
        Ok(settings.into())
    }

    pub fn with_root_controller(mut self, controller: impl Controller + 'static) -> Self {
        self.root_controller = Some(Arc::new(controller));
        self
    }

    pub fn with_engine_factory(mut self, name: impl Into<String>, factory: EngineFactory) -> Self {
        self.available_rendering_engines.insert(name.into(), factory);
        self
    }

    pub fn with_injector(mut self, injector: impl ResourceInjector + 'static) -> Self {
        self.injector = Some(Arc::new(injector));
        self
    }

    pub fn with_unauth_response(mut self, response: UnauthResponse) -> Self {
        self.unauth_response = response;
        self
    }

    /// URL of a registered resource as seen by the browser. Path segments
    /// are percent-encoded.
    pub fn resource_url(&self, module: &str, filename: &str) -> String {
        format!(
            "{}{}{}",
            self.script_name,
            self.res_prefix,
            resource_path(module, filename)
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Settings::default().into()
    }
}

impl From<Settings> for Config {
    fn from(settings: Settings) -> Self {
        Self {
            auto_reload_templates: settings.auto_reload_templates.unwrap_or(settings.debug),
            default_engine: settings.default_engine,
            inject_resources: settings.inject_resources,
            inject_resources_location: settings.inject_resources_location,
            serve_resources: settings.serve_resources,
            res_prefix: settings.res_prefix,
            res_max_age: settings.res_max_age,
            controller_prefix: settings.controller_prefix,
            bufsize: settings.bufsize,
            params_as_vars: settings.params_as_vars,
            debug: settings.debug,
            encoding: settings.encoding,
            preferred_rendering_engines: settings.preferred_rendering_engines,
            strict_engine_selection: settings.strict_engine_selection,
            rendering_extension_lookup: settings.rendering_extension_lookup,
            script_name: settings.script_name,
            resource_paths: settings.resource_paths.into_iter().map(PathBuf::from).collect(),
            unauth_response: UnauthResponse::default(),
            root_controller: None,
            available_rendering_engines: HashMap::new(),
            injector: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut engines: Vec<_> = self.available_rendering_engines.keys().collect();
        engines.sort();
        f.debug_struct("Config")
            .field("default_engine", &self.default_engine)
            .field("inject_resources", &self.inject_resources)
            .field("inject_resources_location", &self.inject_resources_location)
            .field("serve_resources", &self.serve_resources)
            .field("res_prefix", &self.res_prefix)
            .field("res_max_age", &self.res_max_age)
            .field("controller_prefix", &self.controller_prefix)
            .field("bufsize", &self.bufsize)
            .field("debug", &self.debug)
            .field("auto_reload_templates", &self.auto_reload_templates)
            .field("preferred_rendering_engines", &self.preferred_rendering_engines)
            .field("strict_engine_selection", &self.strict_engine_selection)
            .field("script_name", &self.script_name)
            .field("resource_paths", &self.resource_paths)
            .field("root_controller", &self.root_controller.is_some())
            .field("available_rendering_engines", &engines)
            .finish_non_exhaustive()
    }
}

fn defaults_builder() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(ConfigLoader::builder().add_source(ConfigLoader::try_from(&Settings::default())?))
}

fn with_overrides<I, K, V>(
    mut builder: ConfigBuilder<DefaultState>,
    settings: I,
) -> Result<ConfigBuilder<DefaultState>, ConfigError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    for (key, value) in settings {
        builder = builder.set_override(key.as_ref(), value.into())?;
    }
    Ok(builder)
}

fn validate_prefix(option: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with('/') && value.ends_with('/') {
        Ok(())
    } else {
        Err(ConfigError::InvalidPrefix {
            option,
            value: value.to_string(),
        })
    }
}
