//! Widget middleware: request dispatch, resource injection and
//! multi-engine template rendering.

pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod resources;
pub mod templating;

pub use config::{Config, ConfigError, UnauthResponse};
pub use controller::Controller;
pub use error::{Error, Result};
pub use middleware::{
    current_middleware, make_middleware, register_resource, render, DispatchRoute, TwMiddleware,
};
pub use resources::{
    inject_link, injected_links, DefaultInjector, InjectedBody, ResourceInjector, ResourceLocator,
    ResourceServer, ResourcesApp,
};
pub use templating::{EngineManager, EngineRegistry, TemplateProbe, TemplateResolver};

pub use widgetry_common::{
    EngineError, InjectLocation, Markup, Rendered, RequestContext, ResourceLink, Vars,
};
