//! Widgetry Common Types
//!
//! Contract types shared by the dispatch middleware and by template engine
//! plugins: the request-scoped context, the engine capability traits and the
//! rendered-output representations engines exchange.

pub mod context;
pub mod engine;
pub mod error;
pub mod markup;
pub mod resource;

pub use context::{ClearGuard, RequestContext, MIDDLEWARE_KEY, PENDING_LIMIT, QUEUED_RESOURCES_KEY};
pub use engine::{
    EngineFactory, EngineOptions, EnginePlugin, ExtraVarsFactory, PluginFactory, Template,
    TemplateEngine, Vars,
};
pub use error::{ContextError, EngineError};
pub use markup::{Fragment, Markup, Rendered};
pub use resource::{InjectLocation, LinkKind, ResourceLink, ResourceRegistration};
