//! Error types shared by engines and the request context.

/// Errors inside the templating layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(
        "Could not find template for: {0}. You may need to specify a template engine name \
         in the widget like mako:{0}, or change the middleware setup to include the \
         template's templating language in your preferred_rendering_engines configuration. \
         As a last resort, you may set strict_engine_selection to false which will grab \
         whatever template it finds if none of your preferred template engines is found."
    )]
    TemplateNotFound(String),

    #[error("Template engine '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("No template engine for '{0}'")]
    NoFactory(String),

    #[error("Failed to load template '{path}': {reason}")]
    Load { path: String, reason: String },

    #[error("Invalid placeholder in template at offset {0}")]
    InvalidPlaceholder(usize),

    #[error("Missing template variable: {0}")]
    MissingVariable(String),

    #[error("Template engine '{engine}' does not support {operation}")]
    Unsupported {
        engine: String,
        operation: &'static str,
    },

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Rendered output is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Errors raised by request-context access.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Request context has no key '{0}'")]
    NotFound(String),

    #[error("Request context key '{0}' holds a value of another type")]
    TypeMismatch(String),

    #[error("Pending resource queue is full ({0} registrations)")]
    QueueFull(usize),
}
