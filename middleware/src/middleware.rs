//! The dispatching middleware.
//!
//! Every request runs in a fresh [`RequestContext`] holding the middleware
//! itself. Requests under `res_prefix` go to the resource server untouched,
//! requests under `controller_prefix` to the root controller, everything else
//! to the wrapped application. HTML responses that are not streamed then get
//! the collected resource links injected.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, HttpBody};
use axum::extract::Request;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures_util::future::BoxFuture;
use tower::{Service, ServiceExt};
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{debug, warn};
use widgetry_common::{
    ContextError, Rendered, RequestContext, ResourceRegistration, Vars, MIDDLEWARE_KEY,
};

use crate::config::{Config, ConfigError};
use crate::controller::split_segments;
use crate::resources::{
    DefaultInjector, InjectedBody, ResourceInjector, ResourceServer, ResourcesApp,
};
use crate::templating::engines::dotted_template_lookup;
use crate::templating::EngineManager;

/// Which branch produced a response. Attached as a response extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchRoute {
    Resources,
    Controller,
    App,
    NotFound,
}

impl DispatchRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resources => "resources",
            Self::Controller => "controller",
            Self::App => "app",
            Self::NotFound => "not_found",
        }
    }
}

struct Shared {
    config: Arc<Config>,
    app: Option<Router>,
    resources: Arc<dyn ResourceServer>,
    injector: Arc<dyn ResourceInjector>,
    engines: EngineManager,
}

/// Widget middleware wrapping an optional application.
///
/// Cheap to clone; clones share configuration, resources and engines.
#[derive(Clone)]
pub struct TwMiddleware {
    inner: Arc<Shared>,
}

impl TwMiddleware {
    pub fn new(app: Option<Router>, config: Config) -> Self {
        let config = Arc::new(config);
        let resources = Arc::new(ResourcesApp::new(config.clone()));
        Self::build(app, config, resources)
    }

    /// Middleware serving resources through a custom resource server.
    pub fn with_resource_server(
        app: Option<Router>,
        config: Config,
        resources: Arc<dyn ResourceServer>,
    ) -> Self {
        Self::build(app, Arc::new(config), resources)
    }

    fn build(app: Option<Router>, config: Arc<Config>, resources: Arc<dyn ResourceServer>) -> Self {
        let lookup = dotted_template_lookup();
        lookup.extend_search_path(config.resource_paths.as_slice());
        lookup.set_filesystem_checks(config.auto_reload_templates);

        // Registrations made before any middleware existed
        let queued = RequestContext::current().drain_queued_resources();
        if !queued.is_empty() {
            debug!(count = queued.len(), "Registering queued resources");
        }
        for registration in queued {
            resources.register(&registration.module, &registration.filename, registration.whole_dir);
        }

        let injector: Arc<dyn ResourceInjector> = match &config.injector {
            Some(injector) => injector.clone(),
            None => Arc::new(DefaultInjector::new(&config)),
        };
        let engines = EngineManager::from_config(config.clone());

        Self {
            inner: Arc::new(Shared {
                app: app.map(|app| app.layer(CatchPanicLayer::new())),
                config,
                resources,
                injector,
                engines,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn engines(&self) -> &EngineManager {
        &self.inner.engines
    }

    pub fn resources(&self) -> &Arc<dyn ResourceServer> {
        &self.inner.resources
    }

    /// Handle one request in its own context scope.
    pub async fn handle(&self, request: Request) -> Response {
        let this = self.clone();
        RequestContext::default()
            .scope(async move {
                let ctx = RequestContext::current();
                ctx.clear();
                let _guard = ctx.clear_on_drop();
                ctx.insert(MIDDLEWARE_KEY, this.clone());
                this.dispatch(request).await
            })
            .await
    }

    async fn dispatch(&self, request: Request) -> Response {
        let config = &self.inner.config;
        let path = request.uri().path().to_string();
        // HEAD responses carry no body but keep the GET Content-Length
        let head = request.method() == Method::HEAD;

        if config.serve_resources && path.starts_with(config.res_prefix.as_str()) {
            let mut response = self.inner.resources.call(request).await;
            response.extensions_mut().insert(DispatchRoute::Resources);
            return response;
        }

        let controller = path
            .strip_prefix(config.controller_prefix.as_str())
            .zip(config.root_controller.as_ref());
        let (route, response) = if let Some((rest, controller)) = controller {
            let parts = split_segments(rest);
            (DispatchRoute::Controller, controller.proc_url(request, parts).await)
        } else if let Some(app) = &self.inner.app {
            let response = match app.clone().oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            if response.status() == StatusCode::INTERNAL_SERVER_ERROR {
                warn!(path = %path, "Wrapped application failed");
            }
            (DispatchRoute::App, response)
        } else {
            (
                DispatchRoute::NotFound,
                (StatusCode::NOT_FOUND, "404 Not Found").into_response(),
            )
        };

        let mut response = if !head && self.should_inject(&response) {
            self.inject(response).await
        } else {
            response
        };
        response.extensions_mut().insert(route);
        response
    }

    fn should_inject(&self, response: &Response) -> bool {
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/plain")
            .to_ascii_lowercase();
        // Bodies without an exact length are streamed and never buffered
        let streaming = response.body().size_hint().exact().is_none();

        self.inner.config.inject_resources && content_type.contains("html") && !streaming
    }

    async fn inject(&self, response: Response) -> Response {
        let (mut parts, body) = response.into_parts();
        let encoding =
            charset(&parts.headers).unwrap_or_else(|| self.inner.config.encoding.clone());

        let bytes = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "Failed to read response body for injection");
                return (StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error")
                    .into_response();
            }
        };

        let body = match self.inner.injector.inject(bytes.to_vec(), &encoding) {
            InjectedBody::Text(text) => Body::from(text),
            InjectedBody::Bytes(bytes) => Body::from(bytes),
        };
        parts.headers.remove(header::CONTENT_LENGTH);
        Response::from_parts(parts, body)
    }
}

impl Service<Request> for TwMiddleware {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(this.handle(request).await) })
    }
}

fn charset(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

/// The middleware handling the current request, if any.
pub fn current_middleware() -> Option<TwMiddleware> {
    RequestContext::current().get(MIDDLEWARE_KEY)
}

/// Declare a resource as servable.
///
/// With a middleware active the resource is registered right away; otherwise
/// the registration is queued and picked up by the next middleware built.
pub fn register_resource(module: &str, filename: &str, whole_dir: bool) -> Result<(), ContextError> {
    let ctx = RequestContext::current();
    match ctx.get::<TwMiddleware>(MIDDLEWARE_KEY) {
        Some(middleware) => {
            middleware.inner.resources.register(module, filename, whole_dir);
            Ok(())
        }
        None => {
            ctx.queue_resource(ResourceRegistration::new(module, filename, whole_dir))?;
            debug!(
                module = %module,
                filename = %filename,
                whole_dir,
                "No middleware in place, queued resource registration"
            );
            Ok(())
        }
    }
}

/// Build a middleware around `app` from flat settings.
pub fn make_middleware<I, K, V>(app: Option<Router>, settings: I) -> Result<TwMiddleware, ConfigError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    Ok(TwMiddleware::new(app, Config::from_settings(settings)?))
}

/// Render `template` for embedding in a template of engine `destination`,
/// using the active middleware's engines.
pub fn render(template: &str, destination: &str, vars: &Vars) -> Result<Rendered, crate::Error> {
    let middleware = current_middleware().ok_or(ContextError::NotFound(MIDDLEWARE_KEY.to_string()))?;
    Ok(middleware.engines().render(template, destination, vars)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charset() {
        let mut headers = HeaderMap::new();
        assert_eq!(charset(&headers), None);

        headers.insert(header::CONTENT_TYPE, "text/html".parse().unwrap());
        assert_eq!(charset(&headers), None);

        headers.insert(header::CONTENT_TYPE, "text/html; Charset=\"ISO-8859-1\"".parse().unwrap());
        assert_eq!(charset(&headers).as_deref(), Some("ISO-8859-1"));
    }

    #[test]
    fn test_route_names() {
        assert_eq!(DispatchRoute::Resources.as_str(), "resources");
        assert_eq!(DispatchRoute::NotFound.as_str(), "not_found");
    }

    #[tokio::test]
    async fn test_render_without_middleware_fails() {
        let err = RequestContext::default()
            .scope(async { render("string:x", "mako", &Vars::new()).unwrap_err() })
            .await;
        assert!(matches!(err, crate::Error::Context(ContextError::NotFound(_))));
    }
}
