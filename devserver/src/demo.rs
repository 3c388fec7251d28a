//! Demo application served behind the widget middleware.
//!
//! Page handlers declare the stylesheet and script they need and render
//! through all three bundled engines; the middleware injects the links.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path as UrlPath, Request};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use widgetry_common::{EngineError, EngineOptions, ExtraVarsFactory, TemplateEngine};
use widgetry_middleware::templating::engines::jinja::{jinja_factory, SEARCH_PATH_OPTION};
use widgetry_middleware::{
    inject_link, register_resource, render, Config, Controller, InjectLocation, ResourceLink,
    Vars,
};

/// Module name under the asset root.
pub const MODULE: &str = "demo";

const WIDGETS: [&str; 3] = ["calendar", "grid", "slider"];

/// Directory holding the demo module.
pub fn asset_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("assets")
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/hello/:name", get(hello))
}

/// Middleware configuration for the demo: the asset root as resource path,
/// jinja templates looked up below it, and [`WidgetController`] as root
/// controller.
pub fn configure(config: Config) -> Config {
    let root = config
        .resource_paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(",");
    let jinja = Arc::new(
        move |extra: Option<ExtraVarsFactory>,
              options: &EngineOptions|
              -> Result<Arc<dyn TemplateEngine>, EngineError> {
            let mut options = options.clone();
            options.insert(SEARCH_PATH_OPTION.to_string(), root.clone());
            jinja_factory(extra, &options)
        },
    );
    config
        .with_engine_factory("jinja", jinja)
        .with_root_controller(WidgetController)
}

/// Queue the static directory for serving. Called before the middleware is
/// built, so the registration waits in the detached context.
pub fn register_static() -> widgetry_middleware::Result<()> {
    register_resource(MODULE, "static", true)?;
    Ok(())
}

fn widget(value: serde_json::Value) -> Vars {
    let mut vars = Vars::new();
    vars.insert("w".to_string(), value);
    vars
}

async fn index() -> widgetry_middleware::Result<Html<String>> {
    inject_link(ResourceLink::css(MODULE, "static/site.css"))?;
    inject_link(ResourceLink::js(MODULE, "static/app.js").at(InjectLocation::BodyBottom))?;

    let mut items = String::new();
    for name in WIDGETS {
        let item = render("jinja:demo.templates.item", "mako", &widget(json!({"name": name})))?;
        items.push_str(&item.into_text()?);
    }
    let greeting = render(
        "string:<p>Hello, $name!</p>",
        "mako",
        &widget(json!({"name": "visitor"})),
    )?;

    let mut vars = Vars::new();
    vars.insert("title".to_string(), json!("Widgetry demo"));
    vars.insert("greeting".to_string(), json!(greeting.into_text()?));
    vars.insert("widgets".to_string(), json!(items));
    let page = render("mako:demo.templates.page", "string", &vars)?;
    Ok(Html(page.into_text()?))
}

async fn hello(UrlPath(name): UrlPath<String>) -> widgetry_middleware::Result<Html<String>> {
    inject_link(ResourceLink::css(MODULE, "static/site.css"))?;
    let name = html_escape::encode_text(&name).to_string();
    let body = render(
        "string:<html><head><title>Hello</title></head><body><p>Hello, $name!</p></body></html>",
        "string",
        &widget(json!({"name": name})),
    )?;
    Ok(Html(body.into_text()?))
}

/// Answers `/controllers/...` with the requested widget path.
pub struct WidgetController;

#[async_trait]
impl Controller for WidgetController {
    async fn proc_url(&self, _request: Request, parts: Vec<String>) -> Response {
        let known = parts.first().is_some_and(|w| WIDGETS.contains(&w.as_str()));
        Json(json!({ "widget": parts.first(), "known": known, "parts": parts })).into_response()
    }
}
