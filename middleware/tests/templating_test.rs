use std::fs;
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tower::ServiceExt;
use widgetry_common::{EngineOptions, ExtraVarsFactory, TemplateEngine};
use widgetry_middleware::templating::engines::jinja::{jinja_factory, SEARCH_PATH_OPTION};
use widgetry_middleware::{
    render, Config, EngineError, EngineManager, Rendered, TwMiddleware, Vars,
};

fn template_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("shop/templates")).unwrap();
    fs::write(
        dir.path().join("shop/templates/price.genshi"),
        "<span py:content=\"w.price\"/>",
    )
    .unwrap();
    fs::write(
        dir.path().join("shop/templates/badge.mak"),
        "<b class=\"badge\">${w.label}</b>",
    )
    .unwrap();
    fs::write(
        dir.path().join("shop/templates/card.jinja"),
        "<div>{{ w.title }}</div>",
    )
    .unwrap();
    dir
}

fn config_for(root: &Path, extra: &[(&str, &str)]) -> Config {
    let mut settings = vec![("resource_paths".to_string(), root.display().to_string())];
    settings.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    Config::from_settings(settings).unwrap()
}

fn vars(value: serde_json::Value) -> Vars {
    value.as_object().cloned().unwrap_or_default()
}

#[test]
fn test_tagged_reference_is_split_verbatim() {
    let dir = template_tree();
    let manager = EngineManager::from_config(Arc::new(config_for(dir.path(), &[])));

    let split = manager
        .resolver()
        .split_engine_and_template("mako:foo/bar")
        .unwrap();
    assert_eq!(split, ("mako".to_string(), "foo/bar".to_string()));
}

#[test]
fn test_filesystem_probe_finds_genshi_template() {
    let dir = template_tree();
    let config = config_for(dir.path(), &[("preferred_rendering_engines", "mako genshi")]);
    let manager = EngineManager::from_config(Arc::new(config));

    let (engine, path) = manager
        .resolver()
        .split_engine_and_template("shop.templates.price")
        .unwrap();
    assert_eq!((engine.as_str(), path.as_str()), ("genshi", "shop.templates.price"));
    assert_eq!(
        manager.resolver().cached("shop.templates.price").as_deref(),
        Some("genshi")
    );

    // Removing the file does not change a cached resolution
    fs::remove_file(dir.path().join("shop/templates/price.genshi")).unwrap();
    let (engine, _) = manager
        .resolver()
        .split_engine_and_template("shop.templates.price")
        .unwrap();
    assert_eq!(engine, "genshi");

    manager.reset_resolution_cache();
    assert!(manager
        .resolver()
        .split_engine_and_template("shop.templates.price")
        .is_err());
}

#[test]
fn test_unresolvable_template_error_names_it() {
    let dir = template_tree();
    let manager = EngineManager::from_config(Arc::new(config_for(dir.path(), &[])));

    let err = manager
        .render("shop.templates.receipt", "mako", &Vars::new())
        .unwrap_err();
    assert!(matches!(err, EngineError::TemplateNotFound(_)));
    assert!(err.to_string().contains("shop.templates.receipt"));
}

#[test]
fn test_string_engine_renders_widget_vars() {
    let manager = EngineManager::from_config(Arc::new(Config::default()));
    let out = manager
        .render(
            "string:Hello $name",
            "string",
            &vars(json!({"w": {"name": "World"}})),
        )
        .unwrap();
    assert_eq!(out.into_text().unwrap(), "Hello World");
}

#[test]
fn test_bare_mako_reference_renders_as_text() {
    let dir = template_tree();
    let manager = EngineManager::from_config(Arc::new(config_for(dir.path(), &[])));
    widgetry_middleware::templating::engines::dotted_template_lookup()
        .extend_search_path(&[dir.path()]);

    let out = manager
        .render("shop.templates.badge", "jinja", &vars(json!({"w": {"label": "new"}})))
        .unwrap();
    assert!(matches!(out, Rendered::Text(ref t) if t == "<b class=\"badge\">new</b>"));
}

#[test]
fn test_jinja_through_explicit_factory() {
    let dir = template_tree();
    let root = dir.path().display().to_string();
    let factory = Arc::new(
        move |extra: Option<ExtraVarsFactory>,
              options: &EngineOptions|
              -> Result<Arc<dyn TemplateEngine>, EngineError> {
            let mut options = options.clone();
            options.insert(SEARCH_PATH_OPTION.to_string(), root.clone());
            jinja_factory(extra, &options)
        },
    );
    let config = config_for(dir.path(), &[("preferred_rendering_engines", "jinja")])
        .with_engine_factory("jinja", factory);
    let manager = EngineManager::from_config(Arc::new(config));

    let out = manager
        .render("shop.templates.card", "genshi", &vars(json!({"w": {"title": "Lamp"}})))
        .unwrap();
    assert!(out.is_markup());
    assert_eq!(out.into_text().unwrap(), "<div>Lamp</div>");
}

#[test]
fn test_duplicate_engine_load_is_rejected() {
    let manager = EngineManager::from_config(Arc::new(Config::default()));
    manager
        .registry()
        .load("jinja", EngineOptions::new(), None)
        .unwrap();
    let second = manager.registry().load("jinja", EngineOptions::new(), None);
    assert!(matches!(second.err(), Some(EngineError::AlreadyLoaded(_))));
}

#[tokio::test]
async fn test_render_inside_request_uses_active_middleware() {
    let app = Router::new().route(
        "/greet",
        get(|| async {
            let vars = vars(json!({"w": {"who": "there"}}));
            let out = render("string:<p>Hi $who</p>", "string", &vars)
                .and_then(|out| Ok(out.into_text()?))
                .unwrap_or_else(|err| err.to_string());
            Html(format!("<html><head></head><body>{}</body></html>", out))
        }),
    );
    let middleware = TwMiddleware::new(Some(app), Config::default());

    let response = middleware
        .oneshot(Request::builder().uri("/greet").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(
        std::str::from_utf8(&body).unwrap(),
        "<html><head></head><body><p>Hi there</p></body></html>"
    );
}
