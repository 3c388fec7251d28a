//! Static resources: locating, serving and injecting links to them.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use parking_lot::RwLock;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use regex::Regex;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, warn};
use widgetry_common::{
    InjectLocation, LinkKind, RequestContext, ResourceLink, ResourceRegistration,
};

use crate::config::Config;
use crate::error::Error;

/// Request-context key of the links collected for injection.
pub const INJECTED_LINKS_KEY: &str = "resources";

/// Bytes escaped inside a URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// `module/filename` with every segment percent-encoded.
pub fn resource_path(module: &str, filename: &str) -> String {
    let key = ResourceRegistration::new(module, filename, false).key();
    key.split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Maps dotted module names to directories below a set of roots.
///
/// `demo.widgets` is the directory `<root>/demo/widgets`; the empty module
/// is the root itself.
#[derive(Debug, Clone)]
pub struct ResourceLocator {
    roots: Vec<PathBuf>,
}

impl ResourceLocator {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Path of `filename` inside `module`: the first root where it exists,
    /// otherwise its location under the first root.
    pub fn resource_filename(&self, module: &str, filename: &str) -> PathBuf {
        let module_dir: PathBuf = module.split('.').filter(|s| !s.is_empty()).collect();
        let relative = module_dir.join(filename.trim_start_matches('/'));
        self.roots
            .iter()
            .map(|root| root.join(&relative))
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| match self.roots.first() {
                Some(root) => root.join(&relative),
                None => relative,
            })
    }
}

/// The static resource sub-application.
#[async_trait]
pub trait ResourceServer: Send + Sync {
    /// Declare `filename` of `module` (or its whole directory) as servable.
    fn register(&self, module: &str, filename: &str, whole_dir: bool);

    /// Serve a request below the resource prefix.
    async fn call(&self, request: Request) -> Response;
}

/// Serves registered files under `res_prefix`.
pub struct ResourcesApp {
    config: Arc<Config>,
    locator: ResourceLocator,
    files: RwLock<HashMap<String, PathBuf>>,
    dirs: RwLock<HashMap<String, PathBuf>>,
}

impl ResourcesApp {
    pub fn new(config: Arc<Config>) -> Self {
        let locator = ResourceLocator::new(config.resource_paths.clone());
        Self {
            config,
            locator,
            files: RwLock::new(HashMap::new()),
            dirs: RwLock::new(HashMap::new()),
        }
    }

    /// File a path below the prefix resolves to, if registered.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, Error> {
        let path = path.trim_start_matches('/');
        if Path::new(path)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::InvalidPath(path.to_string()));
        }

        if let Some(file) = self.files.read().get(path) {
            return Ok(file.clone());
        }

        let dirs = self.dirs.read();
        dirs.iter()
            .filter_map(|(key, dir)| {
                let rest = path.strip_prefix(key.as_str())?.strip_prefix('/')?;
                Some(dir.join(rest))
            })
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }
}

#[async_trait]
impl ResourceServer for ResourcesApp {
    fn register(&self, module: &str, filename: &str, whole_dir: bool) {
        let registration = ResourceRegistration::new(module, filename, whole_dir);
        let filename = filename.trim_matches('/');
        let path = self.locator.resource_filename(module, filename);

        if !whole_dir {
            debug!(module = %module, filename = %filename, "Registered resource");
            self.files.write().insert(registration.key(), path);
            return;
        }

        // A directory registers itself, a file registers its parent.
        let (key, dir) = if path.is_dir() {
            (registration.key(), path)
        } else {
            let parent_key = match filename.rsplit_once('/') {
                Some((parent, _)) => format!("{}/{}", module, parent),
                None => module.to_string(),
            };
            let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
            (parent_key, parent)
        };
        debug!(module = %module, directory = %key, "Registered resource directory");
        self.dirs.write().insert(key, dir);
    }

    async fn call(&self, request: Request) -> Response {
        if request.method() != Method::GET && request.method() != Method::HEAD {
            return StatusCode::METHOD_NOT_ALLOWED.into_response();
        }

        let path = request.uri().path().to_string();
        let Some(rest) = path.strip_prefix(self.config.res_prefix.as_str()) else {
            return Error::NotFound(path).into_response();
        };
        let rest = match percent_decode_str(rest).decode_utf8() {
            Ok(rest) => rest,
            Err(_) => return Error::InvalidPath(rest.to_string()).into_response(),
        };
        let file = match self.resolve(&rest) {
            Ok(file) => file,
            Err(err) => return err.into_response(),
        };

        let serve = ServeFile::new(file).with_buf_chunk_size(self.config.bufsize);
        let mut response = match serve.oneshot(request).await {
            Ok(response) => response.map(Body::new),
            Err(never) => match never {},
        };
        if response.status().is_success() {
            let max_age = format!("max-age={}", self.config.res_max_age);
            if let Ok(value) = HeaderValue::from_str(&max_age) {
                response.headers_mut().insert(header::CACHE_CONTROL, value);
            }
        }
        response
    }
}

/// Body returned by an injector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedBody {
    Text(String),
    Bytes(Vec<u8>),
}

/// Rewrites an HTML body to link the resources collected for the request.
pub trait ResourceInjector: Send + Sync {
    fn inject(&self, body: Vec<u8>, encoding: &str) -> InjectedBody;
}

impl<F> ResourceInjector for F
where
    F: Fn(Vec<u8>, &str) -> InjectedBody + Send + Sync,
{
    fn inject(&self, body: Vec<u8>, encoding: &str) -> InjectedBody {
        self(body, encoding)
    }
}

/// Request a link to `link` in the page being rendered.
///
/// The resource is also registered for serving. A link already requested
/// during this request is ignored.
pub fn inject_link(link: ResourceLink) -> Result<(), Error> {
    crate::middleware::register_resource(&link.module, &link.filename, false)?;
    RequestContext::current().update(INJECTED_LINKS_KEY, |links: &mut Vec<ResourceLink>| {
        let duplicate = links
            .iter()
            .any(|known| known.module == link.module && known.filename == link.filename);
        if !duplicate {
            links.push(link);
        }
    });
    Ok(())
}

/// Links requested so far in the current request.
pub fn injected_links() -> Vec<ResourceLink> {
    RequestContext::current().get_or(INJECTED_LINKS_KEY, Vec::new())
}

static ANCHORS: LazyLock<[(InjectLocation, Regex); 4]> = LazyLock::new(|| {
    let anchor = |pattern: &str| Regex::new(pattern).expect("ANCHORS: invalid regex pattern");
    [
        (InjectLocation::Head, anchor(r"(?i)<head\b[^>]*>")),
        (InjectLocation::HeadBottom, anchor(r"(?i)</head\s*>")),
        (InjectLocation::BodyTop, anchor(r"(?i)<body\b[^>]*>")),
        (InjectLocation::BodyBottom, anchor(r"(?i)</body\s*>")),
    ]
});

/// The built-in injector.
///
/// Links go after the opening tag for `head`/`bodytop` and before the
/// closing tag for `headbottom`/`bodybottom`. A page without the anchor is
/// left unchanged. Running it twice injects twice.
#[derive(Debug, Clone)]
pub struct DefaultInjector {
    location: InjectLocation,
    url_base: String,
}

impl DefaultInjector {
    pub fn new(config: &Config) -> Self {
        Self {
            location: config.inject_resources_location,
            url_base: format!("{}{}", config.script_name, config.res_prefix),
        }
    }

    pub fn link_url(&self, link: &ResourceLink) -> String {
        format!("{}{}", self.url_base, resource_path(&link.module, &link.filename))
    }

    fn render_link(&self, link: &ResourceLink) -> String {
        let url = self.link_url(link);
        let url = html_escape::encode_double_quoted_attribute(&url);
        match link.kind {
            LinkKind::Css => format!(
                "<link rel=\"stylesheet\" type=\"text/css\" href=\"{}\" media=\"all\" />",
                url
            ),
            LinkKind::Js => format!("<script type=\"text/javascript\" src=\"{}\"></script>", url),
        }
    }

    /// Insert `links` into `html`.
    pub fn inject_text(&self, html: &str, links: &[ResourceLink]) -> String {
        let mut html = html.to_string();
        for (location, anchor) in ANCHORS.iter() {
            let tags: String = links
                .iter()
                .filter(|link| link.location.unwrap_or(self.location) == *location)
                .map(|link| self.render_link(link))
                .collect();
            if tags.is_empty() {
                continue;
            }
            let Some(found) = anchor.find(&html) else {
                debug!(location = %location, "No injection anchor in page");
                continue;
            };
            let at = match location {
                InjectLocation::Head | InjectLocation::BodyTop => found.end(),
                InjectLocation::HeadBottom | InjectLocation::BodyBottom => found.start(),
            };
            html.insert_str(at, &tags);
        }
        html
    }
}

impl ResourceInjector for DefaultInjector {
    fn inject(&self, body: Vec<u8>, encoding: &str) -> InjectedBody {
        if !is_utf8_compatible(encoding) {
            warn!(encoding = %encoding, "Unsupported charset, skipping resource injection");
            return InjectedBody::Bytes(body);
        }
        let html = match String::from_utf8(body) {
            Ok(html) => html,
            Err(err) => {
                warn!("Body is not valid {}, skipping resource injection", encoding);
                return InjectedBody::Bytes(err.into_bytes());
            }
        };

        let links = injected_links();
        if links.is_empty() {
            return InjectedBody::Text(html);
        }
        InjectedBody::Text(self.inject_text(&html, &links))
    }
}

fn is_utf8_compatible(encoding: &str) -> bool {
    matches!(
        encoding.trim().to_ascii_lowercase().as_str(),
        "utf-8" | "utf8" | "us-ascii" | "ascii"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use axum::http::Request as HttpRequest;

    fn config_with_root(root: &Path) -> Arc<Config> {
        Arc::new(
            Config::from_settings([
                ("resource_paths", root.display().to_string()),
                ("res_max_age", "120".to_string()),
            ])
            .unwrap(),
        )
    }

    fn asset_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("demo/widgets/static/img")).unwrap();
        fs::write(dir.path().join("demo/widgets/static/site.css"), "body {}").unwrap();
        fs::write(dir.path().join("demo/widgets/static/img/logo.svg"), "<svg/>").unwrap();
        fs::write(dir.path().join("demo/widgets/grid.js"), "grid()").unwrap();
        dir
    }

    fn get(uri: &str) -> Request {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_locator_prefers_existing_root() {
        let dir = asset_tree();
        let locator = ResourceLocator::new(vec![PathBuf::from("/nonexistent"), dir.path().to_path_buf()]);
        assert_eq!(
            locator.resource_filename("demo.widgets", "grid.js"),
            dir.path().join("demo/widgets/grid.js")
        );
        assert_eq!(
            locator.resource_filename("demo.widgets", "missing.js"),
            PathBuf::from("/nonexistent/demo/widgets/missing.js")
        );
        assert_eq!(
            locator.resource_filename("", "demo/widgets/grid.js"),
            dir.path().join("demo/widgets/grid.js")
        );
    }

    #[test]
    fn test_resolve_files_and_directories() {
        let dir = asset_tree();
        let app = ResourcesApp::new(config_with_root(dir.path()));
        app.register("demo.widgets", "grid.js", false);
        app.register("demo.widgets", "static/site.css", true);

        assert_eq!(
            app.resolve("demo.widgets/grid.js").unwrap(),
            dir.path().join("demo/widgets/grid.js")
        );
        assert_eq!(
            app.resolve("demo.widgets/static/img/logo.svg").unwrap(),
            dir.path().join("demo/widgets/static/img/logo.svg")
        );
        assert!(matches!(app.resolve("demo.widgets/other.js"), Err(Error::NotFound(_))));
        assert!(matches!(
            app.resolve("demo.widgets/static/../grid.js"),
            Err(Error::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_serves_registered_file_with_cache_header() {
        let dir = asset_tree();
        let app = ResourcesApp::new(config_with_root(dir.path()));
        app.register("demo.widgets", "static/site.css", false);

        let response = app.call(get("/resources/demo.widgets/static/site.css")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "max-age=120");
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/css"));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"body {}");
    }

    #[tokio::test]
    async fn test_serves_file_with_encoded_name_through_its_link() {
        let dir = asset_tree();
        fs::write(dir.path().join("demo/widgets/my file.css"), "p {}").unwrap();
        let config = config_with_root(dir.path());
        let app = ResourcesApp::new(config.clone());
        app.register("demo.widgets", "my file.css", false);

        let url = DefaultInjector::new(&config).link_url(&ResourceLink::css("demo.widgets", "my file.css"));
        assert_eq!(url, "/resources/demo.widgets/my%20file.css");

        let response = app.call(get(&url)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"p {}");
    }

    #[tokio::test]
    async fn test_undecodable_path_is_rejected() {
        let dir = asset_tree();
        let app = ResourcesApp::new(config_with_root(dir.path()));
        let response = app.call(get("/resources/demo.widgets/%FF.css")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_resource_path_encodes_segments() {
        assert_eq!(resource_path("demo", "/static/a b.css"), "demo/static/a%20b.css");
        assert_eq!(resource_path("demo", "zürich.js"), "demo/z%C3%BCrich.js");
        assert_eq!(resource_path("demo", "100%.css"), "demo/100%25.css");
    }

    #[tokio::test]
    async fn test_unknown_and_non_get_requests() {
        let dir = asset_tree();
        let app = ResourcesApp::new(config_with_root(dir.path()));

        let response = app.call(get("/resources/demo.widgets/grid.js")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        app.register("demo.widgets", "grid.js", false);
        let post = HttpRequest::builder()
            .method(Method::POST)
            .uri("/resources/demo.widgets/grid.js")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.call(post).await.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_inject_text_locations() {
        let injector = DefaultInjector::new(&Config::default());
        let links = vec![
            ResourceLink::css("demo.widgets", "static/site.css"),
            ResourceLink::js("demo.widgets", "grid.js").at(InjectLocation::BodyBottom),
        ];
        let html = "<html><head><title>t</title></head><body><p>x</p></body></html>";

        let out = injector.inject_text(html, &links);
        assert_eq!(
            out,
            "<html><head><link rel=\"stylesheet\" type=\"text/css\" \
             href=\"/resources/demo.widgets/static/site.css\" media=\"all\" />\
             <title>t</title></head><body><p>x</p>\
             <script type=\"text/javascript\" src=\"/resources/demo.widgets/grid.js\"></script>\
             </body></html>"
        );
    }

    #[test]
    fn test_inject_text_without_anchor_is_unchanged() {
        let injector = DefaultInjector::new(&Config::default());
        let links = vec![ResourceLink::css("demo.widgets", "site.css")];
        assert_eq!(injector.inject_text("<p>fragment</p>", &links), "<p>fragment</p>");
    }

    #[test]
    fn test_injection_is_not_idempotent() {
        let injector = DefaultInjector::new(&Config::default());
        let links = vec![ResourceLink::js("demo", "a.js")];
        let once = injector.inject_text("<head></head>", &links);
        let twice = injector.inject_text(&once, &links);
        assert_eq!(twice.matches("a.js").count(), 2);
    }

    #[test]
    fn test_undecodable_body_is_returned_as_bytes() {
        let injector = DefaultInjector::new(&Config::default());
        let body = vec![0x3c, 0xff, 0x3e];
        assert_eq!(injector.inject(body.clone(), "utf-8"), InjectedBody::Bytes(body.clone()));
        assert_eq!(injector.inject(body.clone(), "latin-1"), InjectedBody::Bytes(body));
    }

    #[tokio::test]
    async fn test_inject_link_deduplicates_within_request() {
        RequestContext::default()
            .scope(async {
                inject_link(ResourceLink::css("demo", "a.css")).unwrap();
                inject_link(ResourceLink::css("demo", "a.css").at(InjectLocation::BodyTop)).unwrap();
                inject_link(ResourceLink::js("demo", "b.js")).unwrap();
                let files: Vec<_> = injected_links().into_iter().map(|l| l.filename).collect();
                assert_eq!(files, vec!["a.css", "b.js"]);
                // Without a middleware the registrations are queued
                assert_eq!(RequestContext::current().drain_queued_resources().len(), 3);
            })
            .await;
    }
}
