//! Widgetry dev server - runs the demo application behind the widget middleware.

use std::env;

use axum::middleware::from_fn;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use widgetry_middleware::logging::request_logger;
use widgetry_middleware::TwMiddleware;

mod config;
mod demo;

use config::ServerConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    println!("widgetry-devserver {}", VERSION);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle --version / -V
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        print_version();
        return Ok(());
    }

    // Load configuration
    let server = ServerConfig::load()
        .map_err(|e| format!("Failed to load server configuration: {}", e))?;
    let assets = demo::asset_root().display().to_string();
    let widgets = widgetry_middleware::Config::load("widgetry", [("resource_paths", assets)])
        .map_err(|e| format!("Failed to load middleware configuration: {}", e))?;

    // Initialize tracing
    let default_level = if widgets.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting widgetry-devserver {} with resources from {:?}",
        VERSION,
        widgets.resource_paths
    );

    // Queued until the middleware below picks it up
    demo::register_static()?;
    let middleware = TwMiddleware::new(Some(demo::router()), demo::configure(widgets));

    let app = Router::new()
        .fallback_service(middleware)
        .layer(from_fn(request_logger))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = server.api.addr();
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
