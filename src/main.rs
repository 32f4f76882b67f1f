//! readyhttp demo server
//!
//! Serves a plain-text greeting on `/` and a small HTML page on
//! `/hello.html`, for both GET and HEAD. Type `quit` (or close stdin) to
//! stop.

use readyhttp::{Config, HttpServer, Method, Request, Response, Router, StatusCode};
use std::io::BufRead;
use tracing::info;
use tracing_subscriber::EnvFilter;

const HELLO_HTML: &str = "<!doctype html>\n\
<html>\n<body>\n\n\
<h1>Hello, world in an Html page</h1>\n\
<p>A Paragraph</p>\n\n\
</body>\n</html>\n";

fn say_hello(_request: &Request) -> readyhttp::HandlerResult {
    let mut response = Response::new(StatusCode::Ok);
    response.set_header("Content-Type", "text/plain");
    response.set_content("Hello, world\n");
    Ok(response)
}

fn send_html(_request: &Request) -> readyhttp::HandlerResult {
    let mut response = Response::new(StatusCode::Ok);
    response.set_header("Content-Type", "text/html");
    response.set_content(HELLO_HTML);
    Ok(response)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        workers = config.workers,
        buffer_size = config.buffer_size,
        max_connections = config.max_connections,
        "Starting readyhttp server"
    );

    let router = Router::new()
        .with_route("/", Method::Head, say_hello)
        .with_route("/", Method::Get, say_hello)
        .with_route("/hello.html", Method::Head, send_html)
        .with_route("/hello.html", Method::Get, send_html);

    let mut server = HttpServer::with_router(config, router);
    server.start()?;

    info!("Type 'quit' to stop the server");
    for line in std::io::stdin().lock().lines() {
        if line?.trim() == "quit" {
            break;
        }
    }

    info!("Stopping the server");
    server.stop()?;
    Ok(())
}
