//! readyhttp: a minimal multi-threaded HTTP server
//!
//! One listener thread accepts connections and distributes them round-robin
//! to a fixed pool of worker threads. Each worker multiplexes its
//! connections over epoll/kqueue and answers one request per read with a
//! response built by a user-registered handler.
//!
//! ```no_run
//! use readyhttp::{HttpServer, Method, Response, StatusCode};
//!
//! let mut server = HttpServer::new("127.0.0.1", 8080);
//! server
//!     .register_handler("/", Method::Get, |_request| {
//!         let mut response = Response::new(StatusCode::Ok);
//!         response.set_content("Hello, world\n");
//!         Ok(response)
//!     })
//!     .unwrap();
//! server.start().unwrap();
//! // ...
//! server.stop().unwrap();
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod router;
mod runtime;
pub mod server;

pub use config::Config;
pub use error::{ConfigError, ServerError};
pub use http::{Headers, Method, Request, Response, StatusCode, Uri, Version};
pub use router::{Handler, HandlerError, HandlerResult, Router};
pub use server::HttpServer;
