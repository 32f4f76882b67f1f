//! HTTP message model and wire codec.
//!
//! - `method`: methods, versions and status codes
//! - `uri`: path normalization used for routing
//! - `message`: `Request`, `Response` and their headers
//! - `parser`: request decoding and message encoding

pub mod message;
pub mod method;
pub mod parser;
pub mod uri;

pub use message::{Headers, Request, Response};
pub use method::{Method, StatusCode, Version};
pub use parser::{decode_request, encode_request, encode_response, ParseError};
pub use uri::Uri;
