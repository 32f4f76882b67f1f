//! Request pipeline: decode -> dispatch -> encode.
//!
//! Pure with respect to the event loop. Every failure becomes a well-formed
//! error response; nothing here closes a connection.

use crate::http::{decode_request, encode_response, Method, Response, StatusCode, Version};
use crate::router::Router;
use bytes::BytesMut;
use tracing::{debug, warn};

const VERSION_NOT_SUPPORTED_MESSAGE: &str = "HTTP version not supported";
const RESPONSE_TOO_LARGE_MESSAGE: &str = "response too large";

/// Build the response for one raw request.
///
/// Returns the response and whether its body should be transmitted (false
/// for HEAD requests).
pub fn handle(input: &[u8], router: &Router, version: Version) -> (Response, bool) {
    let request = match decode_request(input) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Rejecting malformed request");
            let mut response = Response::text(StatusCode::BadRequest, &e.to_string());
            response.set_version(version);
            return (response, true);
        }
    };

    let include_body = request.method() != Method::Head;

    let mut response = if request.version() != version {
        debug!(
            declared = %request.version(),
            supported = %version,
            "Rejecting request with unsupported version"
        );
        Response::text(
            StatusCode::HttpVersionNotSupported,
            VERSION_NOT_SUPPORTED_MESSAGE,
        )
    } else {
        router.dispatch(&request)
    };
    response.set_version(version);

    debug!(
        method = %request.method(),
        path = %request.uri(),
        status = response.status().as_u16(),
        "Request handled"
    );

    (response, include_body)
}

/// Run the pipeline and encode the result, never exceeding `max_len` bytes
/// when avoidable.
///
/// A response that does not fit in one connection buffer is replaced by a
/// 500 response.
pub fn respond(input: &[u8], router: &Router, version: Version, max_len: usize) -> BytesMut {
    let (response, include_body) = handle(input, router, version);
    let encoded = encode_response(&response, include_body);
    if encoded.len() <= max_len {
        return encoded;
    }

    warn!(
        len = encoded.len(),
        max_len,
        status = response.status().as_u16(),
        "Response exceeds connection buffer"
    );

    let mut fallback = Response::text(StatusCode::InternalServerError, RESPONSE_TOO_LARGE_MESSAGE);
    fallback.set_version(version);
    let encoded = encode_response(&fallback, include_body);
    if encoded.len() <= max_len {
        return encoded;
    }

    fallback.clear_content();
    fallback.remove_header("Content-Type");
    encode_response(&fallback, false)
}
