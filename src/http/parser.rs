//! HTTP/1.1 text framing.
//!
//! ```text
//! <start line>\r\n
//! Key: Value\r\n
//! ...
//! \r\n
//! <raw body>
//! ```
//!
//! Requests are decoded from a single buffer; there is no reassembly of a
//! message split across reads. `Content-Length` is never trusted on input:
//! the body is whatever follows the blank line. On output it is always
//! recomputed from the actual body and written as the last header.

use super::message::{Headers, Request, Response, CONTENT_LENGTH};
use super::method::{Method, Version};
use super::uri::Uri;
use bytes::BytesMut;
use thiserror::Error;

const CRLF: &[u8] = b"\r\n";
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Request decoding failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Framing is broken (missing separator, bad start line, bad header).
    #[error("malformed request: {0}")]
    Malformed(String),
    /// Method token is not one of the supported methods.
    #[error("unexpected HTTP method: {0}")]
    UnknownMethod(String),
    /// Version token is not a recognized HTTP version.
    #[error("unexpected HTTP version: {0}")]
    UnknownVersion(String),
}

/// Decode a request from raw bytes.
pub fn decode_request(input: &[u8]) -> Result<Request, ParseError> {
    let head_end = find(input, HEAD_TERMINATOR)
        .ok_or_else(|| ParseError::Malformed("missing blank line after headers".to_string()))?;

    let head = std::str::from_utf8(&input[..head_end])
        .map_err(|_| ParseError::Malformed("request head is not valid UTF-8".to_string()))?;
    let body = &input[head_end + HEAD_TERMINATOR.len()..];

    let mut lines = head.split("\r\n");
    let start_line = lines.next().unwrap_or_default();

    let parts: Vec<&str> = start_line.split_ascii_whitespace().collect();
    let &[method, target, version] = parts.as_slice() else {
        return Err(ParseError::Malformed(format!(
            "invalid request line: {start_line:?}"
        )));
    };

    let method: Method = method
        .parse()
        .map_err(|_| ParseError::UnknownMethod(method.to_string()))?;
    let version: Version = version
        .parse()
        .map_err(|_| ParseError::UnknownVersion(version.to_string()))?;

    let mut request = Request::new(method, Uri::new(target));
    request.set_version(version);

    for line in lines {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::Malformed(format!("invalid header line: {line:?}")))?;
        if key.trim().is_empty() {
            return Err(ParseError::Malformed(format!(
                "empty header name: {line:?}"
            )));
        }
        request.set_header(key, value);
    }

    request.set_content(body);
    Ok(request)
}

/// Encode a request. Mostly useful for clients and tests.
pub fn encode_request(request: &Request) -> BytesMut {
    let start_line = format!(
        "{} {} {}",
        request.method(),
        request.uri(),
        request.version()
    );

    let capacity = head_capacity(&start_line, request.headers()) + request.content_length();
    let mut out = BytesMut::with_capacity(capacity);
    put_head(&mut out, &start_line, request.headers(), request.content_length());
    out.extend_from_slice(request.content());
    out
}

/// Encode a response.
///
/// With `include_body == false` (HEAD) the body is omitted but
/// `Content-Length` still reports its real size.
pub fn encode_response(response: &Response, include_body: bool) -> BytesMut {
    let start_line = format!(
        "{} {} {}",
        response.version(),
        response.status().as_u16(),
        response.status().reason_phrase()
    );

    let body_len = if include_body {
        response.content_length()
    } else {
        0
    };

    let capacity = head_capacity(&start_line, response.headers()) + body_len;
    let mut out = BytesMut::with_capacity(capacity);
    put_head(&mut out, &start_line, response.headers(), response.content_length());
    if include_body {
        out.extend_from_slice(response.content());
    }
    out
}

fn put_head(out: &mut BytesMut, start_line: &str, headers: &Headers, content_length: usize) {
    out.extend_from_slice(start_line.as_bytes());
    out.extend_from_slice(CRLF);

    for (key, value) in headers.iter() {
        if key.eq_ignore_ascii_case(CONTENT_LENGTH) {
            continue;
        }
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(CRLF);
    }

    out.extend_from_slice(CONTENT_LENGTH.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(content_length.to_string().as_bytes());
    out.extend_from_slice(CRLF);
    out.extend_from_slice(CRLF);
}

fn head_capacity(start_line: &str, headers: &Headers) -> usize {
    // start line, headers, Content-Length line, separators
    start_line.len()
        + headers
            .iter()
            .map(|(k, v)| k.len() + v.len() + 4)
            .sum::<usize>()
        + 32
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::method::StatusCode;

    #[test]
    fn test_decode_simple_get() {
        let request = decode_request(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(request.method(), Method::Get);
        assert_eq!(request.uri().path(), "/");
        assert_eq!(request.version(), Version::Http11);
        assert!(request.content().is_empty());
    }

    #[test]
    fn test_decode_headers_and_body() {
        let input = b"POST /Submit HTTP/1.1\r\nHost:  example.com \r\nX-Token:abc\r\n\r\nhello";
        let request = decode_request(input).unwrap();

        assert_eq!(request.method(), Method::Post);
        assert_eq!(request.uri().path(), "/submit");
        assert_eq!(request.header("host"), Some("example.com"));
        assert_eq!(request.header("X-Token"), Some("abc"));
        assert_eq!(request.content(), b"hello");
        assert_eq!(request.header("Content-Length"), Some("5"));
    }

    #[test]
    fn test_decode_header_value_with_colon() {
        let input = b"GET / HTTP/1.1\r\nHost: localhost:8080\r\n\r\n";
        let request = decode_request(input).unwrap();
        assert_eq!(request.header("Host"), Some("localhost:8080"));
    }

    #[test]
    fn test_decode_lowercase_method() {
        let request = decode_request(b"post /x HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(request.method(), Method::Post);
        assert_eq!(request.version(), Version::Http10);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode_request(b"GET / HTTP/1.1\r\n"),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            decode_request(b"GET /\r\n\r\n"),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            decode_request(b"GET / HTTP/1.1\r\nNoColon\r\n\r\n"),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            decode_request(b"GET / HTTP/1.1\r\n: value\r\n\r\n"),
            Err(ParseError::Malformed(_))
        ));
        assert_eq!(
            decode_request(b"FETCH / HTTP/1.1\r\n\r\n"),
            Err(ParseError::UnknownMethod("FETCH".to_string()))
        );
        assert_eq!(
            decode_request(b"GET / HTTP/9.9\r\n\r\n"),
            Err(ParseError::UnknownVersion("HTTP/9.9".to_string()))
        );
        assert!(matches!(
            decode_request(b"\xff\xfe / HTTP/1.1\r\n\r\n"),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn test_encode_request() {
        let mut request = Request::new(Method::Get, Uri::new("/"));
        request.set_header("Connection", "Keep-Alive");
        request.set_content("hello, world\n");

        let expected = "GET / HTTP/1.1\r\n\
                        Connection: Keep-Alive\r\n\
                        Content-Length: 13\r\n\r\n\
                        hello, world\n";
        assert_eq!(&encode_request(&request)[..], expected.as_bytes());
    }

    #[test]
    fn test_encode_response_without_content() {
        let response = Response::new(StatusCode::InternalServerError);
        let expected = "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n";
        assert_eq!(&encode_response(&response, true)[..], expected.as_bytes());
    }

    #[test]
    fn test_encode_response_content_length_last() {
        let mut response = Response::new(StatusCode::Ok);
        response.set_content("Hello, world\n");
        response.set_header("Content-Type", "text/plain");
        response.set_header("X-Zeta", "z");

        let expected = "HTTP/1.1 200 OK\r\n\
                        Content-Type: text/plain\r\n\
                        X-Zeta: z\r\n\
                        Content-Length: 13\r\n\r\n\
                        Hello, world\n";
        assert_eq!(&encode_response(&response, true)[..], expected.as_bytes());
    }

    #[test]
    fn test_encode_response_recomputes_length() {
        let mut response = Response::new(StatusCode::Ok);
        response.set_content("abc");
        response.set_header("Content-Length", "999");

        let encoded = encode_response(&response, true);
        let text = std::str::from_utf8(&encoded).unwrap();
        assert!(text.contains("Content-Length: 3\r\n"));
        assert!(!text.contains("999"));
    }

    #[test]
    fn test_encode_response_without_body() {
        let mut response = Response::new(StatusCode::Ok);
        response.set_content("Hello, world\n");

        let with_body = encode_response(&response, true);
        let without_body = encode_response(&response, false);

        assert!(with_body.ends_with(b"Hello, world\n"));
        assert!(without_body.ends_with(b"Content-Length: 13\r\n\r\n"));
        assert_eq!(with_body.len() - without_body.len(), 13);
    }
}
