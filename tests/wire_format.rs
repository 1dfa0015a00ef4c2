//! Cross-module wire-format round trips: a `Request`/`Response` written
//! by `message.rs` must come back out exactly as written through
//! `http1.rs`'s parser, `Url` must round-trip through its own
//! `Display`, and `gzip` must round-trip arbitrary bodies.

use skua::http1::{HttpParser, RequestParser, ResponseParser};
use skua::{Request, Response, Url};

#[test]
fn request_stringify_parses_back_identically() {
    let mut request = Request::new("POST", Url::parse("http://example.com/items?x=1").unwrap(), b"payload".to_vec());
    request.headers.insert("content-length", "7");
    request.headers.insert("x-trace", "abc123");

    let wire = request.stringify();

    let mut parser = RequestParser::new();
    let consumed = parser.execute(&wire).unwrap();
    assert_eq!(consumed, wire.len());
    assert!(parser.done());

    let parsed = parser.result();
    assert_eq!(parsed.method, "POST");
    assert_eq!(parsed.url.fullpath(), "/items?x=1");
    assert_eq!(parsed.headers.get("x-trace"), Some("abc123"));
    assert_eq!(parsed.body, b"payload");
}

#[test]
fn response_stringify_parses_back_identically() {
    let mut response = Response {
        status: 201,
        reason: "Created".to_string(),
        body: b"{\"ok\":true}".to_vec(),
        ..Response::default()
    };
    response.headers.insert("content-length", "11");
    response.headers.insert("content-type", "application/json");

    let wire = response.stringify();

    let mut parser = ResponseParser::new();
    parser.execute(&wire).unwrap();
    assert!(parser.done());

    let parsed = parser.result();
    assert_eq!(parsed.status, 201);
    assert_eq!(parsed.reason, "Created");
    assert_eq!(parsed.headers.get("content-type"), Some("application/json"));
    assert_eq!(parsed.body, b"{\"ok\":true}");
}

#[test]
fn request_round_trips_byte_by_byte_across_many_feeds() {
    let request = Request::new("GET", Url::parse("http://example.com/a/b").unwrap(), Vec::new());
    let wire = request.stringify();

    let mut parser = RequestParser::new();
    for byte in &wire {
        if parser.done() {
            break;
        }
        parser.execute(std::slice::from_ref(byte)).unwrap();
    }
    assert!(parser.done());
    assert_eq!(parser.result().url.fullpath(), "/a/b");
}

#[test]
fn url_display_round_trips_through_parse() {
    for raw in ["http://example.com/path", "https://example.com:9443/a?b=1#c", "http://host/"] {
        let url = Url::parse(raw).unwrap();
        let reparsed = Url::parse(&url.to_string()).unwrap();
        assert_eq!(url, reparsed);
    }
}

#[test]
fn gzip_round_trips_arbitrary_bodies() {
    let bodies: &[&[u8]] = &[b"", b"hello world", &[0u8; 4096]];
    for body in bodies {
        let compressed = skua::gzip::deflate(body).unwrap();
        let restored = skua::gzip::inflate(&compressed).unwrap();
        assert_eq!(&restored, body);
    }
}

#[test]
fn headers_survive_a_stringify_parse_round_trip_case_insensitively() {
    let mut request = Request::new("GET", Url::parse("http://example.com/").unwrap(), Vec::new());
    request.headers.insert("X-Custom-Header", "Value");

    let mut parser = RequestParser::new();
    parser.execute(&request.stringify()).unwrap();

    assert_eq!(parser.result().headers.get("x-custom-header"), Some("Value"));
}
