use std::sync::Arc;
use std::time::Duration;

use picoweb::http::response::{Body, Response, ResponseBuilder, StatusCode};
use picoweb::http::writer::{serialize_head, ResponseWriter, WriteError};
use picoweb::net::Connection;
use picoweb::server::listener::Listener;
use picoweb::storage::{LocalStorage, Storage};
use serde_json::{json, Value};

fn body_json(res: &Response) -> Value {
    match &res.body {
        Body::Bytes(bytes) => serde_json::from_slice(bytes).unwrap(),
        other => panic!("expected a byte body, got {other:?}"),
    }
}

fn head_text(res: &Response) -> String {
    String::from_utf8(serialize_head(res)).unwrap()
}

#[test]
fn test_status_codes_and_reasons() {
    let cases = [
        (StatusCode::Ok, 200, "OK"),
        (StatusCode::Created, 201, "Created"),
        (StatusCode::NoContent, 204, "No Content"),
        (StatusCode::BadRequest, 400, "Bad Request"),
        (StatusCode::Unauthorized, 401, "Unauthorized"),
        (StatusCode::NotFound, 404, "Not Found"),
        (StatusCode::Conflict, 409, "Conflict"),
        (StatusCode::RequestHeaderFieldsTooLarge, 431, "Request Header Fields Too Large"),
        (StatusCode::InternalServerError, 500, "Internal Server Error"),
        (StatusCode::ServiceUnavailable, 503, "Service Unavailable"),
    ];

    for (status, code, reason) in cases {
        assert_eq!(status.as_u16(), code);
        assert_eq!(status.reason_phrase(), reason);
    }
}

#[test]
fn test_builder_sets_status_headers_and_body() {
    let res = ResponseBuilder::new(StatusCode::Created)
        .header("Content-Type", "application/json")
        .body(b"{}".to_vec())
        .build();

    assert_eq!(res.status, StatusCode::Created);
    assert_eq!(res.header("content-type"), Some("application/json"));
    assert_eq!(res.body, Body::Bytes(b"{}".to_vec()));
    assert!(!res.headers_sent());
}

#[test]
fn test_builder_empty_body() {
    let res = ResponseBuilder::new(StatusCode::NoContent).build();
    assert_eq!(res.body, Body::Empty);
}

#[test]
fn test_new_response_is_pristine() {
    let mut res = Response::new();
    assert!(res.is_pristine());

    res.set_header("x-trace", "1");
    assert!(!res.is_pristine());
}

#[test]
fn test_text_and_html_set_content_type() {
    let mut res = Response::new();
    res.text("hi");
    assert_eq!(res.header("content-type"), Some("text/plain; charset=utf-8"));

    res.html("<p>hi</p>");
    assert_eq!(res.header("content-type"), Some("text/html; charset=utf-8"));
    assert_eq!(res.body, Body::Bytes(b"<p>hi</p>".to_vec()));
}

#[test]
fn test_send_keeps_explicit_content_type() {
    let mut res = Response::new();
    res.set_content_type("application/octet-stream").send(vec![1, 2, 3]);

    assert_eq!(res.content_type(), Some("application/octet-stream"));
}

#[test]
fn test_success_envelope() {
    let mut res = Response::new();
    res.send_success(json!({ "zone": "front" }), "Loaded");

    assert_eq!(res.status, StatusCode::Ok);
    assert_eq!(res.header("content-type"), Some("application/json"));
    assert_eq!(
        body_json(&res),
        json!({ "success": true, "data": { "zone": "front" }, "message": "Loaded" })
    );
}

#[test]
fn test_success_envelope_omits_empty_parts() {
    let mut res = Response::new();
    res.send_success(json!({}), "");
    assert_eq!(body_json(&res), json!({ "success": true }));

    let mut res = Response::new();
    res.send_created(Value::Null, "Created it");
    assert_eq!(res.status, StatusCode::Created);
    assert_eq!(body_json(&res), json!({ "success": true, "message": "Created it" }));
}

#[test]
fn test_send_message_and_no_content() {
    let mut res = Response::new();
    res.send_message("done");
    assert_eq!(body_json(&res), json!({ "success": true, "message": "done" }));

    res.send_no_content();
    assert_eq!(res.status, StatusCode::NoContent);
    assert_eq!(res.body, Body::Empty);
}

#[test]
fn test_error_envelope() {
    let mut res = Response::new();
    res.send_error(StatusCode::Conflict, "FILE_EXISTS", "already uploaded");

    assert_eq!(res.status, StatusCode::Conflict);
    assert_eq!(
        body_json(&res),
        json!({ "success": false, "error": { "code": "FILE_EXISTS", "message": "already uploaded" } })
    );
}

#[test]
fn test_not_found_names_the_route() {
    let res = Response::not_found("/missing?x=1");

    assert_eq!(res.status, StatusCode::NotFound);
    assert_eq!(body_json(&res)["error"]["code"], "NOT_FOUND");
    assert_eq!(body_json(&res)["error"]["message"], "route: /missing?x=1");
}

#[test]
fn test_cookies_are_emitted_in_head() {
    let mut res = Response::new();
    res.set_cookie("session", "abc", "Path=/; HttpOnly").clear_cookie("old", "");

    let head = head_text(&res);
    assert!(head.contains("Set-Cookie: session=abc; Path=/; HttpOnly\r\n"));
    assert!(head.contains("Set-Cookie: old=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT\r\n"));
}

#[test]
fn test_serialize_head() {
    let res = ResponseBuilder::new(StatusCode::Ok)
        .header("content-type", "text/plain")
        .header("x-request-id", "7")
        .header("content-length", "999")
        .body(b"hello".to_vec())
        .build();

    assert_eq!(
        head_text(&res),
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nX-Request-Id: 7\r\nContent-Length: 5\r\n\r\n"
    );
}

#[test]
fn test_bodyless_status_has_no_content_length() {
    let mut res = Response::new();
    res.send_no_content();

    assert_eq!(head_text(&res), "HTTP/1.1 204 No Content\r\n\r\n");
}

#[test]
fn test_writer_marks_headers_sent_once() {
    let mut res = Response::ok("body");

    assert!(ResponseWriter::new(&mut res, false).is_ok());
    assert!(res.headers_sent());
    assert!(matches!(ResponseWriter::new(&mut res, false), Err(WriteError::HeadersAlreadySent)));
}

async fn pair() -> (Connection, Connection) {
    let listener = Listener::bind("127.0.0.1:0", None).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = Connection::connect("127.0.0.1", port, None).await.unwrap();
    let server = listener.accept(Duration::from_secs(1)).await.unwrap().unwrap();
    (client, server)
}

async fn read_all(conn: &mut Connection) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = conn.receive(&mut buf, Duration::from_secs(1)).await.unwrap();
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

fn storage_with(dir: &tempfile::TempDir, path: &str, content: &[u8]) -> Arc<dyn Storage> {
    let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(dir.path()));
    storage.mount().unwrap();
    storage.write_file(path, content).unwrap();
    storage
}

async fn write_file_response(storage: &Arc<dyn Storage>, len: u64) -> (Result<u64, WriteError>, Vec<u8>, usize) {
    let (mut client, mut server) = pair().await;

    let mut res = Response::new();
    res.send_file("/notes.txt", len, "text/plain");
    let head_len = serialize_head(&res).len();

    let writer = ResponseWriter::new(&mut res, false).unwrap();
    let result = writer.write_to(&mut server, Some(storage)).await;
    server.close().await;

    (result, read_all(&mut client).await, head_len)
}

#[tokio::test]
async fn test_file_body_is_streamed() {
    let dir = tempfile::tempdir().unwrap();
    let storage = storage_with(&dir, "/notes.txt", b"hello world");

    let (result, received, head_len) = write_file_response(&storage, 11).await;

    assert_eq!(result.unwrap(), (head_len + 11) as u64);
    assert_eq!(&received[head_len..], b"hello world");
}

#[tokio::test]
async fn test_file_larger_than_content_length_fails_without_overrun() {
    let dir = tempfile::tempdir().unwrap();
    let storage = storage_with(&dir, "/notes.txt", b"hello world");

    let (result, received, head_len) = write_file_response(&storage, 5).await;

    assert!(matches!(
        result,
        Err(WriteError::LengthMismatch { expected: 5, written: 5, .. })
    ));
    assert_eq!(received.len(), head_len + 5);
    assert_eq!(&received[head_len..], b"hello");
}

#[tokio::test]
async fn test_file_shorter_than_content_length_fails() {
    let dir = tempfile::tempdir().unwrap();
    let storage = storage_with(&dir, "/notes.txt", b"hello world");

    let (result, received, head_len) = write_file_response(&storage, 20).await;

    assert!(matches!(
        result,
        Err(WriteError::LengthMismatch { expected: 20, written: 11, .. })
    ));
    assert_eq!(received.len(), head_len + 11);
}
