use picoweb::http::request::{Method, Request, RequestBuilder};
use serde::Deserialize;

fn get(path: &str) -> RequestBuilder {
    RequestBuilder::new().method(Method::GET).path(path)
}

#[test]
fn test_builder_splits_query_from_path() {
    let req = get("/search?q=rust&page=2").build().unwrap();

    assert_eq!(req.path, "/search");
    assert_eq!(req.query, "q=rust&page=2");
    assert_eq!(req.uri(), "/search?q=rust&page=2");
    assert_eq!(req.version, "HTTP/1.1");
    assert!(req.body.is_empty());
    assert!(req.upload.is_none());
}

#[test]
fn test_builder_requires_method_and_path() {
    assert!(RequestBuilder::new().path("/").build().is_err());
    assert!(RequestBuilder::new().method(Method::GET).build().is_err());
}

#[test]
fn test_header_lookup_is_case_insensitive() {
    let req = get("/").header("X-Api-Key", "secret").build().unwrap();

    assert_eq!(req.header("x-api-key"), Some("secret"));
    assert_eq!(req.header("X-API-KEY"), Some("secret"));
    assert_eq!(req.header("missing"), None);
}

#[test]
fn test_content_length_defaults_to_zero() {
    let valid = get("/").header("Content-Length", "42").build().unwrap();
    let missing = get("/").build().unwrap();
    let invalid = get("/").header("Content-Length", "lots").build().unwrap();

    assert_eq!(valid.content_length(), 42);
    assert_eq!(missing.content_length(), 0);
    assert_eq!(invalid.content_length(), 0);
}

#[test]
fn test_keep_alive_follows_version_and_header() {
    let http11 = get("/").build().unwrap();
    let http11_close = get("/").header("Connection", "close").build().unwrap();
    let http10 = get("/").version("HTTP/1.0").build().unwrap();
    let http10_keep = get("/").version("HTTP/1.0").header("Connection", "Keep-Alive").build().unwrap();

    assert!(http11.keep_alive());
    assert!(!http11_close.keep_alive());
    assert!(!http10.keep_alive());
    assert!(http10_keep.keep_alive());
}

#[test]
fn test_query_params_are_decoded() {
    let req = get("/find?name=front%20lawn&zone=a+b&flag").build().unwrap();
    let params = req.query_params();

    assert_eq!(params.get("name").map(String::as_str), Some("front lawn"));
    assert_eq!(params.get("zone").map(String::as_str), Some("a b"));
    assert_eq!(params.get("flag").map(String::as_str), Some(""));
}

#[test]
fn test_form_params_from_body() {
    let req = RequestBuilder::new()
        .method(Method::POST)
        .path("/login")
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(b"user=ann&pass=p%26ss".to_vec())
        .build()
        .unwrap();
    let form = req.form_params();

    assert_eq!(form.get("user").map(String::as_str), Some("ann"));
    assert_eq!(form.get("pass").map(String::as_str), Some("p&ss"));
}

#[test]
fn test_cookies() {
    let req = get("/").header("Cookie", "session=abc123; theme=dark").build().unwrap();

    assert_eq!(req.cookie("session").as_deref(), Some("abc123"));
    assert_eq!(req.cookie("theme").as_deref(), Some("dark"));
    assert_eq!(req.cookie("other"), None);
    assert!(get("/").build().unwrap().cookies().is_empty());
}

#[test]
fn test_multipart_boundary() {
    let req = RequestBuilder::new()
        .method(Method::POST)
        .path("/upload")
        .header("Content-Type", "multipart/form-data; boundary=\"----XyZ\"")
        .build()
        .unwrap();

    assert!(req.is_multipart());
    assert_eq!(req.boundary(), Some("----XyZ"));

    let plain = get("/").header("Content-Type", "text/plain").build().unwrap();
    assert!(!plain.is_multipart());
    assert_eq!(plain.boundary(), None);
}

#[derive(Debug, Deserialize, PartialEq)]
struct Zone {
    name: String,
    minutes: u32,
}

#[test]
fn test_json_body() {
    let req = RequestBuilder::new()
        .method(Method::POST)
        .path("/zones")
        .body(br#"{"name":"front","minutes":10}"#.to_vec())
        .build()
        .unwrap();

    let zone: Zone = req.json().unwrap();
    assert_eq!(zone, Zone { name: "front".into(), minutes: 10 });

    let broken: Request = RequestBuilder::new().method(Method::POST).path("/").body(b"{".to_vec()).build().unwrap();
    assert!(broken.json::<Zone>().is_err());
}

#[test]
fn test_method_round_trip_text() {
    for method in [Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::HEAD, Method::OPTIONS, Method::PATCH] {
        assert_eq!(Method::from_str(method.as_str()), Some(method));
        assert_eq!(method.to_string(), method.as_str());
    }
    assert_eq!(Method::from_str("get"), None);
}
