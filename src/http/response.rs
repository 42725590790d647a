use serde::Serialize;
use serde_json::{json, Value};

use crate::http::headers::Headers;

/// HTTP status codes used by the server and its handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    #[default]
    Ok,
    /// 201 Created
    Created,
    /// 204 No Content
    NoContent,
    /// 301 Moved Permanently
    MovedPermanently,
    /// 304 Not Modified
    NotModified,
    /// 400 Bad Request
    BadRequest,
    /// 401 Unauthorized
    Unauthorized,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 409 Conflict
    Conflict,
    /// 413 Payload Too Large
    PayloadTooLarge,
    /// 431 Request Header Fields Too Large
    RequestHeaderFieldsTooLarge,
    /// 500 Internal Server Error
    InternalServerError,
    /// 503 Service Unavailable
    ServiceUnavailable,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use picoweb::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::Conflict.as_u16(), 409);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::NoContent => 204,
            StatusCode::MovedPermanently => 301,
            StatusCode::NotModified => 304,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::Conflict => 409,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::RequestHeaderFieldsTooLarge => 431,
            StatusCode::InternalServerError => 500,
            StatusCode::ServiceUnavailable => 503,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::NoContent => "No Content",
            StatusCode::MovedPermanently => "Moved Permanently",
            StatusCode::NotModified => "Not Modified",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::Conflict => "Conflict",
            StatusCode::PayloadTooLarge => "Payload Too Large",
            StatusCode::RequestHeaderFieldsTooLarge => "Request Header Fields Too Large",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// Whether a response with this status carries no body.
    pub fn is_bodyless(&self) -> bool {
        matches!(self, StatusCode::NoContent | StatusCode::NotModified)
    }
}

/// Response payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    /// A storage file streamed by the writer
    File { path: String, len: u64 },
}

impl Body {
    pub fn len(&self) -> u64 {
        match self {
            Body::Empty => 0,
            Body::Bytes(b) => b.len() as u64,
            Body::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An HTTP response under construction.
///
/// Handlers mutate it through the chaining setters; the writer serializes it
/// once. `headers_sent` is flipped by the writer and guards against a second
/// emission of the head.
#[derive(Debug, Default)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Body,
    cookies: Vec<String>,
    headers_sent: bool,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nothing has been set on this response yet.
    pub fn is_pristine(&self) -> bool {
        self.status == StatusCode::Ok
            && self.headers.is_empty()
            && self.body == Body::Empty
            && self.cookies.is_empty()
            && !self.headers_sent
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    pub(crate) fn mark_headers_sent(&mut self) {
        self.headers_sent = true;
    }

    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn set_content_type(&mut self, content_type: &str) -> &mut Self {
        self.set_header("content-type", content_type)
    }

    /// `Set-Cookie: name=value; attributes`
    pub fn set_cookie(&mut self, name: &str, value: &str, attributes: &str) -> &mut Self {
        let mut cookie = format!("{name}={value}");
        if !attributes.is_empty() {
            cookie.push_str("; ");
            cookie.push_str(attributes);
        }
        self.cookies.push(cookie);
        self
    }

    pub fn clear_cookie(&mut self, name: &str, attributes: &str) -> &mut Self {
        let expiry = "Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT";
        let attributes = if attributes.is_empty() {
            expiry.to_string()
        } else {
            format!("{attributes}; {expiry}")
        };
        self.set_cookie(name, "", &attributes)
    }

    /// Set the body; defaults the content type to plain text.
    pub fn send(&mut self, body: impl Into<Vec<u8>>) -> &mut Self {
        if !self.headers.contains("content-type") {
            self.set_content_type("text/plain; charset=utf-8");
        }
        self.body = Body::Bytes(body.into());
        self
    }

    pub fn text(&mut self, body: &str) -> &mut Self {
        self.set_content_type("text/plain; charset=utf-8");
        self.body = Body::Bytes(body.as_bytes().to_vec());
        self
    }

    pub fn html(&mut self, body: &str) -> &mut Self {
        self.set_content_type("text/html; charset=utf-8");
        self.body = Body::Bytes(body.as_bytes().to_vec());
        self
    }

    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> &mut Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.set_content_type("application/json");
                self.body = Body::Bytes(bytes);
            }
            Err(e) => {
                self.send_error(StatusCode::InternalServerError, "SERIALIZATION_FAILED", &e.to_string());
            }
        }
        self
    }

    /// Stream a storage file as the body.
    pub fn send_file(&mut self, path: impl Into<String>, len: u64, content_type: &str) -> &mut Self {
        self.set_content_type(content_type);
        self.body = Body::File { path: path.into(), len };
        self
    }

    pub fn send_success(&mut self, data: Value, message: &str) -> &mut Self {
        let envelope = success_envelope(data, message);
        self.status(StatusCode::Ok).json(&envelope)
    }

    pub fn send_created(&mut self, data: Value, message: &str) -> &mut Self {
        let envelope = success_envelope(data, message);
        self.status(StatusCode::Created).json(&envelope)
    }

    pub fn send_message(&mut self, message: &str) -> &mut Self {
        self.status(StatusCode::Ok).json(&json!({ "success": true, "message": message }))
    }

    pub fn send_no_content(&mut self) -> &mut Self {
        self.body = Body::Empty;
        self.status(StatusCode::NoContent)
    }

    /// `{"success":false,"error":{"code":..,"message":..}}`
    pub fn send_error(&mut self, status: StatusCode, code: &str, message: &str) -> &mut Self {
        let envelope = json!({
            "success": false,
            "error": { "code": code, "message": message },
        });
        self.status(status);
        self.set_content_type("application/json");
        self.body = Body::Bytes(envelope.to_string().into_bytes());
        self
    }

    /// Creates a simple 200 OK response with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        let mut response = Response::new();
        response.send(body);
        response
    }

    pub fn not_found(uri: &str) -> Self {
        let mut response = Response::new();
        response.send_error(StatusCode::NotFound, "NOT_FOUND", &format!("route: {uri}"));
        response
    }

    pub fn internal_error(message: &str) -> Self {
        let mut response = Response::new();
        response.send_error(StatusCode::InternalServerError, "INTERNAL_ERROR", message);
        response
    }
}

fn success_envelope(data: Value, message: &str) -> Value {
    let mut envelope = json!({ "success": true });
    let has_data = match &data {
        Value::Null => false,
        Value::Object(m) => !m.is_empty(),
        Value::Array(a) => !a.is_empty(),
        _ => true,
    };
    if has_data {
        envelope["data"] = data;
    }
    if !message.is_empty() {
        envelope["message"] = Value::String(message.to_string());
    }
    envelope
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(b"{}".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn build(self) -> Response {
        Response {
            status: self.status,
            headers: self.headers,
            body: if self.body.is_empty() {
                Body::Empty
            } else {
                Body::Bytes(self.body)
            },
            ..Default::default()
        }
    }
}
