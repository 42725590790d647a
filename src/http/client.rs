//! Minimal outbound HTTP/1.1 client over [`Connection`].
//!
//! One request per connection (`Connection: close`). Responses are read with
//! the same wire parser the server uses, so chunked, sized and
//! close-delimited bodies all work.

use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

use crate::http::headers::{canonical_name, Headers};
use crate::http::parser::{parse_headers, parse_status_line, receive_body, receive_header_block, split_head, Limits, WireError};
use crate::http::request::Method;
use crate::net::connection::{Connection, ConnectionError};
use crate::net::tls::ClientTls;

const USER_AGENT: &str = concat!("picoweb/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("https requested but no root CA configured")]
    NoTrustAnchor,

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Wire(#[from] WireError),
}

#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub truncated: bool,
}

impl ClientResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Clone, Default)]
pub struct HttpClient {
    tls: Option<ClientTls>,
    limits: Limits,
    headers: Headers,
}

impl HttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust servers whose certificate chains to this root CA.
    pub fn with_root_ca(mut self, tls: ClientTls) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.limits.receive_timeout = timeout;
        self
    }

    /// Header sent with every request.
    pub fn default_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub async fn get(&self, url: &str) -> Result<ClientResponse, ClientError> {
        self.request(Method::GET, url, &Headers::new(), &[]).await
    }

    pub async fn post(&self, url: &str, body: &[u8], content_type: &str) -> Result<ClientResponse, ClientError> {
        let headers: Headers = [("content-type", content_type)].into_iter().collect();
        self.request(Method::POST, url, &headers, body).await
    }

    pub async fn put(&self, url: &str, body: &[u8], content_type: &str) -> Result<ClientResponse, ClientError> {
        let headers: Headers = [("content-type", content_type)].into_iter().collect();
        self.request(Method::PUT, url, &headers, body).await
    }

    pub async fn delete(&self, url: &str) -> Result<ClientResponse, ClientError> {
        self.request(Method::DELETE, url, &Headers::new(), &[]).await
    }

    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &Headers,
        body: &[u8],
    ) -> Result<ClientResponse, ClientError> {
        let url = url::Url::parse(url).map_err(|e| ClientError::InvalidUrl(format!("{url}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| ClientError::InvalidUrl(format!("{url}: missing host")))?
            .to_string();

        let tls = match url.scheme() {
            "http" => None,
            "https" => Some(self.tls.as_ref().ok_or(ClientError::NoTrustAnchor)?),
            other => return Err(ClientError::UnsupportedScheme(other.to_string())),
        };
        let port = url.port_or_known_default().unwrap_or(80);

        let mut conn = Connection::connect(&host, port, tls).await?;
        let result = self.exchange(&mut conn, method, &url, headers, body).await;
        conn.close().await;

        let response = result?;
        debug!(%method, %url, status = response.status, bytes = response.body.len(), "request complete");
        Ok(response)
    }

    async fn exchange(
        &self,
        conn: &mut Connection,
        method: Method,
        url: &url::Url,
        headers: &Headers,
        body: &[u8],
    ) -> Result<ClientResponse, ClientError> {
        let request = self.build_request(method, url, headers, body);
        conn.send(&request).await?;
        trace!(bytes = request.len(), "request sent");

        let (block, leftover) =
            receive_header_block(conn, Vec::new(), &self.limits, self.limits.receive_timeout).await?;
        let (line, header_text) = split_head(&block);
        let status = parse_status_line(line).map_err(WireError::from)?;
        let headers = parse_headers(header_text);

        let received = if method == Method::HEAD || matches!(status.code, 100..=199 | 204 | 304) {
            Default::default()
        } else {
            receive_body(conn, &headers, leftover, &self.limits, true).await?
        };

        Ok(ClientResponse {
            status: status.code,
            reason: status.reason,
            headers,
            body: received.data,
            truncated: received.truncated,
        })
    }

    fn build_request(&self, method: Method, url: &url::Url, headers: &Headers, body: &[u8]) -> Vec<u8> {
        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }

        let mut all = Headers::new();
        let host = match url.port() {
            Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
            None => url.host_str().unwrap_or_default().to_string(),
        };
        all.insert("host", host);
        all.insert("user-agent", USER_AGENT);
        for (name, value) in self.headers.iter().chain(headers.iter()) {
            all.insert(name, value);
        }
        all.insert("connection", "close");
        if !body.is_empty() || matches!(method, Method::POST | Method::PUT | Method::PATCH) {
            all.insert("content-length", body.len().to_string());
        }

        let mut buf = format!("{} {} HTTP/1.1\r\n", method, target).into_bytes();
        for (name, value) in all.iter() {
            buf.extend_from_slice(format!("{}: {}\r\n", canonical_name(name), value).as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(body);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_head_carries_host_and_length() {
        let client = HttpClient::new().default_header("x-api-key", "k");
        let url = url::Url::parse("http://example.com:8080/api/v1/programs?x=1").unwrap();
        let bytes = client.build_request(Method::POST, &url, &Headers::new(), b"{}");
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("POST /api/v1/programs?x=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com:8080\r\n"));
        assert!(text.contains("X-Api-Key: k\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\n{}"));
    }

    #[tokio::test]
    async fn https_without_root_ca_is_rejected() {
        let err = HttpClient::new().get("https://localhost:1/").await.unwrap_err();
        assert!(matches!(err, ClientError::NoTrustAnchor));
    }
}
