//! HTTP/1.1 protocol layer.
//!
//! - **`headers`**: case-insensitive header map
//! - **`parser`**: start lines, header blocks and body reception over a [`Connection`](crate::net::Connection)
//! - **`chunked`**: incremental `Transfer-Encoding: chunked` decoder
//! - **`request`** / **`response`**: the values handlers work with
//! - **`writer`**: serializes a response once, streaming file bodies from storage
//! - **`multipart`**: streaming `multipart/form-data` upload parser
//! - **`connection`**: the per-connection request/response state machine
//! - **`client`**: outbound requests over plain or TLS connections
//! - **`mime`**: content types by file extension
//!
//! # Connection state machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← headers, then body or multipart upload
//!        └──────┬──────┘
//!               │ Request received
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Router::handle_request, 404 when unmatched
//!        └──────┬───────────┘
//!               │ Response ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← ResponseWriter
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection, idle timeout)
//!               └─ Close → Closed
//! ```

pub mod chunked;
pub mod client;
pub mod connection;
pub mod headers;
pub mod mime;
pub mod multipart;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;

pub use client::{ClientError, ClientResponse, HttpClient};
pub use headers::Headers;
pub use request::{Method, Request};
pub use response::{Body, Response, StatusCode};
