//! picoweb - embedded HTTP serving core
//!
//! Connections (plain and TLS), an HTTP/1.1 wire parser, a regex router
//! with middleware, a streaming multipart upload parser and a small
//! task/event core for structuring application logic.

pub mod app;
pub mod config;
pub mod events;
pub mod http;
pub mod net;
pub mod router;
pub mod server;
pub mod storage;
pub mod task;
