use std::sync::Arc;
use std::time::Duration;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::http::multipart::{MultipartParser, UploadError};
use crate::http::parser::{
    parse_headers_strict, parse_request_line, receive_body, receive_header_block, split_head, Limits, ParseError,
    WireError,
};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::net::connection::{Connection, ConnectionError};
use crate::router::{Router, RouterError};
use crate::storage::Storage;

/// Everything a connection needs to serve requests, shared by all of them.
pub struct HttpContext {
    pub router: Arc<Router>,
    pub storage: Arc<dyn Storage>,
    pub limits: Limits,
    /// How long an open connection may wait for its next request
    pub idle_timeout: Duration,
    pub upload_dir: String,
}

enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(Response, Outcome),
    Closed,
}

/// How the response is written and what happens after it.
#[derive(Clone, Copy)]
struct Outcome {
    head_only: bool,
    keep_alive: bool,
}

impl Outcome {
    const CLOSE: Outcome = Outcome {
        head_only: false,
        keep_alive: false,
    };
}

/// Drives one connection through request/response cycles until it closes.
///
/// ```text
/// Reading -> Processing -> Writing -+-> Reading   (keep-alive)
///    |                              +-> Closed
///    +-> Writing (400/431/upload error) -> Closed
/// ```
pub struct ConnectionHandler<'a> {
    conn: &'a mut Connection,
    ctx: &'a HttpContext,
    /// Bytes read past the end of the previous request
    carry: Vec<u8>,
    state: ConnectionState,
    served: usize,
}

impl<'a> ConnectionHandler<'a> {
    pub fn new(conn: &'a mut Connection, ctx: &'a HttpContext) -> Self {
        Self {
            conn,
            ctx,
            carry: Vec::new(),
            state: ConnectionState::Reading,
            served: 0,
        }
    }

    /// Serve requests until the peer leaves, an error occurs or a response
    /// asks for the connection to close. Returns the number of responses sent.
    pub async fn run(mut self) -> usize {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => {
                    self.state = self.read_request().await;
                }

                ConnectionState::Processing(req) => {
                    self.state = self.process(req).await;
                }

                ConnectionState::Writing(mut res, outcome) => {
                    self.state = self.write(&mut res, outcome).await;
                }

                ConnectionState::Closed => break,
            }
        }

        self.conn.close().await;
        self.served
    }

    async fn read_request(&mut self) -> ConnectionState {
        let carry = std::mem::take(&mut self.carry);
        let (block, leftover) =
            match receive_header_block(self.conn, carry, &self.ctx.limits, self.ctx.idle_timeout).await {
                Ok(received) => received,
                Err(e) => return self.reject_head(e),
            };

        let (line, header_text) = split_head(&block);
        let start = match parse_request_line(line) {
            Ok(start) => start,
            Err(ParseError::InvalidMethod) => {
                debug!(peer = ?self.conn.peer_addr(), "empty or unknown method, treating as disconnect");
                return ConnectionState::Closed;
            }
            Err(e) => return self.reject_head(e.into()),
        };
        let headers = match parse_headers_strict(header_text) {
            Ok(headers) => headers,
            Err(e) => return self.reject_head(e.into()),
        };

        let mut req = Request {
            method: start.method,
            path: start.path,
            query: start.query,
            version: start.version,
            headers,
            body: Vec::new(),
            body_truncated: false,
            peer: self.conn.peer_addr(),
            upload: None,
        };
        debug!(method = %req.method, path = %req.path, peer = ?req.peer, "request received");

        if req.is_multipart() && req.content_length() > 0 {
            return self.receive_upload(req, leftover).await;
        }

        match receive_body(self.conn, &req.headers, leftover, &self.ctx.limits, false).await {
            Ok(body) => {
                if body.truncated {
                    warn!(path = %req.path, limit = self.ctx.limits.max_body_size, "request body truncated");
                }
                req.body = body.data;
                req.body_truncated = body.truncated;
                self.carry = body.excess;
                ConnectionState::Processing(req)
            }
            Err(WireError::Parse(e)) => ConnectionState::Writing(bad_request(&e), Outcome::CLOSE),
            Err(e) => {
                debug!(path = %req.path, error = %e, "body not received");
                ConnectionState::Closed
            }
        }
    }

    /// Stream a multipart body into storage before the request is routed.
    async fn receive_upload(&mut self, mut req: Request, leftover: Vec<u8>) -> ConnectionState {
        let parser = MultipartParser::from_content_type(
            req.content_type(),
            Arc::clone(&self.ctx.storage),
            &self.ctx.upload_dir,
        );

        let result = match parser {
            Ok(mut parser) => {
                parser
                    .receive(self.conn, &leftover, Some(req.content_length()), &self.ctx.limits)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(file) => {
                info!(path = %file.path, size = file.size, "upload stored");
                req.upload = Some(file);
                ConnectionState::Processing(req)
            }
            Err(UploadError::Connection(e)) => {
                debug!(error = %e, "connection lost during upload");
                ConnectionState::Closed
            }
            Err(e) => {
                warn!(path = %req.path, error = %e, "upload rejected");
                let mut res = Response::new();
                res.send_error(e.status(), e.code(), &e.to_string());
                ConnectionState::Writing(res, Outcome::CLOSE)
            }
        }
    }

    async fn process(&mut self, req: Request) -> ConnectionState {
        let mut res = Response::new();

        let res = match self.ctx.router.handle_request(&req, &mut res).await {
            Ok(true) => {
                if let Some(file) = req.upload.as_ref().filter(|_| res.is_pristine()) {
                    res.send_success(
                        json!({ "file": file.filename, "path": file.path, "size": file.size }),
                        "File uploaded successfully",
                    );
                }
                res
            }
            Ok(false) => {
                debug!(method = %req.method, path = %req.path, "no route matched");
                Response::not_found(&req.uri())
            }
            Err(e @ RouterError::LockTimeout(_)) => {
                warn!(error = %e, "route table busy");
                let mut res = Response::new();
                res.send_error(StatusCode::ServiceUnavailable, "ROUTER_BUSY", &e.to_string());
                res
            }
            Err(e) => Response::internal_error(&e.to_string()),
        };

        // An upload consumed the stream; whatever followed it is gone.
        let outcome = Outcome {
            head_only: req.method == Method::HEAD,
            keep_alive: req.keep_alive() && req.upload.is_none(),
        };
        ConnectionState::Writing(res, outcome)
    }

    async fn write(&mut self, res: &mut Response, outcome: Outcome) -> ConnectionState {
        if !outcome.keep_alive {
            res.set_header("connection", "close");
        }

        let writer = match ResponseWriter::new(res, outcome.head_only) {
            Ok(writer) => writer,
            Err(e) => {
                warn!(error = %e, "response not written");
                return ConnectionState::Closed;
            }
        };

        match writer.write_to(self.conn, Some(&self.ctx.storage)).await {
            Ok(bytes) => {
                self.served += 1;
                debug!(status = res.status.as_u16(), bytes, "response sent");
            }
            Err(e) => {
                warn!(error = %e, "failed to send response");
                return ConnectionState::Closed;
            }
        }

        if outcome.keep_alive {
            ConnectionState::Reading
        } else {
            ConnectionState::Closed
        }
    }

    /// Map a header-phase failure to a final response or a silent close.
    fn reject_head(&self, err: WireError) -> ConnectionState {
        match err {
            WireError::Parse(e @ ParseError::HeaderTooLarge { .. }) => {
                warn!(peer = ?self.conn.peer_addr(), error = %e, "header block too large");
                let mut res = Response::new();
                res.send_error(StatusCode::RequestHeaderFieldsTooLarge, "HEADER_TOO_LARGE", &e.to_string());
                ConnectionState::Writing(res, Outcome::CLOSE)
            }
            WireError::Parse(e) => {
                debug!(peer = ?self.conn.peer_addr(), error = %e, "malformed request");
                ConnectionState::Writing(bad_request(&e), Outcome::CLOSE)
            }
            WireError::Connection(ConnectionError::Timeout(_)) | WireError::Closed => {
                debug!(peer = ?self.conn.peer_addr(), served = self.served, "peer idle or gone");
                ConnectionState::Closed
            }
            e => {
                debug!(peer = ?self.conn.peer_addr(), error = %e, "dropping connection");
                ConnectionState::Closed
            }
        }
    }
}

fn bad_request(err: &ParseError) -> Response {
    let mut res = Response::new();
    res.send_error(StatusCode::BadRequest, "BAD_REQUEST", &err.to_string());
    res
}
