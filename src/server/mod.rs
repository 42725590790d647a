//! The HTTP server: bind, accept, serve, repeat.
//!
//! By default connections are served one at a time on the server task.
//! With `per_connection_tasks` each connection gets its own task, up to
//! `max_concurrent_connections` at once; connections beyond that are
//! answered `503` and closed.

pub mod listener;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::{Config, ServerConfig};
use crate::events::{Event, EventManager, SystemNotification};
use crate::http::connection::{ConnectionHandler, HttpContext};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::net::connection::{Connection, ConnectionError};
use crate::net::tls::ServerIdentity;
use crate::router::Router;
use crate::storage::Storage;
use crate::task::{Task, TaskHandle};

use self::listener::Listener;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);
const SERVER_STACK_SIZE: usize = 8192;
const SERVER_PRIORITY: u8 = 2;

pub struct Server {
    settings: ServerConfig,
    upload_dir: String,
    router: Arc<Router>,
    events: Arc<EventManager>,
    storage: Arc<dyn Storage>,
    identity: Option<ServerIdentity>,
}

impl Server {
    pub fn new(config: &Config, router: Arc<Router>, events: Arc<EventManager>, storage: Arc<dyn Storage>) -> Self {
        Self {
            settings: config.server.clone(),
            upload_dir: config.storage.upload_dir.clone(),
            router,
            events,
            storage,
            identity: None,
        }
    }

    /// Terminate TLS on every accepted connection.
    pub fn with_tls(mut self, identity: ServerIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Bind the listener and start the accept loop on its own task.
    ///
    /// `ServerStarted` is posted once the socket is listening; its payload
    /// is the bound address.
    pub async fn start(self) -> anyhow::Result<ServerHandle> {
        if let Err(e) = self.storage.ensure_mounted() {
            warn!(error = %e, "storage unavailable; file routes will fail");
        }

        let identity = self
            .identity
            .map(|id| id.with_handshake_timeout(self.settings.handshake_timeout()));

        let listener = Listener::bind(&self.settings.listen_addr, identity)
            .await
            .with_context(|| format!("binding {}", self.settings.listen_addr))?;
        let local_addr = listener.local_addr()?;

        let ctx = Arc::new(HttpContext {
            router: self.router,
            storage: self.storage,
            limits: self.settings.limits(),
            idle_timeout: self.settings.idle_timeout(),
            upload_dir: self.upload_dir,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = Task::new("HttpServer")
            .stack_size(SERVER_STACK_SIZE)
            .priority(SERVER_PRIORITY)
            .spawn(accept_loop(listener, ctx, self.settings, shutdown_rx));

        let notified = self
            .events
            .post_event(Event::system(SystemNotification::ServerStarted).with_payload(local_addr));
        info!(addr = %local_addr, notified, "server started");

        Ok(ServerHandle {
            local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// A running server. Dropping the handle stops the accept loop too.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: TaskHandle,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wait for the accept loop to finish the
    /// connection it is serving.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.join().await {
            warn!(error = %e, "server task ended abnormally");
        }
    }
}

async fn accept_loop(
    listener: Listener,
    ctx: Arc<HttpContext>,
    settings: ServerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let permits = settings
        .per_connection_tasks
        .then(|| Arc::new(Semaphore::new(settings.max_concurrent_connections.max(1))));
    let accept_timeout = settings.accept_timeout();

    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept(accept_timeout) => accepted,
        };

        let conn = match accepted {
            Ok(Some(conn)) => conn.with_send_chunk_size(settings.send_chunk_size),
            Ok(None) => continue,
            Err(e @ (ConnectionError::Handshake(_) | ConnectionError::HandshakeTimeout(_))) => {
                warn!(error = %e, "tls accept failed");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "accept failed, retrying");
                sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        let Some(permits) = &permits else {
            serve(conn, &ctx).await;
            continue;
        };

        match timeout(accept_timeout, Arc::clone(permits).acquire_owned()).await {
            Ok(Ok(permit)) => {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    serve(conn, &ctx).await;
                    drop(permit);
                });
            }
            _ => reject_busy(conn).await,
        }
    }

    info!("server stopped");
}

async fn serve(mut conn: Connection, ctx: &HttpContext) {
    let peer = conn.peer_addr();
    let served = ConnectionHandler::new(&mut conn, ctx).run().await;
    debug!(peer = ?peer, served, "connection closed");
}

async fn reject_busy(mut conn: Connection) {
    warn!(peer = ?conn.peer_addr(), "connection limit reached");

    let mut res = Response::new();
    res.send_error(StatusCode::ServiceUnavailable, "SERVER_BUSY", "too many connections");
    res.set_header("connection", "close");

    match ResponseWriter::new(&mut res, false) {
        Ok(writer) => {
            if let Err(e) = writer.write_to(&mut conn, None).await {
                debug!(error = %e, "failed to send busy response");
            }
        }
        Err(e) => debug!(error = %e, "failed to send busy response"),
    }
    conn.close().await;
}
