use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info};

use crate::events::{Event, EventMask, Notification, SystemNotification};
use crate::http::multipart::UploadedFile;
use crate::task::{Controller, ControllerContext};

use super::UPLOAD_STORED;

/// Logs a periodic heartbeat and reacts to server and upload events.
pub struct HeartbeatController {
    interval: Duration,
    beats: u64,
    listening: Option<SocketAddr>,
    uploads: u64,
}

impl HeartbeatController {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            beats: 0,
            listening: None,
            uploads: 0,
        }
    }
}

#[async_trait]
impl Controller for HeartbeatController {
    fn name(&self) -> &str {
        "Heartbeat"
    }

    fn subscriptions(&self) -> EventMask {
        EventMask::system(SystemNotification::ServerStarted)
            | EventMask::system(SystemNotification::NetworkReady)
            | EventMask::user(UPLOAD_STORED)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(500)
    }

    async fn on_start(&mut self, ctx: &mut ControllerContext) {
        info!(controller = %ctx.name(), interval = ?self.interval, "heartbeat running");
    }

    async fn on_event(&mut self, _ctx: &mut ControllerContext, event: Event) {
        match event.notification {
            Notification::System(SystemNotification::ServerStarted) => {
                self.listening = event.payload::<SocketAddr>().copied();
                info!(addr = ?self.listening, "server is up");
            }
            Notification::System(SystemNotification::NetworkReady) => {
                info!("network ready");
            }
            Notification::User(UPLOAD_STORED) => {
                self.uploads += 1;
                if let Some(file) = event.payload::<UploadedFile>() {
                    info!(path = %file.path, size = file.size, total = self.uploads, "upload recorded");
                }
            }
            other => debug!(notification = ?other, "ignored"),
        }
    }

    async fn poll(&mut self, ctx: &mut ControllerContext) {
        let beats = &mut self.beats;
        let (listening, uploads) = (self.listening, self.uploads);
        ctx.run_every(self.interval, "heartbeat", || {
            *beats += 1;
            info!(beat = *beats, addr = ?listening, uploads, "heartbeat");
        });
    }
}
