use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, trace};

use super::{Task, TaskHandle, DEFAULT_PRIORITY, DEFAULT_STACK_SIZE};
use crate::events::{ControllerHandle, ControllerId, Event, EventManager, EventMask};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Application logic driven by events and periodic polling.
///
/// All hooks default to doing nothing.
#[async_trait]
pub trait Controller: Send {
    fn name(&self) -> &str;

    /// Notifications delivered to `on_event`.
    fn subscriptions(&self) -> EventMask {
        EventMask::NONE
    }

    /// Longest wait for an event before `poll` runs again.
    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    fn stack_size(&self) -> usize {
        DEFAULT_STACK_SIZE
    }

    fn priority(&self) -> u8 {
        DEFAULT_PRIORITY
    }

    async fn on_start(&mut self, _ctx: &mut ControllerContext) {}

    async fn on_event(&mut self, _ctx: &mut ControllerContext, _event: Event) {}

    async fn poll(&mut self, _ctx: &mut ControllerContext) {}
}

/// A controller's view of the framework: its identity, the event bus and
/// its interval timers.
pub struct ControllerContext {
    handle: ControllerHandle,
    events: Arc<EventManager>,
    timers: HashMap<String, Instant>,
}

impl ControllerContext {
    fn new(handle: ControllerHandle, events: Arc<EventManager>) -> Self {
        Self {
            handle,
            events,
            timers: HashMap::new(),
        }
    }

    pub fn id(&self) -> ControllerId {
        self.handle.id()
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub fn post(&self, event: impl Into<Event>) -> usize {
        self.events.post_event(event)
    }

    pub fn subscribe(&self, mask: EventMask) {
        self.events.subscribe(mask, &self.handle);
    }

    pub fn has_pending_events(&self) -> bool {
        self.events.has_pending_events(&self.handle)
    }

    /// True at most once per `interval` for a given `id`.
    ///
    /// An id seen for the first time is due immediately.
    pub fn is_due(&mut self, id: &str, interval: Duration) -> bool {
        let now = Instant::now();
        match self.timers.get_mut(id) {
            Some(last) if now.duration_since(*last) < interval => false,
            Some(last) => {
                *last = now;
                true
            }
            None => {
                self.timers.insert(id.to_string(), now);
                true
            }
        }
    }

    /// Run `f` unless it already ran within the last `interval` under `id`.
    pub fn run_every(&mut self, interval: Duration, id: &str, f: impl FnOnce()) -> bool {
        let due = self.is_due(id, interval);
        if due {
            f();
        }
        due
    }
}

/// Register `controller` on the bus and spawn its loop.
///
/// The subscription is in place when this returns, so events posted
/// afterwards are not missed.
pub fn spawn_controller(controller: Box<dyn Controller>, events: Arc<EventManager>) -> TaskHandle {
    let (handle, rx) = events.mailbox(controller.name());

    let mask = controller.subscriptions();
    if !mask.is_empty() {
        events.subscribe(mask, &handle);
    }

    let task = Task::new(controller.name())
        .stack_size(controller.stack_size())
        .priority(controller.priority());
    let ctx = ControllerContext::new(handle, events);

    task.spawn(run(controller, ctx, rx))
}

async fn run(mut controller: Box<dyn Controller>, mut ctx: ControllerContext, mut rx: mpsc::Receiver<Event>) {
    controller.on_start(&mut ctx).await;
    debug!(controller = %ctx.name(), "controller started");

    let interval = controller.poll_interval();
    loop {
        match timeout(interval, rx.recv()).await {
            Ok(Some(event)) => {
                trace!(controller = %ctx.name(), notification = ?event.notification, "dispatching event");
                controller.on_event(&mut ctx, event).await;
            }
            // The context keeps a sender alive, so the queue never closes.
            Ok(None) => tokio::time::sleep(interval).await,
            Err(_) => {}
        }

        controller.poll(&mut ctx).await;
    }
}

/// Holds the application's controllers until they are started together.
pub struct TaskRunner {
    events: Arc<EventManager>,
    controllers: Vec<Box<dyn Controller>>,
}

impl TaskRunner {
    pub fn new(events: Arc<EventManager>) -> Self {
        Self {
            events,
            controllers: Vec::new(),
        }
    }

    pub fn add(&mut self, controller: impl Controller + 'static) -> &mut Self {
        self.controllers.push(Box::new(controller));
        self
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Spawn every controller, each on its own task.
    pub fn start(self) -> Vec<TaskHandle> {
        self.controllers
            .into_iter()
            .map(|c| spawn_controller(c, Arc::clone(&self.events)))
            .collect()
    }
}
