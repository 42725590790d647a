//! Publish/subscribe event bus.

mod manager;
mod notification;

pub use manager::{ControllerHandle, EventManager, DEFAULT_QUEUE_DEPTH};
pub use notification::{ControllerId, Event, EventMask, Notification, Payload, SystemNotification};
