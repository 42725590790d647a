use std::any::Any;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

/// Notifications raised by the framework itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SystemNotification {
    None = 0,
    NetworkReady,
    TimeValid,
    TimeInvalid,
    TimeSync,
    ServerStarted,
    ConfigUpdated,
    OtaAvailable,
    GpioChange,
}

impl SystemNotification {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// What an event is about: a system notification or an application code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notification {
    System(SystemNotification),
    User(u8),
}

impl Notification {
    pub fn code(&self) -> u8 {
        match self {
            Notification::System(kind) => kind.code(),
            Notification::User(code) => *code,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Notification::System(_))
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Notification::User(_))
    }
}

impl From<SystemNotification> for Notification {
    fn from(kind: SystemNotification) -> Self {
        Notification::System(kind)
    }
}

/// Identity of a controller mailbox, used for directed events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerId(pub(crate) u32);

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Set of notifications a controller is interested in.
///
/// System codes and the 256 user codes live in separate bitsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventMask {
    system: u32,
    user: [u64; 4],
}

fn bit(code: u8) -> u32 {
    1u32.checked_shl(u32::from(code)).unwrap_or(0)
}

fn user_bit(code: u8) -> [u64; 4] {
    let mut words = [0u64; 4];
    words[usize::from(code / 64)] = 1 << (code % 64);
    words
}

impl EventMask {
    pub const NONE: EventMask = EventMask {
        system: 0,
        user: [0; 4],
    };
    pub const ALL: EventMask = EventMask {
        system: u32::MAX,
        user: [u64::MAX; 4],
    };

    pub fn system(kind: SystemNotification) -> Self {
        Self {
            system: bit(kind.code()),
            user: [0; 4],
        }
    }

    pub fn user(code: u8) -> Self {
        Self {
            system: 0,
            user: user_bit(code),
        }
    }

    pub fn contains(&self, notification: &Notification) -> bool {
        match notification {
            Notification::System(kind) => self.system & bit(kind.code()) != 0,
            Notification::User(code) => self.user[usize::from(code / 64)] & (1 << (code % 64)) != 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.system == 0 && self.user.iter().all(|w| *w == 0)
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: Self) -> Self {
        let mut user = self.user;
        for (word, other) in user.iter_mut().zip(rhs.user) {
            *word |= other;
        }
        EventMask {
            system: self.system | rhs.system,
            user,
        }
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

impl From<SystemNotification> for EventMask {
    fn from(kind: SystemNotification) -> Self {
        EventMask::system(kind)
    }
}

pub type Payload = Arc<dyn Any + Send + Sync>;

/// A notification on its way through the event bus.
///
/// Without a `target` the event is broadcast to every subscriber whose mask
/// contains it.
#[derive(Clone)]
pub struct Event {
    pub notification: Notification,
    payload: Option<Payload>,
    /// Payload size in bytes, informational
    pub size: usize,
    pub target: Option<ControllerId>,
}

impl Event {
    pub fn new(notification: impl Into<Notification>) -> Self {
        Self {
            notification: notification.into(),
            payload: None,
            size: 0,
            target: None,
        }
    }

    pub fn system(kind: SystemNotification) -> Self {
        Self::new(kind)
    }

    pub fn user(code: u8) -> Self {
        Self::new(Notification::User(code))
    }

    pub fn with_payload<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.size = std::mem::size_of::<T>();
        self.payload = Some(Arc::new(value));
        self
    }

    /// Deliver only to `target`.
    pub fn to(mut self, target: ControllerId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref()?.downcast_ref::<T>()
    }

    pub fn is_system(&self) -> bool {
        self.notification.is_system()
    }

    pub fn is_user(&self) -> bool {
        self.notification.is_user()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("notification", &self.notification)
            .field("has_payload", &self.payload.is_some())
            .field("size", &self.size)
            .field("target", &self.target)
            .finish()
    }
}

impl From<SystemNotification> for Event {
    fn from(kind: SystemNotification) -> Self {
        Event::system(kind)
    }
}

impl From<Notification> for Event {
    fn from(notification: Notification) -> Self {
        Event::new(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_and_user_codes_do_not_alias() {
        let mask = EventMask::system(SystemNotification::NetworkReady);
        assert!(mask.contains(&SystemNotification::NetworkReady.into()));
        assert!(!mask.contains(&Notification::User(SystemNotification::NetworkReady.code())));
    }

    #[test]
    fn masks_combine() {
        let mut mask = EventMask::user(3) | EventMask::system(SystemNotification::ServerStarted);
        mask |= EventMask::user(7);
        assert!(mask.contains(&Notification::User(3)));
        assert!(mask.contains(&Notification::User(7)));
        assert!(!mask.contains(&Notification::User(4)));
    }

    #[test]
    fn every_user_code_can_be_subscribed() {
        for code in [0u8, 31, 32, 63, 64, 100, 200, 255] {
            let mask = EventMask::user(code);
            assert!(!mask.is_empty());
            assert!(mask.contains(&Notification::User(code)));
            assert!(!mask.contains(&Notification::User(code.wrapping_add(1))));
            assert!(EventMask::ALL.contains(&Notification::User(code)));
        }
    }

    #[test]
    fn typed_payload_roundtrip() {
        let event = Event::user(1).with_payload(42u32);
        assert_eq!(event.payload::<u32>(), Some(&42));
        assert_eq!(event.payload::<String>(), None);
        assert_eq!(event.size, 4);
    }
}
