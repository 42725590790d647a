use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use picoweb::events::{Event, EventManager, EventMask, Notification, SystemNotification};
use picoweb::task::{spawn_controller, Controller, ControllerContext, Task, TaskRunner};

/// Reports every hook call on a channel.
struct Recorder {
    name: &'static str,
    mask: EventMask,
    seen: mpsc::UnboundedSender<(&'static str, Notification)>,
    polls: Arc<AtomicUsize>,
}

impl Recorder {
    fn new(
        name: &'static str,
        mask: EventMask,
        seen: &mpsc::UnboundedSender<(&'static str, Notification)>,
    ) -> Self {
        Self {
            name,
            mask,
            seen: seen.clone(),
            polls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Controller for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    fn subscriptions(&self) -> EventMask {
        self.mask
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(10)
    }

    async fn on_event(&mut self, _ctx: &mut ControllerContext, event: Event) {
        let _ = self.seen.send((self.name, event.notification));
    }

    async fn poll(&mut self, _ctx: &mut ControllerContext) {
        self.polls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Everything received until the channel has been quiet for a while.
async fn drain(rx: &mut mpsc::UnboundedReceiver<(&'static str, Notification)>) -> Vec<(&'static str, Notification)> {
    let mut out = Vec::new();
    while let Ok(Some(item)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        out.push(item);
    }
    out
}

#[tokio::test]
async fn test_controllers_only_see_subscribed_events() {
    let events = Arc::new(EventManager::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut runner = TaskRunner::new(Arc::clone(&events));
    runner
        .add(Recorder::new(
            "network",
            EventMask::user(1) | EventMask::system(SystemNotification::NetworkReady),
            &tx,
        ))
        .add(Recorder::new("valves", EventMask::user(2), &tx));
    assert_eq!(runner.len(), 2);
    let tasks = runner.start();

    assert_eq!(events.subscriber_count(), 2);

    assert_eq!(events.post_event(Event::user(1)), 1);
    assert_eq!(events.post_event(Event::user(2)), 1);
    assert_eq!(events.post_event(Event::user(3)), 0);
    assert_eq!(events.post_event(SystemNotification::NetworkReady), 1);
    assert_eq!(events.post_event(SystemNotification::TimeValid), 0);

    let mut seen = drain(&mut rx).await;
    seen.sort_by_key(|(name, n)| (*name, n.is_system(), n.code()));

    assert_eq!(
        seen,
        vec![
            ("network", Notification::User(1)),
            ("network", Notification::System(SystemNotification::NetworkReady)),
            ("valves", Notification::User(2)),
        ]
    );

    for task in tasks {
        task.abort();
    }
}

#[tokio::test]
async fn test_each_post_is_delivered_exactly_once() {
    let events = Arc::new(EventManager::new(64));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = spawn_controller(Box::new(Recorder::new("counter", EventMask::user(9), &tx)), Arc::clone(&events));

    for _ in 0..20 {
        assert_eq!(events.post_event(Event::user(9)), 1);
    }

    let seen = drain(&mut rx).await;
    assert_eq!(seen.len(), 20);
    assert!(seen.iter().all(|(_, n)| *n == Notification::User(9)));

    task.abort();
}

#[tokio::test]
async fn test_high_user_codes_are_delivered() {
    let events = EventManager::default();

    let (wide, mut wide_rx) = events.mailbox("wide");
    events.subscribe(EventMask::ALL, &wide);
    let (narrow, mut narrow_rx) = events.mailbox("narrow");
    events.subscribe(EventMask::user(100) | EventMask::user(255), &narrow);

    assert_eq!(events.post_event(Event::user(200)), 1);
    assert_eq!(events.post_event(Event::user(100)), 2);
    assert_eq!(events.post_event(Event::user(255)), 2);

    let wide_codes: Vec<_> = std::iter::from_fn(|| wide_rx.try_recv().ok()).map(|e| e.notification).collect();
    assert_eq!(wide_codes, vec![Notification::User(200), Notification::User(100), Notification::User(255)]);

    assert!(events.has_pending_events(&narrow));
    let narrow_codes: Vec<_> = std::iter::from_fn(|| narrow_rx.try_recv().ok()).map(|e| e.notification).collect();
    assert_eq!(narrow_codes, vec![Notification::User(100), Notification::User(255)]);
}

#[tokio::test]
async fn test_directed_event_reaches_only_target() {
    let events = Arc::new(EventManager::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let (target, mut target_rx) = events.mailbox("target");
    events.subscribe(EventMask::user(4), &target);
    let other = spawn_controller(Box::new(Recorder::new("other", EventMask::user(4), &tx)), Arc::clone(&events));

    assert_eq!(events.post_event(Event::user(4).with_payload(17u32).to(target.id())), 1);

    let event = target_rx.try_recv().unwrap();
    assert_eq!(event.payload::<u32>(), Some(&17));
    assert_eq!(event.payload::<String>(), None);
    assert!(drain(&mut rx).await.is_empty());

    other.abort();
}

#[tokio::test]
async fn test_poll_runs_without_events() {
    let events = Arc::new(EventManager::default());
    let (tx, _rx) = mpsc::unbounded_channel();
    let recorder = Recorder::new("idle", EventMask::NONE, &tx);
    let polls = Arc::clone(&recorder.polls);

    let task = spawn_controller(Box::new(recorder), Arc::clone(&events));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(polls.load(Ordering::SeqCst) >= 3);
    assert_eq!(events.subscriber_count(), 0);
    assert!(!task.is_finished());
    task.abort();
}

#[tokio::test]
async fn test_task_join_and_abort() {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let done = Task::new("worker").stack_size(2048).priority(3).spawn(async move {
        let _ = tx.send(42);
    });
    assert_eq!(done.name(), "worker");
    assert_eq!(rx.await.unwrap(), 42);
    done.join().await.unwrap();

    let forever = Task::new("forever").spawn(std::future::pending());
    forever.abort();
    assert!(forever.join().await.unwrap_err().is_cancelled());
}
