//! Process-wide LISTEN/NOTIFY subscriptions.
//!
//! One [`ListenerRegistry`] keeps at most one dedicated connection per target
//! database. Each connection runs on a background task that fans
//! notifications out to per-channel callbacks and pings the server
//! periodically. When the connection fails, the listener is removed and every
//! `on_unlisten` callback is told why; the next `listen` connects afresh.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, LazyLock, Mutex, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SqlDbError, panic_message};

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::PgNotificationConnector;

/// Interval between keep-alive pings on idle listener connections.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(90);

/// A notification delivered on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
    /// Server process that sent the notification.
    pub process_id: i32,
}

/// Called with each notification on a subscribed channel.
pub type NotifyCallback = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Called once a channel stops being listened to: with `None` after an
/// explicit unlisten, with the failure when the connection was lost.
pub type UnlistenCallback = Arc<dyn Fn(&str, Option<&SqlDbError>) + Send + Sync>;

/// A dedicated connection that receives notifications.
#[async_trait]
pub trait NotificationTransport: Send {
    async fn listen(&mut self, channel: &str) -> Result<()>;

    async fn unlisten(&mut self, channel: &str) -> Result<()>;

    async fn ping(&mut self) -> Result<()>;

    /// The next notification, or `Ok(None)` once the connection has closed.
    /// Must be cancel-safe.
    async fn recv(&mut self) -> Result<Option<Notification>>;
}

/// Opens [`NotificationTransport`]s to one database.
#[async_trait]
pub trait NotificationConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn NotificationTransport>>;
}

#[derive(Default)]
struct Subscription {
    on_notify: Vec<NotifyCallback>,
    on_unlisten: Vec<UnlistenCallback>,
}

type Subscriptions = Arc<RwLock<HashMap<String, Subscription>>>;

enum Command {
    Listen(String, oneshot::Sender<Result<()>>),
    Unlisten(String, oneshot::Sender<Result<()>>),
    Close(oneshot::Sender<()>),
}

struct Listener {
    id: u64,
    subscriptions: Subscriptions,
    commands: mpsc::UnboundedSender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Listener {
    async fn request(&self, make: impl FnOnce(oneshot::Sender<Result<()>>) -> Command) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| SqlDbError::ConnectionError("notification listener has stopped".into()))?;
        rx.await
            .map_err(|_| SqlDbError::ConnectionError("notification listener has stopped".into()))?
    }
}

struct RegistryInner {
    listeners: Mutex<HashMap<String, Arc<Listener>>>,
    // Serializes connects and subscription changes so one channel is only
    // LISTENed once.
    changes: tokio::sync::Mutex<()>,
    ping_interval: Duration,
    next_id: std::sync::atomic::AtomicU64,
}

/// Listeners keyed by connect string.
#[derive(Clone)]
pub struct ListenerRegistry {
    inner: Arc<RegistryInner>,
}

static GLOBAL: LazyLock<ListenerRegistry> =
    LazyLock::new(|| ListenerRegistry::new(DEFAULT_PING_INTERVAL));

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("targets", &self.targets())
            .field("ping_interval", &self.inner.ping_interval)
            .finish()
    }
}

impl ListenerRegistry {
    #[must_use]
    pub fn new(ping_interval: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                listeners: Mutex::new(HashMap::new()),
                changes: tokio::sync::Mutex::new(()),
                ping_interval,
                next_id: std::sync::atomic::AtomicU64::new(1),
            }),
        }
    }

    /// The process-wide registry connections use by default.
    #[must_use]
    pub fn global() -> &'static ListenerRegistry {
        &GLOBAL
    }

    /// Connect strings with a live listener.
    #[must_use]
    pub fn targets(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.inner.listeners).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Subscribe to `channel` on the database identified by `key`.
    ///
    /// The first subscription to a channel issues `LISTEN`; later ones only
    /// add callbacks. If that `LISTEN` fails on a listener with no other
    /// channels, the listener is closed and the next call reconnects.
    ///
    /// Channel names are exact and case-sensitive, as `pg_notify` treats
    /// them. An unquoted `NOTIFY Jobs` reaches channel `jobs`.
    ///
    /// # Errors
    /// Connect or `LISTEN` failures.
    pub async fn listen(
        &self,
        key: &str,
        connector: &dyn NotificationConnector,
        channel: &str,
        on_notify: NotifyCallback,
        on_unlisten: Option<UnlistenCallback>,
    ) -> Result<()> {
        let _changes = self.inner.changes.lock().await;
        let listener = match self.listener(key) {
            Some(listener) => listener,
            None => self.start(key, connector).await?,
        };

        let subscribed = read(&listener.subscriptions).contains_key(channel);
        if !subscribed {
            let owned = channel.to_string();
            if let Err(err) = listener.request(|reply| Command::Listen(owned, reply)).await {
                if read(&listener.subscriptions).is_empty() {
                    self.discard(key, &listener).await;
                }
                return Err(err);
            }
            debug!(target_db = key, channel, "listening");
        }
        let mut subs = write(&listener.subscriptions);
        let sub = subs.entry(channel.to_string()).or_default();
        sub.on_notify.push(on_notify);
        sub.on_unlisten.extend(on_unlisten);
        Ok(())
    }

    /// Drop every callback for `channel` and issue `UNLISTEN`. The channel's
    /// `on_unlisten` callbacks run with `None`. Unknown channels are a no-op.
    ///
    /// # Errors
    /// `UNLISTEN` failures.
    pub async fn unlisten(&self, key: &str, channel: &str) -> Result<()> {
        let _changes = self.inner.changes.lock().await;
        let Some(listener) = self.listener(key) else {
            return Ok(());
        };
        let Some(sub) = write(&listener.subscriptions).remove(channel) else {
            return Ok(());
        };
        let owned = channel.to_string();
        let result = listener.request(|reply| Command::Unlisten(owned, reply)).await;
        notify_unlisten(channel, &sub.on_unlisten, None);
        debug!(target_db = key, channel, "unlistened");
        result
    }

    /// True when at least one callback is registered for `channel`.
    #[must_use]
    pub fn is_listening(&self, key: &str, channel: &str) -> bool {
        self.listener(key)
            .is_some_and(|l| read(&l.subscriptions).contains_key(channel))
    }

    /// Close the listener for `key`, running every `on_unlisten` callback.
    pub async fn close(&self, key: &str) {
        let _changes = self.inner.changes.lock().await;
        let Some(listener) = lock(&self.inner.listeners).remove(key) else {
            return;
        };
        stop(&listener).await;
        let subs = std::mem::take(&mut *write(&listener.subscriptions));
        for (channel, sub) in subs {
            notify_unlisten(&channel, &sub.on_unlisten, None);
        }
        info!(target_db = key, "notification listener closed");
    }

    /// Close every listener.
    pub async fn shutdown(&self) {
        for key in self.targets() {
            self.close(&key).await;
        }
    }

    fn listener(&self, key: &str) -> Option<Arc<Listener>> {
        lock(&self.inner.listeners).get(key).cloned()
    }

    /// Stop a listener that holds no channels and drop it from the registry.
    async fn discard(&self, key: &str, listener: &Arc<Listener>) {
        {
            let mut listeners = lock(&self.inner.listeners);
            if listeners.get(key).is_some_and(|l| Arc::ptr_eq(l, listener)) {
                listeners.remove(key);
            }
        }
        stop(listener).await;
        debug!(target_db = key, "dropped listener without channels");
    }

    async fn start(&self, key: &str, connector: &dyn NotificationConnector) -> Result<Arc<Listener>> {
        let transport = connector.connect().await?;
        let (commands, rx) = mpsc::unbounded_channel();
        let listener = Arc::new(Listener {
            id: self
                .inner
                .next_id
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            subscriptions: Arc::default(),
            commands,
            task: Mutex::new(None),
        });
        let task = tokio::spawn(run_listener(
            transport,
            rx,
            Arc::clone(&listener.subscriptions),
            self.inner.ping_interval,
            Arc::downgrade(&self.inner),
            key.to_string(),
            listener.id,
        ));
        *lock(&listener.task) = Some(task);
        lock(&self.inner.listeners).insert(key.to_string(), Arc::clone(&listener));
        info!(target_db = key, "notification listener connected");
        Ok(listener)
    }
}

async fn stop(listener: &Listener) {
    let (tx, rx) = oneshot::channel();
    if listener.commands.send(Command::Close(tx)).is_ok() {
        let _ = rx.await;
    }
    let task = lock(&listener.task).take();
    if let Some(task) = task {
        let _ = task.await;
    }
}

async fn run_listener(
    mut transport: Box<dyn NotificationTransport>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    subscriptions: Subscriptions,
    ping_interval: Duration,
    registry: Weak<RegistryInner>,
    key: String,
    id: u64,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + ping_interval, ping_interval);
    let failure = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Listen(channel, reply)) => {
                    let _ = reply.send(transport.listen(&channel).await);
                }
                Some(Command::Unlisten(channel, reply)) => {
                    let _ = reply.send(transport.unlisten(&channel).await);
                }
                Some(Command::Close(reply)) => {
                    let _ = reply.send(());
                    break None;
                }
                None => break None,
            },
            received = transport.recv() => match received {
                Ok(Some(notification)) => dispatch(&subscriptions, &notification),
                Ok(None) => {
                    break Some(SqlDbError::ConnectionError(
                        "notification connection closed".into(),
                    ));
                }
                Err(err) => break Some(err),
            },
            _ = ticker.tick() => {
                if let Err(err) = transport.ping().await {
                    break Some(err);
                }
            }
        }
    };

    let Some(err) = failure else {
        return;
    };
    warn!(target_db = %key, error = %err, "notification listener lost its connection");
    if let Some(registry) = registry.upgrade() {
        let mut listeners = lock(&registry.listeners);
        if listeners.get(&key).is_some_and(|l| l.id == id) {
            listeners.remove(&key);
        }
    }
    let subs = std::mem::take(&mut *write(&subscriptions));
    for (channel, sub) in subs {
        notify_unlisten(&channel, &sub.on_unlisten, Some(&err));
    }
}

fn dispatch(subscriptions: &Subscriptions, notification: &Notification) {
    let callbacks: Vec<NotifyCallback> = match read(subscriptions).get(&notification.channel) {
        Some(sub) => sub.on_notify.clone(),
        None => return,
    };
    for callback in callbacks {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(notification))) {
            error!(
                channel = %notification.channel,
                panic = %panic_message(payload.as_ref()),
                "notification callback panicked"
            );
        }
    }
}

fn notify_unlisten(channel: &str, callbacks: &[UnlistenCallback], err: Option<&SqlDbError>) {
    for callback in callbacks {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(channel, err))) {
            error!(
                channel,
                panic = %panic_message(payload.as_ref()),
                "unlisten callback panicked"
            );
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn read<T>(l: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<T>(l: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}
