//! Self-healing message channel between two contexts.
//!
//! A [`PersistentConnection`] wraps whatever transport a [`Connector`] opens
//! and hides every teardown from its caller: open failures and lost ports both
//! feed one exponential reconnect loop, and `send` never returns an error.
//!
//! Each opened port is tagged with a generation number. Events carrying an
//! older generation belong to a port that has already been replaced or
//! dropped and are ignored, so a late close can never tear down its successor.

use crate::backoff::reconnect_delay;
use crate::config::HydrascopeConfig;
use crate::error::{HydraError, Result};
use crate::scheduler::{lock, Scheduler, TimerHandle};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// An open, bidirectional channel.
pub trait Port<M>: Send {
    fn post(&mut self, message: &M) -> Result<()>;
    fn close(&mut self);
}

/// Opens ports on behalf of a [`PersistentConnection`].
///
/// `open` must not invoke the supplied [`PortEvents`] before it returns;
/// transports typically hand them to a reader thread.
pub trait Connector: Send + Sync + 'static {
    type Outgoing: Send + 'static;
    type Incoming: Send + 'static;
    type Port: Port<Self::Outgoing> + 'static;

    fn open(&self, events: PortEvents<Self::Incoming>) -> Result<Self::Port>;
}

/// Callbacks a port uses to report inbound traffic and closure.
pub struct PortEvents<M> {
    on_message: Arc<dyn Fn(M) + Send + Sync>,
    on_close: Arc<dyn Fn() + Send + Sync>,
}

impl<M> Clone for PortEvents<M> {
    fn clone(&self) -> Self {
        Self {
            on_message: Arc::clone(&self.on_message),
            on_close: Arc::clone(&self.on_close),
        }
    }
}

impl<M> PortEvents<M> {
    pub fn new(
        on_message: impl Fn(M) + Send + Sync + 'static,
        on_close: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_message: Arc::new(on_message),
            on_close: Arc::new(on_close),
        }
    }

    pub fn message(&self, message: M) {
        (self.on_message)(message)
    }

    pub fn closed(&self) {
        (self.on_close)()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub send_retry: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from(&HydrascopeConfig::default())
    }
}

impl From<&HydrascopeConfig> for ConnectionOptions {
    fn from(config: &HydrascopeConfig) -> Self {
        Self {
            reconnect_base: Duration::from_millis(config.reconnect.base_ms),
            reconnect_max: Duration::from_millis(config.reconnect.max_ms),
            send_retry: config.send_retry_delay(),
        }
    }
}

type Listener<M> = Arc<dyn Fn(&M) + Send + Sync>;
type Hook<C> = Arc<dyn Fn(&PersistentConnection<C>) + Send + Sync>;

struct ConnectionState<P> {
    port: Option<P>,
    generation: u64,
    reconnect_attempts: u32,
    pending_timer: Option<TimerHandle>,
}

struct Listeners<M> {
    next_id: u64,
    entries: Vec<(u64, Listener<M>)>,
}

struct Hooks<C: Connector> {
    on_connect: Option<Hook<C>>,
    on_disconnect: Option<Hook<C>>,
}

struct Shared<C: Connector> {
    connector: C,
    scheduler: Arc<dyn Scheduler>,
    options: ConnectionOptions,
    state: Mutex<ConnectionState<C::Port>>,
    listeners: Mutex<Listeners<C::Incoming>>,
    hooks: Mutex<Hooks<C>>,
}

/// Handle returned by [`PersistentConnection::add_listener`].
#[must_use = "dropping a Subscription keeps the listener registered"]
pub struct Subscription {
    remove: Box<dyn FnOnce() + Send>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        (self.remove)()
    }
}

/// Cheaply cloneable handle; clones share one underlying connection.
pub struct PersistentConnection<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for PersistentConnection<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> PersistentConnection<C> {
    pub fn new(connector: C, scheduler: Arc<dyn Scheduler>, options: ConnectionOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                scheduler,
                options,
                state: Mutex::new(ConnectionState {
                    port: None,
                    generation: 0,
                    reconnect_attempts: 0,
                    pending_timer: None,
                }),
                listeners: Mutex::new(Listeners {
                    next_id: 0,
                    entries: Vec::new(),
                }),
                hooks: Mutex::new(Hooks {
                    on_connect: None,
                    on_disconnect: None,
                }),
            }),
        }
    }

    /// Runs after every successful open, including reconnects.
    pub fn on_connect(&self, hook: impl Fn(&PersistentConnection<C>) + Send + Sync + 'static) {
        lock(&self.shared.hooks).on_connect = Some(Arc::new(hook));
    }

    /// Runs whenever an open port is lost.
    pub fn on_disconnect(&self, hook: impl Fn(&PersistentConnection<C>) + Send + Sync + 'static) {
        lock(&self.shared.hooks).on_disconnect = Some(Arc::new(hook));
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared.state).port.is_some()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.shared.state).reconnect_attempts
    }

    /// Opens a port unless one is already open.
    pub fn connect(&self) {
        let mut state = lock(&self.shared.state);
        if state.port.is_some() {
            return;
        }
        if let Some(timer) = state.pending_timer.take() {
            timer.cancel();
        }

        state.generation += 1;
        let generation = state.generation;

        match self.shared.connector.open(self.port_events(generation)) {
            Ok(port) => {
                state.port = Some(port);
                state.reconnect_attempts = 0;
                drop(state);
                tracing::debug!(generation, "Connection established");
                self.run_hook(|hooks| hooks.on_connect.clone());
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    attempts = state.reconnect_attempts,
                    "Failed to open connection"
                );
                self.schedule_reconnect(&mut state);
            }
        }
    }

    /// Posts `message`, reconnecting behind the caller's back when needed.
    ///
    /// While disconnected the message is held for one retry after the
    /// configured delay; if the port is still missing then, it is dropped.
    pub fn send(&self, message: C::Outgoing) {
        let mut state = lock(&self.shared.state);
        if state.port.is_some() {
            let lost = self.post_or_drop_port(&mut state, &message);
            drop(state);
            if lost {
                self.run_hook(|hooks| hooks.on_disconnect.clone());
            }
            return;
        }
        drop(state);

        self.connect();

        let weak = Arc::downgrade(&self.shared);
        self.shared.scheduler.schedule(
            self.shared.options.send_retry,
            Box::new(move || {
                if let Some(connection) = upgrade(&weak) {
                    connection.retry_send(message);
                }
            }),
        );
    }

    pub fn add_listener(&self, listener: impl Fn(&C::Incoming) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut listeners = lock(&self.shared.listeners);
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push((id, Arc::new(listener)));
            id
        };

        let weak = Arc::downgrade(&self.shared);
        Subscription {
            remove: Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    lock(&shared.listeners)
                        .entries
                        .retain(|(entry_id, _)| *entry_id != id);
                }
            }),
        }
    }

    /// Tears the connection down for good: no reconnect follows.
    pub fn disconnect(&self) {
        let port = {
            let mut state = lock(&self.shared.state);
            if let Some(timer) = state.pending_timer.take() {
                timer.cancel();
            }
            state.generation += 1;
            state.reconnect_attempts = 0;
            state.port.take()
        };
        if let Some(mut port) = port {
            port.close();
        }
        lock(&self.shared.listeners).entries.clear();
        tracing::debug!("Connection closed by owner");
    }

    fn port_events(&self, generation: u64) -> PortEvents<C::Incoming> {
        let on_message = Arc::downgrade(&self.shared);
        let on_close = Arc::downgrade(&self.shared);
        PortEvents::new(
            move |message| {
                if let Some(connection) = upgrade(&on_message) {
                    connection.dispatch(generation, message);
                }
            },
            move || {
                if let Some(connection) = upgrade(&on_close) {
                    connection.handle_port_closed(generation);
                }
            },
        )
    }

    fn dispatch(&self, generation: u64, message: C::Incoming) {
        {
            let state = lock(&self.shared.state);
            if state.generation != generation || state.port.is_none() {
                tracing::debug!(generation, "Dropping message from superseded port");
                return;
            }
        }

        let listeners: Vec<Listener<C::Incoming>> = lock(&self.shared.listeners)
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(&message))) {
                tracing::error!(panic = panic_message(payload.as_ref()), "Connection listener panicked");
            }
        }
    }

    fn handle_port_closed(&self, generation: u64) {
        let mut state = lock(&self.shared.state);
        if state.generation != generation || state.port.is_none() {
            tracing::debug!(generation, "Ignoring close from superseded port");
            return;
        }
        tracing::info!(generation, "Connection lost; scheduling reconnect");
        state.port = None;
        self.schedule_reconnect(&mut state);
        drop(state);
        self.run_hook(|hooks| hooks.on_disconnect.clone());
    }

    fn retry_send(&self, message: C::Outgoing) {
        let mut state = lock(&self.shared.state);
        if state.port.is_none() {
            tracing::debug!("Still disconnected; dropping deferred message");
            return;
        }
        let lost = self.post_or_drop_port(&mut state, &message);
        drop(state);
        if lost {
            self.run_hook(|hooks| hooks.on_disconnect.clone());
        }
    }

    /// A failed post is handled exactly like a closed port, except for
    /// [`HydraError::Encode`], which only drops the message. Returns `true`
    /// when the port was lost.
    fn post_or_drop_port(&self, state: &mut ConnectionState<C::Port>, message: &C::Outgoing) -> bool {
        let Some(port) = state.port.as_mut() else {
            return false;
        };
        let err = match port.post(message) {
            Ok(()) => return false,
            Err(HydraError::Encode(details)) => {
                tracing::warn!(error = %details, "Dropping message that cannot be framed");
                return false;
            }
            Err(err) => err,
        };

        tracing::warn!(error = %err, "Failed to post message; treating port as closed");
        if let Some(mut port) = state.port.take() {
            port.close();
        }
        self.schedule_reconnect(state);
        true
    }

    fn schedule_reconnect(&self, state: &mut ConnectionState<C::Port>) {
        if let Some(timer) = state.pending_timer.take() {
            timer.cancel();
        }
        state.reconnect_attempts = state.reconnect_attempts.saturating_add(1);
        let delay = reconnect_delay(
            state.reconnect_attempts,
            self.shared.options.reconnect_base,
            self.shared.options.reconnect_max,
        );
        tracing::debug!(
            attempt = state.reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        let weak = Arc::downgrade(&self.shared);
        let timer = self.shared.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(connection) = upgrade(&weak) {
                    connection.connect();
                }
            }),
        );
        state.pending_timer = Some(timer);
    }

    fn run_hook(&self, select: impl FnOnce(&Hooks<C>) -> Option<Hook<C>>) {
        let hook = select(&lock(&self.shared.hooks));
        if let Some(hook) = hook {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(self))) {
                tracing::error!(panic = panic_message(payload.as_ref()), "Connection hook panicked");
            }
        }
    }
}

fn upgrade<C: Connector>(weak: &Weak<Shared<C>>) -> Option<PersistentConnection<C>> {
    weak.upgrade().map(|shared| PersistentConnection { shared })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing {
    //! In-memory connector that records traffic and lets tests play the peer.

    use super::{Connector, Port, PortEvents};
    use crate::error::{HydraError, Result};
    use crate::scheduler::lock;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct Inner<Out, In> {
        opens: usize,
        fail_next_opens: VecDeque<bool>,
        refuse_all: bool,
        fail_posts: bool,
        fail_encoding: bool,
        sent: Vec<Out>,
        events: Vec<PortEvents<In>>,
    }

    /// Every opened port shares one sent-message log; the most recent
    /// port's events are what [`RecordingConnector::deliver`] and
    /// [`RecordingConnector::drop_port`] act on.
    pub struct RecordingConnector<Out, In> {
        inner: Arc<Mutex<Inner<Out, In>>>,
    }

    impl<Out, In> Clone for RecordingConnector<Out, In> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    impl<Out, In> Default for RecordingConnector<Out, In> {
        fn default() -> Self {
            Self {
                inner: Arc::new(Mutex::new(Inner {
                    opens: 0,
                    fail_next_opens: VecDeque::new(),
                    refuse_all: false,
                    fail_posts: false,
                    fail_encoding: false,
                    sent: Vec::new(),
                    events: Vec::new(),
                })),
            }
        }
    }

    impl<Out: Clone, In> RecordingConnector<Out, In> {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn opens(&self) -> usize {
            lock(&self.inner).opens
        }

        pub fn sent(&self) -> Vec<Out> {
            lock(&self.inner).sent.clone()
        }

        pub fn clear_sent(&self) {
            lock(&self.inner).sent.clear();
        }

        /// Refuses every open until called again with `false`.
        pub fn refuse(&self, refuse: bool) {
            lock(&self.inner).refuse_all = refuse;
        }

        /// Fails the next `count` opens, then succeeds.
        pub fn fail_next_opens(&self, count: usize) {
            let mut inner = lock(&self.inner);
            inner.fail_next_opens.extend(std::iter::repeat(true).take(count));
        }

        pub fn fail_posts(&self, fail: bool) {
            lock(&self.inner).fail_posts = fail;
        }

        /// Rejects posts as unframeable while leaving the port usable.
        pub fn fail_encoding(&self, fail: bool) {
            lock(&self.inner).fail_encoding = fail;
        }

        /// Feeds an inbound message through the latest port.
        pub fn deliver(&self, message: In) {
            let events = lock(&self.inner).events.last().cloned();
            if let Some(events) = events {
                events.message(message);
            }
        }

        /// Simulates the peer closing the latest port.
        pub fn drop_port(&self) {
            let events = lock(&self.inner).events.last().cloned();
            if let Some(events) = events {
                events.closed();
            }
        }

        /// Fires the close event of the `index`-th opened port.
        pub fn drop_port_at(&self, index: usize) {
            let events = lock(&self.inner).events.get(index).cloned();
            if let Some(events) = events {
                events.closed();
            }
        }
    }

    pub struct RecordingPort<Out, In> {
        inner: Arc<Mutex<Inner<Out, In>>>,
    }

    impl<Out, In> Port<Out> for RecordingPort<Out, In>
    where
        Out: Clone + Send + 'static,
        In: Send + 'static,
    {
        fn post(&mut self, message: &Out) -> Result<()> {
            let mut inner = lock(&self.inner);
            if inner.fail_posts {
                return Err(HydraError::Transport("post refused".to_string()));
            }
            if inner.fail_encoding {
                return Err(HydraError::Encode("frame too large".to_string()));
            }
            inner.sent.push(message.clone());
            Ok(())
        }

        fn close(&mut self) {}
    }

    impl<Out, In> Connector for RecordingConnector<Out, In>
    where
        Out: Clone + Send + 'static,
        In: Send + 'static,
    {
        type Outgoing = Out;
        type Incoming = In;
        type Port = RecordingPort<Out, In>;

        fn open(&self, events: PortEvents<In>) -> Result<Self::Port> {
            let mut inner = lock(&self.inner);
            inner.opens += 1;
            let scripted_failure = inner.fail_next_opens.pop_front().unwrap_or(false);
            if inner.refuse_all || scripted_failure {
                return Err(HydraError::Transport("connection refused".to_string()));
            }
            inner.events.push(events);
            Ok(RecordingPort {
                inner: Arc::clone(&self.inner),
            })
        }
    }
}
