//! Host-side session client
//!
//! This module provides the main [`SlinkClient`] type: the promise-based
//! facade over the background worker. It owns the command channel, a
//! pending-future map keyed by host request id, and the callback map for
//! active subscriptions; a pump task translates worker events back into
//! future completions and sink invocations.
//!
//! # Client Lifecycle
//!
//! 1. **Build**: configure registries and session settings via the builder
//! 2. **Connect**: `connect()` resolves on the first transition to Connected
//! 3. **Use**: issue requests, subscribe to streams
//! 4. **Disconnect / Dispose**: `disconnect()` ends the session,
//!    `dispose()` shuts the worker down entirely
//!
//! # Reconnection
//!
//! Reconnection lives inside the worker's session: transient transport
//! failures are retried within the configured budget without the facade's
//! involvement. The facade itself never reconnects: a session drop is
//! forwarded as a status change and the consumer decides.
//!
//! # Worker Loss
//!
//! If the worker dies abnormally, every pending request rejects with
//! `WorkerLost`, every subscription is closed through its error sink, and
//! the `on_connection_error` hook fires.
//!
//! # Thread Safety
//!
//! All methods take `&self`; share the client across tasks behind an `Arc`.
//! Cross-boundary traffic is plain owned values over channels, so no state
//! is shared with the worker by reference.

use crate::worker::{Command, WorkerEvent};
use serde_json::Value;
use slink_core::{Error, ErrorPayload, Result, SessionId, SubscriptionId};
use slink_session::{SessionConfig, SessionStatus};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

/// Async subscription data sink
///
/// Invoked once per decoded notification, in wire order. Stored as a boxed
/// future factory so callers can register plain `async` closures.
pub type DataHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Async error sink for subscriptions and connection errors
///
/// Fires when a subscription closes abnormally (session drop, worker loss)
/// and for the `on_connection_error` hook.
pub type ErrorHandler =
    Arc<dyn Fn(Error) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Async lifecycle hook
///
/// Used for the `on_connected` and `on_disconnected` hooks.
pub type LifecycleHandler =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct SubscriptionEntry {
    /// Filled in once the subscribe reply delivers the server-assigned id
    subscription_id: Option<SubscriptionId>,
    on_data: DataHandler,
    on_error: ErrorHandler,
}

#[derive(Default)]
struct Hooks {
    on_connected: Option<LifecycleHandler>,
    on_disconnected: Option<LifecycleHandler>,
    on_connection_error: Option<ErrorHandler>,
}

#[derive(Clone)]
struct StatusSnapshot {
    status: SessionStatus,
    session_id: Option<SessionId>,
}

struct Shared {
    pending: Mutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, ErrorPayload>>>>,
    subscriptions: Mutex<HashMap<u64, SubscriptionEntry>>,
    hooks: Mutex<Hooks>,
    status: Mutex<StatusSnapshot>,
    disposed: AtomicBool,
}

/// Promise-based facade over one background worker
pub struct SlinkClient {
    commands: Mutex<Option<mpsc::Sender<Command>>>,
    shared: Arc<Shared>,
    config: SessionConfig,
    next_id: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SlinkClient {
    pub(crate) fn from_parts(
        commands: mpsc::Sender<Command>,
        events: mpsc::Receiver<WorkerEvent>,
        worker: JoinHandle<()>,
        config: SessionConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            hooks: Mutex::new(Hooks::default()),
            status: Mutex::new(StatusSnapshot {
                status: SessionStatus::Disconnected,
                session_id: None,
            }),
            disposed: AtomicBool::new(false),
        });
        let pump = tokio::spawn(pump(shared.clone(), events));
        Self {
            commands: Mutex::new(Some(commands)),
            shared,
            config,
            next_id: AtomicU64::new(0),
            worker: Mutex::new(Some(worker)),
            pump: Mutex::new(Some(pump)),
        }
    }

    /// Connect using the configuration the client was built with
    ///
    /// Resolves on the first transition to Connected. Connecting while
    /// already connected resolves immediately.
    ///
    /// # Errors
    ///
    /// Rejects with `ConnectionClosed` if the reconnect budget runs out
    /// before a session is established, and with `WorkerLost` if the worker
    /// is gone.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use slink_client::SlinkClient;
    /// # async fn example(client: &SlinkClient) -> slink_core::Result<()> {
    /// client.connect().await?;
    /// assert!(client.is_connected().await);
    /// # Ok(())
    /// # }
    /// ```
    #[tracing::instrument(skip(self))]
    pub async fn connect(&self) -> Result<()> {
        let config = self.config.clone();
        self.call(|request_id| Command::Connect { request_id, config })
            .await
            .map(|_| ())
    }

    /// Tear the session down
    ///
    /// Sends a best-effort `session.destroy`, cancels every outstanding
    /// request with `ConnectionClosed`, and resolves once the status is
    /// Disconnected. Idempotent: disconnecting while disconnected resolves
    /// immediately.
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        self.call(|request_id| Command::Disconnect { request_id })
            .await
            .map(|_| ())
    }

    /// Issue a registered command and await its decoded reply
    ///
    /// The command name and params cross the worker boundary as plain
    /// values; the worker reconstructs the typed call through the command
    /// registry, correlates the reply, and decodes it. The facade finally
    /// deserializes the decoded value into `R`.
    ///
    /// # Arguments
    ///
    /// * `command` - Name of a command registered on the builder
    /// * `params` - Parameters handed to the command's encoder
    /// * `timeout` - How long to wait for the reply
    ///
    /// # Errors
    ///
    /// - `NotConnected` when no session is established (nothing is queued)
    /// - `Timeout` when the reply does not arrive within `timeout`
    /// - `ServerError` when the reply status is not `"SUCCESS"`
    /// - `DecodeFailure` when the reply does not decode into `R`
    /// - `ConnectionClosed` when the session drops while waiting
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use slink_client::SlinkClient;
    /// # use serde_json::json;
    /// # use std::time::Duration;
    /// # async fn example(client: &SlinkClient) -> slink_core::Result<()> {
    /// let pong: String = client
    ///     .request("ping", json!({"echo": "hi"}), Duration::from_millis(500))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    #[tracing::instrument(skip(self, params), fields(command = %command))]
    pub async fn request<R>(&self, command: &str, params: Value, timeout: Duration) -> Result<R>
    where
        R: serde::de::DeserializeOwned,
    {
        let command = command.to_string();
        let timeout_ms = timeout.as_millis() as u64;
        let value = self
            .call(move |request_id| Command::SendRequest {
                request_id,
                command,
                params,
                timeout_ms,
            })
            .await?;
        serde_json::from_value(value).map_err(|e| Error::DecodeFailure(e.to_string()))
    }

    /// Subscribe to a registered subscription kind
    ///
    /// The sink is registered locally first, then the worker issues the
    /// subscribe request; once the server assigns a subscription id, every
    /// matching notification is decoded in the worker and delivered to
    /// `on_data` in wire order. `on_error` fires when the subscription
    /// closes abnormally (session drop, worker loss).
    ///
    /// Subscriptions do not survive a reconnect: after a session drop the
    /// sink receives `ConnectionClosed` and re-subscribing is the caller's
    /// decision.
    ///
    /// # Arguments
    ///
    /// * `subscription` - Name of a subscription kind registered on the builder
    /// * `params` - Parameters for the subscribe request
    /// * `on_data` - Async sink invoked per decoded notification
    /// * `on_error` - Async sink invoked when the subscription closes
    ///
    /// # Returns
    ///
    /// The internal id that binds `on_data` to the server-assigned stream;
    /// pass it to [`SlinkClient::unsubscribe`] to stop.
    ///
    /// # Deadlocks
    ///
    /// Handlers run on the event pump: awaiting another client call inside
    /// `on_data` deadlocks the pump. Spawn a task for such work instead.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use slink_client::SlinkClient;
    /// # use serde_json::json;
    /// # async fn example(client: &SlinkClient) -> slink_core::Result<()> {
    /// let handle = client
    ///     .subscribe(
    ///         "flow",
    ///         json!({"flow": "alpha"}),
    ///         |data| async move { println!("update: {data}") },
    ///         |err| async move { eprintln!("closed: {err}") },
    ///     )
    ///     .await?;
    /// client.unsubscribe(handle).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn subscribe<F, Fut, E, EFut>(
        &self,
        subscription: &str,
        params: Value,
        on_data: F,
        on_error: E,
    ) -> Result<u64>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        E: Fn(Error) -> EFut + Send + Sync + 'static,
        EFut: Future<Output = ()> + Send + 'static,
    {
        let internal_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = SubscriptionEntry {
            subscription_id: None,
            on_data: Arc::new(move |value| Box::pin(on_data(value))),
            on_error: Arc::new(move |error| Box::pin(on_error(error))),
        };
        // Register the sink before subscribing so no notification can race it.
        self.shared
            .subscriptions
            .lock()
            .await
            .insert(internal_id, entry);

        let subscription = subscription.to_string();
        let result = self
            .call(move |request_id| Command::Subscribe {
                request_id,
                subscription,
                params,
                internal_id,
            })
            .await;

        match result {
            Ok(value) => {
                let subscription_id = value["subscription_id"].as_str().map(SubscriptionId::from);
                if let Some(entry) = self
                    .shared
                    .subscriptions
                    .lock()
                    .await
                    .get_mut(&internal_id)
                {
                    entry.subscription_id = subscription_id;
                }
                Ok(internal_id)
            }
            Err(e) => {
                self.shared.subscriptions.lock().await.remove(&internal_id);
                Err(e)
            }
        }
    }

    /// Remove a subscription
    ///
    /// Local callbacks are removed first, so notifications bearing the same
    /// internal id after this call are dropped silently; the worker then
    /// fires the server-side unsubscribe without awaiting it (a timeout
    /// there is only logged).
    ///
    /// # Arguments
    ///
    /// * `internal_id` - The id returned by [`SlinkClient::subscribe`]
    ///
    /// # Returns
    ///
    /// `Ok(())` also for ids that are unknown or never activated; there is
    /// nothing server-side to undo in either case.
    pub async fn unsubscribe(&self, internal_id: u64) -> Result<()> {
        let entry = self.shared.subscriptions.lock().await.remove(&internal_id);
        let Some(entry) = entry else {
            return Ok(());
        };
        let Some(subscription_id) = entry.subscription_id else {
            // Subscribe never completed; there is nothing server-side yet.
            return Ok(());
        };
        self.call(move |request_id| Command::Unsubscribe {
            request_id,
            subscription_id,
        })
        .await
        .map(|_| ())
    }

    /// The most recently observed session status
    pub async fn status(&self) -> SessionStatus {
        self.shared.status.lock().await.status
    }

    /// The current server-issued session id
    ///
    /// # Returns
    ///
    /// `Some` exactly while the status is Connected, `None` otherwise.
    pub async fn session_id(&self) -> Option<SessionId> {
        self.shared.status.lock().await.session_id.clone()
    }

    /// True while the status is Connected
    pub async fn is_connected(&self) -> bool {
        self.status().await == SessionStatus::Connected
    }

    /// Hook fired on every transition to Connected
    ///
    /// Also fires on reconnects within one `connect()` call, so a consumer
    /// can re-establish subscriptions after a session was recycled.
    ///
    /// # Arguments
    ///
    /// * `handler` - Async callback; replaces any previously set hook
    pub async fn on_connected<F, Fut>(&self, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.shared.hooks.lock().await.on_connected = Some(Arc::new(move || Box::pin(handler())));
    }

    /// Hook fired on every transition to Disconnected
    ///
    /// Fires both for orderly disconnects and for an exhausted reconnect
    /// budget; it does not fire for transient drops the worker recovers
    /// from on its own.
    ///
    /// # Arguments
    ///
    /// * `handler` - Async callback; replaces any previously set hook
    pub async fn on_disconnected<F, Fut>(&self, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.shared.hooks.lock().await.on_disconnected =
            Some(Arc::new(move || Box::pin(handler())));
    }

    /// Hook fired on unrecoverable connection failures, including worker loss
    ///
    /// # Arguments
    ///
    /// * `handler` - Async callback receiving the failure; replaces any
    ///   previously set hook
    pub async fn on_connection_error<F, Fut>(&self, handler: F)
    where
        F: Fn(Error) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.shared.hooks.lock().await.on_connection_error =
            Some(Arc::new(move |error| Box::pin(handler(error))));
    }

    /// Shut the worker down and release every resource
    ///
    /// Dropping the command channel is the worker's dispose signal: it stops
    /// its timers, closes the transport, rejects all pending requests with
    /// `ConnectionClosed`, closes subscriptions through their error sinks,
    /// and exits. This call awaits the full teardown.
    ///
    /// After disposal, every further call on this client fails with
    /// `WorkerLost`.
    pub async fn dispose(&self) {
        self.shared.disposed.store(true, Ordering::SeqCst);
        // Dropping the command sender is the worker's dispose signal.
        self.commands.lock().await.take();
        if let Some(worker) = self.worker.lock().await.take() {
            let _ = worker.await;
        }
        if let Some(pump) = self.pump.lock().await.take() {
            let _ = pump.await;
        }
    }

    async fn call(&self, make: impl FnOnce(u64) -> Command) -> Result<Value> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(request_id, tx);

        if let Err(e) = self.send_command(make(request_id)).await {
            self.shared.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(Error::from(payload)),
            Err(_) => Err(Error::WorkerLost),
        }
    }

    async fn send_command(&self, command: Command) -> Result<()> {
        let commands = self.commands.lock().await;
        let Some(tx) = commands.as_ref() else {
            return Err(Error::WorkerLost);
        };
        tx.send(command).await.map_err(|_| Error::WorkerLost)
    }
}

/// Translate worker events into future completions and sink invocations
async fn pump(shared: Arc<Shared>, mut events: mpsc::Receiver<WorkerEvent>) {
    let mut previous = SessionStatus::Disconnected;

    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Reply { request_id, result } => {
                let sender = shared.pending.lock().await.remove(&request_id);
                match sender {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => {
                        // The caller dropped its future; the result is moot.
                        tracing::debug!(request_id, "reply with no pending caller");
                    }
                }
            }
            WorkerEvent::Notification { internal_id, data } => {
                let handler = shared
                    .subscriptions
                    .lock()
                    .await
                    .get(&internal_id)
                    .map(|entry| entry.on_data.clone());
                match handler {
                    Some(handler) => handler(data).await,
                    None => {
                        tracing::debug!(internal_id, "notification after unsubscribe dropped");
                    }
                }
            }
            WorkerEvent::StateChanged {
                status, session_id, ..
            } => {
                {
                    let mut snapshot = shared.status.lock().await;
                    snapshot.status = status;
                    snapshot.session_id = session_id;
                }

                if previous == SessionStatus::Connected && status != SessionStatus::Connected {
                    close_subscriptions(&shared, Error::ConnectionClosed).await;
                }

                match status {
                    SessionStatus::Connected => {
                        let hook = shared.hooks.lock().await.on_connected.clone();
                        if let Some(hook) = hook {
                            hook().await;
                        }
                    }
                    SessionStatus::Disconnected => {
                        let hook = shared.hooks.lock().await.on_disconnected.clone();
                        if let Some(hook) = hook {
                            hook().await;
                        }
                    }
                    SessionStatus::Error => {
                        let hook = shared.hooks.lock().await.on_connection_error.clone();
                        if let Some(hook) = hook {
                            hook(Error::ConnectionClosed).await;
                        }
                    }
                    _ => {}
                }
                previous = status;
            }
        }
    }

    // The event channel closed: clean dispose or worker loss.
    let disposed = shared.disposed.load(Ordering::SeqCst);
    let error = if disposed {
        Error::ConnectionClosed
    } else {
        Error::WorkerLost
    };

    let pending: Vec<_> = {
        let mut pending = shared.pending.lock().await;
        pending.drain().collect()
    };
    for (_, tx) in pending {
        let _ = tx.send(Err(ErrorPayload::from(&error)));
    }
    close_subscriptions(&shared, error).await;

    if !disposed {
        tracing::error!("worker terminated unexpectedly");
        let hook = shared.hooks.lock().await.on_connection_error.clone();
        if let Some(hook) = hook {
            hook(Error::WorkerLost).await;
        }
    }
}

async fn close_subscriptions(shared: &Arc<Shared>, error: Error) {
    let entries: Vec<SubscriptionEntry> = {
        let mut subscriptions = shared.subscriptions.lock().await;
        subscriptions.drain().map(|(_, entry)| entry).collect()
    };
    for entry in entries {
        (entry.on_error)(error.clone()).await;
    }
}
