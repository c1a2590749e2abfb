//! Channel: the provider's single connection to the TbSync host.
//!
//! ```text
//!            register(handler)                       port from host
//!                  │                                        │
//!          ┌───────▼────────┐   InitiateConnect    ┌────────▼────────┐
//!          │ announce loop  │ ───────────────────► │ accept_connection│
//!          │ (generation n) │   every interval     │ first port wins │
//!          └────────────────┘                      └────────┬────────┘
//!                                                           │
//!                                                      reader task
//!                                                           │
//!                         ┌─────────────────────────────────┼─────────────────────┐
//!                         │                                 │                     │
//!               origin == self?                     origin == host?          port closed
//!                         │                                 │                     │
//!              ┌──────────▼─────────┐        ┌──────────────▼─────────┐  ┌────────▼────────┐
//!              │ resolve pending ID │        │ dispatch to handler,   │  │ evict pending,  │
//!              │ (unknown ID: drop) │        │ post reply on the port │  │ onDisconnect()  │
//!              └────────────────────┘        └────────────────────────┘  └─────────────────┘
//! ```
//!
//! # Key invariants
//!
//! Only the reader task spawned by [`Channel::accept_connection`] calls
//! `recv_message()` on the active port.
//!
//! Commands are invoked in the order their requests arrive: the reader hands
//! each dispatch to the port's dispatcher task, which starts them first in,
//! first out. Once started they run concurrently.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::{
    AddonInfo, AnnounceMessage, ChannelError, CommandTable, Envelope, HandlerError, Params, Port,
    ProviderInfo, Request, RpcError, Runtime, RuntimeEvent, TransportError,
};

/// Extension ID of the TbSync host.
pub const DEFAULT_HOST_ID: &str = "tbsync@jobisoft.de";
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_MAX_PENDING: usize = 8192;

type InboundTask = BoxFuture<'static, ()>;

/// Channel settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Only ports opened by this extension are accepted.
    pub host_id: String,
    pub announce_interval: Duration,
    /// Outbound requests beyond this many in flight are refused.
    pub max_pending: usize,
    /// Sent as `provider` in announce messages for old hosts.
    pub legacy_provider_tag: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host_id: DEFAULT_HOST_ID.to_owned(),
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
            max_pending: DEFAULT_MAX_PENDING,
            legacy_provider_tag: None,
        }
    }
}

impl ChannelConfig {
    /// Defaults overridden by `TBSYNC_HOST_ID`, `TBSYNC_ANNOUNCE_INTERVAL_MS`
    /// and `TBSYNC_MAX_PENDING`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(host_id) = std::env::var("TBSYNC_HOST_ID")
            .ok()
            .filter(|v| !v.is_empty())
        {
            config.host_id = host_id;
        }
        if let Some(ms) = std::env::var("TBSYNC_ANNOUNCE_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
        {
            config.announce_interval = Duration::from_millis(ms);
        }
        if let Some(max) = std::env::var("TBSYNC_MAX_PENDING")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
        {
            config.max_pending = max;
        }
        config
    }

    pub fn with_host_id(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = host_id.into();
        self
    }

    pub fn with_announce_interval(mut self, interval: Duration) -> Self {
        self.announce_interval = interval;
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn with_legacy_provider_tag(mut self, tag: impl Into<String>) -> Self {
        self.legacy_provider_tag = Some(tag.into());
        self
    }
}

#[derive(Default)]
struct ChannelState {
    handler: Option<CommandTable>,
    /// Our own extension ID, captured at registration.
    self_id: Option<String>,
    port: Option<Port>,
    reader: Option<JoinHandle<()>>,
    /// Feeds inbound commands of the active port to its dispatcher task.
    inbound: Option<mpsc::UnboundedSender<InboundTask>>,
    dispatcher: Option<JoinHandle<()>>,
    /// Whether inbound connections and add-on events are being listened to.
    listening: bool,
}

/// Provider side of the TbSync RPC channel.
pub struct Channel {
    config: ChannelConfig,
    runtime: Arc<dyn Runtime>,
    state: Mutex<ChannelState>,

    /// Pending outbound requests: request id -> oneshot sender.
    pending: Mutex<HashMap<u64, oneshot::Sender<Option<Value>>>>,

    next_request_id: AtomicU64,

    /// Bumped by every register/unregister and every new announce loop.
    announce_generation: AtomicU64,

    connected: watch::Sender<bool>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("config", &self.config)
            .field("registered", &self.is_registered())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub fn new(config: ChannelConfig, runtime: Arc<dyn Runtime>) -> Arc<Self> {
        Arc::new(Self {
            config,
            runtime,
            state: Mutex::new(ChannelState::default()),
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            announce_generation: AtomicU64::new(0),
            connected: watch::channel(false).0,
        })
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    pub fn is_registered(&self) -> bool {
        self.state.lock().handler.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().port.is_some()
    }

    /// Receiver following [`Channel::is_connected`].
    pub fn watch_connection(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Generation of the most recently started announce loop.
    pub fn announce_generation(&self) -> u64 {
        self.announce_generation.load(Ordering::Acquire)
    }

    /// IDs of outbound requests still waiting for a response (for diagnostics).
    pub fn pending_request_ids(&self) -> Vec<u64> {
        let pending = self.pending.lock();
        let mut ids: Vec<u64> = pending.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Register the provider's command table and start looking for the host.
    ///
    /// Does not wait for a connection; the port is accepted later through
    /// [`Channel::accept_connection`].
    pub async fn register(self: &Arc<Self>, handler: CommandTable) -> Result<(), ChannelError> {
        {
            let mut state = self.state.lock();
            if state.handler.is_some() {
                tracing::warn!("register has already been called; unregister first");
                return Err(ChannelError::AlreadyRegistered);
            }
            state.handler = Some(handler);
            state.self_id = Some(self.runtime.self_id());
            state.listening = true;
        }
        // Invalidate loops left over from an earlier registration.
        self.announce_generation.fetch_add(1, Ordering::AcqRel);
        tracing::info!(host_id = %self.config.host_id, "provider registered");

        match self.runtime.lookup_addon(&self.config.host_id).await {
            Some(addon) if addon.enabled => self.start_announce(),
            Some(_) => {
                tracing::info!(host_id = %self.config.host_id, "host installed but disabled")
            }
            None => tracing::info!(host_id = %self.config.host_id, "host not installed"),
        }
        Ok(())
    }

    /// Tear down the registration. Calling it again is a no-op.
    pub fn unregister(&self) {
        let (port, reader) = {
            let mut state = self.state.lock();
            if state.handler.is_none() {
                tracing::debug!("nothing to unregister");
                return;
            }
            state.handler = None;
            state.self_id = None;
            state.listening = false;
            state.inbound = None;
            if let Some(dispatcher) = state.dispatcher.take() {
                dispatcher.abort();
            }
            (state.port.take(), state.reader.take())
        };
        self.announce_generation.fetch_add(1, Ordering::AcqRel);
        self.connected.send_replace(false);

        if let Some(port) = port {
            port.disconnect();
        }
        if let Some(reader) = reader {
            reader.abort();
        }
        self.evict_pending("unregistered");
        tracing::info!("provider unregistered");
    }

    /// React to the host add-on being installed or enabled.
    pub fn on_addon_event(self: &Arc<Self>, addon: &AddonInfo) {
        if addon.id != self.config.host_id {
            return;
        }
        if !self.state.lock().listening {
            return;
        }
        tracing::debug!(addon_id = %addon.id, "host became available");
        self.start_announce();
    }

    /// Offer an inbound port. Returns whether it became the active port.
    ///
    /// Ports from anyone but the host, ports arriving while another port is
    /// active, and ports offered while nothing is registered are ignored.
    pub fn accept_connection(self: &Arc<Self>, port: Port) -> bool {
        let mut state = self.state.lock();
        if !state.listening {
            tracing::debug!(port_id = port.id(), "not listening; ignoring port");
            return false;
        }
        if port.sender_id() != self.config.host_id {
            tracing::debug!(
                port_id = port.id(),
                sender = port.sender_id(),
                "ignoring port from unexpected sender"
            );
            return false;
        }
        if let Some(active) = &state.port {
            tracing::debug!(
                port_id = port.id(),
                active_port_id = active.id(),
                "already connected; ignoring port"
            );
            return false;
        }
        if port.is_closed() {
            return false;
        }

        tracing::info!(
            port_id = port.id(),
            name = port.info().name(),
            "connection to host established"
        );
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        state.port = Some(port.clone());
        state.inbound = Some(inbound_tx);
        state.dispatcher = Some(tokio::spawn(run_dispatcher(inbound_rx)));
        state.reader = Some(tokio::spawn(self.clone().run_port(port)));
        self.connected.send_replace(true);
        true
    }

    /// Route runtime events until the event source closes.
    pub async fn serve(self: Arc<Self>, mut events: mpsc::Receiver<RuntimeEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                RuntimeEvent::ConnectExternal(port) => {
                    self.accept_connection(port);
                }
                RuntimeEvent::AddonInstalled(addon) | RuntimeEvent::AddonEnabled(addon) => {
                    self.on_addon_event(&addon);
                }
            }
        }
        tracing::debug!("runtime event source closed");
    }

    fn start_announce(self: &Arc<Self>) {
        let generation = self.announce_generation.fetch_add(1, Ordering::AcqRel) + 1;
        tokio::spawn(self.clone().announce_loop(generation));
    }

    fn announce_is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        generation == self.announce_generation.load(Ordering::Acquire)
            && state.handler.is_some()
            && state.port.is_none()
    }

    async fn announce_loop(self: Arc<Self>, generation: u64) {
        let info = match self.describe().await {
            Some(info) => info,
            None => return,
        };
        let message =
            AnnounceMessage::initiate_connect(info, self.config.legacy_provider_tag.clone());

        while self.announce_is_current(generation) {
            tracing::debug!(generation, host_id = %self.config.host_id, "announcing provider");
            if let Err(e) = self
                .runtime
                .send_message(&self.config.host_id, message.clone())
                .await
            {
                // The host may not be listening yet; keep trying.
                tracing::debug!(generation, error = %e, "announce not delivered");
            }
            self.runtime.sleep(self.config.announce_interval).await;
        }
        tracing::debug!(generation, "announce loop finished");
    }

    /// Self-description built from the handler's own commands.
    async fn describe(&self) -> Option<ProviderInfo> {
        let handler = self.state.lock().handler.clone()?;

        let as_string = |result: Result<Option<Value>, HandlerError>| match result {
            Ok(Some(Value::String(s))) => Some(s),
            Ok(Some(Value::Number(n))) => Some(n.to_string()),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "provider description command failed");
                None
            }
        };

        let name = as_string(handler.dispatch("getProviderName", Params::default()).await);
        let icon16 = as_string(
            handler
                .dispatch("getProviderIcon", Params::new(vec![Value::from(16)]))
                .await,
        );
        let api_version = as_string(handler.dispatch("getApiVersion", Params::default()).await);
        Some(ProviderInfo {
            name,
            icon16,
            api_version,
        })
    }

    // ========================================================================
    // Inbound messages
    // ========================================================================

    async fn run_port(self: Arc<Self>, port: Port) {
        loop {
            let envelope = match port.recv_message().await {
                Ok(envelope) => envelope,
                Err(TransportError::Closed) => {
                    tracing::debug!(port_id = port.id(), "port closed");
                    break;
                }
                Err(TransportError::Decode(e)) => {
                    tracing::warn!(port_id = port.id(), error = %e, "dropping malformed message");
                    continue;
                }
                Err(e) => {
                    tracing::error!(port_id = port.id(), error = %e, "port failed");
                    break;
                }
            };

            if let Err(e) = self.handle_message(&port, envelope) {
                tracing::error!(port_id = port.id(), error = %e, "failed to handle message");
            }
        }
        self.handle_disconnect(&port);
    }

    /// Handle one inbound envelope.
    ///
    /// Responses to our own requests are routed to their waiter. Requests
    /// from the host are queued on the port's dispatcher in arrival order;
    /// the dispatcher posts each reply on `port` when its command finishes.
    /// Requests on a port that is not the active one are dropped.
    pub fn handle_message(&self, port: &Port, envelope: Envelope) -> Result<(), ChannelError> {
        if port.sender_id() != self.config.host_id {
            return Ok(());
        }

        let (self_id, handler, inbound) = {
            let state = self.state.lock();
            let inbound = match &state.port {
                Some(active) if active.id() == port.id() => state.inbound.clone(),
                _ => None,
            };
            (state.self_id.clone(), state.handler.clone(), inbound)
        };

        if self_id.as_deref() == Some(envelope.origin.as_str()) {
            self.resolve_pending(envelope.id, envelope.data);
            return Ok(());
        }

        let handler = handler.ok_or(ChannelError::NoHandler)?;
        let Some(inbound) = inbound else {
            tracing::debug!(port_id = port.id(), id = envelope.id, "request on inactive port; dropping");
            return Ok(());
        };

        let request = Request::from_data(envelope.data.as_ref());
        let command = request
            .as_ref()
            .map(|r| r.command.clone())
            .unwrap_or_default();
        let dispatched = match request {
            Some(request) => {
                tracing::debug!(id = envelope.id, command = %request.command, "dispatching request");
                let params = Params::new(request.parameters);
                std::panic::catch_unwind(AssertUnwindSafe(|| {
                    handler.dispatch(&request.command, params)
                }))
            }
            None => {
                tracing::warn!(id = envelope.id, "request without command; replying undefined");
                Ok(Box::pin(async { Ok(None) }) as BoxFuture<'static, _>)
            }
        };

        let task_port = port.clone();
        let task = async move {
            let result = match dispatched {
                Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                Err(panic) => Err(panic),
            };

            let data = match result {
                Ok(Ok(data)) => data,
                Ok(Err(error)) => {
                    let e = ChannelError::Handler { command, error };
                    tracing::error!(id = envelope.id, error = %e, "request left unanswered");
                    return;
                }
                Err(_panic) => {
                    tracing::error!(
                        id = envelope.id,
                        command = %command,
                        "command panicked; request left unanswered"
                    );
                    return;
                }
            };

            if let Err(e) = task_port.post_message(&envelope.reply(data)).await {
                tracing::warn!(id = envelope.id, error = %e, "failed to post response");
            }
        };

        if inbound.send(Box::pin(task)).is_err() {
            tracing::debug!(port_id = port.id(), "dispatcher gone; request dropped");
        }
        Ok(())
    }

    fn resolve_pending(&self, id: u64, data: Option<Value>) {
        let waiter = self.pending.lock().remove(&id);
        match waiter {
            Some(tx) => {
                tracing::debug!(id, "delivering response to waiter");
                let _ = tx.send(data);
            }
            None => {
                tracing::debug!(id, "no pending request for response; dropping");
            }
        }
    }

    fn handle_disconnect(&self, port: &Port) {
        let handler = {
            let mut state = self.state.lock();
            match &state.port {
                Some(active) if active.id() == port.id() => {}
                // Already replaced or torn down by unregister.
                _ => return,
            }
            state.port = None;
            state.reader = None;
            // Commands already started finish; their replies fail on the closed port.
            state.inbound = None;
            state.dispatcher = None;
            state.handler.clone()
        };
        port.disconnect();
        self.connected.send_replace(false);
        tracing::info!(port_id = port.id(), "connection to host lost");
        self.evict_pending("host disconnected");

        if let Some(handler) = handler {
            if handler.contains("onDisconnect") {
                tokio::spawn(async move {
                    if let Err(e) = handler.dispatch("onDisconnect", Params::default()).await {
                        tracing::warn!(error = %e, "onDisconnect() failed");
                    }
                });
            } else {
                tracing::warn!("incomplete provider implementation: missing onDisconnect()");
            }
        }
    }

    /// Drop every pending waiter; their callers see [`RpcError::Disconnected`].
    fn evict_pending(&self, reason: &str) {
        let evicted: Vec<u64> = self.pending.lock().drain().map(|(id, _)| id).collect();
        if !evicted.is_empty() {
            tracing::warn!(count = evicted.len(), reason, "abandoning pending requests");
        }
    }

    // ========================================================================
    // Outbound requests
    // ========================================================================

    /// Send a request to the host and wait for its response.
    ///
    /// There is no timeout; the wait ends with the response, with
    /// [`RpcError::Disconnected`] when the port goes away, or when the
    /// returned future is dropped.
    pub async fn send(&self, request: Request) -> Result<Option<Value>, RpcError> {
        struct PendingGuard<'a> {
            channel: &'a Channel,
            id: u64,
            active: bool,
        }

        impl PendingGuard<'_> {
            fn disarm(&mut self) {
                self.active = false;
            }
        }

        impl Drop for PendingGuard<'_> {
            fn drop(&mut self) {
                if !self.active {
                    return;
                }
                if self.channel.pending.lock().remove(&self.id).is_some() {
                    tracing::debug!(id = self.id, "request dropped: removed pending waiter");
                }
            }
        }

        // The waiter is registered under the state lock: a disconnect either
        // sees it and evicts it, or has already cleared the port.
        let (port, self_id, id, rx) = {
            let state = self.state.lock();
            let (port, self_id) = match (&state.port, &state.self_id) {
                (Some(port), Some(self_id)) => (port.clone(), self_id.clone()),
                _ => return Err(RpcError::NotConnected),
            };

            let mut pending = self.pending.lock();
            if pending.len() >= self.config.max_pending {
                tracing::warn!(
                    pending_len = pending.len(),
                    max_pending = self.config.max_pending,
                    "too many pending requests; refusing new request"
                );
                return Err(RpcError::TooManyPending {
                    max: self.config.max_pending,
                });
            }
            let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = oneshot::channel();
            pending.insert(id, tx);
            (port, self_id, id, rx)
        };
        let mut guard = PendingGuard {
            channel: self,
            id,
            active: true,
        };

        let command = request.command.clone();
        let envelope = Envelope::new(self_id, id, Some(request.into_value()));
        port.post_message(&envelope).await?;
        tracing::debug!(id, command = %command, "request sent");

        let data = rx.await.map_err(|_| RpcError::Disconnected)?;
        guard.disarm();
        Ok(data)
    }

    /// Convenience wrapper around [`Channel::send`].
    pub async fn call(
        &self,
        command: &str,
        parameters: Vec<Value>,
    ) -> Result<Option<Value>, RpcError> {
        self.send(Request::new(command, parameters)).await
    }
}

/// Drive a port's inbound commands. Tasks are started in the order they are
/// queued and then run concurrently; the loop ends once the queue is closed
/// and every started task has finished.
async fn run_dispatcher(mut inbound: mpsc::UnboundedReceiver<InboundTask>) {
    let mut running = FuturesUnordered::new();
    loop {
        tokio::select! {
            biased;
            task = inbound.recv() => match task {
                Some(task) => running.push(task),
                None => break,
            },
            Some(()) = running.next(), if !running.is_empty() => {}
        }
    }
    while running.next().await.is_some() {}
    tracing::debug!("dispatcher finished");
}
