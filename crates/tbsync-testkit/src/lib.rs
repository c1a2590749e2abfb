//! tbsync-testkit: test doubles and shared scenarios for the provider channel.
//!
//! Port backends implement [`PortFactory`] and run the shared scenarios:
//!
//! ```ignore
//! use tbsync_testkit::{MemPortFactory, run_end_to_end_provider_name};
//!
//! #[tokio::test]
//! async fn mem_end_to_end() {
//!     run_end_to_end_provider_name::<MemPortFactory>().await;
//! }
//! ```

use std::sync::Arc;

use serde_json::{Value, json};
use tbsync_core::{
    Channel, ChannelConfig, CommandTable, Envelope, Port, Request, RpcError,
    TransportError,
};

mod host_peer;
mod runtime;

pub use host_peer::HostPeer;
pub use runtime::{EXTENSION_BASE, MockRuntime, PROVIDER_ID};

/// Error type for test scenarios.
#[derive(Debug)]
pub enum TestError {
    /// Channel or port setup failed.
    Setup(String),
    Rpc(RpcError),
    Transport(TransportError),
    Assertion(String),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Setup(msg) => write!(f, "setup error: {}", msg),
            TestError::Rpc(e) => write!(f, "RPC error: {}", e),
            TestError::Transport(e) => write!(f, "transport error: {}", e),
            TestError::Assertion(msg) => write!(f, "assertion failed: {}", msg),
        }
    }
}

impl std::error::Error for TestError {}

impl From<RpcError> for TestError {
    fn from(e: RpcError) -> Self {
        TestError::Rpc(e)
    }
}

impl From<TransportError> for TestError {
    fn from(e: TransportError) -> Self {
        TestError::Transport(e)
    }
}

/// Factory for connected port pairs.
pub trait PortFactory: Send + Sync + 'static {
    /// Returns `(provider_end, host_end)`.
    fn connect_pair(provider_id: &str, host_id: &str) -> (Port, Port);
}

pub struct MemPortFactory;

impl PortFactory for MemPortFactory {
    fn connect_pair(provider_id: &str, host_id: &str) -> (Port, Port) {
        Port::mem_pair("ProviderConnection", provider_id, host_id)
    }
}

pub struct StreamPortFactory;

impl PortFactory for StreamPortFactory {
    fn connect_pair(provider_id: &str, host_id: &str) -> (Port, Port) {
        Port::stream_pair("ProviderConnection", provider_id, host_id)
    }
}

/// Channel over a fresh [`MockRuntime`].
pub fn channel() -> (Arc<Channel>, MockRuntime) {
    let runtime = MockRuntime::new();
    let channel = Channel::new(ChannelConfig::default(), Arc::new(runtime.clone()));
    (channel, runtime)
}

/// Open a host connection to `channel` and make it the active port.
pub fn connect_host<F: PortFactory>(channel: &Arc<Channel>) -> Result<HostPeer, TestError> {
    let host_id = channel.config().host_id.clone();
    let provider_id = channel.runtime().self_id();
    let (provider_end, host_end) = F::connect_pair(&provider_id, &host_id);
    if !channel.accept_connection(provider_end) {
        return Err(TestError::Setup("host connection was rejected".into()));
    }
    Ok(HostPeer::new(&host_id, host_end))
}

fn provider_name_table() -> CommandTable {
    CommandTable::builder()
        .command("getProviderName", |_| async { Ok(json!("DAV")) })
        .command("getApiVersion", |_| async { Ok(json!("3.0")) })
        .build()
}

// ============================================================================
// Scenarios
// ============================================================================

/// Host asks for the provider name and gets exactly one reply.
pub async fn run_end_to_end_provider_name<F: PortFactory>() {
    if let Err(e) = run_end_to_end_provider_name_inner::<F>().await {
        panic!("run_end_to_end_provider_name failed: {}", e);
    }
}

async fn run_end_to_end_provider_name_inner<F: PortFactory>() -> Result<(), TestError> {
    let (channel, _runtime) = channel();
    channel
        .register(provider_name_table())
        .await
        .map_err(|e| TestError::Setup(e.to_string()))?;
    let host = connect_host::<F>(&channel)?;

    let request = Request::new("getProviderName", vec![]);
    host.post(&Envelope::new("host", 1, Some(request.into_value())))
        .await?;

    // An origin other than the provider's own ID is a request.
    let reply = host.recv().await?;
    let expected = Envelope::new("host", 1, Some(json!("DAV")));
    if reply != expected {
        return Err(TestError::Assertion(format!(
            "expected {:?}, got {:?}",
            expected, reply
        )));
    }

    channel.unregister();
    Ok(())
}

/// Provider issues several requests; the host answers them in reverse order.
pub async fn run_permuted_responses<F: PortFactory>() {
    if let Err(e) = run_permuted_responses_inner::<F>().await {
        panic!("run_permuted_responses failed: {}", e);
    }
}

async fn run_permuted_responses_inner<F: PortFactory>() -> Result<(), TestError> {
    let (channel, _runtime) = channel();
    channel
        .register(provider_name_table())
        .await
        .map_err(|e| TestError::Setup(e.to_string()))?;
    let host = connect_host::<F>(&channel)?;

    let mut calls = Vec::new();
    for i in 0..4 {
        let channel = channel.clone();
        calls.push(tokio::spawn(async move {
            channel
                .call("getAccountProperty", vec![json!(format!("account{i}")), json!("host")])
                .await
        }));
    }

    let mut requests = Vec::new();
    for _ in 0..4 {
        requests.push(host.next_provider_request().await?);
    }
    for (envelope, request) in requests.iter().rev() {
        let account = request.parameters[0].clone();
        host.reply(envelope, Some(json!({ "for": account }))).await?;
    }

    for (i, call) in calls.into_iter().enumerate() {
        let data = call
            .await
            .map_err(|e| TestError::Setup(format!("caller task panicked: {}", e)))??;
        let expected = Some(json!({ "for": format!("account{i}") }));
        if data != expected {
            return Err(TestError::Assertion(format!(
                "call {i}: expected {:?}, got {:?}",
                expected, data
            )));
        }
    }
    if !channel.pending_request_ids().is_empty() {
        return Err(TestError::Assertion("pending map not drained".into()));
    }

    channel.unregister();
    Ok(())
}

/// A nested call: the host's request makes the provider call back into the host.
pub async fn run_nested_host_call<F: PortFactory>() {
    if let Err(e) = run_nested_host_call_inner::<F>().await {
        panic!("run_nested_host_call failed: {}", e);
    }
}

async fn run_nested_host_call_inner<F: PortFactory>() -> Result<(), TestError> {
    let (channel, _runtime) = channel();
    let weak = Arc::downgrade(&channel);
    let table = CommandTable::builder()
        .command("getConnectionTimeout", move |params| {
            let weak = weak.clone();
            async move {
                let channel = weak
                    .upgrade()
                    .ok_or_else(|| tbsync_core::HandlerError::new("channel dropped"))?;
                let account: String = params.arg(0)?;
                let timeout = channel
                    .call("getAccountProperty", vec![json!(account), json!("timeout")])
                    .await?;
                Ok(timeout.unwrap_or(Value::Null))
            }
        })
        .build();
    channel
        .register(table)
        .await
        .map_err(|e| TestError::Setup(e.to_string()))?;
    let host = connect_host::<F>(&channel)?;
    host.respond_to("getAccountProperty", json!(30000));

    let data = host
        .request("getConnectionTimeout", vec![json!("account1")])
        .await?;
    if data != Some(json!(30000)) {
        return Err(TestError::Assertion(format!("expected 30000, got {:?}", data)));
    }
    let calls = host.calls();
    if calls.len() != 1 || calls[0].command != "getAccountProperty" {
        return Err(TestError::Assertion(format!("unexpected host calls {:?}", calls)));
    }

    channel.unregister();
    Ok(())
}

/// Pending callers are released with `Disconnected` when the host goes away.
pub async fn run_disconnect_rejects_pending<F: PortFactory>() {
    if let Err(e) = run_disconnect_rejects_pending_inner::<F>().await {
        panic!("run_disconnect_rejects_pending failed: {}", e);
    }
}

async fn run_disconnect_rejects_pending_inner<F: PortFactory>() -> Result<(), TestError> {
    let (channel, _runtime) = channel();
    channel
        .register(provider_name_table())
        .await
        .map_err(|e| TestError::Setup(e.to_string()))?;
    let host = connect_host::<F>(&channel)?;

    let caller = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.call("getAllAccounts", vec![]).await })
    };
    host.next_provider_request().await?;
    host.disconnect();

    let result = caller
        .await
        .map_err(|e| TestError::Setup(format!("caller task panicked: {}", e)))?;
    if !matches!(result, Err(RpcError::Disconnected)) {
        return Err(TestError::Assertion(format!(
            "expected Disconnected, got {:?}",
            result
        )));
    }
    if channel.is_connected() {
        return Err(TestError::Assertion("port still active after disconnect".into()));
    }

    channel.unregister();
    Ok(())
}
