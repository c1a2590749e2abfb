//! Scripted TbSync host on the far end of a port.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tbsync_core::{Envelope, Port, Request};

use crate::TestError;

/// Host end of a provider connection.
///
/// Requests the provider issues while the peer waits for a reply are
/// answered from a table of canned responses and logged.
#[derive(Clone)]
pub struct HostPeer {
    host_id: String,
    port: Port,
    next_id: Arc<AtomicU64>,
    responses: Arc<Mutex<HashMap<String, Value>>>,
    calls: Arc<Mutex<Vec<Request>>>,
}

impl std::fmt::Debug for HostPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostPeer")
            .field("host_id", &self.host_id)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl HostPeer {
    pub fn new(host_id: &str, port: Port) -> Self {
        Self {
            host_id: host_id.to_owned(),
            port,
            next_id: Arc::new(AtomicU64::new(1)),
            responses: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn port(&self) -> &Port {
        &self.port
    }

    /// Answer the provider's `command` requests with `value`.
    pub fn respond_to(&self, command: &str, value: Value) {
        self.responses.lock().insert(command.to_owned(), value);
    }

    /// Provider requests auto-answered so far.
    pub fn calls(&self) -> Vec<Request> {
        self.calls.lock().clone()
    }

    /// Send a raw envelope to the provider.
    pub async fn post(&self, envelope: &Envelope) -> Result<(), TestError> {
        self.port.post_message(envelope).await?;
        Ok(())
    }

    pub async fn recv(&self) -> Result<Envelope, TestError> {
        Ok(self.port.recv_message().await?)
    }

    /// Invoke a provider command and wait for its reply.
    pub async fn request(
        &self,
        command: &str,
        parameters: Vec<Value>,
    ) -> Result<Option<Value>, TestError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::new(command, parameters);
        self.post(&Envelope::new(&self.host_id, id, Some(request.into_value())))
            .await?;

        loop {
            let envelope = self.recv().await?;
            if envelope.origin == self.host_id {
                if envelope.id == id {
                    return Ok(envelope.data);
                }
                return Err(TestError::Assertion(format!(
                    "reply for unexpected id {} (waiting for {id})",
                    envelope.id
                )));
            }
            self.answer(envelope).await?;
        }
    }

    /// Wait for the next request issued by the provider.
    pub async fn next_provider_request(&self) -> Result<(Envelope, Request), TestError> {
        let envelope = self.recv().await?;
        if envelope.origin == self.host_id {
            return Err(TestError::Assertion(format!(
                "expected a provider request, got a reply for id {}",
                envelope.id
            )));
        }
        let request = Request::from_data(envelope.data.as_ref()).ok_or_else(|| {
            TestError::Assertion(format!("provider request {} has no command", envelope.id))
        })?;
        Ok((envelope, request))
    }

    /// Reply to a provider request.
    pub async fn reply(&self, request: &Envelope, data: Option<Value>) -> Result<(), TestError> {
        self.post(&request.reply(data)).await
    }

    async fn answer(&self, envelope: Envelope) -> Result<(), TestError> {
        let Some(request) = Request::from_data(envelope.data.as_ref()) else {
            return Err(TestError::Assertion(format!(
                "provider sent id {} without a command",
                envelope.id
            )));
        };
        tracing::debug!(id = envelope.id, command = %request.command, "host answering provider request");
        let data = self.responses.lock().get(&request.command).cloned();
        self.calls.lock().push(request);
        self.reply(&envelope, data).await
    }

    pub fn disconnect(&self) {
        self.port.disconnect();
    }
}
