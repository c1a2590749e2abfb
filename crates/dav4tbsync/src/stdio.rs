//! Running the provider as a native-messaging process.
//!
//! The host talks to the process over stdin/stdout with 4-byte length
//! prefixed JSON frames. Until the host connects, the process writes its
//! announce messages as bare frames. The host answers with
//!
//! ```text
//! {"connect": "ProviderConnection", "sender": "tbsync@jobisoft.de"}
//! ```
//!
//! after which every frame in both directions is an envelope.

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tbsync_core::transport::stream::StreamPort;
use tbsync_core::{AddonInfo, AnnounceMessage, Port, Runtime, TransportError};

use crate::locale::Messages;

/// Frame the host sends to turn the stream into a provider port.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectRequest {
    pub connect: String,
    pub sender: String,
}

/// [`Runtime`] backed by the process's stdio stream.
pub struct StdioRuntime {
    self_id: String,
    host_id: String,
    stream: StreamPort,
    messages: Messages,
    resource_base: Option<String>,
}

impl std::fmt::Debug for StdioRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioRuntime")
            .field("self_id", &self.self_id)
            .field("host_id", &self.host_id)
            .field("resource_base", &self.resource_base)
            .finish_non_exhaustive()
    }
}

impl StdioRuntime {
    pub fn new(
        self_id: impl Into<String>,
        host_id: impl Into<String>,
        stream: StreamPort,
        messages: Messages,
        resource_base: Option<String>,
    ) -> Self {
        Self {
            self_id: self_id.into(),
            host_id: host_id.into(),
            stream,
            messages,
            resource_base,
        }
    }
}

impl Runtime for StdioRuntime {
    fn self_id(&self) -> String {
        self.self_id.clone()
    }

    /// Whoever launched the process is the host: it counts as installed.
    fn lookup_addon<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Option<AddonInfo>> {
        let found = (id == self.host_id).then(|| AddonInfo::new(id, true));
        Box::pin(async move { found })
    }

    /// Fails with [`TransportError::Closed`] once the host has connected:
    /// the stream then carries envelopes only.
    fn send_message<'a>(
        &'a self,
        _target: &'a str,
        message: AnnounceMessage,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let value = serde_json::to_value(&message).map_err(TransportError::Encode)?;
            self.stream.send_value(&value).await
        })
    }

    fn local_string(&self, key: &str) -> Option<String> {
        self.messages.get(key)
    }

    fn extension_url(&self, path: &str) -> String {
        match &self.resource_base {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), path),
            None => path.to_owned(),
        }
    }
}

/// Read frames until the host asks to connect; returns the stream as a port
/// carrying the sender named in the request.
///
/// Frames that are not connect requests are skipped.
pub async fn wait_for_connect(stream: &StreamPort) -> Result<Port, TransportError> {
    loop {
        let frame = match stream.recv_value().await {
            Ok(frame) => frame,
            Err(TransportError::Decode(e)) => {
                tracing::warn!(error = %e, "ignoring malformed frame before connect");
                continue;
            }
            Err(e) => return Err(e),
        };
        match ConnectRequest::deserialize(&frame) {
            Ok(request) => {
                tracing::debug!(name = %request.connect, sender = %request.sender, "connect request");
                let port = stream.with_identity(&request.connect, &request.sender).await;
                return Ok(Port::Stream(port));
            }
            Err(_) => {
                tracing::debug!(frame = %truncate(&frame), "ignoring frame before connect");
            }
        }
    }
}

fn truncate(frame: &Value) -> String {
    let mut s = frame.to_string();
    if s.len() > 200 {
        let mut end = 200;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
        s.push('…');
    }
    s
}
