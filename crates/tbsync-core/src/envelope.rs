//! Wire types exchanged with the host.
//!
//! Every message on a port is an [`Envelope`]. The `origin` field names the
//! side that issued the original request, so the same envelope shape carries
//! both requests and their responses:
//!
//! ```text
//! provider -> host   {origin: "dav@...",   id: 7, data: {command, parameters}}
//! host -> provider   {origin: "dav@...",   id: 7, data: <result>}
//!
//! host -> provider   {origin: "tbsync@..", id: 3, data: {command, parameters}}
//! provider -> host   {origin: "tbsync@..", id: 3, data: <result>}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command of the one-way message asking the host to open a port.
pub const INITIATE_CONNECT: &str = "InitiateConnect";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: String,
    pub id: u64,
    /// Request payload or response value. `None` is an undefined result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    pub fn new(origin: impl Into<String>, id: u64, data: Option<Value>) -> Self {
        Self {
            origin: origin.into(),
            id,
            data,
        }
    }

    /// Build the response to this envelope, keeping its origin and ID.
    pub fn reply(&self, data: Option<Value>) -> Self {
        Self {
            origin: self.origin.clone(),
            id: self.id,
            data,
        }
    }
}

/// Request payload carried in [`Envelope::data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub parameters: Vec<Value>,
}

impl Request {
    pub fn new(command: impl Into<String>, parameters: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            parameters,
        }
    }

    /// Lenient parse of an inbound request payload.
    ///
    /// Returns `None` only when there is no string `command`. Parameters that
    /// are absent or not an array become an empty list.
    pub fn from_data(data: Option<&Value>) -> Option<Self> {
        let data = data?;
        let command = data.get("command")?.as_str()?.to_owned();
        let parameters = data
            .get("parameters")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Some(Self {
            command,
            parameters,
        })
    }

    pub fn into_value(self) -> Value {
        serde_json::json!({
            "command": self.command,
            "parameters": self.parameters,
        })
    }
}

/// Self-description sent along with every announce message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon16: Option<String>,
    #[serde(
        rename = "apiVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub api_version: Option<String>,
}

/// One-way "please connect" message sent to the host outside of any port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnounceMessage {
    pub command: String,
    /// Legacy provider tag, only understood by old hosts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ProviderInfo>,
}

impl AnnounceMessage {
    pub fn initiate_connect(info: ProviderInfo, provider: Option<String>) -> Self {
        Self {
            command: INITIATE_CONNECT.to_owned(),
            provider,
            info: Some(info),
        }
    }
}
