//! Services the channel needs from the surrounding extension runtime.

use std::time::Duration;

use futures::future::BoxFuture;

use crate::{AnnounceMessage, Port, TransportError};

/// Add-on as reported by the runtime's management API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonInfo {
    pub id: String,
    pub enabled: bool,
}

impl AddonInfo {
    pub fn new(id: impl Into<String>, enabled: bool) -> Self {
        Self {
            id: id.into(),
            enabled,
        }
    }
}

/// Events the runtime delivers to a registered channel.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// Another extension opened a port to us.
    ConnectExternal(Port),
    AddonInstalled(AddonInfo),
    AddonEnabled(AddonInfo),
}

/// Extension runtime seen from the provider.
///
/// Implementations must be cheap to call; the announce loop calls
/// [`Runtime::send_message`] and [`Runtime::sleep`] once per tick.
pub trait Runtime: Send + Sync + 'static {
    /// ID of this extension.
    fn self_id(&self) -> String;

    /// Look up an installed add-on. Lookup failures read as "not installed".
    fn lookup_addon<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Option<AddonInfo>>;

    /// One-way message to another extension, outside of any port.
    fn send_message<'a>(
        &'a self,
        target: &'a str,
        message: AnnounceMessage,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Bundled translation for `key`, if any.
    fn local_string(&self, key: &str) -> Option<String>;

    /// Absolute URL of a file packaged with this extension.
    fn extension_url(&self, path: &str) -> String {
        path.to_owned()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}
