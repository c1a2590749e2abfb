//! In-memory [`Runtime`] recording everything the channel asks of it.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tbsync_core::{AddonInfo, AnnounceMessage, DEFAULT_HOST_ID, Runtime, TransportError};

pub const PROVIDER_ID: &str = "dav4tbsync@jobisoft.de";
pub const EXTENSION_BASE: &str = "moz-extension://dav4tbsync/";

#[derive(Debug, Default)]
struct MockState {
    host_addon: Option<AddonInfo>,
    strings: HashMap<String, String>,
    announces: Vec<(String, AnnounceMessage)>,
    fail_sends: bool,
}

/// Runtime double: host add-on presence, bundled strings and a log of
/// announce messages, all adjustable from the test.
#[derive(Debug, Clone)]
pub struct MockRuntime {
    self_id: String,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    /// Runtime where the host is installed and enabled.
    pub fn new() -> Self {
        Self::without_host().with_host(AddonInfo::new(DEFAULT_HOST_ID, true))
    }

    pub fn without_host() -> Self {
        Self {
            self_id: PROVIDER_ID.to_owned(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn with_host(self, addon: AddonInfo) -> Self {
        self.state.lock().host_addon = Some(addon);
        self
    }

    pub fn with_string(self, key: &str, value: &str) -> Self {
        self.state
            .lock()
            .strings
            .insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn set_host(&self, addon: Option<AddonInfo>) {
        self.state.lock().host_addon = addon;
    }

    /// Make every later `send_message` fail as if the host were not listening.
    pub fn set_fail_sends(&self, fail: bool) {
        self.state.lock().fail_sends = fail;
    }

    pub fn announces(&self) -> Vec<(String, AnnounceMessage)> {
        self.state.lock().announces.clone()
    }

    pub fn announce_count(&self) -> usize {
        self.state.lock().announces.len()
    }
}

impl Runtime for MockRuntime {
    fn self_id(&self) -> String {
        self.self_id.clone()
    }

    fn lookup_addon<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Option<AddonInfo>> {
        let addon = self
            .state
            .lock()
            .host_addon
            .clone()
            .filter(|addon| addon.id == id);
        Box::pin(async move { addon })
    }

    fn send_message<'a>(
        &'a self,
        target: &'a str,
        message: AnnounceMessage,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        let mut state = self.state.lock();
        state.announces.push((target.to_owned(), message));
        let result = if state.fail_sends {
            Err(TransportError::Closed)
        } else {
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn local_string(&self, key: &str) -> Option<String> {
        self.state.lock().strings.get(key).cloned()
    }

    fn extension_url(&self, path: &str) -> String {
        format!("{EXTENSION_BASE}{path}")
    }
}
