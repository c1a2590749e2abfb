//! Command tables: the provider's capabilities, looked up by name.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::HandlerError;

pub type CommandResult = Result<Value, HandlerError>;

type BoxedCommand = Arc<dyn Fn(Params) -> BoxFuture<'static, CommandResult> + Send + Sync>;

/// Positional parameters of an inbound request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<Value>);

impl Params {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw parameter; `None` when the caller passed fewer parameters.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Required parameter decoded as `T`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, HandlerError> {
        let value = self
            .0
            .get(index)
            .ok_or_else(|| HandlerError::new(format!("missing parameter #{index}")))?;
        Ok(T::deserialize(value)?)
    }

    /// Optional parameter; absent and `null` both read as `None`.
    pub fn opt_arg<T: DeserializeOwned>(&self, index: usize) -> Result<Option<T>, HandlerError> {
        match self.0.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(T::deserialize(value)?)),
        }
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Immutable mapping from command name to handler function.
///
/// Built once with [`CommandTable::builder`]; names are validated there.
#[derive(Clone, Default)]
pub struct CommandTable {
    commands: Arc<HashMap<String, BoxedCommand>>,
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandTable")
            .field("commands", &self.names())
            .finish()
    }
}

impl CommandTable {
    pub fn builder() -> CommandTableBuilder {
        CommandTableBuilder::new()
    }

    pub fn contains(&self, command: &str) -> bool {
        self.commands.contains_key(command)
    }

    /// Sorted command names (for diagnostics).
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Invoke `command` with `params`.
    ///
    /// An unknown command is not an error: it resolves to `Ok(None)` so a
    /// partially implemented provider keeps the channel alive.
    pub fn dispatch(
        &self,
        command: &str,
        params: Params,
    ) -> BoxFuture<'static, Result<Option<Value>, HandlerError>> {
        match self.commands.get(command) {
            Some(handler) => {
                let fut = handler(params);
                Box::pin(async move { fut.await.map(Some) })
            }
            None => {
                tracing::warn!(
                    command,
                    "incomplete provider implementation: missing {command}()"
                );
                Box::pin(async { Ok(None) })
            }
        }
    }
}

/// Builder for [`CommandTable`].
pub struct CommandTableBuilder {
    commands: HashMap<String, BoxedCommand>,
}

impl CommandTableBuilder {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Add a command.
    ///
    /// # Panics
    ///
    /// Panics on an empty name or when `name` is already registered.
    pub fn command<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        assert!(!name.is_empty(), "command name must not be empty");
        let boxed: BoxedCommand = Arc::new(move |params| Box::pin(handler(params)));
        let prev = self.commands.insert(name.to_owned(), boxed);
        assert!(prev.is_none(), "duplicate registration for command {name}");
        self
    }

    pub fn build(self) -> CommandTable {
        CommandTable {
            commands: Arc::new(self.commands),
        }
    }
}

impl Default for CommandTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}
