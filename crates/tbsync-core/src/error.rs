//! Error types.

use core::fmt;

/// Port-level errors.
#[derive(Debug)]
pub enum TransportError {
    Closed,
    Io(std::io::Error),
    Encode(serde_json::Error),
    Decode(serde_json::Error),
    MessageTooLarge { len: usize, max: usize },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "port closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Encode(e) => write!(f, "serialize error: {e}"),
            Self::Decode(e) => write!(f, "deserialize error: {e}"),
            Self::MessageTooLarge { len, max } => {
                write!(f, "message of {len} bytes exceeds max {max}")
            }
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Errors seen by the caller of an outbound request.
#[derive(Debug)]
pub enum RpcError {
    Transport(TransportError),
    /// No port to the host is open (or the channel has been dropped).
    NotConnected,
    /// The port went away while the request was waiting for its response.
    Disconnected,
    TooManyPending { max: usize },
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::NotConnected => write!(f, "not connected to the host"),
            Self::Disconnected => write!(f, "host disconnected before responding"),
            Self::TooManyPending { max } => {
                write!(f, "too many pending requests (max {max})")
            }
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for RpcError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// Failure raised by a provider command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<RpcError> for HandlerError {
    fn from(e: RpcError) -> Self {
        Self::new(format!("host call failed: {e}"))
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("invalid parameter: {e}"))
    }
}

/// Errors reported by the channel itself.
#[derive(Debug)]
pub enum ChannelError {
    /// `register` was called while a handler is still registered.
    AlreadyRegistered,
    /// An inbound request arrived but no handler is registered.
    NoHandler,
    /// A command failed; the peer's request is left unanswered.
    Handler { command: String, error: HandlerError },
    Rpc(RpcError),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRegistered => {
                write!(f, "a provider is already registered; unregister first")
            }
            Self::NoHandler => write!(f, "no provider registered to handle requests"),
            Self::Handler { command, error } => write!(f, "{command}() failed: {error}"),
            Self::Rpc(e) => write!(f, "RPC error: {e}"),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Handler { error, .. } => Some(error),
            Self::Rpc(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RpcError> for ChannelError {
    fn from(e: RpcError) -> Self {
        Self::Rpc(e)
    }
}

impl From<TransportError> for ChannelError {
    fn from(e: TransportError) -> Self {
        Self::Rpc(RpcError::Transport(e))
    }
}
