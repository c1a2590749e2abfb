//! Provider side of the TbSync provider protocol.
//!
//! A provider registers a [`CommandTable`] with a [`Channel`]. The channel
//! announces the provider to the TbSync host until the host opens a
//! [`Port`], then serves the host's requests from the table and carries the
//! provider's own requests (see [`HostClient`]) in the other direction.
//!
//! ```ignore
//! let channel = Channel::new(ChannelConfig::from_env(), runtime);
//! channel.register(table).await?;
//! tokio::spawn(channel.clone().serve(events));
//! ```

mod channel;
mod dispatch;
mod envelope;
mod error;
mod host;
mod runtime;
pub mod strings;
pub mod transport;

pub use channel::{Channel, ChannelConfig, DEFAULT_ANNOUNCE_INTERVAL, DEFAULT_HOST_ID};
pub use dispatch::{CommandResult, CommandTable, CommandTableBuilder, Params};
pub use envelope::{AnnounceMessage, Envelope, INITIATE_CONNECT, ProviderInfo, Request};
pub use error::{ChannelError, HandlerError, RpcError, TransportError};
pub use host::HostClient;
pub use runtime::{AddonInfo, Runtime, RuntimeEvent};
pub use transport::{Port, PortInfo};
