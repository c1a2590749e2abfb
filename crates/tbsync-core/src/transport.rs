//! Port enum and internal backend trait.
//!
//! The public API is the [`Port`] enum. Each backend lives in its own module
//! under `transport/` and implements the internal [`PortBackend`] trait.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Envelope, TransportError};

static NEXT_PORT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a port: who opened it, under which name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    id: u64,
    name: String,
    sender_id: String,
}

impl PortInfo {
    pub(crate) fn new(name: &str, sender_id: &str) -> Self {
        Self {
            id: NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_owned(),
            sender_id: sender_id.to_owned(),
        }
    }

    /// Process-unique port ID. Both ends of a pair get distinct IDs.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Extension ID of the peer on the other end of this port.
    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }
}

pub(crate) trait PortBackend: Send + Sync + Clone + 'static {
    async fn post_message(&self, envelope: &Envelope) -> Result<(), TransportError>;
    async fn recv_message(&self) -> Result<Envelope, TransportError>;
    fn disconnect(&self);
    fn is_closed(&self) -> bool;
    fn info(&self) -> &PortInfo;
}

#[derive(Clone, Debug)]
pub enum Port {
    Mem(mem::MemPort),
    Stream(stream::StreamPort),
}

impl Port {
    pub async fn post_message(&self, envelope: &Envelope) -> Result<(), TransportError> {
        match self {
            Port::Mem(p) => p.post_message(envelope).await,
            Port::Stream(p) => p.post_message(envelope).await,
        }
    }

    pub async fn recv_message(&self) -> Result<Envelope, TransportError> {
        match self {
            Port::Mem(p) => p.recv_message().await,
            Port::Stream(p) => p.recv_message().await,
        }
    }

    pub fn disconnect(&self) {
        match self {
            Port::Mem(p) => p.disconnect(),
            Port::Stream(p) => p.disconnect(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Port::Mem(p) => p.is_closed(),
            Port::Stream(p) => p.is_closed(),
        }
    }

    pub fn info(&self) -> &PortInfo {
        match self {
            Port::Mem(p) => p.info(),
            Port::Stream(p) => p.info(),
        }
    }

    pub fn id(&self) -> u64 {
        self.info().id()
    }

    pub fn sender_id(&self) -> &str {
        self.info().sender_id()
    }

    /// Connected in-process pair.
    ///
    /// The first port is the provider's end: its sender is `host_id`. The
    /// second is the host's end: its sender is `provider_id`.
    pub fn mem_pair(name: &str, provider_id: &str, host_id: &str) -> (Self, Self) {
        let (a, b) = mem::MemPort::pair(name, provider_id, host_id);
        (Port::Mem(a), Port::Mem(b))
    }

    /// Port over an existing byte stream opened by `sender_id`.
    pub fn stream<S>(name: &str, sender_id: &str, stream: S) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        Port::Stream(stream::StreamPort::new(name, sender_id, stream))
    }

    /// Connected stream pair over `tokio::io::duplex`, same identities as
    /// [`Port::mem_pair`].
    pub fn stream_pair(name: &str, provider_id: &str, host_id: &str) -> (Self, Self) {
        let (a, b) = stream::StreamPort::pair(name, provider_id, host_id);
        (Port::Stream(a), Port::Stream(b))
    }
}

pub mod mem;
pub mod stream;
