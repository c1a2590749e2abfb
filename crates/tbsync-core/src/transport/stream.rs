//! Byte-stream port using WebExtension native-messaging framing.
//!
//! Each message is sent as:
//! - `u32` in native byte order: length of the JSON body
//! - `[u8; len]`: UTF-8 JSON
//!
//! Browsers refuse messages from a native application that are larger than
//! 1 MiB, so outbound messages are limited to [`MAX_OUTBOUND_LEN`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;

use crate::{Envelope, TransportError};

use super::{PortBackend, PortInfo};

pub const MAX_OUTBOUND_LEN: usize = 1024 * 1024;
pub const MAX_INBOUND_LEN: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct StreamPort {
    info: PortInfo,
    inner: Arc<StreamInner>,
    /// Created by [`StreamPort::with_identity`].
    rebound_view: bool,
}

impl std::fmt::Debug for StreamPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPort")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

struct StreamInner {
    reader: AsyncMutex<Box<dyn AsyncRead + Unpin + Send>>,
    writer: AsyncMutex<Box<dyn AsyncWrite + Unpin + Send>>,
    closed: AtomicBool,
    /// Set once the stream has been handed over under a new identity.
    rebound: AtomicBool,
}

impl StreamPort {
    pub fn new<S>(name: &str, sender_id: &str, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_halves(name, sender_id, reader, writer)
    }

    /// Build a port from separate read and write halves, e.g. stdin/stdout.
    pub fn from_halves<R, W>(name: &str, sender_id: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            info: PortInfo::new(name, sender_id),
            inner: Arc::new(StreamInner {
                reader: AsyncMutex::new(Box::new(reader)),
                writer: AsyncMutex::new(Box::new(writer)),
                closed: AtomicBool::new(false),
                rebound: AtomicBool::new(false),
            }),
            rebound_view: false,
        }
    }

    pub fn pair(name: &str, provider_id: &str, host_id: &str) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(65536);
        (Self::new(name, host_id, a), Self::new(name, provider_id, b))
    }

    /// Same stream under a new identity, e.g. once a handshake has named
    /// the peer. The new port gets its own port ID.
    ///
    /// Ports that existed before the rebind can still read but no longer
    /// write; a write already in progress finishes before this returns.
    pub async fn with_identity(&self, name: &str, sender_id: &str) -> Self {
        let _writer = self.inner.writer.lock().await;
        self.inner.rebound.store(true, Ordering::Release);
        Self {
            info: PortInfo::new(name, sender_id),
            inner: self.inner.clone(),
            rebound_view: true,
        }
    }

    /// Whether this port has been superseded by [`StreamPort::with_identity`].
    pub fn is_superseded(&self) -> bool {
        !self.rebound_view && self.inner.rebound.load(Ordering::Acquire)
    }

    fn is_closed_inner(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Write one framed JSON value.
    pub async fn send_value(&self, value: &Value) -> Result<(), TransportError> {
        let body = serde_json::to_vec(value).map_err(TransportError::Encode)?;
        self.write_frame(&body).await
    }

    /// Read one framed JSON value.
    pub async fn recv_value(&self) -> Result<Value, TransportError> {
        let body = self.read_frame().await?;
        serde_json::from_slice(&body).map_err(TransportError::Decode)
    }

    async fn write_frame(&self, body: &[u8]) -> Result<(), TransportError> {
        if self.is_closed_inner() {
            return Err(TransportError::Closed);
        }
        if body.len() > MAX_OUTBOUND_LEN {
            return Err(TransportError::MessageTooLarge {
                len: body.len(),
                max: MAX_OUTBOUND_LEN,
            });
        }

        let mut writer = self.inner.writer.lock().await;
        if self.is_superseded() {
            return Err(TransportError::Closed);
        }
        writer
            .write_all(&(body.len() as u32).to_ne_bytes())
            .await
            .map_err(TransportError::Io)?;
        writer.write_all(body).await.map_err(TransportError::Io)?;
        writer.flush().await.map_err(TransportError::Io)?;
        Ok(())
    }

    async fn read_frame(&self) -> Result<Vec<u8>, TransportError> {
        if self.is_closed_inner() {
            return Err(TransportError::Closed);
        }

        let mut reader = self.inner.reader.lock().await;

        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransportError::Closed
            } else {
                TransportError::Io(e)
            }
        })?;
        let len = u32::from_ne_bytes(len_buf) as usize;
        if len > MAX_INBOUND_LEN {
            return Err(TransportError::MessageTooLarge {
                len,
                max: MAX_INBOUND_LEN,
            });
        }

        let mut body = vec![0u8; len];
        reader
            .read_exact(&mut body)
            .await
            .map_err(TransportError::Io)?;
        Ok(body)
    }
}

impl PortBackend for StreamPort {
    async fn post_message(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let body = serde_json::to_vec(envelope).map_err(TransportError::Encode)?;
        self.write_frame(&body).await
    }

    async fn recv_message(&self) -> Result<Envelope, TransportError> {
        let body = self.read_frame().await?;
        serde_json::from_slice(&body).map_err(TransportError::Decode)
    }

    fn disconnect(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Shut the write half down so the peer sees EOF.
        let inner = self.inner.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let mut writer = inner.writer.lock().await;
                let _ = writer.shutdown().await;
            });
        }
    }

    fn is_closed(&self) -> bool {
        self.is_closed_inner()
    }

    fn info(&self) -> &PortInfo {
        &self.info
    }
}
