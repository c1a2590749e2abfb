use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::{Envelope, TransportError};

use super::{PortBackend, PortInfo};

const CHANNEL_CAPACITY: usize = 64;

/// In-process port. Disconnecting either end closes both.
#[derive(Clone, Debug)]
pub struct MemPort {
    inner: Arc<MemInner>,
}

#[derive(Debug)]
struct MemInner {
    info: PortInfo,
    tx: mpsc::Sender<Envelope>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Envelope>>,
    closed: Arc<watch::Sender<bool>>,
}

impl MemPort {
    pub fn pair(name: &str, provider_id: &str, host_id: &str) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);

        let inner_a = Arc::new(MemInner {
            info: PortInfo::new(name, host_id),
            tx: tx_b,
            rx: tokio::sync::Mutex::new(rx_a),
            closed: closed.clone(),
        });

        let inner_b = Arc::new(MemInner {
            info: PortInfo::new(name, provider_id),
            tx: tx_a,
            rx: tokio::sync::Mutex::new(rx_b),
            closed,
        });

        (Self { inner: inner_a }, Self { inner: inner_b })
    }

    fn is_closed_inner(&self) -> bool {
        *self.inner.closed.borrow()
    }
}

async fn closed_signal(mut closed: watch::Receiver<bool>) {
    loop {
        let is_closed = *closed.borrow_and_update();
        if is_closed || closed.changed().await.is_err() {
            return;
        }
    }
}

impl PortBackend for MemPort {
    async fn post_message(&self, envelope: &Envelope) -> Result<(), TransportError> {
        if self.is_closed_inner() {
            return Err(TransportError::Closed);
        }

        self.inner
            .tx
            .send(envelope.clone())
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv_message(&self) -> Result<Envelope, TransportError> {
        let closed = self.inner.closed.subscribe();
        if self.is_closed_inner() {
            return Err(TransportError::Closed);
        }

        let mut rx = self.inner.rx.lock().await;
        tokio::select! {
            biased;
            envelope = rx.recv() => envelope.ok_or(TransportError::Closed),
            _ = closed_signal(closed) => Err(TransportError::Closed),
        }
    }

    fn disconnect(&self) {
        self.inner.closed.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        self.is_closed_inner()
    }

    fn info(&self) -> &PortInfo {
        &self.inner.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_carries_identities_and_messages() {
        let (provider, host) = MemPort::pair("ProviderConnection", "dav@test", "tbsync@test");
        assert_eq!(provider.info().sender_id(), "tbsync@test");
        assert_eq!(host.info().sender_id(), "dav@test");
        assert_ne!(provider.info().id(), host.info().id());

        let envelope = Envelope::new("tbsync@test", 1, None);
        host.post_message(&envelope).await.unwrap();
        assert_eq!(provider.recv_message().await.unwrap(), envelope);
    }

    #[tokio::test]
    async fn disconnect_wakes_the_other_end() {
        let (provider, host) = MemPort::pair("ProviderConnection", "dav@test", "tbsync@test");
        let reader = tokio::spawn(async move { provider.recv_message().await });
        tokio::task::yield_now().await;

        host.disconnect();
        assert!(matches!(
            reader.await.unwrap(),
            Err(TransportError::Closed)
        ));
        assert!(host.is_closed());
        assert!(matches!(
            host.post_message(&Envelope::new("x", 1, None)).await,
            Err(TransportError::Closed)
        ));
    }
}
