//! In-memory transports for testing.
//!
//! Lets both ends of the protocol run in one process without sockets.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::sync::Mutex;
use tokio::sync::Notify;
use tokio::sync::mpsc;

use crate::transport;
use crate::transport::Transport;

/// A duplex channel transport using tokio mpsc channels.
///
/// Frames sent on one half appear on the other half's `recv()` and vice versa.
/// Closing either half ends the other half's stream.
pub struct DuplexChannelTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
    closed: Arc<AtomicBool>,
    close_signal: Arc<Notify>,
}

impl DuplexChannelTransport {
    /// Creates a pair of transports connected to each other.
    ///
    /// Frames sent on `a` are received by `b` and vice versa.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let close_signal = Arc::new(Notify::new());

        let a = Self {
            tx: Mutex::new(Some(tx_a)),
            rx: Mutex::new(rx_b),
            closed: closed.clone(),
            close_signal: close_signal.clone(),
        };

        let b = Self {
            tx: Mutex::new(Some(tx_b)),
            rx: Mutex::new(rx_a),
            closed,
            close_signal,
        };

        (a, b)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for DuplexChannelTransport {
    async fn send(&self, frame: &str) -> transport::Result<()> {
        if self.is_closed() {
            return Err(transport::Error::ConnectionLost("Channel closed".into()));
        }
        let tx = self.tx.lock().await;
        let Some(tx) = tx.as_ref() else {
            return Err(transport::Error::ConnectionLost("Channel closed".into()));
        };
        tx.send(frame.to_string())
            .map_err(|_| transport::Error::ConnectionLost("Channel closed".into()))
    }

    async fn recv(&self) -> transport::Result<Option<String>> {
        let mut rx = self.rx.lock().await;
        let notified = self.close_signal.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_closed() {
            return Ok(None);
        }
        tokio::select! {
            frame = rx.recv() => Ok(frame),
            _ = notified => Ok(None),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.tx.lock().await.take();
        self.close_signal.notify_waiters();
    }
}
