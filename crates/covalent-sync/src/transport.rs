//! Transport abstraction for the sync protocol.
//!
//! A transport carries frames (newline-joined messages) to and from one
//! peer. It must keep order but need not be reliable.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::{Result, SyncError};

/// Frame transport to a single peer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, frame: String) -> Result<()>;

    /// Next frame if one is already waiting.
    fn try_recv(&self) -> Result<Option<String>>;

    /// Wait up to `timeout` for the next frame.
    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<String>>;

    /// Bytes sent but not yet taken by the other side.
    fn buffered_amount(&self) -> usize;

    fn is_connected(&self) -> bool;

    fn close(&self);
}

/// One end of an in-process channel pair.
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
    outbound: Arc<AtomicUsize>,
    inbound: Arc<AtomicUsize>,
    open: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Two connected ends.
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a_to_b = Arc::new(AtomicUsize::new(0));
        let b_to_a = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicBool::new(true));

        let a = MemoryTransport {
            tx: a_tx,
            rx: Mutex::new(a_rx),
            outbound: a_to_b.clone(),
            inbound: b_to_a.clone(),
            open: open.clone(),
        };
        let b = MemoryTransport {
            tx: b_tx,
            rx: Mutex::new(b_rx),
            outbound: b_to_a,
            inbound: a_to_b,
            open,
        };
        (a, b)
    }

    fn took(&self, frame: &str) {
        self.inbound.fetch_sub(frame.len(), Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: String) -> Result<()> {
        if !self.is_connected() {
            return Err(SyncError::Disconnected);
        }
        let len = frame.len();
        self.outbound.fetch_add(len, Ordering::SeqCst);
        self.tx.send(frame).map_err(|_| {
            self.outbound.fetch_sub(len, Ordering::SeqCst);
            SyncError::Disconnected
        })
    }

    fn try_recv(&self) -> Result<Option<String>> {
        let Ok(mut rx) = self.rx.try_lock() else {
            return Ok(None);
        };
        match rx.try_recv() {
            Ok(frame) => {
                self.took(&frame);
                Ok(Some(frame))
            }
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(SyncError::Disconnected),
        }
    }

    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<String>> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(frame)) => {
                self.took(&frame);
                Ok(Some(frame))
            }
            Ok(None) => Err(SyncError::Disconnected),
            Err(_) => Ok(None),
        }
    }

    fn buffered_amount(&self) -> usize {
        self.outbound.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}
