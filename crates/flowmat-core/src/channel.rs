//! Single-value rendezvous channels.
//!
//! A send completes only once a receiver has taken the value. A sender that
//! gives up (timeout or cancellation) withdraws its value: receivers skip it,
//! so an abandoned transfer can never surface in a later run. Both ends are
//! cheap to clone so a workflow can keep its wiring alive while a process or
//! relay task works on a copy of the same end. Every blocking operation is
//! bounded by a [`WaitPolicy`].

use crate::error::{PortError, Transfer};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

/// Marker for values that can travel through ports.
pub trait Payload: Clone + Send + Sync + 'static {}

impl<T> Payload for T where T: Clone + Send + Sync + 'static {}

/// A value in flight plus the acknowledgement its sender is waiting on.
#[derive(Debug)]
struct Handoff<T> {
    value: T,
    taken: oneshot::Sender<()>,
}

/// Create a single-value channel.
pub fn channel<T: Payload>() -> (Outlet<T>, Inlet<T>) {
    let (tx, rx) = mpsc::channel(1);
    (
        Outlet { tx },
        Inlet {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Sending end of a channel.
#[derive(Debug)]
pub struct Outlet<T> {
    tx: mpsc::Sender<Handoff<T>>,
}

impl<T> Clone for Outlet<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Payload> Outlet<T> {
    /// Offer `value` and wait until a receiver has taken it.
    pub async fn send(&self, value: T, wait: &WaitPolicy) -> Result<(), ChannelError> {
        let (ack, mut taken) = oneshot::channel();
        let outcome = {
            let handoff = async {
                self.tx
                    .send(Handoff { value, taken: ack })
                    .await
                    .map_err(|_| ChannelError::Closed)?;
                (&mut taken).await.map_err(|_| ChannelError::Closed)
            };
            tokio::select! {
                biased;
                _ = wait.cancel.cancelled() => Err(ChannelError::Cancelled),
                res = tokio::time::timeout(wait.timeout, handoff) => match res {
                    Ok(done) => done,
                    Err(_) => Err(ChannelError::Timeout(wait.timeout)),
                },
            }
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                // Closing settles the race with a receiver acking right now.
                taken.close();
                if taken.try_recv().is_ok() {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }
}

/// Receiving end of a channel.
#[derive(Debug)]
pub struct Inlet<T> {
    rx: Arc<Mutex<mpsc::Receiver<Handoff<T>>>>,
}

impl<T> Clone for Inlet<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<T: Payload> Inlet<T> {
    /// Wait for a value whose sender is still waiting, and acknowledge it.
    pub async fn recv(&self, wait: &WaitPolicy) -> Result<T, ChannelError> {
        let rx = Arc::clone(&self.rx);
        let op = async move {
            let mut rx = rx.lock().await;
            while let Some(Handoff { value, taken }) = rx.recv().await {
                if taken.send(()).is_ok() {
                    return Some(value);
                }
                tracing::trace!("Dropping a value its sender withdrew");
            }
            None
        };
        tokio::select! {
            biased;
            _ = wait.cancel.cancelled() => Err(ChannelError::Cancelled),
            res = tokio::time::timeout(wait.timeout, op) => match res {
                Ok(Some(value)) => Ok(value),
                Ok(None) => Err(ChannelError::Closed),
                Err(_) => Err(ChannelError::Timeout(wait.timeout)),
            },
        }
    }
}

/// Why a blocking channel operation gave up.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("channel closed")]
    Closed,

    #[error("cancelled")]
    Cancelled,
}

impl ChannelError {
    /// Attach the port the operation was waiting on.
    pub fn at(self, port: impl Into<String>, transfer: Transfer) -> PortError {
        let port = port.into();
        match self {
            ChannelError::Timeout(waited) => PortError::DeadlockTimeout {
                port,
                transfer,
                waited_ms: waited.as_millis() as u64,
            },
            ChannelError::Closed => PortError::Closed { port, transfer },
            ChannelError::Cancelled => PortError::Cancelled { port, transfer },
        }
    }
}

/// Bound on every blocking send or receive: a timeout plus a cancellation token.
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    timeout: Duration,
    cancel: CancellationToken,
}

impl WaitPolicy {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}
