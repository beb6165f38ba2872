use flowmat_core::{FlowError, Inlet, Outlet, Payload, Transfer, WaitPolicy, WorkflowError};
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;

/// One end of a connection: a process and one of its ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub process: String,
    pub port: String,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.process, self.port)
    }
}

enum RelayState {
    Pending,
    Armed(JoinHandle<Result<(), FlowError>>),
    Spent,
}

/// A one-shot relay from a sender's output port to a receiver's input port.
///
/// The workflow keeps the original channel ends so the wiring stays open after
/// the relay task ends; a fired relay is never re-armed.
pub struct Connection<T: Payload> {
    from: Endpoint,
    to: Endpoint,
    source: Inlet<T>,
    sink: Outlet<T>,
    state: RelayState,
}

impl<T: Payload> Connection<T> {
    pub fn new(from: Endpoint, to: Endpoint, source: Inlet<T>, sink: Outlet<T>) -> Self {
        Self {
            from,
            to,
            source,
            sink,
            state: RelayState::Pending,
        }
    }

    pub fn sender(&self) -> &Endpoint {
        &self.from
    }

    pub fn receiver(&self) -> &Endpoint {
        &self.to
    }

    pub fn is_spent(&self) -> bool {
        matches!(self.state, RelayState::Spent)
    }

    /// Start the relay task if it has never run. No-op otherwise.
    pub fn arm(&mut self, wait: WaitPolicy) {
        if !matches!(self.state, RelayState::Pending) {
            tracing::debug!("Relay {} already used, not re-arming", self);
            return;
        }

        let source = self.source.clone();
        let sink = self.sink.clone();
        let from = self.from.to_string();
        let to = self.to.to_string();

        tracing::debug!("Arming relay {} -> {}", from, to);
        self.state = RelayState::Armed(tokio::spawn(async move {
            let forwarded = async {
                let value = source
                    .recv(&wait)
                    .await
                    .map_err(|e| e.at(from.clone(), Transfer::Receive))?;
                sink.send(value, &wait)
                    .await
                    .map_err(|e| e.at(to.clone(), Transfer::Send))?;
                Ok::<(), FlowError>(())
            }
            .await;

            match &forwarded {
                Ok(()) => tracing::debug!("Relay {} -> {} forwarded its value", from, to),
                Err(e) => {
                    tracing::warn!("Relay {} -> {} failed: {}", from, to, e);
                    wait.cancellation().cancel();
                }
            }
            forwarded
        }));
    }

    /// Wait for an armed relay to end and mark it spent.
    ///
    /// Returns `None` if the relay was not armed in this run.
    pub async fn settle(&mut self, limit: Duration) -> Option<Result<(), FlowError>> {
        let handle = match std::mem::replace(&mut self.state, RelayState::Spent) {
            RelayState::Armed(handle) => handle,
            other => {
                self.state = other;
                return None;
            }
        };

        let label = self.to_string();
        let mut handle = handle;
        let result = match tokio::time::timeout(limit, &mut handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => Err(FlowError::Execution(format!("relay {} task failed: {}", label, e))),
            Err(_) => {
                handle.abort();
                Err(WorkflowError::ProcessLost {
                    name: format!("relay {}", label),
                    reason: format!("still running after {}ms", limit.as_millis()),
                }
                .into())
            }
        };
        Some(result)
    }
}

impl<T: Payload> fmt::Display for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}
