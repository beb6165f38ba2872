use crate::channel::{Inlet, Outlet, Payload, WaitPolicy};
use crate::error::{FlowError, PortError, WorkflowError};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub type RunId = Uuid;

/// Capability every runnable unit implements, including a nested workflow.
///
/// Ports are declared explicitly: the owning workflow binds a channel end to
/// a named port through `set_in`/`set_out` before the process is started.
#[async_trait]
pub trait Process<T: Payload>: Send + 'static {
    fn name(&self) -> &str;

    /// Confirm an input port exists and is still unbound.
    fn check_in(&self, port: &str) -> Result<(), PortError>;

    /// Confirm an output port exists and is still unbound.
    fn check_out(&self, port: &str) -> Result<(), PortError>;

    fn set_in(&mut self, port: &str, inlet: Inlet<T>) -> Result<(), PortError>;

    fn set_out(&mut self, port: &str, outlet: Outlet<T>) -> Result<(), PortError>;

    /// Do one cycle of work: at most one value per port.
    async fn execute(&mut self, ctx: &RunContext) -> Result<(), FlowError>;
}

/// Execution context handed to each process for one run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub workflow: String,
    pub run_id: RunId,
    pub wait: WaitPolicy,
}

impl RunContext {
    pub fn new(workflow: impl Into<String>, run_id: RunId, wait: WaitPolicy) -> Self {
        Self {
            workflow: workflow.into(),
            run_id,
            wait,
        }
    }
}

/// A process that has finished and been handed back to its owner.
pub struct Finished<T: Payload> {
    pub process: Box<dyn Process<T>>,
    pub outcome: Result<(), FlowError>,
    pub duration_ms: u64,
}

/// One-shot completion signal of a started process.
pub struct Completion<T: Payload> {
    name: String,
    handle: JoinHandle<Finished<T>>,
}

impl<T: Payload> Completion<T> {
    /// Wait for the process to finish. Consumes the signal, so it resolves once.
    ///
    /// If the task panics or overruns `limit` it is aborted and the process is
    /// lost; the error says which.
    pub async fn wait(self, limit: Duration) -> Result<Finished<T>, FlowError> {
        let Completion { name, mut handle } = self;
        match tokio::time::timeout(limit, &mut handle).await {
            Ok(Ok(finished)) => Ok(finished),
            Ok(Err(e)) => Err(WorkflowError::ProcessLost {
                name,
                reason: format!("task join error: {}", e),
            }
            .into()),
            Err(_) => {
                handle.abort();
                Err(WorkflowError::ProcessLost {
                    name,
                    reason: format!("still running after {}ms", limit.as_millis()),
                }
                .into())
            }
        }
    }
}

/// Start a process as an independent task. Returns without waiting.
pub fn start<T: Payload>(mut process: Box<dyn Process<T>>, ctx: RunContext) -> Completion<T> {
    let name = process.name().to_string();
    tracing::debug!("Starting process {} (run {})", name, ctx.run_id);

    let handle = tokio::spawn(async move {
        let started = Instant::now();
        let outcome = process.execute(&ctx).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        // A failed process aborts the rest of its run.
        if let Err(e) = &outcome {
            if !e.is_cancelled() {
                tracing::error!("Process {} failed after {}ms: {}", process.name(), duration_ms, e);
                ctx.wait.cancellation().cancel();
            }
        }
        Finished {
            process,
            outcome,
            duration_ms,
        }
    });

    Completion { name, handle }
}
