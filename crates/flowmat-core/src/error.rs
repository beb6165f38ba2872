use crate::report::RunReport;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Port error: {0}")]
    Port(#[from] PortError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Process '{name}' failed: {source}")]
    Process {
        name: String,
        source: Box<FlowError>,
    },

    #[error(transparent)]
    Run(Box<RunFailure>),

    #[error("Execution error: {0}")]
    Execution(String),
}

impl FlowError {
    /// Wrap an error raised inside the named process.
    pub fn in_process(name: impl Into<String>, source: FlowError) -> Self {
        FlowError::Process {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// True if this error, or any error it wraps, is an expired rendezvous.
    pub fn is_deadlock_timeout(&self) -> bool {
        match self {
            FlowError::Port(PortError::DeadlockTimeout { .. }) => true,
            FlowError::Process { source, .. } => source.is_deadlock_timeout(),
            FlowError::Run(failure) => failure.errors.iter().any(FlowError::is_deadlock_timeout),
            _ => false,
        }
    }

    /// True if the failure was caused by run cancellation rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        match self {
            FlowError::Port(PortError::Cancelled { .. }) => true,
            FlowError::Process { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Direction of a blocking channel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Send,
    Receive,
}

impl fmt::Display for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transfer::Send => f.write_str("send"),
            Transfer::Receive => f.write_str("receive"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("Unknown port: {0}")]
    UnknownPort(String),

    #[error("Port already bound: {0}")]
    AlreadyBound(String),

    #[error("Port not bound: {0}")]
    Unbound(String),

    #[error("Port is exposed to the caller and cannot be linked: {0}")]
    Exposed(String),

    #[error("Deadlock timeout on '{port}': {transfer} did not complete within {waited_ms}ms")]
    DeadlockTimeout {
        port: String,
        transfer: Transfer,
        waited_ms: u64,
    },

    #[error("Channel closed on '{port}' during {transfer}")]
    Closed { port: String, transfer: Transfer },

    #[error("Cancelled on '{port}' during {transfer}")]
    Cancelled { port: String, transfer: Transfer },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Unknown process: {0}")]
    UnknownProcess(String),

    #[error("Duplicate process name: {0}")]
    DuplicateProcessName(String),

    #[error("Process name must not be empty")]
    InvalidProcessName,

    #[error("No value staged for input port: {0}")]
    MissingInput(String),

    #[error("Workflow '{0}' is already running")]
    RunInProgress(String),

    #[error("Workflow '{0}' lost a process in a previous run and cannot run again")]
    Poisoned(String),

    #[error("Process '{name}' did not hand back control: {reason}")]
    ProcessLost { name: String, reason: String },

    #[error("Invalid run configuration: {0}")]
    InvalidConfig(String),
}

/// Every error collected during one run, plus how far the run got.
#[derive(Error, Debug)]
#[error(
    "Run of workflow '{}' failed with {} error(s); first: {}",
    .report.workflow,
    .errors.len(),
    first_error(.errors)
)]
pub struct RunFailure {
    pub report: RunReport,
    pub errors: Vec<FlowError>,
}

fn first_error(errors: &[FlowError]) -> String {
    errors
        .first()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl From<RunFailure> for FlowError {
    fn from(failure: RunFailure) -> Self {
        FlowError::Run(Box::new(failure))
    }
}
