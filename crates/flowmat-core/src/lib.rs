//! Core abstractions for the flowmat runtime
//!
//! Single-value channels, named ports with a last-value cache, and the
//! `Process` capability that every runnable unit implements. It has no
//! knowledge of how processes are wired together.

mod channel;
mod error;
mod port;
mod process;
mod report;

pub use channel::{channel, ChannelError, Inlet, Outlet, Payload, WaitPolicy};
pub use error::{FlowError, PortError, RunFailure, Transfer, WorkflowError};
pub use port::{InPort, Inputs, OutPort, Outputs, Port, PortSet};
pub use process::{start, Completion, Finished, Process, RunContext, RunId};
pub use report::RunReport;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
