use crate::config::RunConfig;
use crate::connection::{Connection, Endpoint};
use flowmat_core::{
    channel, FlowError, Inlet, Outlet, Payload, Port, PortError, Process, WorkflowError,
};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// A workflow-level port: the workflow's own channel end, an optional link
/// to a parent workflow's channel when nested, and the exposed flag.
pub(crate) struct BoundaryPort<H, L, T> {
    pub(crate) port: Port<H, T>,
    pub(crate) link: Option<L>,
    pub(crate) exposed: bool,
}

impl<H, L, T> BoundaryPort<H, L, T> {
    fn new(port: Port<H, T>) -> Self {
        Self {
            port,
            link: None,
            exposed: false,
        }
    }
}

/// Input boundary: the workflow sends into the graph, a parent may feed it.
pub(crate) type InBoundary<T> = BoundaryPort<Outlet<T>, Inlet<T>, T>;

/// Output boundary: the workflow receives from the graph, a parent may read it.
pub(crate) type OutBoundary<T> = BoundaryPort<Inlet<T>, Outlet<T>, T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    Idle,
    Running,
    Poisoned,
}

/// A graph of processes wired through their ports.
///
/// Building the graph has no execution side effects; [`Workflow::run`]
/// executes it once. A workflow is itself a [`Process`] and can be added to
/// another workflow.
pub struct Workflow<T: Payload> {
    pub(crate) name: String,
    pub(crate) config: RunConfig,
    pub(crate) processes: BTreeMap<String, Box<dyn Process<T>>>,
    pub(crate) connections: Vec<Connection<T>>,
    pub(crate) in_ports: BTreeMap<String, InBoundary<T>>,
    pub(crate) out_ports: BTreeMap<String, OutBoundary<T>>,
    pub(crate) state: RunState,
    pub(crate) cancel: CancellationToken,
}

impl<T: Payload> Workflow<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: RunConfig::default(),
            processes: BTreeMap::new(),
            connections: Vec::new(),
            in_ports: BTreeMap::new(),
            out_ports: BTreeMap::new(),
            state: RunState::Idle,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(name: impl Into<String>, config: RunConfig) -> Result<Self, FlowError> {
        config.validate()?;
        let mut workflow = Self::new(name);
        workflow.config = config;
        Ok(workflow)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Token that aborts the current and every future run when cancelled.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn process(&self, name: &str) -> Option<&dyn Process<T>> {
        self.processes.get(name).map(|p| p.as_ref())
    }

    pub fn process_names(&self) -> impl Iterator<Item = &str> {
        self.processes.keys().map(String::as_str)
    }

    pub fn connections(&self) -> &[Connection<T>] {
        &self.connections
    }

    /// Register a process under its name. Names must be unique and non-empty.
    pub fn add<P: Process<T>>(&mut self, process: P) -> Result<(), FlowError> {
        self.add_boxed(Box::new(process))
    }

    pub fn add_boxed(&mut self, process: Box<dyn Process<T>>) -> Result<(), FlowError> {
        let name = process.name().to_string();
        if name.is_empty() {
            return Err(WorkflowError::InvalidProcessName.into());
        }
        if self.processes.contains_key(&name) {
            return Err(WorkflowError::DuplicateProcessName(name).into());
        }
        tracing::debug!("Workflow {}: added process {}", self.name, name);
        self.processes.insert(name, process);
        Ok(())
    }

    /// Wire `send_proc.send_port` to `recv_proc.recv_port` through a one-shot relay.
    pub fn connect(
        &mut self,
        send_proc: &str,
        send_port: &str,
        recv_proc: &str,
        recv_port: &str,
    ) -> Result<(), FlowError> {
        self.lookup(send_proc)?.check_out(send_port)?;
        self.lookup(recv_proc)?.check_in(recv_port)?;

        let (sender_out, source) = channel::<T>();
        let (sink, receiver_in) = channel::<T>();

        self.lookup_mut(send_proc)?.set_out(send_port, sender_out)?;
        self.lookup_mut(recv_proc)?.set_in(recv_port, receiver_in)?;

        let connection = Connection::new(
            Endpoint {
                process: send_proc.to_string(),
                port: send_port.to_string(),
            },
            Endpoint {
                process: recv_proc.to_string(),
                port: recv_port.to_string(),
            },
            source,
            sink,
        );
        tracing::debug!("Workflow {}: connected {}", self.name, connection);
        self.connections.push(connection);
        Ok(())
    }

    /// Bind a channel end directly to a new workflow input port.
    pub fn bind_in(&mut self, name: &str, outlet: Outlet<T>) -> Result<(), FlowError> {
        self.ensure_in_free(name)?;
        let mut port = Port::new(self.name.clone(), name);
        port.bind(outlet)?;
        self.in_ports.insert(name.to_string(), BoundaryPort::new(port));
        Ok(())
    }

    /// Bind a channel end directly to a new workflow output port.
    pub fn bind_out(&mut self, name: &str, inlet: Inlet<T>) -> Result<(), FlowError> {
        self.ensure_out_free(name)?;
        let mut port = Port::new(self.name.clone(), name);
        port.bind(inlet)?;
        self.out_ports.insert(name.to_string(), BoundaryPort::new(port));
        Ok(())
    }

    /// Create workflow input `name` sharing one channel with `proc_name.port_name`.
    pub fn map_in(&mut self, name: &str, proc_name: &str, port_name: &str) -> Result<(), FlowError> {
        self.ensure_in_free(name)?;
        self.lookup(proc_name)?.check_in(port_name)?;

        let (outlet, inlet) = channel::<T>();
        self.lookup_mut(proc_name)?.set_in(port_name, inlet)?;
        self.bind_in(name, outlet)
    }

    /// Create workflow output `name` sharing one channel with `proc_name.port_name`.
    pub fn map_out(&mut self, name: &str, proc_name: &str, port_name: &str) -> Result<(), FlowError> {
        self.ensure_out_free(name)?;
        self.lookup(proc_name)?.check_out(port_name)?;

        let (outlet, inlet) = channel::<T>();
        self.lookup_mut(proc_name)?.set_out(port_name, outlet)?;
        self.bind_out(name, inlet)
    }

    /// Hand the caller the raw sending end of input `name`.
    ///
    /// Runs no longer deliver a staged value to this port; the caller sends
    /// on the returned outlet instead.
    pub fn expose_in(&mut self, name: &str) -> Result<Outlet<T>, FlowError> {
        let qualified = self.qualify(name);
        let boundary = self
            .in_ports
            .get_mut(name)
            .ok_or(PortError::UnknownPort(qualified))?;
        boundary.exposed = true;
        boundary.port.clear_cache();
        Ok(boundary.port.handle()?.clone())
    }

    /// Hand the caller the raw receiving end of output `name`.
    ///
    /// Runs no longer collect this port, so [`Workflow::output`] reports nothing for it.
    pub fn expose_out(&mut self, name: &str) -> Result<Inlet<T>, FlowError> {
        let qualified = self.qualify(name);
        let boundary = self
            .out_ports
            .get_mut(name)
            .ok_or(PortError::UnknownPort(qualified))?;
        boundary.exposed = true;
        boundary.port.clear_cache();
        Ok(boundary.port.handle()?.clone())
    }

    /// True if input `name` exists and was handed out by [`Workflow::expose_in`].
    pub fn is_input_exposed(&self, name: &str) -> bool {
        self.in_ports.get(name).is_some_and(|b| b.exposed)
    }

    /// True if output `name` exists and was handed out by [`Workflow::expose_out`].
    pub fn is_output_exposed(&self, name: &str) -> bool {
        self.out_ports.get(name).is_some_and(|b| b.exposed)
    }

    /// Stage `data` for delivery to input `port` on the next run.
    pub fn input(&mut self, port: &str, data: T) -> Result<(), FlowError> {
        let qualified = self.qualify(port);
        let boundary = self
            .in_ports
            .get_mut(port)
            .ok_or(PortError::UnknownPort(qualified))?;
        if boundary.exposed {
            tracing::warn!(
                "Workflow {}: staging into exposed port {} has no effect on runs",
                self.name,
                port
            );
        }
        boundary.port.set_cache(data);
        Ok(())
    }

    /// The value most recently collected on output `port`.
    pub fn output(&self, port: &str) -> Result<Option<&T>, FlowError> {
        let boundary = self
            .out_ports
            .get(port)
            .ok_or_else(|| PortError::UnknownPort(self.qualify(port)))?;
        Ok(boundary.port.cache())
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.in_ports.keys().map(String::as_str)
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.out_ports.keys().map(String::as_str)
    }

    pub(crate) fn qualify(&self, port: &str) -> String {
        format!("{}.{}", self.name, port)
    }

    fn lookup(&self, name: &str) -> Result<&dyn Process<T>, WorkflowError> {
        self.processes
            .get(name)
            .map(|p| p.as_ref())
            .ok_or_else(|| WorkflowError::UnknownProcess(name.to_string()))
    }

    fn lookup_mut(&mut self, name: &str) -> Result<&mut Box<dyn Process<T>>, WorkflowError> {
        self.processes
            .get_mut(name)
            .ok_or_else(|| WorkflowError::UnknownProcess(name.to_string()))
    }

    fn ensure_in_free(&self, name: &str) -> Result<(), PortError> {
        if self.in_ports.contains_key(name) {
            return Err(PortError::AlreadyBound(self.qualify(name)));
        }
        Ok(())
    }

    fn ensure_out_free(&self, name: &str) -> Result<(), PortError> {
        if self.out_ports.contains_key(name) {
            return Err(PortError::AlreadyBound(self.qualify(name)));
        }
        Ok(())
    }
}
