use crate::workflow::{RunState, Workflow};
use async_trait::async_trait;
use flowmat_core::{
    start, Completion, FlowError, Inlet, Outlet, Payload, PortError, Process, RunContext,
    RunFailure, RunId, RunReport, Transfer, WaitPolicy, WorkflowError,
};
use futures::future::try_join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

impl<T: Payload> Workflow<T> {
    /// Execute the graph once.
    ///
    /// Starts every process, delivers staged inputs, collects outputs into
    /// their caches, then waits for every process and relay to finish.
    /// Ports are delivered and collected in name order. Exposed ports are
    /// skipped in both phases.
    pub async fn run(&mut self) -> Result<RunReport, FlowError> {
        self.run_linked(None).await
    }

    async fn run_linked(
        &mut self,
        parent: Option<CancellationToken>,
    ) -> Result<RunReport, FlowError> {
        self.begin_run()?;

        let run_id = RunId::new_v4();
        let run_token = self.cancel.child_token();
        let _abort_on_exit = run_token.clone().drop_guard();
        let watcher = parent.map(|p| link_cancellation(p, run_token.clone()));
        let wait = WaitPolicy::new(self.config.rendezvous_timeout(), run_token.clone());
        let ctx = RunContext::new(self.name.clone(), run_id, wait.clone());

        let started = Instant::now();
        let mut report = RunReport::new(run_id, self.name.clone());
        let mut errors = Vec::new();

        tracing::info!(
            "Starting workflow run: {} ({}, {} processes)",
            self.name,
            run_id,
            self.processes.len()
        );

        for connection in self.connections.iter_mut() {
            connection.arm(wait.clone());
        }

        let completions: Vec<Completion<T>> = std::mem::take(&mut self.processes)
            .into_values()
            .map(|process| start(process, ctx.clone()))
            .collect();

        if let Err(e) = self.deliver(&wait, &mut report).await {
            run_token.cancel();
            errors.push(e);
        }

        if errors.is_empty() {
            if let Err(e) = self.collect(&wait, &mut report).await {
                run_token.cancel();
                errors.push(e);
            }
        }

        let limit = self.config.completion_timeout();
        let mut pending: FuturesUnordered<_> =
            completions.into_iter().map(|c| c.wait(limit)).collect();
        let mut lost = false;

        while let Some(result) = pending.next().await {
            match result {
                Ok(finished) => {
                    let name = finished.process.name().to_string();
                    match finished.outcome {
                        Ok(()) => {
                            tracing::debug!("Process {} completed in {}ms", name, finished.duration_ms);
                            report.completed.push(name.clone());
                        }
                        Err(e) => {
                            run_token.cancel();
                            errors.push(FlowError::in_process(name.clone(), e));
                        }
                    }
                    self.processes.insert(name, finished.process);
                }
                Err(e) => {
                    tracing::error!("Workflow {}: {}", self.name, e);
                    run_token.cancel();
                    lost = true;
                    errors.push(e);
                }
            }
        }
        report.completed.sort();

        for connection in self.connections.iter_mut() {
            match connection.settle(limit).await {
                Some(Ok(())) => report.relays_fired += 1,
                Some(Err(e)) => errors.push(e),
                None => {}
            }
        }

        if let Some(watcher) = watcher {
            watcher.abort();
        }
        report.duration_ms = started.elapsed().as_millis() as u64;
        self.state = if lost {
            RunState::Poisoned
        } else {
            RunState::Idle
        };

        if errors.is_empty() {
            tracing::info!(
                "Workflow {} run {} completed in {}ms",
                self.name,
                run_id,
                report.duration_ms
            );
            return Ok(report);
        }

        // Root causes first, cancellations they triggered after.
        errors.sort_by_key(|e| e.is_cancelled());
        tracing::error!(
            "Workflow {} run {} failed with {} error(s) after {}ms",
            self.name,
            run_id,
            errors.len(),
            report.duration_ms
        );
        Err(RunFailure { report, errors }.into())
    }

    fn begin_run(&mut self) -> Result<(), WorkflowError> {
        match self.state {
            RunState::Running => return Err(WorkflowError::RunInProgress(self.name.clone())),
            RunState::Poisoned => return Err(WorkflowError::Poisoned(self.name.clone())),
            RunState::Idle => {}
        }

        if let Some(missing) = self
            .in_ports
            .values()
            .find(|b| !b.exposed && b.port.cache().is_none())
        {
            return Err(WorkflowError::MissingInput(missing.port.qualified_name()));
        }

        self.state = RunState::Running;
        Ok(())
    }

    async fn deliver(&mut self, wait: &WaitPolicy, report: &mut RunReport) -> Result<(), FlowError> {
        let deliveries = self
            .in_ports
            .iter()
            .filter(|(_, b)| !b.exposed)
            .map(|(name, b)| -> Result<_, FlowError> {
                let qualified = b.port.qualified_name();
                let value = b
                    .port
                    .cache()
                    .cloned()
                    .ok_or_else(|| WorkflowError::MissingInput(qualified.clone()))?;
                Ok((name.clone(), qualified, b.port.handle()?.clone(), value))
            })
            .collect::<Result<Vec<(String, String, Outlet<T>, T)>, FlowError>>()?;

        for (name, qualified, outlet, value) in deliveries {
            outlet
                .send(value, wait)
                .await
                .map_err(|e| e.at(qualified.clone(), Transfer::Send))?;
            tracing::debug!("Delivered staged value to {}", qualified);
            report.delivered.push(name);
        }
        Ok(())
    }

    async fn collect(&mut self, wait: &WaitPolicy, report: &mut RunReport) -> Result<(), FlowError> {
        let collections = self
            .out_ports
            .iter()
            .filter(|(_, b)| !b.exposed)
            .map(|(name, b)| -> Result<_, FlowError> {
                Ok((name.clone(), b.port.qualified_name(), b.port.handle()?.clone()))
            })
            .collect::<Result<Vec<(String, String, Inlet<T>)>, FlowError>>()?;

        for (name, qualified, inlet) in collections {
            let value = inlet
                .recv(wait)
                .await
                .map_err(|e| e.at(qualified.clone(), Transfer::Receive))?;
            if let Some(boundary) = self.out_ports.get_mut(&name) {
                boundary.port.set_cache(value);
            }
            tracing::debug!("Collected value from {}", qualified);
            report.collected.push(name);
        }
        Ok(())
    }
}

/// Cancel `run` when `parent` is cancelled; ends on its own once `run` is.
fn link_cancellation(parent: CancellationToken, run: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = parent.cancelled() => run.cancel(),
            _ = run.cancelled() => {}
        }
    })
}

#[async_trait]
impl<T: Payload> Process<T> for Workflow<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_in(&self, port: &str) -> Result<(), PortError> {
        let boundary = self
            .in_ports
            .get(port)
            .ok_or_else(|| PortError::UnknownPort(self.qualify(port)))?;
        if boundary.exposed {
            return Err(PortError::Exposed(self.qualify(port)));
        }
        if boundary.link.is_some() {
            return Err(PortError::AlreadyBound(self.qualify(port)));
        }
        Ok(())
    }

    fn check_out(&self, port: &str) -> Result<(), PortError> {
        let boundary = self
            .out_ports
            .get(port)
            .ok_or_else(|| PortError::UnknownPort(self.qualify(port)))?;
        if boundary.exposed {
            return Err(PortError::Exposed(self.qualify(port)));
        }
        if boundary.link.is_some() {
            return Err(PortError::AlreadyBound(self.qualify(port)));
        }
        Ok(())
    }

    fn set_in(&mut self, port: &str, inlet: Inlet<T>) -> Result<(), PortError> {
        self.check_in(port)?;
        if let Some(boundary) = self.in_ports.get_mut(port) {
            boundary.link = Some(inlet);
        }
        Ok(())
    }

    fn set_out(&mut self, port: &str, outlet: Outlet<T>) -> Result<(), PortError> {
        self.check_out(port)?;
        if let Some(boundary) = self.out_ports.get_mut(port) {
            boundary.link = Some(outlet);
        }
        Ok(())
    }

    /// Pull linked inputs from the parent, run the inner graph, push linked
    /// outputs back to the parent. Linked ports transfer concurrently.
    async fn execute(&mut self, ctx: &RunContext) -> Result<(), FlowError> {
        let upstream: Vec<(String, String, Inlet<T>)> = self
            .in_ports
            .iter()
            .filter(|(_, b)| !b.exposed)
            .filter_map(|(name, b)| {
                let link = b.link.clone()?;
                Some((name.clone(), b.port.qualified_name(), link))
            })
            .collect();

        let wait = &ctx.wait;
        let pulled = try_join_all(upstream.into_iter().map(|(name, qualified, inlet)| async move {
            let value = inlet
                .recv(wait)
                .await
                .map_err(|e| e.at(qualified, Transfer::Receive))?;
            Ok::<_, PortError>((name, value))
        }))
        .await?;
        for (name, value) in pulled {
            if let Some(boundary) = self.in_ports.get_mut(&name) {
                boundary.port.set_cache(value);
            }
        }

        let report = self
            .run_linked(Some(ctx.wait.cancellation().clone()))
            .await?;
        tracing::debug!(
            "Nested workflow {} finished inside {} (run {})",
            self.name,
            ctx.workflow,
            report.run_id
        );

        let downstream: Vec<(String, Outlet<T>, T)> = self
            .out_ports
            .values()
            .filter(|b| !b.exposed)
            .filter_map(|b| {
                let link = b.link.clone()?;
                let value = b.port.cache()?.clone();
                Some((b.port.qualified_name(), link, value))
            })
            .collect();

        try_join_all(downstream.into_iter().map(|(qualified, outlet, value)| async move {
            outlet
                .send(value, wait)
                .await
                .map_err(|e| e.at(qualified, Transfer::Send))
        }))
        .await?;
        Ok(())
    }
}
