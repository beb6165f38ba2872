use async_trait::async_trait;
use flowmat_core::{
    FlowError, Inlet, Inputs, Outlet, Outputs, Payload, PortError, PortSet, Process, RunContext,
    Transfer,
};
use std::time::Duration;
use tokio::time::sleep;

/// Hold the value on `in` for a fixed duration before emitting it on `out`
pub struct Delay<T: Payload> {
    name: String,
    delay: Duration,
    inputs: Inputs<T>,
    outputs: Outputs<T>,
}

impl<T: Payload> Delay<T> {
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        let name = name.into();
        Self {
            inputs: PortSet::new(name.clone(), ["in"]),
            outputs: PortSet::new(name.clone(), ["out"]),
            name,
            delay,
        }
    }
}

#[async_trait]
impl<T: Payload> Process<T> for Delay<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_in(&self, port: &str) -> Result<(), PortError> {
        self.inputs.check(port)
    }

    fn check_out(&self, port: &str) -> Result<(), PortError> {
        self.outputs.check(port)
    }

    fn set_in(&mut self, port: &str, inlet: Inlet<T>) -> Result<(), PortError> {
        self.inputs.bind(port, inlet)
    }

    fn set_out(&mut self, port: &str, outlet: Outlet<T>) -> Result<(), PortError> {
        self.outputs.bind(port, outlet)
    }

    async fn execute(&mut self, ctx: &RunContext) -> Result<(), FlowError> {
        let value = self.inputs.get_mut("in")?.receive(&ctx.wait).await?;

        tracing::debug!("{}: delaying for {}ms", self.name, self.delay.as_millis());
        tokio::select! {
            _ = ctx.wait.cancellation().cancelled() => {
                return Err(PortError::Cancelled {
                    port: format!("{}.out", self.name),
                    transfer: Transfer::Send,
                }
                .into());
            }
            _ = sleep(self.delay) => {}
        }

        self.outputs.get_mut("out")?.emit(value, &ctx.wait).await?;
        Ok(())
    }
}
