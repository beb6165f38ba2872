use async_trait::async_trait;
use flowmat_core::{
    FlowError, Inlet, Inputs, Outlet, Outputs, Payload, PortError, PortSet, Process, RunContext,
};
use std::fmt;

/// Log the value passing from `in` to `out`
pub struct Tap<T: Payload> {
    name: String,
    inputs: Inputs<T>,
    outputs: Outputs<T>,
}

impl<T: Payload> Tap<T> {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            inputs: PortSet::new(name.clone(), ["in"]),
            outputs: PortSet::new(name.clone(), ["out"]),
            name,
        }
    }
}

#[async_trait]
impl<T: Payload + fmt::Debug> Process<T> for Tap<T> {
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
        tracing::info!("{} [{} run {}]: {:?}", self.name, ctx.workflow, ctx.run_id, value);
        self.outputs.get_mut("out")?.emit(value, &ctx.wait).await?;
        Ok(())
    }
}
