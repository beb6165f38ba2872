use async_trait::async_trait;
use flowmat_core::{
    FlowError, Inlet, Inputs, Outlet, Outputs, Payload, PortError, PortSet, Process, RunContext,
};
use futures::future::try_join_all;

/// Copy the value on `in` to every bound output port.
///
/// All copies are offered at once, so readers may take them in any order.
/// Declared outputs that were never wired are skipped.
pub struct Broadcast<T: Payload> {
    name: String,
    inputs: Inputs<T>,
    outputs: Outputs<T>,
}

impl<T: Payload> Broadcast<T> {
    pub fn new<I, S>(name: impl Into<String>, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        Self {
            inputs: PortSet::new(name.clone(), ["in"]),
            outputs: PortSet::new(name.clone(), outputs),
            name,
        }
    }
}

#[async_trait]
impl<T: Payload> Process<T> for Broadcast<T> {
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
        for port in self.outputs.iter().filter(|p| !p.is_bound()) {
            tracing::debug!("{}: output {} not wired, skipping", self.name, port.name());
        }

        let sends = self
            .outputs
            .iter()
            .filter(|p| p.is_bound())
            .map(|p| p.push(value.clone(), &ctx.wait));
        try_join_all(sends).await?;

        for port in self.outputs.iter_mut().filter(|p| p.is_bound()) {
            port.set_cache(value.clone());
        }
        Ok(())
    }
}
