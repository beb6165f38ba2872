use async_trait::async_trait;
use flowmat_core::{FlowError, Inlet, Outlet, Outputs, Payload, PortError, PortSet, Process, RunContext};

/// Emit the same value on `out` every run. Has no inputs.
pub struct Constant<T: Payload> {
    name: String,
    value: T,
    outputs: Outputs<T>,
}

impl<T: Payload> Constant<T> {
    pub fn new(name: impl Into<String>, value: T) -> Self {
        let name = name.into();
        Self {
            outputs: PortSet::new(name.clone(), ["out"]),
            name,
            value,
        }
    }
}

#[async_trait]
impl<T: Payload> Process<T> for Constant<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_in(&self, port: &str) -> Result<(), PortError> {
        Err(PortError::UnknownPort(format!("{}.{}", self.name, port)))
    }

    fn check_out(&self, port: &str) -> Result<(), PortError> {
        self.outputs.check(port)
    }

    fn set_in(&mut self, port: &str, _inlet: Inlet<T>) -> Result<(), PortError> {
        self.check_in(port)
    }

    fn set_out(&mut self, port: &str, outlet: Outlet<T>) -> Result<(), PortError> {
        self.outputs.bind(port, outlet)
    }

    async fn execute(&mut self, ctx: &RunContext) -> Result<(), FlowError> {
        let value = self.value.clone();
        self.outputs.get_mut("out")?.emit(value, &ctx.wait).await?;
        Ok(())
    }
}
