use async_trait::async_trait;
use flowmat_core::{
    FlowError, Inlet, Inputs, Outlet, Outputs, Payload, PortError, PortSet, Process, RunContext,
};

type CombineFn<T> = Box<dyn Fn(T, T) -> T + Send + Sync>;

/// Join the values on `left` and `right` into one value on `out`
pub struct Combine<T: Payload> {
    name: String,
    inputs: Inputs<T>,
    outputs: Outputs<T>,
    f: CombineFn<T>,
}

impl<T: Payload> Combine<T> {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            inputs: PortSet::new(name.clone(), ["left", "right"]),
            outputs: PortSet::new(name.clone(), ["out"]),
            name,
            f: Box::new(f),
        }
    }
}

#[async_trait]
impl<T: Payload> Process<T> for Combine<T> {
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
        // Wait on both sides at once; senders block until their value is taken.
        let left_port = self.inputs.get("left")?;
        let right_port = self.inputs.get("right")?;
        let (left, right) = tokio::try_join!(
            left_port.fetch(&ctx.wait),
            right_port.fetch(&ctx.wait)
        )?;
        self.inputs.get_mut("left")?.set_cache(left.clone());
        self.inputs.get_mut("right")?.set_cache(right.clone());

        let combined = (self.f)(left, right);
        self.outputs.get_mut("out")?.emit(combined, &ctx.wait).await?;
        Ok(())
    }
}
