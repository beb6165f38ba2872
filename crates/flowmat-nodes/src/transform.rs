use async_trait::async_trait;
use flowmat_core::{
    FlowError, Inlet, Inputs, Outlet, Outputs, Payload, PortError, PortSet, Process, RunContext,
};

type TransformFn<T> = Box<dyn Fn(T) -> T + Send + Sync>;

/// Apply a function to the value on `in` and emit the result on `out`
pub struct Transform<T: Payload> {
    name: String,
    inputs: Inputs<T>,
    outputs: Outputs<T>,
    f: TransformFn<T>,
}

impl<T: Payload> Transform<T> {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            inputs: PortSet::new(name.clone(), ["in"]),
            outputs: PortSet::new(name.clone(), ["out"]),
            name,
            f: Box::new(f),
        }
    }

    /// Forward the input unchanged.
    pub fn identity(name: impl Into<String>) -> Self {
        Self::new(name, |value| value)
    }

    pub fn last_input(&self) -> Option<&T> {
        self.inputs.get("in").ok().and_then(|p| p.cache())
    }

    pub fn last_output(&self) -> Option<&T> {
        self.outputs.get("out").ok().and_then(|p| p.cache())
    }
}

#[async_trait]
impl<T: Payload> Process<T> for Transform<T> {
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
        let result = (self.f)(value);
        self.outputs.get_mut("out")?.emit(result, &ctx.wait).await?;
        Ok(())
    }
}
