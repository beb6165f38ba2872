use crate::channel::{Inlet, Outlet, Payload, WaitPolicy};
use crate::error::{PortError, Transfer};
use std::collections::BTreeMap;

/// A named slot bound to one end of a channel, with a one-value cache.
#[derive(Debug)]
pub struct Port<H, T> {
    owner: String,
    name: String,
    handle: Option<H>,
    cache: Option<T>,
}

/// Receiving port of a process.
pub type InPort<T> = Port<Inlet<T>, T>;

/// Sending port of a process.
pub type OutPort<T> = Port<Outlet<T>, T>;

impl<H, T> Port<H, T> {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            handle: None,
            cache: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `owner.name`, used in every error raised for this port.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }

    pub fn is_bound(&self) -> bool {
        self.handle.is_some()
    }

    pub fn bind(&mut self, handle: H) -> Result<(), PortError> {
        if self.handle.is_some() {
            return Err(PortError::AlreadyBound(self.qualified_name()));
        }
        self.handle = Some(handle);
        Ok(())
    }

    pub fn handle(&self) -> Result<&H, PortError> {
        self.handle
            .as_ref()
            .ok_or_else(|| PortError::Unbound(self.qualified_name()))
    }

    pub fn cache(&self) -> Option<&T> {
        self.cache.as_ref()
    }

    /// Overwrite the cached value, returning the one it replaced.
    pub fn set_cache(&mut self, value: T) -> Option<T> {
        self.cache.replace(value)
    }

    pub fn clear_cache(&mut self) -> Option<T> {
        self.cache.take()
    }
}

impl<T: Payload> Port<Inlet<T>, T> {
    /// Wait for one value on the bound channel and remember it.
    pub async fn receive(&mut self, wait: &WaitPolicy) -> Result<T, PortError> {
        let value = self.fetch(wait).await?;
        self.cache = Some(value.clone());
        Ok(value)
    }

    /// Like [`receive`](Self::receive) but leaves the cache alone, so several
    /// ports of one owner can wait at the same time.
    pub async fn fetch(&self, wait: &WaitPolicy) -> Result<T, PortError> {
        self.handle()?
            .recv(wait)
            .await
            .map_err(|e| e.at(self.qualified_name(), Transfer::Receive))
    }
}

impl<T: Payload> Port<Outlet<T>, T> {
    /// Hand one value to the bound channel and remember it.
    pub async fn emit(&mut self, value: T, wait: &WaitPolicy) -> Result<(), PortError> {
        self.push(value.clone(), wait).await?;
        self.cache = Some(value);
        Ok(())
    }

    /// Send without touching the cache.
    pub async fn push(&self, value: T, wait: &WaitPolicy) -> Result<(), PortError> {
        self.handle()?
            .send(value, wait)
            .await
            .map_err(|e| e.at(self.qualified_name(), Transfer::Send))
    }
}

/// The declared ports of one owner, ordered by name.
#[derive(Debug)]
pub struct PortSet<H, T> {
    owner: String,
    ports: BTreeMap<String, Port<H, T>>,
}

pub type Inputs<T> = PortSet<Inlet<T>, T>;
pub type Outputs<T> = PortSet<Outlet<T>, T>;

impl<H, T> PortSet<H, T> {
    pub fn new<I, S>(owner: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let owner = owner.into();
        let ports = names
            .into_iter()
            .map(|name| {
                let name = name.into();
                (name.clone(), Port::new(owner.clone(), name))
            })
            .collect();
        Self { owner, ports }
    }

    /// Confirm `name` is declared and still free to bind.
    pub fn check(&self, name: &str) -> Result<(), PortError> {
        let port = self.get(name)?;
        if port.is_bound() {
            return Err(PortError::AlreadyBound(port.qualified_name()));
        }
        Ok(())
    }

    pub fn bind(&mut self, name: &str, handle: H) -> Result<(), PortError> {
        self.get_mut(name)?.bind(handle)
    }

    pub fn get(&self, name: &str) -> Result<&Port<H, T>, PortError> {
        self.ports
            .get(name)
            .ok_or_else(|| PortError::UnknownPort(format!("{}.{}", self.owner, name)))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Port<H, T>, PortError> {
        let owner = &self.owner;
        self.ports
            .get_mut(name)
            .ok_or_else(|| PortError::UnknownPort(format!("{}.{}", owner, name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ports.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Port<H, T>> {
        self.ports.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Port<H, T>> {
        self.ports.values_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_rebinding_is_rejected() {
        let (_tx, rx) = channel::<i64>();
        let mut port: InPort<i64> = Port::new("double", "in");
        port.bind(rx.clone()).unwrap();
        assert_eq!(
            port.bind(rx).unwrap_err(),
            PortError::AlreadyBound("double.in".to_string())
        );
    }

    #[test]
    fn test_unknown_port_is_reported_with_owner() {
        let mut inputs: Inputs<i64> = PortSet::new("inc", ["in"]);
        let (_tx, rx) = channel::<i64>();
        assert_eq!(
            inputs.bind("other", rx).unwrap_err(),
            PortError::UnknownPort("inc.other".to_string())
        );
        assert!(inputs.check("in").is_ok());
        assert_eq!(inputs.names().collect::<Vec<_>>(), vec!["in"]);
    }

    #[test]
    fn test_cache_keeps_only_last_value() {
        let mut port: OutPort<i64> = Port::new("p", "out");
        assert_eq!(port.set_cache(1), None);
        assert_eq!(port.set_cache(2), Some(1));
        assert_eq!(port.cache(), Some(&2));
    }

    #[tokio::test]
    async fn test_receive_requires_binding() {
        let mut port: InPort<i64> = Port::new("p", "in");
        let wait = WaitPolicy::new(Duration::from_millis(10), CancellationToken::new());
        assert_eq!(
            port.receive(&wait).await.unwrap_err(),
            PortError::Unbound("p.in".to_string())
        );
    }

    #[tokio::test]
    async fn test_emit_and_receive_update_caches() {
        let (tx, rx) = channel::<i64>();
        let mut out: OutPort<i64> = Port::new("a", "out");
        let mut input: InPort<i64> = Port::new("b", "in");
        out.bind(tx).unwrap();
        input.bind(rx).unwrap();
        let wait = WaitPolicy::new(Duration::from_millis(100), CancellationToken::new());

        let (sent, received) = tokio::join!(out.emit(42, &wait), input.receive(&wait));
        sent.unwrap();
        assert_eq!(received.unwrap(), 42);
        assert_eq!(out.cache(), Some(&42));
        assert_eq!(input.cache(), Some(&42));
    }
}
