use std::future::Future;

use tracing::{debug, info};

use crate::models::TransportKind;

/// A serial adapter the owner can tear down
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    fn is_connected(&self) -> bool;

    /// Best-effort teardown; never fails
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}

/// Holds at most one open adapter. Acquiring an adapter tears down whatever
/// was held before, so the two adapters are never open together.
pub struct ConnectionOwner<T: Transport> {
    active: Option<T>,
}

impl<T: Transport> Default for ConnectionOwner<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> ConnectionOwner<T> {
    pub fn new() -> Self {
        Self { active: None }
    }

    pub fn active(&self) -> Option<&T> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut T> {
        self.active.as_mut()
    }

    /// True when a connected adapter of `kind` is held
    pub fn holds(&self, kind: TransportKind) -> bool {
        self.active
            .as_ref()
            .is_some_and(|t| t.kind() == kind && t.is_connected())
    }

    /// Get a connected adapter of `kind`, reusing the held one when it
    /// matches. Otherwise the held adapter is torn down before `connect` runs.
    pub async fn acquire<F, Fut>(&mut self, kind: TransportKind, connect: F) -> anyhow::Result<&mut T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if self.holds(kind) {
            debug!("Reusing open {} connection", kind);
            return self
                .active
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("{} connection disappeared", kind));
        }

        self.release().await;

        let transport = connect().await?;
        info!("{} connection acquired", transport.kind());
        Ok(self.active.insert(transport))
    }

    /// Give up the held adapter without tearing it down
    pub fn take(&mut self) -> Option<T> {
        let taken = self.active.take();
        if let Some(transport) = &taken {
            info!("Releasing {} connection", transport.kind());
        }
        taken
    }

    /// Tear down the held adapter, if any
    pub async fn release(&mut self) {
        if let Some(mut previous) = self.active.take() {
            info!("Releasing {} connection", previous.kind());
            previous.disconnect().await;
        }
    }
}
