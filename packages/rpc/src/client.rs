use std::{any::Any, fmt::Debug, sync::Arc};

/// Opaque handle to the calling peer. The dispatcher only forwards it; methods downcast it to whatever
/// the transport put in.
#[derive(Clone, Default)]
pub struct ClientConnector {
    inner: Option<Arc<dyn Any + Send + Sync>>,
}

impl ClientConnector {
    pub fn new<C: Any + Send + Sync>(client: C) -> Self {
        Self { inner: Some(Arc::new(client)) }
    }

    pub fn from_arc(client: Arc<dyn Any + Send + Sync>) -> Self {
        Self { inner: Some(client) }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        self.inner.is_none()
    }

    pub fn downcast_ref<C: Any>(&self) -> Option<&C> {
        self.inner.as_deref().and_then(|client| client.downcast_ref::<C>())
    }

    pub fn downcast_arc<C: Any + Send + Sync>(&self) -> Option<Arc<C>> {
        self.inner.clone().and_then(|client| client.downcast::<C>().ok())
    }
}

impl Debug for ClientConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnector").field("attached", &self.inner.is_some()).finish()
    }
}
