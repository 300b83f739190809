// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sharing a reconnectable [`Context`] across multiple logical clients,
//! e.g. when addressing several slave devices on one transport in turn.
//! Adapted from the teacher's `Rc<RefCell<Context>>` sharing idiom to
//! `Arc<tokio::sync::Mutex<..>>` so the shared context can cross an
//! `.await` point and move between tasks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::Result;

use super::Context;

/// Creates new [`Context`]s on demand, for reconnecting a [`SharedContext`].
pub trait NewContext: Send + Sync {
    fn new_context(&self) -> Pin<Box<dyn Future<Output = Result<Context>> + Send + '_>>;
}

#[derive(Default)]
struct SharedContextHolder {
    context: Option<Arc<Mutex<Context>>>,
}

impl SharedContextHolder {
    fn new(initial: Option<Context>) -> Self {
        Self {
            context: initial.map(Mutex::new).map(Arc::new),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(context) = self.context.take() {
            context.lock().await.disconnect().await?;
        }
        Ok(())
    }

    fn reconnect(&mut self, context: Context) {
        self.context = Some(Arc::new(Mutex::new(context)));
    }

    fn is_connected(&self) -> bool {
        self.context.is_some()
    }

    fn share_context(&self) -> Option<Arc<Mutex<Context>>> {
        self.context.clone()
    }
}

/// A reconnectable environment with a shared [`Context`] (spec.md §4.5
/// "Connect" applied to multiplexed slave addressing).
pub struct SharedContext {
    shared_context: SharedContextHolder,
    new_context: Box<dyn NewContext>,
}

impl SharedContext {
    pub fn new(initial_context: Option<Context>, new_context: Box<dyn NewContext>) -> Self {
        Self {
            shared_context: SharedContextHolder::new(initial_context),
            new_context,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared_context.is_connected()
    }

    /// Borrow the shared context for the next request only; do not hold
    /// across a reconnect.
    pub fn share_context(&self) -> Option<Arc<Mutex<Context>>> {
        self.shared_context.share_context()
    }
}

/// Disconnects and then recreates the shared context, releasing any
/// exclusive resource (e.g. a serial port) before the replacement is
/// dialed.
pub async fn reconnect_shared_context(shared_context: &Arc<Mutex<SharedContext>>) -> Result<()> {
    let mut locked = shared_context.lock().await;
    locked.shared_context.disconnect().await?;
    debug_assert!(!locked.shared_context.is_connected());
    let context = locked.new_context.new_context().await?;
    locked.shared_context.reconnect(context);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::ClientMock;

    struct NewContextMock;

    impl NewContext for NewContextMock {
        fn new_context(&self) -> Pin<Box<dyn Future<Output = Result<Context>> + Send + '_>> {
            Box::pin(async { Ok(Context::new(Box::new(ClientMock::default()))) })
        }
    }

    #[tokio::test]
    async fn new_shared_context_starts_disconnected() {
        let disconnected = SharedContext::new(None, Box::new(NewContextMock));
        assert!(!disconnected.is_connected());
        assert!(disconnected.share_context().is_none());

        let connected = SharedContext::new(
            Some(Context::new(Box::new(ClientMock::default()))),
            Box::new(NewContextMock),
        );
        assert!(connected.is_connected());
        assert!(connected.share_context().is_some());
    }

    #[tokio::test]
    async fn reconnect_shared_context_establishes_new_context() {
        let sc = SharedContext::new(None, Box::new(NewContextMock));
        let sc = Arc::new(Mutex::new(sc));
        reconnect_shared_context(&sc).await.unwrap();
        assert!(sc.lock().await.is_connected());
        assert!(sc.lock().await.share_context().is_some());
    }
}
