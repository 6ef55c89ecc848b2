use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Where blocking native calls run
///
/// Wraps a tokio runtime; every native call goes to that runtime's blocking pool so the caller's
/// scheduler is never blocked.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    handle: Handle,
}

impl ExecutionContext {
    /// The runtime the caller is currently running on
    pub fn current() -> Result<Self> {
        Handle::try_current().map(Self::from_handle).map_err(|e| Error::Usage(format!("no tokio runtime available: {}", e)))
    }

    pub fn from_handle(handle: Handle) -> Self { Self { handle } }

    pub fn handle(&self) -> &Handle { &self.handle }

    /// Run `f` on the blocking pool and wait for it
    pub(crate) async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        join(self.spawn(f)).await
    }

    pub(crate) fn spawn<F, T>(&self, f: F) -> JoinHandle<Result<T>>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.handle.spawn_blocking(f)
    }
}

pub(crate) async fn join<T>(task: JoinHandle<Result<T>>) -> Result<T> { task.await.map_err(|e| Error::TaskJoin(e.to_string()))? }
