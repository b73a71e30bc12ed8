//! Spawning of store-owned fetch tasks.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

/// A unit of background work handed to a [`TaskSpawner`].
pub type Task = BoxFuture<'static, ()>;

/// Runs fetch tasks on behalf of the store.
///
/// A fetch belongs to the store, not to whoever triggered it, so it keeps
/// running after the initiating consumer is gone.
pub trait TaskSpawner: Send + Sync {
    /// Start `task` in the background, or hand it back if it cannot be run.
    fn spawn(&self, task: Task) -> Result<(), Task>;
}

/// Handle on an in-flight fetch.
///
/// Awaiting it waits until the fetch has settled and its result has been
/// applied to (or discarded by) the store. Clones share the same fetch.
#[derive(Clone)]
pub struct InFlight {
    shared: Shared<Task>,
}

impl InFlight {
    pub(crate) fn new(task: Task) -> Self {
        Self {
            shared: task.shared(),
        }
    }

    /// A task that drives this fetch, for handing to a spawner.
    pub(crate) fn task(&self) -> Task {
        self.shared.clone().boxed()
    }
}

impl Future for InFlight {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.get_mut().shared.poll_unpin(cx)
    }
}

impl fmt::Debug for InFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight").finish_non_exhaustive()
    }
}

/// Spawner that drops tasks; fetches only progress while someone awaits
/// [`ResourceStore::pending`](crate::ResourceStore::pending).
///
/// Useful for server rendering, where the renderer awaits every pending
/// fetch before dehydrating.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSpawner;

impl TaskSpawner for NoopSpawner {
    fn spawn(&self, _task: Task) -> Result<(), Task> {
        Ok(())
    }
}

/// Spawner backed by a tokio runtime.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone, Default)]
pub struct TokioSpawner {
    handle: Option<tokio::runtime::Handle>,
}

#[cfg(feature = "tokio")]
impl TokioSpawner {
    /// Spawn onto whichever runtime is current at spawn time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn onto a specific runtime.
    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

#[cfg(feature = "tokio")]
impl TaskSpawner for TokioSpawner {
    fn spawn(&self, task: Task) -> Result<(), Task> {
        let handle = match &self.handle {
            Some(handle) => handle.clone(),
            None => match tokio::runtime::Handle::try_current() {
                Ok(handle) => handle,
                Err(_) => return Err(task),
            },
        };
        handle.spawn(task);
        Ok(())
    }
}
