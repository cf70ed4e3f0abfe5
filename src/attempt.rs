//! Pollable, cancellable handles for in-flight connect and send operations.

use std::future::Future;

use futures::FutureExt as _;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{Error, Fault, Kind};

/// Resolution of a tracked attempt, observed without blocking.
#[derive(Debug)]
pub(crate) enum Outcome {
    Pending,
    Succeeded,
    Failed(Fault),
}

/// Handle to the asynchronous work behind one connect or send.
///
/// The client tracks at most one attempt at a time; availability polling
/// resolves a finished attempt exactly once and then drops the handle.
#[derive(Debug)]
pub struct Attempt {
    handle: JoinHandle<Result<(), Fault>>,
}

impl Attempt {
    /// Spawn `work` on `runtime` and track it.
    pub(crate) fn spawn<F>(runtime: &Handle, work: F) -> Self
    where
        F: Future<Output = Result<(), Fault>> + Send + 'static,
    {
        Self {
            handle: runtime.spawn(work),
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Best-effort interruption of the underlying task.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Resolve the attempt if it has finished.
    ///
    /// Must not be called again once it returns anything other than
    /// [`Outcome::Pending`]; the owner drops the handle after resolution.
    pub(crate) fn poll_outcome(&mut self) -> Outcome {
        if !self.handle.is_finished() {
            return Outcome::Pending;
        }
        match (&mut self.handle).now_or_never() {
            None => Outcome::Pending,
            Some(Ok(Ok(()))) => Outcome::Succeeded,
            Some(Ok(Err(fault))) => Outcome::Failed(fault),
            Some(Err(join)) if join.is_cancelled() => Outcome::Failed(Fault::new(Error::cancelled())),
            Some(Err(join)) => Outcome::Failed(Fault::new(Error::with_source(Kind::Transport, join))),
        }
    }
}
