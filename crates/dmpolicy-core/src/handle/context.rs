//! Owning-context task loop.
//!
//! An `OwnerLoop` is created on the thread that owns some non-thread-safe
//! state. Any thread holding a [`LoopProxy`] may post closures to it; they run
//! in FIFO order when the owning thread drives the loop.

use std::marker::PhantomData;
use std::rc::Rc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use tokio::sync::mpsc;

/// Unit of work posted to an owning context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Poster for an [`OwnerLoop`]. Cheap to clone, safe to share across threads.
#[derive(Clone, Debug)]
pub struct LoopProxy {
    owner: ThreadId,
    tx: mpsc::UnboundedSender<Task>,
}

impl LoopProxy {
    /// Thread that runs the loop.
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// True if the caller runs on the owning thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Queue `task` on the owning context.
    ///
    /// Returns `false` (and drops the task) if the loop no longer exists.
    pub fn post(&self, task: Task) -> bool {
        self.tx.send(task).is_ok()
    }
}

/// Task loop of an owning context. Pinned to the thread that created it.
pub struct OwnerLoop {
    proxy: LoopProxy,
    rx: mpsc::UnboundedReceiver<Task>,
    _not_send: PhantomData<Rc<()>>,
}

impl Default for OwnerLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnerLoop {
    /// Create a loop owned by the current thread.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            proxy: LoopProxy {
                owner: thread::current().id(),
                tx,
            },
            rx,
            _not_send: PhantomData,
        }
    }

    pub fn proxy(&self) -> LoopProxy {
        self.proxy.clone()
    }

    /// Run every task that is already queued (including tasks those tasks
    /// post). Never waits.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Run tasks until none arrives for `quiet`.
    ///
    /// Work in flight on other threads (backend calls, timers) gets `quiet`
    /// to post its continuation before this returns.
    pub async fn run_until_idle(&mut self, quiet: Duration) -> usize {
        let mut ran = 0;
        loop {
            match tokio::time::timeout(quiet, self.rx.recv()).await {
                Ok(Some(task)) => {
                    task();
                    ran += 1;
                }
                Ok(None) | Err(_) => return ran,
            }
        }
    }

    /// Drive the loop forever. Cancel by dropping the future (e.g. in `select!`).
    pub async fn run(&mut self) {
        while let Some(task) = self.rx.recv().await {
            task();
        }
    }
}
