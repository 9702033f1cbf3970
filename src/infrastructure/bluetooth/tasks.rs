//! Background tasks owned by one transport link
//!
//! A link runs at most one connect attempt plus the watchers started once it
//! is up. Closing the link aborts all of them, and nothing new may start
//! afterwards.

use tokio::task::JoinHandle;

#[derive(Default)]
pub struct LinkTasks {
    connecting: Option<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
    closed: bool,
}

impl LinkTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connect attempt, cancelling the one in flight
    pub fn start_connect(&mut self, task: JoinHandle<()>) {
        if self.closed {
            task.abort();
            return;
        }
        if let Some(previous) = self.connecting.replace(task) {
            previous.abort();
        }
    }

    /// Cancel the connect attempt; true if one was still running
    pub fn cancel_connect(&mut self) -> bool {
        match self.connecting.take() {
            Some(task) if !task.is_finished() => {
                task.abort();
                true
            }
            _ => false,
        }
    }

    /// Whether watcher tasks are still running
    pub fn is_watching(&mut self) -> bool {
        self.background.retain(|task| !task.is_finished());
        !self.background.is_empty()
    }

    /// Track a watcher task. Aborted right away once the link is closed.
    pub fn push_background(&mut self, task: JoinHandle<()>) -> bool {
        if self.closed {
            task.abort();
            return false;
        }
        self.background.push(task);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        self.closed = true;
        self.cancel_connect();
        for task in self.background.drain(..) {
            task.abort();
        }
    }
}
