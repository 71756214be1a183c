//! Background task supervision
//!
//! Registers, names and shuts down the long-running pieces of the process:
//! outbox publishers, queue consumers, HTTP listeners. Every task is
//! wrapped to catch panics so one crashing worker cannot take the process
//! down silently.

use std::fmt;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Long-lived queue worker.
    Worker,
    /// Event or socket listener.
    Listener,
    /// Fixed-interval loop.
    Periodic,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Worker => write!(f, "Worker"),
            TaskKind::Listener => write!(f, "Listener"),
            TaskKind::Periodic => write!(f, "Periodic"),
        }
    }
}

struct RegisteredTask {
    name: &'static str,
    kind: TaskKind,
    handle: JoinHandle<()>,
}

/// Supervisor for the process's background tasks.
///
/// All tasks share one cancellation token; [`BackgroundTasks::shutdown`]
/// cancels it and then waits for every task to finish.
pub struct BackgroundTasks {
    tasks: Vec<RegisteredTask>,
    shutdown: CancellationToken,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token the tasks watch for the shutdown signal.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Register and start a background task.
    ///
    /// The future is wrapped to catch panics; a task that returns while the
    /// process is still running is logged as a defect.
    pub fn spawn<F>(&mut self, name: &'static str, kind: TaskKind, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let wrapped = async move {
            let result: Result<(), Box<dyn std::any::Any + Send>> =
                AssertUnwindSafe(future).catch_unwind().await;
            match result {
                Ok(()) if shutdown.is_cancelled() => {
                    tracing::debug!(task = %name, "background task stopped");
                }
                Ok(()) => {
                    tracing::warn!(task = %name, kind = %kind, "background task completed unexpectedly");
                }
                Err(panic_info) => {
                    let panic_msg: String = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        (*s).to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "unknown panic".to_string()
                    };
                    tracing::error!(task = %name, kind = %kind, panic = %panic_msg, "background task panicked");
                }
            }
        };

        let handle = tokio::spawn(wrapped);
        tracing::debug!(task = %name, kind = %kind, "registered background task");
        self.tasks.push(RegisteredTask { name, kind, handle });
    }

    fn count_by_kind(&self) -> (usize, usize, usize) {
        let mut worker = 0;
        let mut listener = 0;
        let mut periodic = 0;
        for task in &self.tasks {
            match task.kind {
                TaskKind::Worker => worker += 1,
                TaskKind::Listener => listener += 1,
                TaskKind::Periodic => periodic += 1,
            }
        }
        (worker, listener, periodic)
    }

    pub fn log_summary(&self) {
        let (worker, listener, periodic) = self.count_by_kind();
        tracing::info!(
            "background tasks registered: {} total (Worker: {}, Listener: {}, Periodic: {})",
            self.tasks.len(),
            worker,
            listener,
            periodic
        );
    }

    /// Cancel all tasks and wait for them to finish.
    pub async fn shutdown(self) {
        tracing::info!("shutting down {} background tasks", self.tasks.len());
        self.shutdown.cancel();
        for task in self.tasks {
            match task.handle.await {
                Ok(()) => tracing::debug!(task = %task.name, "task completed"),
                Err(e) if e.is_cancelled() => tracing::debug!(task = %task.name, "task cancelled"),
                Err(e) => tracing::error!(task = %task.name, error = ?e, "task panicked"),
            }
        }
        tracing::info!("all background tasks stopped");
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}
