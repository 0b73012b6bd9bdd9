//! Named task group for driving concurrent workloads.
//!
//! Tasks are plain closures run on tokio's blocking pool, since tree
//! operations block on latches. Each task runs inside a `task` span carrying
//! its name. Joining waits for every task and reports the first failure.

use std::panic::AssertUnwindSafe;

use tokio::task::JoinSet;

/// How one task ended.
enum Outcome<E> {
    Finished(Result<(), E>),
    Panicked,
}

/// A set of named blocking tasks joined together.
///
/// # Pre-conditions
/// - `spawn` is called from within a tokio runtime
pub struct TaskGroup<E> {
    tasks: JoinSet<(String, Outcome<E>)>,
}

impl<E: Send + 'static> TaskGroup<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
        }
    }

    /// Spawn `task` under `name`.
    pub fn spawn<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        let name = name.into();
        let span = tracing::info_span!("task", name = %name);
        self.tasks.spawn_blocking(move || {
            let _entered = span.enter();
            let outcome = match std::panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(result) => Outcome::Finished(result),
                Err(_) => Outcome::Panicked,
            };
            (name, outcome)
        });
    }

    /// Number of tasks not yet joined.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task to finish.
    ///
    /// Returns the number of tasks that succeeded.
    ///
    /// # Errors
    /// Returns the first failure observed, after all tasks have finished.
    pub async fn join_all(mut self) -> Result<usize, TaskError<E>> {
        let mut succeeded = 0;
        let mut first_error = None;

        while let Some(joined) = self.tasks.join_next().await {
            let error = match joined {
                Ok((_, Outcome::Finished(Ok(())))) => {
                    succeeded += 1;
                    continue;
                }
                Ok((name, Outcome::Finished(Err(source)))) => {
                    tracing::warn!(task = %name, "task failed");
                    TaskError::Failed { name, source }
                }
                Ok((name, Outcome::Panicked)) => {
                    tracing::error!(task = %name, "task panicked");
                    TaskError::Panicked { name }
                }
                Err(join_error) => {
                    tracing::error!("task did not complete: {join_error}");
                    TaskError::Cancelled
                }
            };
            first_error.get_or_insert(error);
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(succeeded),
        }
    }
}

impl<E: Send + 'static> Default for TaskGroup<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Error returned when a task in a group does not succeed.
#[derive(Debug)]
pub enum TaskError<E> {
    /// The task returned an error.
    Failed { name: String, source: E },
    /// The task panicked.
    Panicked { name: String },
    /// The runtime dropped the task before it ran to completion.
    Cancelled,
}

impl<E: std::fmt::Display> std::fmt::Display for TaskError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { name, source } => write!(f, "task {name} failed: {source}"),
            Self::Panicked { name } => write!(f, "task {name} panicked"),
            Self::Cancelled => write!(f, "task cancelled"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for TaskError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Failed { source, .. } => Some(source),
            Self::Panicked { .. } | Self::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::btree::TreeError;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_join_all_counts_successes() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut group = TaskGroup::<TreeError>::new();

        for i in 0..10 {
            let counter = Arc::clone(&counter);
            group.spawn(format!("worker-{i}"), move || {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            });
        }
        assert_eq!(group.len(), 10);

        assert_eq!(group.join_all().await.expect("all succeed"), 10);
        assert_eq!(counter.load(Ordering::Relaxed), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_join_all_reports_failure_after_all_finish() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut group = TaskGroup::new();

        for i in 0..5 {
            let counter = Arc::clone(&counter);
            group.spawn(format!("worker-{i}"), move || {
                counter.fetch_add(1, Ordering::Relaxed);
                if i == 3 { Err(TreeError::DuplicateKey) } else { Ok(()) }
            });
        }

        let error = group.join_all().await.expect_err("worker-3 fails");
        assert!(matches!(
            &error,
            TaskError::Failed { name, source: TreeError::DuplicateKey } if name == "worker-3"
        ));
        assert_eq!(error.to_string(), "task worker-3 failed: duplicate key");
        assert_eq!(counter.load(Ordering::Relaxed), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_join_all_reports_panic() {
        let mut group = TaskGroup::<TreeError>::new();
        group.spawn("calm", || Ok(()));
        group.spawn("boom", || panic!("deliberate"));

        let error = group.join_all().await.expect_err("boom panics");
        assert!(matches!(error, TaskError::Panicked { name } if name == "boom"));
    }
}
