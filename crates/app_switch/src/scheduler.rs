//! Execution contexts for handshake work.
//!
//! Two lanes: background work (network attempts) may run concurrently, while
//! completion work (terminal outcome delivery) is funneled through a single
//! consumer so deliveries never interleave or re-enter the caller.

use futures::future::BoxFuture;
use switch_env::logger;

/// A unit of deferred work.
pub type Task = BoxFuture<'static, ()>;

/// Where handshake work runs. Background tasks are independent; completion
/// tasks are serialized in submission order.
pub trait Scheduler: Send + Sync {
    /// Fire-and-forget work that must not block the caller, such as host
    /// cleanup after an outcome. The network legs themselves are async and
    /// run on whatever task awaits `begin`/`complete`; they do not pass
    /// through this lane.
    fn run_in_background(&self, task: Task);
    fn run_on_completion(&self, task: Task);
}

/// Production scheduler. Background tasks are spawned directly; completion
/// tasks are fed over a channel to one consumer task owned by this value,
/// which is aborted on drop.
pub struct TokioScheduler {
    completion_tx: tokio::sync::mpsc::UnboundedSender<Task>,
    consumer: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioScheduler").finish_non_exhaustive()
    }
}

impl TokioScheduler {
    /// Must be called within a tokio runtime.
    pub fn new() -> Self {
        let (completion_tx, mut completion_rx) =
            tokio::sync::mpsc::unbounded_channel::<Task>();
        let consumer = tokio::spawn(async move {
            while let Some(task) = completion_rx.recv().await {
                task.await;
            }
        });
        Self {
            completion_tx,
            consumer,
        }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn run_in_background(&self, task: Task) {
        tokio::spawn(task);
    }

    fn run_on_completion(&self, task: Task) {
        if self.completion_tx.send(task).is_err() {
            logger::warn!("Completion consumer is gone, dropping task");
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

/// Deterministic scheduler for tests: nothing runs until [`Self::drain`].
#[derive(Default)]
pub struct TestScheduler {
    background: std::sync::Mutex<Vec<Task>>,
    completion: std::sync::Mutex<Vec<Task>>,
}

impl std::fmt::Debug for TestScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestScheduler").finish_non_exhaustive()
    }
}

impl TestScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every queued task to completion, background lane first, in
    /// submission order.
    pub async fn drain(&self) {
        loop {
            let task = {
                let mut background = self
                    .background
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if background.is_empty() {
                    let mut completion = self
                        .completion
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    if completion.is_empty() {
                        return;
                    }
                    completion.remove(0)
                } else {
                    background.remove(0)
                }
            };
            task.await;
        }
    }
}

impl Scheduler for TestScheduler {
    fn run_in_background(&self, task: Task) {
        self.background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(task);
    }

    fn run_on_completion(&self, task: Task) {
        self.completion
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(task);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use futures::FutureExt;

    use super::*;

    #[tokio::test]
    async fn completion_tasks_run_in_submission_order() {
        let scheduler = TokioScheduler::new();
        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel::<u8>();

        for index in 0..3u8 {
            let done_tx = done_tx.clone();
            scheduler.run_on_completion(
                async move {
                    // The later task yields first; serialization still holds.
                    if index == 0 {
                        tokio::task::yield_now().await;
                    }
                    done_tx.send(index).unwrap();
                }
                .boxed(),
            );
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(done_rx.recv().await.unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_scheduler_holds_tasks_until_drained() {
        let scheduler = TestScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let counter = counter.clone();
            scheduler.run_in_background(
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                .boxed(),
            );
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        scheduler.drain().await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
