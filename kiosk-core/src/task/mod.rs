//! Keyed pool of spawned async work with cancellation.
//!
//! Each task is registered under a key (e.g. a schedule entry id). The
//! pool refuses duplicate spawns for a running key, can cancel a single
//! task or all of them, and reports completions through an internal
//! channel so the owner can fold results back in on its own loop.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TaskError;

#[derive(Debug)]
pub enum TaskEvent<K, T> {
    Finished(K, T),
    Error(K, TaskError),
}

impl<K, T> TaskEvent<K, T> {
    pub fn key(&self) -> &K {
        match self {
            TaskEvent::Finished(k, _) | TaskEvent::Error(k, _) => k,
        }
    }
}

struct TrackedTask {
    generation: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct TaskPool<K, T> {
    tasks: HashMap<K, TrackedTask>,
    pool_rx: mpsc::UnboundedReceiver<(u64, TaskEvent<K, T>)>,
    pool_tx: mpsc::UnboundedSender<(u64, TaskEvent<K, T>)>,
    generation: u64,
}

impl<K, T> TaskPool<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    T: Send + 'static,
{
    pub fn new() -> Self {
        let (pool_tx, pool_rx) = mpsc::unbounded_channel();
        Self {
            tasks: HashMap::new(),
            pool_rx,
            pool_tx,
            generation: 0,
        }
    }

    /// Spawn `f` under `key`.
    ///
    /// Returns `false` without spawning if a task with the same key is
    /// still running (duplicate spawn guard).
    pub fn spawn<F, Fut>(&mut self, key: K, f: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        if self.tasks.contains_key(&key) {
            return false;
        }

        self.generation += 1;
        let generation = self.generation;
        let token = CancellationToken::new();
        let fut = f(token.clone());
        let tx = self.pool_tx.clone();
        let task_key = key.clone();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let result = tokio::select! {
                _ = task_token.cancelled() => Err(TaskError::Cancelled),
                r = fut => r,
            };
            let event = match result {
                Ok(value) => TaskEvent::Finished(task_key, value),
                Err(e) => TaskEvent::Error(task_key, e),
            };
            let _ = tx.send((generation, event));
        });

        self.tasks.insert(
            key,
            TrackedTask {
                generation,
                token,
                handle,
            },
        );
        true
    }

    /// Cancel the task registered under `key`. Its event is discarded.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.tasks.remove(key) {
            Some(task) => {
                debug!(?key, "cancelling task");
                task.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running task.
    pub fn cancel_all(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.token.cancel();
        }
    }

    /// Abort without waiting for cooperative cancellation.
    pub fn abort_all(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.token.cancel();
            task.handle.abort();
        }
    }

    pub fn is_running(&self, key: &K) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn running_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn running_keys(&self) -> impl Iterator<Item = &K> {
        self.tasks.keys()
    }

    /// Wait for the next event of a task that is still registered.
    ///
    /// Events from cancelled or superseded tasks are swallowed.
    pub async fn recv(&mut self) -> Option<TaskEvent<K, T>> {
        loop {
            let (generation, event) = self.pool_rx.recv().await?;
            if self.accept(generation, &event) {
                return Some(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<TaskEvent<K, T>> {
        while let Ok((generation, event)) = self.pool_rx.try_recv() {
            if self.accept(generation, &event) {
                return Some(event);
            }
        }
        None
    }

    fn accept(&mut self, generation: u64, event: &TaskEvent<K, T>) -> bool {
        match self.tasks.get(event.key()) {
            Some(task) if task.generation == generation => {
                self.tasks.remove(event.key());
                true
            }
            _ => false,
        }
    }
}

impl<K, T> Default for TaskPool<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> Drop for TaskPool<K, T> {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn finished_event_carries_value() {
        let mut pool: TaskPool<u64, &'static str> = TaskPool::new();
        assert!(pool.spawn(1, |_| async { Ok("done") }));
        match pool.recv().await.unwrap() {
            TaskEvent::Finished(1, v) => assert_eq!(v, "done"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!pool.is_running(&1));
    }

    #[tokio::test]
    async fn duplicate_spawn_is_refused() {
        let mut pool: TaskPool<u64, ()> = TaskPool::new();
        assert!(pool.spawn(7, |token| async move {
            token.cancelled().await;
            Ok(())
        }));
        assert!(!pool.spawn(7, |_| async { Ok(()) }));
        assert_eq!(pool.running_count(), 1);
        pool.cancel_all();
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_event_is_swallowed() {
        let mut pool: TaskPool<u64, u32> = TaskPool::new();
        pool.spawn(1, |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1)
        });
        assert!(pool.cancel(&1));

        // A respawn under the same key is the only one reported.
        pool.spawn(1, |_| async { Ok(2) });
        match pool.recv().await.unwrap() {
            TaskEvent::Finished(1, v) => assert_eq!(v, 2),
            other => panic!("unexpected event {other:?}"),
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(pool.try_recv().is_none());
    }

    #[tokio::test]
    async fn error_event_is_reported() {
        let mut pool: TaskPool<&'static str, ()> = TaskPool::new();
        pool.spawn("fetch", |_| async { Err(TaskError::Failed("http 500".into())) });
        match pool.recv().await.unwrap() {
            TaskEvent::Error("fetch", TaskError::Failed(msg)) => assert_eq!(msg, "http 500"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
