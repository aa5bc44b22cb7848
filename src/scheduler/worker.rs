//! Worker loop: receive one job at a time and execute it.
//!
//! Each worker is an isolated Tokio task with its own job channel. The pool
//! never trusts a worker to stop itself; a wedged worker is aborted from the
//! outside and a fresh one takes its slot.

use std::future::Future;
use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Executes task payloads. The only place real parallel work happens.
#[async_trait::async_trait]
pub trait Executor<P: Send + 'static, R: Send + 'static>: Send + Sync + 'static {
    async fn execute(&self, payload: P) -> Result<R, String>;
}

/// Adapts an async closure into an [`Executor`].
pub struct FnExecutor<F>(pub F);

#[async_trait::async_trait]
impl<P, R, F, Fut> Executor<P, R> for FnExecutor<F>
where
    P: Send + 'static,
    R: Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, String>> + Send + 'static,
{
    async fn execute(&self, payload: P) -> Result<R, String> {
        (self.0)(payload).await
    }
}

/// Receives worker results. Implemented by the pool's shared state.
pub(super) trait CompletionSink<R>: Send + Sync + 'static {
    fn complete(&self, slot: usize, generation: u64, task_id: u64, result: Result<R, String>);
}

/// A job handed to a worker.
pub(super) struct Job<P> {
    pub task_id: u64,
    pub payload: P,
}

/// Spawn a worker for `slot`. Returns its job channel and join handle.
pub(super) fn spawn_worker<P, R>(
    slot: usize,
    generation: u64,
    executor: Arc<dyn Executor<P, R>>,
    sink: Weak<dyn CompletionSink<R>>,
) -> (mpsc::UnboundedSender<Job<P>>, JoinHandle<()>)
where
    P: Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(worker_loop(slot, generation, rx, executor, sink));
    (tx, handle)
}

async fn worker_loop<P, R>(
    slot: usize,
    generation: u64,
    mut jobs: mpsc::UnboundedReceiver<Job<P>>,
    executor: Arc<dyn Executor<P, R>>,
    sink: Weak<dyn CompletionSink<R>>,
) where
    P: Send + 'static,
    R: Send + 'static,
{
    tracing::trace!(slot, generation, "worker started");
    while let Some(job) = jobs.recv().await {
        let result = executor.execute(job.payload).await;
        let Some(sink) = sink.upgrade() else {
            break;
        };
        sink.complete(slot, generation, job.task_id, result);
    }
    tracing::trace!(slot, generation, "worker stopped");
}
