//! Background task queue.
//!
//! [`TaskRunner`] polls `task_queue` for pending rows (`status = 0`) and hands each to the
//! [`TaskHandler`] registered under the task's name. At most `max_workers` handlers run at
//! once. A handled task is marked done (`status = 1`); a failed one has its status
//! decremented so it is not picked up again.

use crate::error::EngineError;
use crate::filter::Op;
use crate::model::Task;
use crate::registry::{Entity, FieldKind};
use crate::service::finish;
use crate::store::{Column, Cond, Select, Store, Target, Update, Where};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub const STATUS_PENDING: i64 = 0;
pub const STATUS_DONE: i64 = 1;

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<(), EngineError>;
}

pub struct TaskRunner {
    store: Arc<dyn Store>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    semaphore: Arc<Semaphore>,
    poll: Duration,
}

impl TaskRunner {
    pub fn new(store: Arc<dyn Store>, max_workers: usize, poll: Duration) -> Self {
        TaskRunner {
            store,
            handlers: HashMap::new(),
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
            poll,
        }
    }

    /// Route tasks named `name` to `handler`. A later registration replaces an earlier one.
    pub fn handler(mut self, name: impl Into<String>, handler: impl TaskHandler + 'static) -> Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Pending tasks, oldest first.
    pub async fn pending(&self) -> Result<Vec<Task>, EngineError> {
        let columns = Task::fields().iter().map(|f| Column::new(f.name, f.kind)).collect();
        let mut q = Select::new(Task::table_name(), columns);
        q.wheres.push(Where::Match(Cond {
            target: Target::Column(Column::new("status", FieldKind::Integer)),
            op: Op::Eq,
            value: STATUS_PENDING.to_string(),
        }));
        q.order = vec![Target::Column(Column::new("date_created", FieldKind::Timestamp))];
        self.store.select(&q).await?.iter().map(|r| r.to_entity()).collect()
    }

    /// Dispatch one batch of pending tasks and wait for all of them.
    /// Returns how many were handed to a handler.
    pub async fn run_once(&self) -> Result<usize, EngineError> {
        let tasks = self.pending().await?;
        let mut running = JoinSet::new();
        for task in tasks {
            let Some(handler) = self.handlers.get(&task.name).cloned() else {
                tracing::warn!(task = %task.id, name = %task.name, "no handler for task");
                continue;
            };
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            running.spawn(async move {
                let outcome = handler.handle(&task).await;
                drop(permit);
                match outcome {
                    Ok(()) => (task.id, STATUS_DONE),
                    Err(e) => {
                        tracing::warn!(task = %task.id, name = %task.name, error = %e, "task failed");
                        (task.id, task.status - 1)
                    }
                }
            });
        }
        let mut dispatched = 0;
        while let Some(joined) = running.join_next().await {
            let (id, status) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tracing::error!(error = %e, "task worker panicked");
                    continue;
                }
            };
            dispatched += 1;
            if let Err(e) = set_status(self.store.as_ref(), &id, status).await {
                tracing::error!(task = %id, error = %e, "could not record task status");
            }
        }
        Ok(dispatched)
    }

    /// Poll until `shutdown` resolves. Sleeps `poll` whenever a batch dispatched nothing.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        tracing::info!(poll_secs = self.poll.as_secs(), "task runner started");
        loop {
            let idle = match self.run_once().await {
                Ok(0) => true,
                Ok(n) => {
                    tracing::debug!(tasks = n, "task batch done");
                    false
                }
                Err(e) => {
                    tracing::error!(error = %e, "polling task queue failed");
                    true
                }
            };
            let pause = if idle { self.poll } else { Duration::ZERO };
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        tracing::info!("task runner stopped");
    }
}

async fn set_status(store: &dyn Store, id: &str, status: i64) -> Result<(), EngineError> {
    let update = Update {
        table: Task::table_name().to_string(),
        key: (Column::new("id", FieldKind::Text), Value::String(id.to_string())),
        values: vec![(Column::new("status", FieldKind::Integer), Value::from(status))],
    };
    let mut tx = store.begin().await?;
    let res = tx.update(&update).await.map(|_| ()).map_err(EngineError::from);
    finish(tx, res).await
}
