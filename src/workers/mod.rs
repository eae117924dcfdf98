//! The Tool Worker Pool: bounded, cancellable, timeout-guarded execution for
//! heavyweight tools.
//!
//! Grounded on the teacher's sidecar service lifecycle (`SidecarService`:
//! spawn, health-poll, kill-and-replace on crash) but generalized from
//! process supervision to task supervision — a "worker" here is a
//! `tokio::task::JoinHandle` driving one tool call, not a long-lived OS
//! process. "Killing" a worker means aborting its handle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Semaphore;

use crate::errors::{AbortError, TimeoutError, ToolError};
use crate::tools::{Tool, ToolContext};
use crate::types::{CancelToken, ToolResult};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Configuration for the worker pool.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    pub max_workers: usize,
    pub task_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            task_timeout: Duration::from_secs(60),
        }
    }
}

/// Outcome of a worker-pool dispatch that did not produce a [`ToolResult`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error(transparent)]
    Abort(#[from] AbortError),
    #[error(transparent)]
    Crashed(#[from] ToolError),
    #[error("worker pool is shutting down")]
    ShuttingDown,
}

/// Point-in-time counters for observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub total_tasks: u64,
    pub completed: u64,
    pub failed: u64,
    pub active_workers: usize,
    pub queued: usize,
    pub avg_duration_ms: u64,
}

#[derive(Default)]
struct StatsInner {
    total_tasks: u64,
    completed: u64,
    failed: u64,
    active_workers: usize,
    queued: usize,
    total_duration_ms: u64,
}

/// Bounded pool executing heavyweight tool calls off the agent loop's
/// logical thread.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    config: WorkerPoolConfig,
    stats: Mutex<StatsInner>,
    shutting_down: AtomicBool,
    task_counter: AtomicU64,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_workers)),
            config,
            stats: Mutex::new(StatsInner::default()),
            shutting_down: AtomicBool::new(false),
            task_counter: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> PoolStats {
        let s = self.stats.lock().expect("worker pool stats mutex poisoned");
        PoolStats {
            total_tasks: s.total_tasks,
            completed: s.completed,
            failed: s.failed,
            active_workers: s.active_workers,
            queued: s.queued,
            avg_duration_ms: if s.completed + s.failed > 0 {
                s.total_duration_ms / (s.completed + s.failed)
            } else {
                0
            },
        }
    }

    /// Execute `tool` with `args`, dispatching through the pool's bounded
    /// concurrency. Honours `cancel` cooperatively by aborting the
    /// underlying task as soon as it fires.
    pub async fn execute(
        &self,
        tool: Arc<dyn Tool>,
        args: Value,
        cancel: CancelToken,
        ctx: ToolContext,
    ) -> Result<ToolResult, WorkerError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(WorkerError::ShuttingDown);
        }
        if cancel.is_cancelled() {
            return Err(AbortError("cancelled before dispatch".into()).into());
        }

        self.task_counter.fetch_add(1, Ordering::Relaxed);
        {
            let mut s = self.stats.lock().expect("worker pool stats mutex poisoned");
            s.total_tasks += 1;
            s.queued += 1;
        }

        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return Err(WorkerError::ShuttingDown),
        };

        {
            let mut s = self.stats.lock().expect("worker pool stats mutex poisoned");
            s.queued -= 1;
            s.active_workers += 1;
        }

        if self.shutting_down.load(Ordering::SeqCst) || cancel.is_cancelled() {
            let mut s = self.stats.lock().expect("worker pool stats mutex poisoned");
            s.active_workers -= 1;
            return Err(AbortError("cancelled before dispatch".into()).into());
        }

        let started = Instant::now();
        let handle = tokio::spawn(async move { tool.execute(args, &ctx).await });
        let abort_handle = handle.abort_handle();

        let watcher_cancel = cancel.clone();
        let watcher_abort = abort_handle.clone();
        let watcher = tokio::spawn(async move {
            loop {
                if watcher_abort.is_finished() {
                    return;
                }
                if watcher_cancel.is_cancelled() {
                    watcher_abort.abort();
                    return;
                }
                tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
            }
        });

        let outcome = tokio::time::timeout(self.config.task_timeout, handle).await;
        watcher.abort();
        drop(permit);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let mut s = self.stats.lock().expect("worker pool stats mutex poisoned");
        s.active_workers -= 1;

        match outcome {
            Err(_elapsed) => {
                abort_handle.abort();
                s.failed += 1;
                s.total_duration_ms += elapsed_ms;
                Err(TimeoutError(self.config.task_timeout).into())
            }
            Ok(Err(join_err)) => {
                s.failed += 1;
                s.total_duration_ms += elapsed_ms;
                if join_err.is_cancelled() {
                    Err(AbortError("worker task aborted".into()).into())
                } else {
                    Err(ToolError(format!("worker task panicked: {join_err}")).into())
                }
            }
            Ok(Ok(Err(tool_err))) => {
                s.completed += 1;
                s.total_duration_ms += elapsed_ms;
                Ok(ToolResult::err(tool_err))
            }
            Ok(Ok(Ok(result))) => {
                s.completed += 1;
                s.total_duration_ms += elapsed_ms;
                Ok(result)
            }
        }
    }

    /// Refuse new work and let in-flight tasks finish naturally (the
    /// semaphore already bounds how many there can be).
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct SleepyTool(Duration);

    #[async_trait]
    impl Tool for SleepyTool {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn parameters_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolResult, String> {
            tokio::time::sleep(self.0).await;
            Ok(ToolResult::ok("done"))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "fails"
        }
        fn parameters_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolResult, String> {
            Err("boom".to_string())
        }
    }

    fn test_ctx() -> ToolContext {
        ToolContext {
            session_id: "test".into(),
            cwd: ".".into(),
            security_policy: Arc::new(crate::security::SecurityPolicy::new(
                crate::security::AutonomyLevel::Full,
                None,
                Vec::new(),
                60,
                1000,
            )),
            cancel: CancelToken::new(),
            on_progress: None,
            memory: None,
            engine_registry: None,
            extensions: Default::default(),
        }
    }

    #[tokio::test]
    async fn successful_execution_updates_stats() {
        let pool = WorkerPool::new(WorkerPoolConfig::default());
        let result = pool
            .execute(Arc::new(SleepyTool(Duration::from_millis(1))), json!({}), CancelToken::new(), test_ctx())
            .await
            .unwrap();
        assert!(result.success);
        let stats = pool.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn tool_error_becomes_failed_tool_result_not_worker_error() {
        let pool = WorkerPool::new(WorkerPoolConfig::default());
        let result = pool
            .execute(Arc::new(FailingTool), json!({}), CancelToken::new(), test_ctx())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn timeout_is_enforced() {
        let pool = WorkerPool::new(WorkerPoolConfig {
            max_workers: 1,
            task_timeout: Duration::from_millis(20),
        });
        let result = pool
            .execute(Arc::new(SleepyTool(Duration::from_secs(5))), json!({}), CancelToken::new(), test_ctx())
            .await;
        assert!(matches!(result, Err(WorkerError::Timeout(_))));
    }

    #[tokio::test]
    async fn already_cancelled_rejects_immediately() {
        let pool = WorkerPool::new(WorkerPoolConfig::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = pool
            .execute(Arc::new(SleepyTool(Duration::from_millis(1))), json!({}), cancel, test_ctx())
            .await;
        assert!(matches!(result, Err(WorkerError::Abort(_))));
    }

    #[tokio::test]
    async fn cancel_during_execution_aborts_task() {
        let pool = WorkerPool::new(WorkerPoolConfig::default());
        let cancel = CancelToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel_clone.cancel();
        });
        let result = pool
            .execute(Arc::new(SleepyTool(Duration::from_secs(5))), json!({}), cancel, test_ctx())
            .await;
        assert!(matches!(result, Err(WorkerError::Abort(_))));
    }

    #[tokio::test]
    async fn at_most_max_workers_run_concurrently() {
        let pool = Arc::new(WorkerPool::new(WorkerPoolConfig {
            max_workers: 2,
            task_timeout: Duration::from_secs(5),
        }));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool.execute(
                    Arc::new(SleepyTool(Duration::from_millis(30))),
                    json!({}),
                    CancelToken::new(),
                    test_ctx(),
                )
                .await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().unwrap().success);
        }
        assert_eq!(pool.stats().completed, 5);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let pool = WorkerPool::new(WorkerPoolConfig::default());
        pool.shutdown();
        let result = pool
            .execute(Arc::new(SleepyTool(Duration::from_millis(1))), json!({}), CancelToken::new(), test_ctx())
            .await;
        assert!(matches!(result, Err(WorkerError::ShuttingDown)));
    }
}
