use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::{ModelConfig, QueueConfig, ToolsConfig};
use crate::core::lifecycle::LifecycleComponent;
use crate::core::model::{AnthropicClient, ModelClient};
use crate::core::prompt;
use crate::core::runner::{ReviewRunner, RunnerConfig};
use crate::core::store::types::{QueueJobRecord, RunRecord, RunStatus};
use crate::core::store::{best_effort, ReviewStore};
use crate::core::tools::{McpToolClient, ToolClient};

/// Caller-facing submit/cancel surface over the queue tables.
#[derive(Clone)]
pub struct ReviewQueue {
    store: ReviewStore,
    model_id: String,
}

impl ReviewQueue {
    pub fn new(store: ReviewStore, model_id: String) -> Self {
        Self { store, model_id }
    }

    /// Create a pending run for the case and schedule it.
    pub async fn submit(&self, case_id: &str) -> Result<RunRecord> {
        let (_, prompt_version) = prompt::resolve_system_prompt(&self.store).await;
        let run = self
            .store
            .create_run(case_id, &self.model_id, &prompt_version)
            .await?;
        if !self.enqueue(&run.id, case_id).await? {
            warn!("Run {} already had a queued job", run.id);
        }
        info!("Run {} queued for case {}", run.id, case_id);
        Ok(run)
    }

    /// False means a job for this run already exists.
    pub async fn enqueue(&self, run_id: &str, case_id: &str) -> Result<bool> {
        self.store.enqueue_job(run_id, case_id).await
    }

    /// True only when the job was still queued and got removed before any
    /// worker touched it. A claimed job keeps running until its next
    /// per-turn check sees the flipped run status.
    pub async fn cancel(&self, run_id: &str) -> Result<bool> {
        let removed = match self.store.remove_queued_job(run_id).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Ignoring failure (remove queued job): {}", e);
                false
            }
        };
        let marked = self.store.request_cancel(run_id).await?;
        if removed {
            info!("Run {} cancelled before it started", run_id);
        } else if marked {
            info!(
                "Run {} is in flight; cancellation lands at its next turn",
                run_id
            );
        } else {
            info!("Run {} already finished; nothing to cancel", run_id);
        }
        Ok(removed)
    }
}

/// Builds the live clients a worker needs. Construction failures (missing
/// API key, tool server that will not spawn) are retryable at the queue
/// level, unlike failures inside a run.
#[async_trait]
pub trait RunnerFactory: Send + Sync {
    async fn build(&self) -> Result<(Arc<dyn ModelClient>, Arc<dyn ToolClient>)>;
}

pub struct LiveRunnerFactory {
    model: ModelConfig,
    tools: ToolsConfig,
}

impl LiveRunnerFactory {
    pub fn new(model: ModelConfig, tools: ToolsConfig) -> Self {
        Self { model, tools }
    }
}

#[async_trait]
impl RunnerFactory for LiveRunnerFactory {
    async fn build(&self) -> Result<(Arc<dyn ModelClient>, Arc<dyn ToolClient>)> {
        let model: Arc<dyn ModelClient> = Arc::new(AnthropicClient::new(&self.model)?);
        let tools: Arc<dyn ToolClient> = McpToolClient::new(&self.tools).await?;
        Ok((model, tools))
    }
}

/// Claims due jobs and runs them on bounded worker slots. One dispatcher
/// task owns the polling loop; each claimed job gets its own task.
pub struct WorkerPool {
    store: ReviewStore,
    factory: Arc<dyn RunnerFactory>,
    queue_config: QueueConfig,
    runner_config: RunnerConfig,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        store: ReviewStore,
        factory: Arc<dyn RunnerFactory>,
        queue_config: QueueConfig,
        runner_config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            factory,
            queue_config,
            runner_config,
            shutdown: CancellationToken::new(),
            handle: None,
        }
    }
}

#[async_trait]
impl LifecycleComponent for WorkerPool {
    async fn on_init(&mut self) -> Result<()> {
        info!(
            "Worker pool initializing ({} slot(s))",
            self.queue_config.concurrency
        );
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        self.handle = Some(tokio::spawn(dispatch(
            self.store.clone(),
            self.factory.clone(),
            self.queue_config.clone(),
            self.runner_config.clone(),
            self.shutdown.clone(),
        )));
        info!("Worker pool started");
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("Worker pool shutting down...");
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            handle.await.ok();
        }
        Ok(())
    }
}

async fn dispatch(
    store: ReviewStore,
    factory: Arc<dyn RunnerFactory>,
    queue_config: QueueConfig,
    runner_config: RunnerConfig,
    shutdown: CancellationToken,
) {
    // Jobs stranded in 'active' by an interrupted process get another
    // chance; the burned attempt stays on their counter.
    match store.recover_interrupted_jobs().await {
        Ok(0) => {}
        Ok(n) => info!("Re-queued {} interrupted job(s)", n),
        Err(e) => warn!("Could not recover interrupted jobs: {}", e),
    }

    let mut workers: JoinSet<()> = JoinSet::new();
    let mut tick = tokio::time::interval(Duration::from_millis(queue_config.poll_interval_ms));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {}
        }

        while workers.try_join_next().is_some() {}

        let open_slots = queue_config.concurrency.saturating_sub(workers.len());
        if open_slots == 0 {
            continue;
        }

        let jobs = match store.claim_due_jobs(open_slots).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("Queue poll failed: {}", e);
                continue;
            }
        };
        for job in jobs {
            let store = store.clone();
            let factory = factory.clone();
            let queue_config = queue_config.clone();
            let runner_config = runner_config.clone();
            workers.spawn(async move {
                process_job(store, factory, queue_config, runner_config, job).await;
            });
        }
    }

    if !workers.is_empty() {
        info!("Waiting for {} in-flight run(s) to finish...", workers.len());
        while workers.join_next().await.is_some() {}
    }
    info!("Worker pool stopped");
}

/// One claimed job, end to end. Never panics the slot: every failure path
/// lands in queue bookkeeping.
async fn process_job(
    store: ReviewStore,
    factory: Arc<dyn RunnerFactory>,
    queue_config: QueueConfig,
    runner_config: RunnerConfig,
    job: QueueJobRecord,
) {
    info!(
        "Job {} (case {}): starting attempt {}",
        job.run_id, job.case_id, job.attempts
    );
    match factory.build().await {
        Ok((model, tools)) => {
            let runner = ReviewRunner::new(model, tools, Arc::new(store.clone()), runner_config);
            let outcome = runner.run(&job.case_id, Some(&job.run_id)).await;
            // The run row already carries the outcome, even for a logical
            // failure; the job's single execution is done either way.
            debug!(
                "Job {} finished with run status {}",
                job.run_id,
                outcome.status.as_str()
            );
            best_effort("complete queue job", store.complete_job(&job.run_id).await);
        }
        Err(e) => {
            retry_or_fail(&store, &queue_config, &job, &format!("{:#}", e)).await;
        }
    }
}

async fn retry_or_fail(
    store: &ReviewStore,
    config: &QueueConfig,
    job: &QueueJobRecord,
    error: &str,
) {
    if job.attempts < i64::from(config.max_attempts) {
        let delay_ms = backoff_delay_ms(config.backoff_base_ms, job.attempts);
        warn!(
            "Job {} attempt {} failed, retrying in {}ms: {}",
            job.run_id, job.attempts, delay_ms, error
        );
        best_effort(
            "requeue job",
            store.requeue_job(&job.run_id, error, delay_ms).await,
        );
    } else {
        warn!(
            "Job {} failed after {} attempt(s): {}",
            job.run_id, job.attempts, error
        );
        best_effort("fail queue job", store.fail_job(&job.run_id, error).await);
        // Outer safety net: the run must not stay pending forever when its
        // job is spent.
        best_effort(
            "mark run failed",
            store
                .finalize_run(&job.run_id, RunStatus::Failed, None, Some(error), 0, 0, 0)
                .await,
        );
    }
}

/// base * 2^(attempt-1), with up to 25% added jitter.
fn backoff_delay_ms(base_ms: u64, attempt: i64) -> u64 {
    let shift = attempt.saturating_sub(1).clamp(0, 16) as u32;
    let scaled = base_ms.saturating_mul(1u64 << shift);
    let jitter = rand::thread_rng().gen_range(0..=scaled / 4);
    scaled + jitter
}

/// Cron entry point for the retention sweep.
pub async fn run_sweep(store: &ReviewStore, config: &QueueConfig) {
    match store
        .sweep_finished_jobs(config.completed_retention_secs, config.failed_retention_secs)
        .await
    {
        Ok(0) => debug!("Queue sweep: nothing to remove"),
        Ok(n) => info!("Queue sweep removed {} finished job(s)", n),
        Err(e) => warn!("Queue sweep failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use anyhow::bail;
    use serde_json::Value;

    use super::*;
    use crate::core::model::{
        ContentBlock, ModelRequest, ModelResponse, StopReason, Usage,
    };
    use crate::core::store::test_review_store;
    use crate::core::tools::ToolDescriptor;

    // --- Doubles ---

    struct EndTurnModel;

    #[async_trait]
    impl ModelClient for EndTurnModel {
        async fn create_message(&self, _request: ModelRequest<'_>) -> Result<ModelResponse> {
            Ok(ModelResponse {
                content: vec![ContentBlock::Text {
                    text: "Reviewed.".to_string(),
                }],
                stop_reason: StopReason::EndTurn,
                usage: Usage::default(),
            })
        }
    }

    struct NoTools;

    #[async_trait]
    impl ToolClient for NoTools {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            Ok(Vec::new())
        }

        async fn call_tool(&self, name: &str, _arguments: Value) -> Result<Value> {
            bail!("no tool {}", name)
        }
    }

    /// Fails its first `failures` builds, then hands out working clients.
    struct FlakyFactory {
        failures: Mutex<u32>,
        builds: AtomicUsize,
    }

    impl FlakyFactory {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(failures),
                builds: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RunnerFactory for FlakyFactory {
        async fn build(&self) -> Result<(Arc<dyn ModelClient>, Arc<dyn ToolClient>)> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                bail!("Missing API key in $ANTHROPIC_API_KEY");
            }
            Ok((Arc::new(EndTurnModel), Arc::new(NoTools)))
        }
    }

    fn test_queue_config() -> QueueConfig {
        QueueConfig {
            concurrency: 2,
            poll_interval_ms: 10,
            max_attempts: 2,
            backoff_base_ms: 0,
            completed_retention_secs: 3600,
            failed_retention_secs: 604_800,
        }
    }

    fn test_runner_config() -> RunnerConfig {
        RunnerConfig {
            model_id: "claude-sonnet-4-20250514".to_string(),
            max_turns: 5,
            max_tokens: 256,
            determination_tool: "propose_determination".to_string(),
        }
    }

    // --- Submit and cancel ---

    #[tokio::test]
    async fn submit_creates_pending_run_with_queued_job() {
        let (store, _dir) = test_review_store().await;
        let queue = ReviewQueue::new(store.clone(), "claude-sonnet-4-20250514".to_string());

        let run = queue.submit("case-1").await.unwrap();

        assert_eq!(run.status, "pending");
        assert_eq!(run.case_id, "case-1");
        assert_eq!(run.prompt_version, "builtin");
        let job = store.get_queue_job(&run.id).await.unwrap().unwrap();
        assert_eq!(job.status, "queued");
        assert_eq!(job.case_id, "case-1");
    }

    #[tokio::test]
    async fn cancel_before_claim_removes_job_and_run() {
        let (store, _dir) = test_review_store().await;
        let queue = ReviewQueue::new(store.clone(), "claude-sonnet-4-20250514".to_string());
        let run = queue.submit("case-2").await.unwrap();

        assert!(queue.cancel(&run.id).await.unwrap());

        assert!(store.get_queue_job(&run.id).await.unwrap().is_none());
        let row = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(row.status, "cancelled");
        assert!(row.finished_at.is_some());
    }

    #[tokio::test]
    async fn cancel_after_claim_only_flips_the_run() {
        let (store, _dir) = test_review_store().await;
        let queue = ReviewQueue::new(store.clone(), "claude-sonnet-4-20250514".to_string());
        let run = queue.submit("case-3").await.unwrap();
        assert_eq!(store.claim_due_jobs(1).await.unwrap().len(), 1);

        assert!(!queue.cancel(&run.id).await.unwrap());

        // job row survives for the worker that holds it
        let job = store.get_queue_job(&run.id).await.unwrap().unwrap();
        assert_eq!(job.status, "active");
        let row = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(row.status, "cancelled");
    }

    #[tokio::test]
    async fn cancel_of_finished_run_is_a_noop() {
        let (store, _dir) = test_review_store().await;
        let queue = ReviewQueue::new(store.clone(), "claude-sonnet-4-20250514".to_string());
        let run = queue.submit("case-4").await.unwrap();
        store.claim_due_jobs(1).await.unwrap();
        store.mark_run_running(&run.id).await.unwrap();
        store
            .finalize_run(&run.id, RunStatus::Completed, None, None, 1, 10, 5)
            .await
            .unwrap();
        store.complete_job(&run.id).await.unwrap();

        assert!(!queue.cancel(&run.id).await.unwrap());
        let row = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(row.status, "completed");
    }

    // --- Worker execution ---

    #[tokio::test]
    async fn processed_job_completes_run_and_job() {
        let (store, _dir) = test_review_store().await;
        let queue = ReviewQueue::new(store.clone(), "claude-sonnet-4-20250514".to_string());
        let run = queue.submit("case-5").await.unwrap();
        let job = store.claim_due_jobs(1).await.unwrap().remove(0);

        process_job(
            store.clone(),
            FlakyFactory::new(0),
            test_queue_config(),
            test_runner_config(),
            job,
        )
        .await;

        let row = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(row.status, "completed");
        assert_eq!(row.total_turns, 1);
        let job = store.get_queue_job(&run.id).await.unwrap().unwrap();
        assert_eq!(job.status, "completed");
    }

    #[tokio::test]
    async fn construction_failure_retries_then_fails_job_and_run() {
        let (store, _dir) = test_review_store().await;
        let queue = ReviewQueue::new(store.clone(), "claude-sonnet-4-20250514".to_string());
        let run = queue.submit("case-6").await.unwrap();
        let factory = FlakyFactory::new(10);

        // first attempt: requeued with backoff
        let job = store.claim_due_jobs(1).await.unwrap().remove(0);
        assert_eq!(job.attempts, 1);
        process_job(
            store.clone(),
            factory.clone(),
            test_queue_config(),
            test_runner_config(),
            job,
        )
        .await;
        let job = store.get_queue_job(&run.id).await.unwrap().unwrap();
        assert_eq!(job.status, "queued");
        assert!(job.last_error.as_deref().unwrap().contains("API key"));
        let row = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(row.status, "pending");

        // second attempt: attempts exhausted, job fails, hook marks the run
        let job = store.claim_due_jobs(1).await.unwrap().remove(0);
        assert_eq!(job.attempts, 2);
        process_job(
            store.clone(),
            factory.clone(),
            test_queue_config(),
            test_runner_config(),
            job,
        )
        .await;
        let job = store.get_queue_job(&run.id).await.unwrap().unwrap();
        assert_eq!(job.status, "failed");
        let row = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(row.status, "failed");
        assert!(row.error.as_deref().unwrap().contains("API key"));
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn logical_run_failure_still_completes_the_job() {
        let (store, _dir) = test_review_store().await;
        let queue = ReviewQueue::new(store.clone(), "claude-sonnet-4-20250514".to_string());
        let run = queue.submit("case-7").await.unwrap();
        // cancel the run under the claimed job so the runner exits early
        store.claim_due_jobs(1).await.unwrap();
        store.request_cancel(&run.id).await.unwrap();

        let job = store.get_queue_job(&run.id).await.unwrap().unwrap();
        process_job(
            store.clone(),
            FlakyFactory::new(0),
            test_queue_config(),
            test_runner_config(),
            job,
        )
        .await;

        let row = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(row.status, "cancelled");
        let job = store.get_queue_job(&run.id).await.unwrap().unwrap();
        assert_eq!(job.status, "completed");
    }

    // --- Pool lifecycle ---

    #[tokio::test]
    async fn pool_drains_the_queue_end_to_end() {
        let (store, _dir) = test_review_store().await;
        let queue = ReviewQueue::new(store.clone(), "claude-sonnet-4-20250514".to_string());
        let run = queue.submit("case-8").await.unwrap();

        let mut pool = WorkerPool::new(
            store.clone(),
            FlakyFactory::new(0),
            test_queue_config(),
            test_runner_config(),
        );
        pool.on_init().await.unwrap();
        pool.on_start().await.unwrap();

        let mut status = String::new();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            status = store.get_run(&run.id).await.unwrap().unwrap().status;
            if status == "completed" {
                break;
            }
        }
        pool.on_shutdown().await.unwrap();

        assert_eq!(status, "completed");
        let job = store.get_queue_job(&run.id).await.unwrap().unwrap();
        assert_eq!(job.status, "completed");
    }

    // --- Backoff ---

    #[test]
    fn backoff_doubles_per_attempt_with_bounded_jitter() {
        for _ in 0..20 {
            let first = backoff_delay_ms(1000, 1);
            assert!((1000..=1250).contains(&first));
            let second = backoff_delay_ms(1000, 2);
            assert!((2000..=2500).contains(&second));
            let third = backoff_delay_ms(1000, 3);
            assert!((4000..=5000).contains(&third));
        }
        assert_eq!(backoff_delay_ms(0, 1), 0);
    }
}
