mod prompts;
mod queue;
mod runs;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::lifecycle::LifecycleComponent;
use types::{RunRecord, RunStatus, SystemPromptRecord, ToolCallRecord, TurnRecord};

/// SQLite-backed audit store for runs, turns, tool calls, queue jobs,
/// and system prompts. Clones share one connection.
#[derive(Clone)]
pub struct ReviewStore {
    db: Arc<Mutex<Connection>>,
    data_dir: PathBuf,
}

impl ReviewStore {
    pub async fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        if !data_dir.exists() {
            fs::create_dir_all(&data_dir).await?;
        }

        let db_path = data_dir.join("reviews.db");
        let db = Connection::open(&db_path)?;

        // WAL and a busy timeout so the operator CLI and the daemon can
        // share the file; cascades need foreign_keys per-connection.
        db.query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(()))?;
        db.query_row("PRAGMA busy_timeout = 5000", [], |row| row.get::<_, i64>(0))?;
        db.execute("PRAGMA foreign_keys = ON", [])?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                case_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                model_id TEXT NOT NULL,
                prompt_version TEXT NOT NULL,
                total_turns INTEGER NOT NULL DEFAULT 0,
                determination TEXT,
                error TEXT,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                started_at DATETIME,
                finished_at DATETIME
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                turn_number INTEGER NOT NULL,
                role TEXT NOT NULL DEFAULT 'assistant',
                content TEXT NOT NULL,
                stop_reason TEXT NOT NULL,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                latency_ms INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(run_id, turn_number)
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS tool_calls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                turn_number INTEGER NOT NULL,
                tool_use_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                input TEXT NOT NULL,
                output TEXT,
                error TEXT,
                latency_ms INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS queue_jobs (
                run_id TEXT PRIMARY KEY,
                case_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                next_attempt_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                finished_at DATETIME
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS system_prompts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                version TEXT NOT NULL UNIQUE,
                content TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_turns_run_id ON turns(run_id)",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_tool_calls_run_id ON tool_calls(run_id)",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_queue_jobs_status_due ON queue_jobs(status, next_attempt_at)",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_runs_case_id ON runs(case_id)",
            [],
        )?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            data_dir,
        })
    }

    pub fn get_db(&self) -> Arc<Mutex<Connection>> {
        self.db.clone()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

/// Log-and-swallow for writes whose failure must not mask the primary
/// outcome: the failed-run mark inside the run loop's catch, the worker
/// failure hook, and queue bookkeeping after a run is already terminal.
pub fn best_effort<T>(context: &str, result: Result<T>) {
    if let Err(e) = result {
        warn!("Ignoring failure ({}): {}", context, e);
    }
}

/// The narrow store surface the run loop depends on.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(
        &self,
        case_id: &str,
        model_id: &str,
        prompt_version: &str,
    ) -> Result<RunRecord>;

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>>;

    async fn mark_run_running(&self, run_id: &str) -> Result<bool>;

    #[allow(clippy::too_many_arguments)]
    async fn finalize_run(
        &self,
        run_id: &str,
        status: RunStatus,
        determination: Option<&str>,
        error: Option<&str>,
        total_turns: i64,
        input_tokens: i64,
        output_tokens: i64,
    ) -> Result<bool>;

    #[allow(clippy::too_many_arguments)]
    async fn add_turn(
        &self,
        run_id: &str,
        turn_number: i64,
        content: &str,
        stop_reason: &str,
        input_tokens: i64,
        output_tokens: i64,
        latency_ms: i64,
    ) -> Result<TurnRecord>;

    #[allow(clippy::too_many_arguments)]
    async fn add_tool_call(
        &self,
        run_id: &str,
        turn_number: i64,
        tool_use_id: &str,
        tool_name: &str,
        input: &str,
        output: Option<&str>,
        error: Option<&str>,
        latency_ms: i64,
    ) -> Result<ToolCallRecord>;

    async fn get_active_system_prompt(&self) -> Result<Option<SystemPromptRecord>>;
}

#[async_trait]
impl RunStore for ReviewStore {
    async fn create_run(
        &self,
        case_id: &str,
        model_id: &str,
        prompt_version: &str,
    ) -> Result<RunRecord> {
        ReviewStore::create_run(self, case_id, model_id, prompt_version).await
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        ReviewStore::get_run(self, run_id).await
    }

    async fn mark_run_running(&self, run_id: &str) -> Result<bool> {
        ReviewStore::mark_run_running(self, run_id).await
    }

    async fn finalize_run(
        &self,
        run_id: &str,
        status: RunStatus,
        determination: Option<&str>,
        error: Option<&str>,
        total_turns: i64,
        input_tokens: i64,
        output_tokens: i64,
    ) -> Result<bool> {
        ReviewStore::finalize_run(
            self,
            run_id,
            status,
            determination,
            error,
            total_turns,
            input_tokens,
            output_tokens,
        )
        .await
    }

    async fn add_turn(
        &self,
        run_id: &str,
        turn_number: i64,
        content: &str,
        stop_reason: &str,
        input_tokens: i64,
        output_tokens: i64,
        latency_ms: i64,
    ) -> Result<TurnRecord> {
        ReviewStore::add_turn(
            self,
            run_id,
            turn_number,
            content,
            stop_reason,
            input_tokens,
            output_tokens,
            latency_ms,
        )
        .await
    }

    async fn add_tool_call(
        &self,
        run_id: &str,
        turn_number: i64,
        tool_use_id: &str,
        tool_name: &str,
        input: &str,
        output: Option<&str>,
        error: Option<&str>,
        latency_ms: i64,
    ) -> Result<ToolCallRecord> {
        ReviewStore::add_tool_call(
            self,
            run_id,
            turn_number,
            tool_use_id,
            tool_name,
            input,
            output,
            error,
            latency_ms,
        )
        .await
    }

    async fn get_active_system_prompt(&self) -> Result<Option<SystemPromptRecord>> {
        ReviewStore::get_active_system_prompt(self).await
    }
}

#[async_trait]
impl LifecycleComponent for ReviewStore {
    async fn on_init(&mut self) -> Result<()> {
        info!("Review store (SQLite) initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        info!("Review store ready at {}", self.data_dir.display());
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("Review store shutting down...");
        Ok(())
    }
}

/// Store over a throwaway temp dir for tests. The caller keeps the
/// returned guard alive for the duration of the test.
#[cfg(test)]
pub async fn test_review_store() -> (ReviewStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = ReviewStore::new(dir.path()).await.expect("open test store");
    (store, dir)
}
