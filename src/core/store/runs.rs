use anyhow::Result;
use rusqlite::params;
use std::collections::HashMap;

use super::types::{RunRecord, RunStatus, RunTrace, ToolCallRecord, TurnRecord, TurnTrace};
use super::ReviewStore;

impl ReviewStore {
    pub async fn create_run(
        &self,
        case_id: &str,
        model_id: &str,
        prompt_version: &str,
    ) -> Result<RunRecord> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO runs (id, case_id, model_id, prompt_version) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, case_id, model_id, prompt_version],
        )?;
        let rec = db.query_row(
            "SELECT id, case_id, status, model_id, prompt_version, total_turns, determination, error, input_tokens, output_tokens, created_at, started_at, finished_at
             FROM runs WHERE id = ?1",
            params![run_id],
            |row| {
                Ok(RunRecord {
                    id: row.get(0)?,
                    case_id: row.get(1)?,
                    status: row.get(2)?,
                    model_id: row.get(3)?,
                    prompt_version: row.get(4)?,
                    total_turns: row.get(5)?,
                    determination: row.get(6)?,
                    error: row.get(7)?,
                    input_tokens: row.get(8)?,
                    output_tokens: row.get(9)?,
                    created_at: row.get(10)?,
                    started_at: row.get(11)?,
                    finished_at: row.get(12)?,
                })
            },
        )?;
        Ok(rec)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, case_id, status, model_id, prompt_version, total_turns, determination, error, input_tokens, output_tokens, created_at, started_at, finished_at
             FROM runs WHERE id = ?1 LIMIT 1",
        )?;
        let mut rows = stmt.query(params![run_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(RunRecord {
                id: row.get(0)?,
                case_id: row.get(1)?,
                status: row.get(2)?,
                model_id: row.get(3)?,
                prompt_version: row.get(4)?,
                total_turns: row.get(5)?,
                determination: row.get(6)?,
                error: row.get(7)?,
                input_tokens: row.get(8)?,
                output_tokens: row.get(9)?,
                created_at: row.get(10)?,
                started_at: row.get(11)?,
                finished_at: row.get(12)?,
            }))
        } else {
            Ok(None)
        }
    }

    pub async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, case_id, status, model_id, prompt_version, total_turns, determination, error, input_tokens, output_tokens, created_at, started_at, finished_at
             FROM runs ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(RunRecord {
                id: row.get(0)?,
                case_id: row.get(1)?,
                status: row.get(2)?,
                model_id: row.get(3)?,
                prompt_version: row.get(4)?,
                total_turns: row.get(5)?,
                determination: row.get(6)?,
                error: row.get(7)?,
                input_tokens: row.get(8)?,
                output_tokens: row.get(9)?,
                created_at: row.get(10)?,
                started_at: row.get(11)?,
                finished_at: row.get(12)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn mark_run_running(&self, run_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE runs SET status = 'running', started_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND status = 'pending'",
            params![run_id],
        )?;
        Ok(rows > 0)
    }

    /// Terminal write for `completed`/`failed`. The status guard mirrors
    /// `can_transition`, so a row already terminal never matches.
    #[allow(clippy::too_many_arguments)]
    pub async fn finalize_run(
        &self,
        run_id: &str,
        status: RunStatus,
        determination: Option<&str>,
        error: Option<&str>,
        total_turns: i64,
        input_tokens: i64,
        output_tokens: i64,
    ) -> Result<bool> {
        let guard = match status {
            RunStatus::Completed => "status = 'running'",
            RunStatus::Failed => "status IN ('pending', 'running')",
            _ => anyhow::bail!("finalize_run requires completed or failed, got {:?}", status),
        };
        let sql = format!(
            "UPDATE runs
             SET status = ?1, determination = COALESCE(?2, determination), error = COALESCE(?3, error),
                 total_turns = ?4, input_tokens = ?5, output_tokens = ?6, finished_at = CURRENT_TIMESTAMP
             WHERE id = ?7 AND {}",
            guard
        );
        let db = self.db.lock().await;
        let rows = db.execute(
            &sql,
            params![
                status.as_str(),
                determination,
                error,
                total_turns,
                input_tokens,
                output_tokens,
                run_id
            ],
        )?;
        Ok(rows > 0)
    }

    /// The externally-triggered transition. True only if the run was still
    /// pending or running.
    pub async fn request_cancel(&self, run_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE runs SET status = 'cancelled', finished_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND status IN ('pending', 'running')",
            params![run_id],
        )?;
        Ok(rows > 0)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn add_turn(
        &self,
        run_id: &str,
        turn_number: i64,
        content: &str,
        stop_reason: &str,
        input_tokens: i64,
        output_tokens: i64,
        latency_ms: i64,
    ) -> Result<TurnRecord> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO turns (run_id, turn_number, content, stop_reason, input_tokens, output_tokens, latency_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![run_id, turn_number, content, stop_reason, input_tokens, output_tokens, latency_ms],
        )?;
        let id = db.last_insert_rowid();
        let rec = db.query_row(
            "SELECT id, run_id, turn_number, role, content, stop_reason, input_tokens, output_tokens, latency_ms, created_at
             FROM turns WHERE id = ?1",
            params![id],
            |row| {
                Ok(TurnRecord {
                    id: row.get(0)?,
                    run_id: row.get(1)?,
                    turn_number: row.get(2)?,
                    role: row.get(3)?,
                    content: row.get(4)?,
                    stop_reason: row.get(5)?,
                    input_tokens: row.get(6)?,
                    output_tokens: row.get(7)?,
                    latency_ms: row.get(8)?,
                    created_at: row.get(9)?,
                })
            },
        )?;
        Ok(rec)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn add_tool_call(
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
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO tool_calls (run_id, turn_number, tool_use_id, tool_name, input, output, error, latency_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![run_id, turn_number, tool_use_id, tool_name, input, output, error, latency_ms],
        )?;
        let id = db.last_insert_rowid();
        let rec = db.query_row(
            "SELECT id, run_id, turn_number, tool_use_id, tool_name, input, output, error, latency_ms, created_at
             FROM tool_calls WHERE id = ?1",
            params![id],
            |row| {
                Ok(ToolCallRecord {
                    id: row.get(0)?,
                    run_id: row.get(1)?,
                    turn_number: row.get(2)?,
                    tool_use_id: row.get(3)?,
                    tool_name: row.get(4)?,
                    input: row.get(5)?,
                    output: row.get(6)?,
                    error: row.get(7)?,
                    latency_ms: row.get(8)?,
                    created_at: row.get(9)?,
                })
            },
        )?;
        Ok(rec)
    }

    /// Run plus turns in order, each with the tool calls it produced.
    /// Read-only; safe to call at any point in the run's lifecycle.
    pub async fn get_run_trace(&self, run_id: &str) -> Result<Option<RunTrace>> {
        let run = match self.get_run(run_id).await? {
            Some(run) => run,
            None => return Ok(None),
        };

        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, run_id, turn_number, role, content, stop_reason, input_tokens, output_tokens, latency_ms, created_at
             FROM turns WHERE run_id = ?1 ORDER BY turn_number ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(TurnRecord {
                id: row.get(0)?,
                run_id: row.get(1)?,
                turn_number: row.get(2)?,
                role: row.get(3)?,
                content: row.get(4)?,
                stop_reason: row.get(5)?,
                input_tokens: row.get(6)?,
                output_tokens: row.get(7)?,
                latency_ms: row.get(8)?,
                created_at: row.get(9)?,
            })
        })?;
        let mut turn_records = Vec::new();
        for row in rows {
            turn_records.push(row?);
        }

        let mut stmt = db.prepare(
            "SELECT id, run_id, turn_number, tool_use_id, tool_name, input, output, error, latency_ms, created_at
             FROM tool_calls WHERE run_id = ?1 ORDER BY turn_number ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(ToolCallRecord {
                id: row.get(0)?,
                run_id: row.get(1)?,
                turn_number: row.get(2)?,
                tool_use_id: row.get(3)?,
                tool_name: row.get(4)?,
                input: row.get(5)?,
                output: row.get(6)?,
                error: row.get(7)?,
                latency_ms: row.get(8)?,
                created_at: row.get(9)?,
            })
        })?;
        let mut calls_by_turn: HashMap<i64, Vec<ToolCallRecord>> = HashMap::new();
        for row in rows {
            let call = row?;
            calls_by_turn.entry(call.turn_number).or_default().push(call);
        }

        let mut turns = Vec::new();
        for turn in turn_records {
            let tool_calls = calls_by_turn.remove(&turn.turn_number).unwrap_or_default();
            turns.push(TurnTrace { turn, tool_calls });
        }

        Ok(Some(RunTrace { run, turns }))
    }
}
