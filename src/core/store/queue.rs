use anyhow::Result;
use rusqlite::params;

use super::types::QueueJobRecord;
use super::ReviewStore;

impl ReviewStore {
    /// False means a job for this run already exists (dedupe by key).
    pub async fn enqueue_job(&self, run_id: &str, case_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "INSERT OR IGNORE INTO queue_jobs (run_id, case_id) VALUES (?1, ?2)",
            params![run_id, case_id],
        )?;
        Ok(rows > 0)
    }

    pub async fn get_queue_job(&self, run_id: &str) -> Result<Option<QueueJobRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT run_id, case_id, status, attempts, last_error, next_attempt_at, created_at, updated_at, finished_at
             FROM queue_jobs WHERE run_id = ?1 LIMIT 1",
        )?;
        let mut rows = stmt.query(params![run_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(QueueJobRecord {
                run_id: row.get(0)?,
                case_id: row.get(1)?,
                status: row.get(2)?,
                attempts: row.get(3)?,
                last_error: row.get(4)?,
                next_attempt_at: row.get(5)?,
                created_at: row.get(6)?,
                updated_at: row.get(7)?,
                finished_at: row.get(8)?,
            }))
        } else {
            Ok(None)
        }
    }

    /// Flip due queued jobs to active, oldest first, bounded by `limit`.
    /// Each claim increments the attempt counter.
    pub async fn claim_due_jobs(&self, limit: usize) -> Result<Vec<QueueJobRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT run_id FROM queue_jobs
             WHERE status = 'queued' AND next_attempt_at <= CURRENT_TIMESTAMP
             ORDER BY created_at ASC, rowid ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;
        let mut due = Vec::new();
        for row in rows {
            due.push(row?);
        }

        let mut claimed = Vec::new();
        for run_id in due {
            let updated = db.execute(
                "UPDATE queue_jobs
                 SET status = 'active', attempts = attempts + 1, updated_at = CURRENT_TIMESTAMP
                 WHERE run_id = ?1 AND status = 'queued'",
                params![run_id],
            )?;
            if updated == 0 {
                continue;
            }
            let rec = db.query_row(
                "SELECT run_id, case_id, status, attempts, last_error, next_attempt_at, created_at, updated_at, finished_at
                 FROM queue_jobs WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok(QueueJobRecord {
                        run_id: row.get(0)?,
                        case_id: row.get(1)?,
                        status: row.get(2)?,
                        attempts: row.get(3)?,
                        last_error: row.get(4)?,
                        next_attempt_at: row.get(5)?,
                        created_at: row.get(6)?,
                        updated_at: row.get(7)?,
                        finished_at: row.get(8)?,
                    })
                },
            )?;
            claimed.push(rec);
        }
        Ok(claimed)
    }

    pub async fn complete_job(&self, run_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE queue_jobs
             SET status = 'completed', updated_at = CURRENT_TIMESTAMP, finished_at = CURRENT_TIMESTAMP
             WHERE run_id = ?1 AND status = 'active'",
            params![run_id],
        )?;
        Ok(rows > 0)
    }

    /// Put an active job back in the queue, due after `delay_ms`.
    pub async fn requeue_job(&self, run_id: &str, error: &str, delay_ms: u64) -> Result<bool> {
        let modifier = format!("+{:.3} seconds", delay_ms as f64 / 1000.0);
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE queue_jobs
             SET status = 'queued', last_error = ?2, next_attempt_at = datetime('now', ?3), updated_at = CURRENT_TIMESTAMP
             WHERE run_id = ?1 AND status = 'active'",
            params![run_id, error, modifier],
        )?;
        Ok(rows > 0)
    }

    pub async fn fail_job(&self, run_id: &str, error: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE queue_jobs
             SET status = 'failed', last_error = ?2, updated_at = CURRENT_TIMESTAMP, finished_at = CURRENT_TIMESTAMP
             WHERE run_id = ?1 AND status = 'active'",
            params![run_id, error],
        )?;
        Ok(rows > 0)
    }

    /// Cancel path: only a job nobody has claimed yet can be removed.
    pub async fn remove_queued_job(&self, run_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "DELETE FROM queue_jobs WHERE run_id = ?1 AND status = 'queued'",
            params![run_id],
        )?;
        Ok(rows > 0)
    }

    /// Jobs left active by an interrupted process go back to queued on
    /// startup. Their attempt counter keeps the interrupted attempt.
    pub async fn recover_interrupted_jobs(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE queue_jobs
             SET status = 'queued', next_attempt_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
             WHERE status = 'active'",
            [],
        )?;
        Ok(rows)
    }

    pub async fn sweep_finished_jobs(
        &self,
        completed_retention_secs: u64,
        failed_retention_secs: u64,
    ) -> Result<usize> {
        let completed_cutoff = format!("-{} seconds", completed_retention_secs);
        let failed_cutoff = format!("-{} seconds", failed_retention_secs);
        let db = self.db.lock().await;
        let mut removed = db.execute(
            "DELETE FROM queue_jobs WHERE status = 'completed' AND finished_at <= datetime('now', ?1)",
            params![completed_cutoff],
        )?;
        removed += db.execute(
            "DELETE FROM queue_jobs WHERE status = 'failed' AND finished_at <= datetime('now', ?1)",
            params![failed_cutoff],
        )?;
        Ok(removed)
    }
}
