use anyhow::Result;
use rusqlite::params;

use super::types::SystemPromptRecord;
use super::ReviewStore;

impl ReviewStore {
    /// Store a prompt version and make it the active one. Re-setting an
    /// existing version replaces its content in place.
    pub async fn set_system_prompt(&self, version: &str, content: &str) -> Result<SystemPromptRecord> {
        let db = self.db.lock().await;
        db.execute("UPDATE system_prompts SET active = 0 WHERE active = 1", [])?;
        db.execute(
            "INSERT INTO system_prompts (version, content, active) VALUES (?1, ?2, 1)
             ON CONFLICT(version) DO UPDATE SET content = excluded.content, active = 1",
            params![version, content],
        )?;
        let rec = db.query_row(
            "SELECT id, version, content, active, created_at FROM system_prompts WHERE version = ?1",
            params![version],
            |row| {
                Ok(SystemPromptRecord {
                    id: row.get(0)?,
                    version: row.get(1)?,
                    content: row.get(2)?,
                    active: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )?;
        Ok(rec)
    }

    pub async fn get_active_system_prompt(&self) -> Result<Option<SystemPromptRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, version, content, active, created_at FROM system_prompts
             WHERE active = 1 ORDER BY created_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query([])?;
        if let Some(row) = rows.next()? {
            Ok(Some(SystemPromptRecord {
                id: row.get(0)?,
                version: row.get(1)?,
                content: row.get(2)?,
                active: row.get(3)?,
                created_at: row.get(4)?,
            }))
        } else {
            Ok(None)
        }
    }

    pub async fn list_system_prompts(&self) -> Result<Vec<SystemPromptRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, version, content, active, created_at FROM system_prompts
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SystemPromptRecord {
                id: row.get(0)?,
                version: row.get(1)?,
                content: row.get(2)?,
                active: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        let mut prompts = Vec::new();
        for row in rows {
            prompts.push(row?);
        }
        Ok(prompts)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_review_store;
    use super::*;

    #[tokio::test]
    async fn set_activates_and_deactivates_previous() {
        let (store, _dir) = test_review_store().await;
        store.set_system_prompt("v1", "first").await.unwrap();
        store.set_system_prompt("v2", "second").await.unwrap();

        let active = store.get_active_system_prompt().await.unwrap().unwrap();
        assert_eq!(active.version, "v2");
        assert_eq!(active.content, "second");

        let all = store.list_system_prompts().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|p| p.active).count(), 1);
    }

    #[tokio::test]
    async fn reactivating_a_version_updates_content_in_place() {
        let (store, _dir) = test_review_store().await;
        store.set_system_prompt("v1", "first").await.unwrap();
        store.set_system_prompt("v2", "second").await.unwrap();
        let rec = store.set_system_prompt("v1", "first, revised").await.unwrap();
        assert!(rec.active);

        let active = store.get_active_system_prompt().await.unwrap().unwrap();
        assert_eq!(active.version, "v1");
        assert_eq!(active.content, "first, revised");
        assert_eq!(store.list_system_prompts().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fresh_store_has_no_active_prompt() {
        let (store, _dir) = test_review_store().await;
        assert!(store.get_active_system_prompt().await.unwrap().is_none());
    }
}
