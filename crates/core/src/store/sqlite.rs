//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::traits::{JobStore, StoreError};
use crate::job::{Batch, Job, JobFilter};

/// SQLite-backed job store.
///
/// Full records are kept as JSON; the columns used for filtering are
/// duplicated next to them.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Create a new SQLite job store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS batches (
                id TEXT PRIMARY KEY,
                job_ids TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                batch_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                content_type TEXT NOT NULL,
                chapter_ref TEXT NOT NULL,
                state TEXT NOT NULL,
                record TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_batch_id ON jobs(batch_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_chapter_ref ON jobs(chapter_ref);
            CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref batch_id) = filter.batch_id {
            conditions.push("batch_id = ?");
            params.push(Box::new(batch_id.clone()));
        }

        if let Some(ref chapter_ref) = filter.chapter_ref {
            conditions.push("chapter_ref = ?");
            params.push(Box::new(chapter_ref.clone()));
        }

        if let Some(content_type) = filter.content_type {
            conditions.push("content_type = ?");
            params.push(Box::new(content_type.as_str()));
        }

        if let Some(state) = filter.state {
            conditions.push("state = ?");
            params.push(Box::new(state.state_type()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }
}

impl JobStore for SqliteJobStore {
    fn upsert_job(&self, job: &Job) -> Result<(), StoreError> {
        let record = serde_json::to_string(job)?;
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO jobs (id, batch_id, sequence, content_type, chapter_ref, state, record, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                record = excluded.record,
                updated_at = excluded.updated_at
            "#,
            params![
                job.id,
                job.batch_id,
                job.sequence as i64,
                job.content_type.as_str(),
                job.chapter_ref,
                job.state.state_type(),
                record,
                job.created_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn upsert_batch(&self, batch: &Batch) -> Result<(), StoreError> {
        let job_ids = serde_json::to_string(&batch.job_ids)?;
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO batches (id, job_ids, created_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET job_ids = excluded.job_ids
            "#,
            params![batch.id, job_ids, batch.created_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let conn = self.conn()?;
        let record: Option<String> = conn
            .query_row("SELECT record FROM jobs WHERE id = ?", params![id], |row| {
                row.get(0)
            })
            .optional()?;

        record
            .map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    fn get_batch(&self, id: &str) -> Result<Option<Batch>, StoreError> {
        let conn = self.conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT job_ids, created_at FROM batches WHERE id = ?",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((job_ids_json, created_at)) = row else {
            return Ok(None);
        };

        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(Some(Batch {
            id: id.to_string(),
            job_ids: serde_json::from_str(&job_ids_json)?,
            created_at,
        }))
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT record FROM jobs {} ORDER BY created_at ASC, sequence ASC LIMIT ? OFFSET ?",
            where_clause
        );

        let mut stmt = conn.prepare(&sql)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit as i64));
        all_params.push(Box::new(filter.offset as i64));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let records = stmt
            .query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        records
            .iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }

    fn count_jobs(&self, filter: &JobFilter) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count as usize)
    }

    fn delete_batch(&self, id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM jobs WHERE batch_id = ?", params![id])?;
        let deleted = tx.execute("DELETE FROM batches WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{hash_bytes, Artifact};
    use crate::job::{ContentType, JobRequest, JobState};
    use tempfile::TempDir;

    fn batch_with_jobs() -> (Batch, Vec<Job>) {
        let mut batch = Batch::new(Vec::new());
        let jobs: Vec<Job> = [
            JobRequest::illustration("ch1"),
            JobRequest::audio("ch1"),
            JobRequest::illustration("ch2"),
        ]
        .into_iter()
        .enumerate()
        .map(|(i, r)| Job::from_request(r, &batch.id, i as u64))
        .collect();
        batch.job_ids = jobs.iter().map(|j| j.id.clone()).collect();
        (batch, jobs)
    }

    #[test]
    fn test_upsert_and_get() {
        let store = SqliteJobStore::in_memory().unwrap();
        let (batch, mut jobs) = batch_with_jobs();

        store.upsert_batch(&batch).unwrap();
        for job in &jobs {
            store.upsert_job(job).unwrap();
        }

        jobs[0].state = JobState::Succeeded;
        jobs[0].artifact = Some(Artifact {
            content_hash: hash_bytes(b"x"),
            content_type: ContentType::Illustration,
            byte_size: 1,
            location_ref: "memory://x".into(),
            created_at: Utc::now(),
            metadata: Default::default(),
        });
        store.upsert_job(&jobs[0]).unwrap();

        let loaded = store.get_job(&jobs[0].id).unwrap().unwrap();
        assert_eq!(loaded, jobs[0]);

        let loaded_batch = store.get_batch(&batch.id).unwrap().unwrap();
        assert_eq!(loaded_batch.job_ids, batch.job_ids);

        assert!(store.get_job("missing").unwrap().is_none());
        assert!(store.get_batch("missing").unwrap().is_none());
    }

    #[test]
    fn test_list_with_filters() {
        let store = SqliteJobStore::in_memory().unwrap();
        let (batch, jobs) = batch_with_jobs();
        for job in &jobs {
            store.upsert_job(job).unwrap();
        }

        let ch1 = store
            .list_jobs(&JobFilter::new().with_chapter("ch1"))
            .unwrap();
        assert_eq!(ch1.len(), 2);

        let illustrations = store
            .list_jobs(
                &JobFilter::new()
                    .with_batch(&batch.id)
                    .with_content_type(ContentType::Illustration),
            )
            .unwrap();
        assert_eq!(illustrations.len(), 2);

        let page = store
            .list_jobs(&JobFilter::new().with_limit(1).with_offset(1))
            .unwrap();
        assert_eq!(page.len(), 1);

        assert_eq!(
            store
                .count_jobs(&JobFilter::new().with_state(JobState::Pending))
                .unwrap(),
            3
        );
        assert_eq!(
            store
                .count_jobs(&JobFilter::new().with_state(JobState::Running))
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_delete_batch() {
        let store = SqliteJobStore::in_memory().unwrap();
        let (batch, jobs) = batch_with_jobs();
        store.upsert_batch(&batch).unwrap();
        for job in &jobs {
            store.upsert_job(job).unwrap();
        }

        assert!(store.delete_batch(&batch.id).unwrap());
        assert!(!store.delete_batch(&batch.id).unwrap());
        assert_eq!(store.count_jobs(&JobFilter::new()).unwrap(), 0);
    }

    #[test]
    fn test_file_database_persists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("jobs.db");
        let (_, jobs) = batch_with_jobs();

        {
            let store = SqliteJobStore::new(&path).unwrap();
            store.upsert_job(&jobs[1]).unwrap();
        }

        let store = SqliteJobStore::new(&path).unwrap();
        assert_eq!(store.get_job(&jobs[1].id).unwrap(), Some(jobs[1].clone()));
    }
}
