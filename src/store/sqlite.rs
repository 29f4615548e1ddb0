use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{JobStore, StoreError};
use crate::job::{Job, JobPatch, JobStatus};

/// Job store backed by a SQLite database at `<root>/jobs.db`.
///
/// The full record is kept as JSON next to the columns the store queries on.
/// Every upsert is one transaction, so the status column and the record never
/// disagree. Calls run on the blocking pool; a caller that stops waiting does
/// not interrupt a write already in flight.
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
    ttl: Duration,
}

impl SqliteJobStore {
    pub async fn open(root: impl Into<PathBuf>, ttl: Duration) -> Result<Self, StoreError> {
        let root = root.into();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            std::fs::create_dir_all(&root)?;
            let conn = Connection::open(root.join("jobs.db"))?;
            migrate(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl,
        })
    }

    async fn with_conn<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("job store connection poisoned".into()))?;
            call(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }

    /// Deletes every record whose `expiresAt` is at or before `now`.
    pub async fn purge_expired(&self, now: i64) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            Ok(conn.execute("DELETE FROM jobs WHERE expires_at <= ?1", params![now])?)
        })
        .await
    }

    /// Runs [`purge_expired`](Self::purge_expired) every `every`.
    pub fn spawn_expiry(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                match self.purge_expired(Utc::now().timestamp()).await {
                    Ok(0) => {}
                    Ok(n) => info!("expired {} job record(s)", n),
                    Err(e) => error!("job expiry sweep failed: {}", e),
                }
            }
        })
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;

        CREATE TABLE IF NOT EXISTS jobs (
          job_id TEXT PRIMARY KEY,
          status TEXT NOT NULL,
          created_at_us INTEGER NOT NULL,
          expires_at INTEGER NOT NULL,
          record TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS jobs_by_status ON jobs(status, created_at_us);
        CREATE INDEX IF NOT EXISTS jobs_by_expiry ON jobs(expires_at);
        "#,
    )?;
    Ok(())
}

fn decode(job_id: Uuid, record: &str) -> Result<Job, StoreError> {
    serde_json::from_str(record).map_err(|source| StoreError::Corrupt { id: job_id, source })
}

fn read_record(conn: &Connection, job_id: Uuid) -> Result<Option<Job>, StoreError> {
    let record: Option<String> = conn
        .query_row(
            "SELECT record FROM jobs WHERE job_id = ?1",
            params![job_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    record.map(|record| decode(job_id, &record)).transpose()
}

fn write_record(conn: &Connection, job: &Job) -> Result<(), StoreError> {
    let record = serde_json::to_string(job).map_err(|source| StoreError::Corrupt {
        id: job.job_id,
        source,
    })?;
    conn.execute(
        "INSERT INTO jobs (job_id, status, created_at_us, expires_at, record)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(job_id) DO UPDATE SET
           status = excluded.status,
           created_at_us = excluded.created_at_us,
           expires_at = excluded.expires_at,
           record = excluded.record",
        params![
            job.job_id.to_string(),
            job.status.to_string(),
            job.created_at.timestamp_micros(),
            job.expires_at,
            record,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn upsert(&self, job_id: Uuid, patch: JobPatch) -> Result<Job, StoreError> {
        let ttl = self.ttl.as_secs() as i64;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            let live = read_record(&tx, job_id)?.filter(|job| !job.is_expired(now.timestamp()));

            let job = match live {
                Some(mut job) => {
                    job.apply(patch, now)?;
                    job
                }
                // an expired record that hasn't been swept yet is replaced
                None => Job::create(job_id, patch, now, ttl)?,
            };

            write_record(&tx, &job)?;
            tx.commit()?;
            Ok(job)
        })
        .await
    }

    async fn get(&self, job_id: Uuid) -> Result<Job, StoreError> {
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp();
            read_record(conn, job_id)?
                .filter(|job| !job.is_expired(now))
                .ok_or(StoreError::NotFound(job_id))
        })
        .await
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<Job>, StoreError> {
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp();
            let mut stmt = conn.prepare(
                "SELECT job_id, record FROM jobs
                 WHERE status = ?1 AND expires_at > ?2
                 ORDER BY created_at_us, rowid
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![status.to_string(), now, limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut jobs = Vec::new();
            for row in rows {
                let (job_id, record) = row?;
                jobs.push(decode(Uuid::parse_str(&job_id).unwrap_or_default(), &record)?);
            }
            Ok(jobs)
        })
        .await
    }

    async fn delete(&self, job_id: Uuid) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM jobs WHERE job_id = ?1",
                params![job_id.to_string()],
            )?;
            Ok(deleted > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::{ConversionKind, ConversionParams};
    use crate::job::TransitionError;
    use crate::store::timed;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    fn creation() -> JobPatch {
        JobPatch {
            status: Some(JobStatus::Uploading),
            conversion_type: Some(ConversionKind::ExtractPdfPages),
            params: Some(ConversionParams {
                pages: Some("1".into()),
                ..Default::default()
            }),
            input_file: Some("a.pdf".into()),
            ..Default::default()
        }
    }

    fn ids(jobs: &[Job]) -> Vec<Uuid> {
        jobs.iter().map(|j| j.job_id).collect()
    }

    #[tokio::test]
    async fn upsert_creates_then_merges() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteJobStore::open(dir.path(), WEEK).await.unwrap();
        let id = Uuid::new_v4();

        let created = store.upsert(id, creation()).await.unwrap();
        assert_eq!(created.status, JobStatus::Uploading);

        let updated = store
            .upsert(id, JobPatch::status(JobStatus::Processing))
            .await
            .unwrap();
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.expires_at, created.expires_at);
        assert_eq!(updated.input_file.as_deref(), Some("a.pdf"));
        assert_eq!(updated.params.pages.as_deref(), Some("1"));

        let fetched = store.get(id).await.unwrap();
        assert_eq!(fetched, updated);
    }

    #[tokio::test]
    async fn records_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        let created = {
            let store = SqliteJobStore::open(dir.path(), WEEK).await.unwrap();
            store.upsert(id, creation()).await.unwrap()
        };

        let store = SqliteJobStore::open(dir.path(), WEEK).await.unwrap();
        assert_eq!(store.get(id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn missing_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteJobStore::open(dir.path(), WEEK).await.unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(store.get(id).await, Err(StoreError::NotFound(got)) if got == id));
        assert!(!store.delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn rejected_transition_leaves_record_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteJobStore::open(dir.path(), WEEK).await.unwrap();
        let id = Uuid::new_v4();
        store.upsert(id, creation()).await.unwrap();

        let err = store
            .upsert(id, JobPatch::completed("output/x.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Transition(TransitionError::Invalid { .. })
        ));
        assert_eq!(store.get(id).await.unwrap().status, JobStatus::Uploading);
        assert_eq!(
            ids(&store.list_by_status(JobStatus::Uploading, 10).await.unwrap()),
            vec![id]
        );
    }

    #[tokio::test]
    async fn listing_follows_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteJobStore::open(dir.path(), WEEK).await.unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.upsert(a, creation()).await.unwrap();
        store.upsert(b, creation()).await.unwrap();
        store
            .upsert(a, JobPatch::status(JobStatus::Processing))
            .await
            .unwrap();

        let uploading = store.list_by_status(JobStatus::Uploading, 10).await.unwrap();
        assert_eq!(ids(&uploading), vec![b]);

        let processing = store.list_by_status(JobStatus::Processing, 10).await.unwrap();
        assert_eq!(ids(&processing), vec![a]);

        assert_eq!(store.list_by_status(JobStatus::Uploading, 0).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn listing_returns_the_oldest_jobs_when_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteJobStore::open(dir.path(), WEEK).await.unwrap();

        let mut created = Vec::new();
        for _ in 0..40 {
            let id = Uuid::new_v4();
            store.upsert(id, creation()).await.unwrap();
            created.push(id);
        }
        // touching a job later must not move it in the listing
        store.upsert(created[3], JobPatch::progress(0)).await.unwrap();

        let oldest = store.list_by_status(JobStatus::Uploading, 5).await.unwrap();
        assert_eq!(ids(&oldest), created[..5].to_vec());
    }

    #[tokio::test]
    async fn abandoned_upsert_keeps_record_and_listing_in_step() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteJobStore::open(dir.path(), WEEK).await.unwrap();
        let id = Uuid::new_v4();
        store.upsert(id, creation()).await.unwrap();

        // the caller gives up immediately; the write either lands whole or not at all
        let _ = timed(
            Duration::ZERO,
            store.upsert(id, JobPatch::status(JobStatus::Processing)),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let job = store.get(id).await.unwrap();
        let listed = store.list_by_status(job.status, 10).await.unwrap();
        assert_eq!(ids(&listed), vec![id]);
        let other = match job.status {
            JobStatus::Uploading => JobStatus::Processing,
            _ => JobStatus::Uploading,
        };
        assert!(store.list_by_status(other, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteJobStore::open(dir.path(), WEEK).await.unwrap();
        let id = Uuid::new_v4();
        store.upsert(id, creation()).await.unwrap();

        assert!(store.delete(id).await.unwrap());
        assert!(store.list_by_status(JobStatus::Uploading, 10).await.unwrap().is_empty());
        assert!(matches!(store.get(id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn expired_records_vanish_and_are_purged() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteJobStore::open(dir.path(), Duration::ZERO).await.unwrap();
        let id = Uuid::new_v4();
        store.upsert(id, creation()).await.unwrap();

        assert!(matches!(store.get(id).await, Err(StoreError::NotFound(_))));
        assert!(store.list_by_status(JobStatus::Uploading, 10).await.unwrap().is_empty());

        let purged = store.purge_expired(Utc::now().timestamp()).await.unwrap();
        assert_eq!(purged, 1);
        assert!(!store.delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn expired_records_are_replaced_by_a_new_creation() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteJobStore::open(dir.path(), Duration::ZERO).await.unwrap();
        let id = Uuid::new_v4();
        store.upsert(id, creation()).await.unwrap();

        // a bare progress tick can't create a record, so the stale one isn't merged into
        assert!(store.upsert(id, JobPatch::progress(10)).await.is_err());
        let fresh = store.upsert(id, creation()).await.unwrap();
        assert_eq!(fresh.progress, 0);
        assert_eq!(fresh.status, JobStatus::Uploading);
    }

    #[tokio::test]
    async fn unexpired_records_survive_the_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteJobStore::open(dir.path(), WEEK).await.unwrap();
        let id = Uuid::new_v4();
        store.upsert(id, creation()).await.unwrap();

        assert_eq!(store.purge_expired(Utc::now().timestamp()).await.unwrap(), 0);
        assert!(store.get(id).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_upserts_to_different_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteJobStore::open(dir.path(), WEEK).await.unwrap());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let id = Uuid::new_v4();
                store.upsert(id, creation()).await.unwrap();
                store
                    .upsert(id, JobPatch::status(JobStatus::Processing))
                    .await
                    .unwrap();
                store.upsert(id, JobPatch::progress(50)).await.unwrap();
                id
            }));
        }

        for handle in handles {
            let id = handle.await.unwrap();
            let job = store.get(id).await.unwrap();
            assert_eq!(job.status, JobStatus::Processing);
            assert_eq!(job.progress, 50);
        }
    }
}
