use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::clock;
use crate::error::Result;
use crate::store::{JobResult, NetworkResult};

/// SQLite-backed result store.
///
/// Every write runs in its own transaction under a process-wide write mutex,
/// so heartbeat updates from parallel jobs serialize here. Reads only ever
/// observe committed state.
pub struct ResultDb {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl ResultDb {
    /// Open (creating if missing) the result database and ensure the schema.
    pub async fn open(db_file: &str) -> Result<Self> {
        let url = if db_file.starts_with("sqlite:") {
            format!("{}?mode=rwc", db_file)
        } else {
            format!("sqlite:{}?mode=rwc", db_file)
        };
        let pool = SqlitePool::connect(&url).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS JOBNETWORK (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                jobnetwork TEXT NOT NULL,
                status INTEGER NOT NULL,
                detail TEXT NOT NULL DEFAULT '',
                start_date TEXT NOT NULL DEFAULT '',
                end_date TEXT NOT NULL DEFAULT '',
                create_date TEXT NOT NULL DEFAULT '',
                update_date TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS JOB (
                instance_id INTEGER NOT NULL,
                job_id TEXT NOT NULL,
                job_name TEXT NOT NULL,
                status INTEGER NOT NULL,
                rc INTEGER NOT NULL DEFAULT 0,
                detail TEXT NOT NULL DEFAULT '',
                variable TEXT NOT NULL DEFAULT '',
                start_date TEXT NOT NULL DEFAULT '',
                end_date TEXT NOT NULL DEFAULT '',
                node TEXT NOT NULL DEFAULT '',
                create_date TEXT NOT NULL DEFAULT '',
                update_date TEXT NOT NULL DEFAULT '',
                PRIMARY KEY(instance_id, job_id)
            );

            CREATE INDEX IF NOT EXISTS idx_job_instance ON JOB(instance_id);
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    /// Insert a fresh instance row. Assigns `id`, `create_date` and
    /// `update_date` on the passed record.
    pub async fn insert_network(&self, result: &mut NetworkResult) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        // create_date must not trail start_date; the insert reuses it.
        let stamp = if result.start_date.is_empty() {
            clock::now_string()
        } else {
            result.start_date.clone()
        };
        result.create_date = stamp.clone();
        result.update_date = stamp;

        let mut tx = self.pool.begin().await?;
        let res = sqlx::query(
            r#"
            INSERT INTO JOBNETWORK (jobnetwork, status, detail, start_date, end_date, create_date, update_date)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&result.jobnetwork)
        .bind(result.status)
        .bind(&result.detail)
        .bind(&result.start_date)
        .bind(&result.end_date)
        .bind(&result.create_date)
        .bind(&result.update_date)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        result.id = res.last_insert_rowid();
        Ok(())
    }

    /// Update an existing instance row in place. `create_date` is preserved.
    pub async fn update_network(&self, result: &mut NetworkResult) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        result.update_date = clock::now_string();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE JOBNETWORK
            SET jobnetwork = ?, status = ?, detail = ?, start_date = ?, end_date = ?, update_date = ?
            WHERE id = ?
            "#,
        )
        .bind(&result.jobnetwork)
        .bind(result.status)
        .bind(&result.detail)
        .bind(&result.start_date)
        .bind(&result.end_date)
        .bind(&result.update_date)
        .bind(result.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Insert a fresh job row. Assigns `create_date` and `update_date`.
    pub async fn insert_job(&self, job: &mut JobResult) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        // create_date must not trail start_date; the insert reuses it.
        let stamp = if job.start_date.is_empty() {
            clock::now_string()
        } else {
            job.start_date.clone()
        };
        job.create_date = stamp.clone();
        job.update_date = stamp;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO JOB (instance_id, job_id, job_name, status, rc, detail, variable,
                             start_date, end_date, node, create_date, update_date)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.instance_id)
        .bind(&job.job_id)
        .bind(&job.job_name)
        .bind(job.status)
        .bind(job.rc)
        .bind(&job.detail)
        .bind(&job.variable)
        .bind(&job.start_date)
        .bind(&job.end_date)
        .bind(&job.node)
        .bind(&job.create_date)
        .bind(&job.update_date)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Update an existing job row in place, keyed by `(instance_id, job_id)`.
    /// `create_date` is preserved.
    pub async fn update_job(&self, job: &mut JobResult) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        job.update_date = clock::now_string();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE JOB
            SET job_name = ?, status = ?, rc = ?, detail = ?, variable = ?,
                start_date = ?, end_date = ?, node = ?, update_date = ?
            WHERE instance_id = ? AND job_id = ?
            "#,
        )
        .bind(&job.job_name)
        .bind(job.status)
        .bind(job.rc)
        .bind(&job.detail)
        .bind(&job.variable)
        .bind(&job.start_date)
        .bind(&job.end_date)
        .bind(&job.node)
        .bind(&job.update_date)
        .bind(job.instance_id)
        .bind(&job.job_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Refresh only `update_date` on a running job row; this is the
    /// heartbeat write path.
    pub async fn touch_job(&self, instance_id: i64, job_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE JOB SET update_date = ? WHERE instance_id = ? AND job_id = ?")
            .bind(clock::now_string())
            .bind(instance_id)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_network(&self, id: i64) -> Result<Option<NetworkResult>> {
        let row = sqlx::query_as::<_, NetworkResult>("SELECT * FROM JOBNETWORK WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_job(&self, instance_id: i64, job_id: &str) -> Result<Option<JobResult>> {
        let row = sqlx::query_as::<_, JobResult>(
            "SELECT * FROM JOB WHERE instance_id = ? AND job_id = ?",
        )
        .bind(instance_id)
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// All job rows of one instance, used by the rerun loader.
    pub async fn list_jobs(&self, instance_id: i64) -> Result<Vec<JobResult>> {
        let rows = sqlx::query_as::<_, JobResult>(
            "SELECT * FROM JOB WHERE instance_id = ? ORDER BY job_id",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Close the underlying pool. Idempotent.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
