//! Typed records for the two result tables.
//!
//! Column names and the integer status encoding are load-bearing: rerun
//! reads rows written by earlier master invocations.

pub mod db;

pub use db::ResultDb;

/// Persisted status of a jobnet instance or a single job.
///
/// Encoding: 1=NORMAL, 2=WARN, 3=RUNNING, 9=ABNORMAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[repr(i32)]
pub enum Status {
    Normal = 1,
    Warn = 2,
    Running = 3,
    Abnormal = 9,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Running)
    }

    /// Severity for the terminal roll-up: ABNORMAL > WARN > NORMAL.
    fn severity(&self) -> u8 {
        match self {
            Status::Normal => 0,
            Status::Warn => 1,
            Status::Abnormal => 2,
            Status::Running => 0,
        }
    }

    pub fn worse_of(a: Status, b: Status) -> Status {
        if b.severity() > a.severity() {
            b
        } else {
            a
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Normal => write!(f, "NORMAL"),
            Status::Warn => write!(f, "WARN"),
            Status::Running => write!(f, "RUNNING"),
            Status::Abnormal => write!(f, "ABNORMAL"),
        }
    }
}

/// One row per jobnet instance (table `JOBNETWORK`).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NetworkResult {
    pub id: i64,
    pub jobnetwork: String,
    pub status: Status,
    pub detail: String,
    pub start_date: String,
    pub end_date: String,
    pub create_date: String,
    pub update_date: String,
}

impl NetworkResult {
    /// Fresh RUNNING row; the id is assigned by the store on insert.
    pub fn started(jobnetwork: &str, start_date: String) -> Self {
        Self {
            id: 0,
            jobnetwork: jobnetwork.to_string(),
            status: Status::Running,
            detail: String::new(),
            start_date,
            end_date: String::new(),
            create_date: String::new(),
            update_date: String::new(),
        }
    }
}

/// One row per job execution within an instance (table `JOB`).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobResult {
    pub instance_id: i64,
    pub job_id: String,
    pub job_name: String,
    pub status: Status,
    pub rc: i32,
    pub detail: String,
    pub variable: String,
    pub start_date: String,
    pub end_date: String,
    /// Servant endpoint actually contacted, `host:port`.
    pub node: String,
    pub create_date: String,
    pub update_date: String,
}

impl JobResult {
    pub fn started(instance_id: i64, job_id: &str, job_name: &str, node: String, start_date: String) -> Self {
        Self {
            instance_id,
            job_id: job_id.to_string(),
            job_name: job_name.to_string(),
            status: Status::Running,
            rc: 0,
            detail: String::new(),
            variable: String::new(),
            start_date,
            end_date: String::new(),
            node,
            create_date: String::new(),
            update_date: String::new(),
        }
    }
}
