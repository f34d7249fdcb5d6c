use thiserror::Error;

#[derive(Error, Debug)]
pub enum MasterError {
    #[error("Flow error: {0}")]
    Flow(String),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Wire error: {0}")]
    Wire(String),

    #[error("Job ended abnormally: {0}")]
    JobAbnormal(String),

    #[error("Instance {0} already finished normally, rerun refused")]
    RerunRefused(i64),

    #[error("Instance not found: {0}")]
    InstanceNotFound(i64),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, MasterError>;
