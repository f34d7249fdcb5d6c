use std::path::Path;

use serde::Deserialize;

use crate::error::{MasterError, Result};

const DEFAULT_SERVANT_NODE: &str = "localhost";
const DEFAULT_SERVANT_PORT: u16 = 2015;
const DEFAULT_HEARTBEAT_SPAN_SEC: u64 = 30;
const DEFAULT_MULTI_PROC: u32 = 20;
const DEFAULT_TIMEOUT_SEC: u64 = 0;
const DEFAULT_DB_FILE: &str = "data/jobflow.db";
const DEFAULT_NETWORK_DIR: &str = "networks";
const DEFAULT_OUTPUT_LEVEL: &str = "info";

/// Master configuration, loaded from a TOML file.
///
/// Section and key names follow the original master.toml layout so existing
/// deployments can be carried over.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub job: JobSection,
    pub db: DbSection,
    pub dir: DirSection,
    pub log: LogSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobSection {
    /// Servant host used when a job does not name its own.
    pub default_node: String,
    /// Servant port used when a job does not name its own.
    pub default_port: u16,
    /// Expected heartbeat interval; the client gives up after twice this.
    pub heartbeat_span_sec: u64,
    /// Advisory concurrency cap, enforced on the servant side.
    pub multi_proc: u32,
    /// Per-job wall clock cap in seconds; 0 disables.
    pub timeout_sec: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbSection {
    pub db_file: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DirSection {
    pub network_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub output_level: String,
}

impl Default for JobSection {
    fn default() -> Self {
        Self {
            default_node: DEFAULT_SERVANT_NODE.to_string(),
            default_port: DEFAULT_SERVANT_PORT,
            heartbeat_span_sec: DEFAULT_HEARTBEAT_SPAN_SEC,
            multi_proc: DEFAULT_MULTI_PROC,
            timeout_sec: DEFAULT_TIMEOUT_SEC,
        }
    }
}

impl Default for DbSection {
    fn default() -> Self {
        Self {
            db_file: DEFAULT_DB_FILE.to_string(),
        }
    }
}

impl Default for DirSection {
    fn default() -> Self {
        Self {
            network_dir: DEFAULT_NETWORK_DIR.to_string(),
        }
    }
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            output_level: DEFAULT_OUTPUT_LEVEL.to_string(),
        }
    }
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            job: JobSection::default(),
            db: DbSection::default(),
            dir: DirSection::default(),
            log: LogSection::default(),
        }
    }
}

impl MasterConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MasterError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: MasterConfig = toml::from_str(&content).map_err(|e| {
            MasterError::Config(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values before any state is touched.
    pub fn validate(&self) -> Result<()> {
        if self.job.heartbeat_span_sec == 0 {
            return Err(MasterError::Config(
                "job.heartbeat_span_sec must be greater than 0".to_string(),
            ));
        }
        if self.job.multi_proc == 0 {
            return Err(MasterError::Config(
                "job.multi_proc must be greater than 0".to_string(),
            ));
        }
        if self.job.default_port == 0 {
            return Err(MasterError::Config(
                "job.default_port must be greater than 0".to_string(),
            ));
        }
        if self.db.db_file.is_empty() {
            return Err(MasterError::Config("db.db_file must not be empty".to_string()));
        }
        Ok(())
    }
}
