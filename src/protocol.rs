use serde::{Deserialize, Serialize};

use crate::error::{MasterError, Result};

/// `stat` codes carried in a response frame.
pub const STAT_NORMAL: i32 = 1;
pub const STAT_WARN: i32 = 2;
pub const STAT_ABNORMAL: i32 = 9;

/// One frame of the master/servant wire protocol: a single JSON object,
/// newline-terminated, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Request(JobRequest),
    Heartbeat(Heartbeat),
    Response(JobResponse),
}

/// Sent by the master immediately after connect, once per job execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Jobnet instance id.
    pub nid: i64,
    /// Job id within the jobnet definition.
    pub jid: String,
    /// Script path resolved on the servant side.
    pub path: String,
    pub param: String,
    pub env: String,
    pub workspace: String,
    pub warnrc: i32,
    pub warnpattern: String,
    pub errrc: i32,
    pub errpattern: String,
    /// Wall clock cap in seconds; 0 disables.
    pub timeout: u64,
}

/// Keep-alive from the servant while the job is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub nid: i64,
    pub jid: String,
}

/// Terminal frame; exactly one per successful exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResponse {
    pub nid: i64,
    pub jid: String,
    pub rc: i32,
    /// 1=NORMAL, 2=WARN, 9=ABNORMAL.
    pub stat: i32,
    pub detail: String,
    /// Job-emitted output variable payload.
    pub var: String,
    /// Job start/end timestamps measured on the servant.
    pub st: String,
    pub et: String,
}

impl Frame {
    /// Serialize to one wire line, including the trailing newline.
    pub fn encode(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| MasterError::Wire(format!("encode failed: {}", e)))?;
        line.push('\n');
        Ok(line)
    }

    /// Parse one received line. Malformed JSON and unknown `type` values are
    /// both wire errors, never a panic.
    pub fn decode(line: &str) -> Result<Frame> {
        serde_json::from_str(line.trim_end())
            .map_err(|e| MasterError::Wire(format!("bad frame: {}", e)))
    }
}
