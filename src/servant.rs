//! Per-job servant client.
//!
//! One TCP connection per job execution: connect, send the request frame,
//! then read heartbeat frames until the final response (or a failure). Every
//! failure mode collapses into an ABNORMAL [`JobOutcome`]; the caller never
//! sees a transport error directly.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::protocol::{Frame, JobRequest, JobResponse, STAT_ABNORMAL, STAT_NORMAL, STAT_WARN};
use crate::store::Status;

const DETAIL_CONNECTION_LOST: &str = "connection lost";
const DETAIL_PROTOCOL_ERROR: &str = "protocol error";
const DETAIL_TIMEOUT: &str = "timeout";
const FAILURE_RC: i32 = -1;

/// Terminal result of one job execution as seen by the master.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub status: Status,
    pub rc: i32,
    pub detail: String,
    pub variable: String,
    /// Servant-measured timestamps; empty when the exchange failed before a
    /// response arrived.
    pub start_date: String,
    pub end_date: String,
}

impl JobOutcome {
    fn failed(detail: &str) -> Self {
        Self {
            status: Status::Abnormal,
            rc: FAILURE_RC,
            detail: detail.to_string(),
            variable: String::new(),
            start_date: String::new(),
            end_date: String::new(),
        }
    }

    fn from_response(res: JobResponse) -> Self {
        let status = match res.stat {
            STAT_NORMAL => Status::Normal,
            STAT_WARN => Status::Warn,
            STAT_ABNORMAL => Status::Abnormal,
            _ => return Self::failed(DETAIL_PROTOCOL_ERROR),
        };
        Self {
            status,
            rc: res.rc,
            detail: res.detail,
            variable: res.var,
            start_date: res.st,
            end_date: res.et,
        }
    }
}

/// Dispatch one job to the servant at `addr` and wait for its outcome.
///
/// Each heartbeat frame pushes a unit onto `heartbeats` so the caller can
/// refresh the job row. The connection is considered dead after
/// `2 × heartbeat_span` of silence; `job_timeout` (when non-zero) caps the
/// whole exchange and tears the socket down on expiry.
pub async fn execute(
    addr: &str,
    request: &JobRequest,
    heartbeat_span: Duration,
    job_timeout: Duration,
    heartbeats: mpsc::Sender<()>,
) -> JobOutcome {
    let jid = request.jid.clone();
    tracing::info!(nid = request.nid, jid = %jid, addr, "Dispatching job");

    let exchange = run_exchange(addr, request, heartbeat_span, heartbeats);
    let outcome = if job_timeout.is_zero() {
        exchange.await
    } else {
        match tokio::time::timeout(job_timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(nid = request.nid, jid = %jid, "Job timeout exceeded, dropping connection");
                JobOutcome::failed(DETAIL_TIMEOUT)
            }
        }
    };

    tracing::info!(
        nid = request.nid,
        jid = %jid,
        status = %outcome.status,
        rc = outcome.rc,
        "Job finished"
    );
    outcome
}

async fn run_exchange(
    addr: &str,
    request: &JobRequest,
    heartbeat_span: Duration,
    heartbeats: mpsc::Sender<()>,
) -> JobOutcome {
    let stream = match TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(jid = %request.jid, addr, error = %e, "Connect failed");
            return JobOutcome::failed(DETAIL_CONNECTION_LOST);
        }
    };
    let (read_half, mut write_half) = stream.into_split();

    let line = match Frame::Request(request.clone()).encode() {
        Ok(line) => line,
        Err(e) => {
            tracing::error!(jid = %request.jid, error = %e, "Request encode failed");
            return JobOutcome::failed(DETAIL_PROTOCOL_ERROR);
        }
    };
    if let Err(e) = write_half.write_all(line.as_bytes()).await {
        tracing::warn!(jid = %request.jid, error = %e, "Request send failed");
        return JobOutcome::failed(DETAIL_CONNECTION_LOST);
    }

    // The servant must produce a frame at least every heartbeat_span; give
    // it twice that before declaring the connection dead.
    let silence_limit = heartbeat_span * 2;
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::time::timeout(silence_limit, reader.read_line(&mut line)).await;
        match read {
            Err(_) => {
                tracing::warn!(jid = %request.jid, "No heartbeat within {:?}, dropping connection", silence_limit);
                return JobOutcome::failed(DETAIL_CONNECTION_LOST);
            }
            Ok(Err(e)) => {
                tracing::warn!(jid = %request.jid, error = %e, "Read failed");
                return JobOutcome::failed(DETAIL_CONNECTION_LOST);
            }
            Ok(Ok(0)) => {
                tracing::warn!(jid = %request.jid, "Servant closed connection before response");
                return JobOutcome::failed(DETAIL_CONNECTION_LOST);
            }
            Ok(Ok(_)) => match Frame::decode(&line) {
                Ok(Frame::Heartbeat(hb)) => {
                    tracing::debug!(nid = hb.nid, jid = %hb.jid, "Heartbeat");
                    // Receiver gone means the engine is shutting down; the
                    // response read below will wind the task down.
                    let _ = heartbeats.send(()).await;
                }
                Ok(Frame::Response(res)) => return JobOutcome::from_response(res),
                Ok(Frame::Request(_)) => {
                    tracing::warn!(jid = %request.jid, "Unexpected request frame from servant");
                    return JobOutcome::failed(DETAIL_PROTOCOL_ERROR);
                }
                Err(e) => {
                    tracing::warn!(jid = %request.jid, error = %e, "Malformed frame");
                    return JobOutcome::failed(DETAIL_PROTOCOL_ERROR);
                }
            },
        }
    }
}
