//! Jobnet execution engine.
//!
//! One engine instance drives one jobnet instance. The engine loop is the
//! single writer of the per-node state map and of the result store; job
//! tasks communicate with it exclusively through the completion channel.

pub mod rerun;

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::clock;
use crate::config::MasterConfig;
use crate::error::{MasterError, Result};
use crate::graph::{GatewayKind, Graph, JobSpec, NodeId, NodeKind};
use crate::protocol::JobRequest;
use crate::servant::{self, JobOutcome};
use crate::store::{JobResult, ResultDb, Status};

const COMPLETION_CHANNEL_CAPACITY: usize = 64;

/// Runtime state of one graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    DoneOk,
    DoneWarn,
    DoneAbn,
    Skipped,
}

impl NodeState {
    pub fn is_done(&self) -> bool {
        matches!(self, NodeState::DoneOk | NodeState::DoneWarn | NodeState::DoneAbn)
    }

    /// Done or skipped; nothing more will happen to this node.
    pub fn is_settled(&self) -> bool {
        self.is_done() || *self == NodeState::Skipped
    }
}

/// `(rc, variable)` pair a node was satisfied with. Exclusive-split
/// conditions evaluate against the context the split inherited.
#[derive(Debug, Clone, Default)]
struct FlowCtx {
    rc: i32,
    variable: String,
}

/// Events flowing from job tasks to the engine loop.
enum Completion {
    Heartbeat(NodeId),
    Finished(NodeId, JobOutcome),
}

/// Terminal verdict of a run, used to finalize the NetworkResult row.
#[derive(Debug)]
pub struct EngineOutcome {
    pub status: Status,
    pub detail: String,
}

pub struct Engine<'a> {
    graph: &'a Graph,
    db: &'a ResultDb,
    config: &'a MasterConfig,
    instance_id: i64,
    states: Vec<NodeState>,
    ctx: Vec<FlowCtx>,
    /// Whether a JOB row exists for this node; decides insert vs update on
    /// dispatch. Seeded by the rerun loader.
    has_row: Vec<bool>,
    /// Live row of each RUNNING job, finalized on completion.
    rows: Vec<Option<JobResult>>,
    ready: VecDeque<NodeId>,
    outstanding: usize,
    /// Worst terminal status seen so far (skipped branches and recovered
    /// failures do not contribute).
    worst: Status,
    failure: Option<String>,
    fatal: CancellationToken,
    completions_tx: mpsc::Sender<Completion>,
    completions_rx: mpsc::Receiver<Completion>,
}

impl<'a> Engine<'a> {
    pub fn new(
        graph: &'a Graph,
        db: &'a ResultDb,
        config: &'a MasterConfig,
        instance_id: i64,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::channel(COMPLETION_CHANNEL_CAPACITY);
        let n = graph.len();
        Self {
            graph,
            db,
            config,
            instance_id,
            states: vec![NodeState::Pending; n],
            ctx: vec![FlowCtx::default(); n],
            has_row: vec![false; n],
            rows: vec![None; n],
            ready: VecDeque::new(),
            outstanding: 0,
            worst: Status::Normal,
            failure: None,
            fatal: CancellationToken::new(),
            completions_tx,
            completions_rx,
        }
    }

    /// Drive the instance to its terminal status.
    pub async fn run(&mut self) -> Result<EngineOutcome> {
        let start = self
            .graph
            .start()
            .ok_or_else(|| MasterError::Internal("jobnet has no start node".to_string()))?;
        let end = self
            .graph
            .end()
            .ok_or_else(|| MasterError::Internal("jobnet has no end node".to_string()))?;

        // On rerun, nodes seeded from prior rows propagate before the walk
        // begins; the traversal then only reaches the unfinished frontier.
        for id in self.graph.ids() {
            if self.states[id.0].is_done() {
                self.after_done(id)?;
            }
        }
        if self.states[start.0] == NodeState::Pending {
            self.make_ready(start);
        }

        loop {
            while let Some(id) = self.ready.pop_front() {
                self.activate(id).await?;
            }

            if self.states[end.0] == NodeState::DoneOk {
                break;
            }
            if self.outstanding == 0 {
                if self.fatal.is_cancelled() {
                    break;
                }
                return Err(MasterError::Internal(
                    "jobnet stalled: no runnable nodes and end not reached".to_string(),
                ));
            }

            match self.completions_rx.recv().await {
                Some(Completion::Heartbeat(id)) => self.on_heartbeat(id).await?,
                Some(Completion::Finished(id, outcome)) => self.on_finished(id, outcome).await?,
                None => {
                    return Err(MasterError::Internal(
                        "completion channel closed while jobs outstanding".to_string(),
                    ))
                }
            }
        }

        if self.fatal.is_cancelled() {
            Ok(EngineOutcome {
                status: Status::Abnormal,
                detail: self.failure.clone().unwrap_or_default(),
            })
        } else {
            Ok(EngineOutcome {
                status: self.worst,
                detail: String::new(),
            })
        }
    }

    fn make_ready(&mut self, id: NodeId) {
        self.states[id.0] = NodeState::Ready;
        self.ready.push_back(id);
    }

    async fn activate(&mut self, id: NodeId) -> Result<()> {
        // After a fatal error nothing new starts; queued nodes drain unrun.
        if self.fatal.is_cancelled() {
            return Ok(());
        }
        match &self.graph.node(id).kind {
            NodeKind::Start => {
                self.states[id.0] = NodeState::DoneOk;
                self.after_done(id)?;
            }
            NodeKind::End => {
                self.states[id.0] = NodeState::DoneOk;
                tracing::debug!(instance_id = self.instance_id, "End node reached");
            }
            NodeKind::Gateway(kind) => {
                let kind = *kind;
                self.states[id.0] = NodeState::DoneOk;
                self.fire_gateway(id, kind)?;
            }
            NodeKind::Job(spec) => {
                let spec = spec.clone();
                self.dispatch_job(id, &spec).await?;
            }
        }
        Ok(())
    }

    /// Gateways complete atomically on activation; this routes their
    /// successors.
    fn fire_gateway(&mut self, id: NodeId, kind: GatewayKind) -> Result<()> {
        match kind {
            GatewayKind::ParallelSplit => {
                for &next in &self.graph.node(id).succs {
                    self.satisfy(next, id);
                }
            }
            GatewayKind::ExclusiveSplit => {
                let node = self.graph.node(id);
                let rc = self.ctx[id.0].rc;
                let variable = self.ctx[id.0].variable.clone();
                let mut taken = None;
                for (edge, &next) in node.succs.iter().enumerate() {
                    let matches = taken.is_none()
                        && node.conditions[edge]
                            .as_ref()
                            .is_some_and(|c| c.eval(rc, &variable));
                    if matches {
                        taken = Some(next);
                    } else {
                        self.mark_skipped(next);
                    }
                }
                match taken {
                    Some(next) => {
                        tracing::debug!(
                            instance_id = self.instance_id,
                            gateway = %id,
                            taken = %next,
                            rc,
                            "Exclusive split routed"
                        );
                        self.satisfy(next, id);
                    }
                    None => {
                        self.fail(format!(
                            "no branch condition matched at exclusive split {} (rc={}, var={:?})",
                            id, rc, variable
                        ));
                    }
                }
            }
            GatewayKind::ParallelJoin | GatewayKind::ExclusiveJoin => {
                for &next in &self.graph.node(id).succs {
                    self.satisfy(next, id);
                }
            }
        }
        Ok(())
    }

    /// The edge `from → id` is taken and `from` is done; move `id` towards
    /// READY per its join rule. Late arrivals at an already-fired node are
    /// ignored.
    fn satisfy(&mut self, id: NodeId, from: NodeId) {
        if self.states[id.0] != NodeState::Pending {
            return;
        }
        match self.graph.node(id).kind {
            NodeKind::Gateway(GatewayKind::ParallelJoin) => {
                let all_settled = self
                    .graph
                    .node(id)
                    .preds
                    .iter()
                    .all(|p| self.states[p.0].is_settled());
                if all_settled {
                    self.ctx[id.0] = self.ctx[from.0].clone();
                    self.make_ready(id);
                }
            }
            // Exclusive join: first terminal predecessor wins.
            _ => {
                self.ctx[id.0] = self.ctx[from.0].clone();
                self.make_ready(id);
            }
        }
    }

    /// Cascade SKIPPED down an untaken branch. The cascade stops at a join
    /// that can still be reached by a live branch; a join skips only when
    /// every incoming branch skipped.
    fn mark_skipped(&mut self, id: NodeId) {
        if self.states[id.0] != NodeState::Pending {
            return;
        }
        if let NodeKind::Gateway(kind) = self.graph.node(id).kind {
            if kind.is_join() {
                let preds = &self.graph.node(id).preds;
                if preds.iter().all(|p| self.states[p.0] == NodeState::Skipped) {
                    self.states[id.0] = NodeState::Skipped;
                    for &next in &self.graph.node(id).succs {
                        self.mark_skipped(next);
                    }
                } else if preds.iter().all(|p| self.states[p.0].is_settled()) {
                    // A done branch arrived earlier but the join was still
                    // waiting on this one.
                    if let Some(&done) = preds.iter().find(|p| self.states[p.0].is_done()) {
                        self.ctx[id.0] = self.ctx[done.0].clone();
                        self.make_ready(id);
                    }
                }
                return;
            }
        }
        self.states[id.0] = NodeState::Skipped;
        tracing::debug!(
            instance_id = self.instance_id,
            node = %id,
            kind = %self.graph.node(id).kind.describe(),
            "Branch not taken, node skipped"
        );
        for &next in &self.graph.node(id).succs {
            self.mark_skipped(next);
        }
    }

    /// Propagation from a node that reached DONE_*: abnormal handling first,
    /// then successor readiness.
    fn after_done(&mut self, id: NodeId) -> Result<()> {
        if self.states[id.0] == NodeState::DoneAbn {
            if self.recovers_downstream(id) {
                tracing::warn!(
                    instance_id = self.instance_id,
                    node = %id,
                    "Job ended abnormally; error branch available, continuing"
                );
            } else {
                let detail = match self.graph.node(id).kind {
                    NodeKind::Job(ref spec) => format!(
                        "job {} ended abnormally (rc={})",
                        spec.job_id, self.ctx[id.0].rc
                    ),
                    _ => format!("node {} ended abnormally", id),
                };
                self.fail(detail);
                return Ok(());
            }
        }
        for &next in &self.graph.node(id).succs {
            self.satisfy(next, id);
        }
        Ok(())
    }

    /// An abnormal job is recoverable when its immediate successor path (only
    /// exclusive joins may intervene) reaches an exclusive split with a
    /// branch condition matching the failure context.
    fn recovers_downstream(&self, id: NodeId) -> bool {
        let ctx = &self.ctx[id.0];
        let mut cur = match self.graph.node(id).succs.first() {
            Some(&next) => next,
            None => return false,
        };
        loop {
            match self.graph.node(cur).kind {
                NodeKind::Gateway(GatewayKind::ExclusiveSplit) => {
                    return self
                        .graph
                        .node(cur)
                        .conditions
                        .iter()
                        .flatten()
                        .any(|c| c.eval(ctx.rc, &ctx.variable));
                }
                NodeKind::Gateway(GatewayKind::ExclusiveJoin) => {
                    cur = self.graph.node(cur).succs[0];
                }
                _ => return false,
            }
        }
    }

    fn fail(&mut self, detail: String) {
        tracing::error!(
            instance_id = self.instance_id,
            detail = %detail,
            "Fatal error; new dispatch stopped, outstanding jobs drain"
        );
        if self.failure.is_none() {
            self.failure = Some(detail);
        }
        self.worst = Status::Abnormal;
        self.fatal.cancel();
    }

    async fn dispatch_job(&mut self, id: NodeId, spec: &JobSpec) -> Result<()> {
        let host = spec.node.as_deref().unwrap_or(&self.config.job.default_node);
        let port = spec.port.unwrap_or(self.config.job.default_port);
        let endpoint = format!("{}:{}", host, port);

        let mut row = JobResult::started(
            self.instance_id,
            &spec.job_id,
            &spec.job_name,
            endpoint.clone(),
            clock::now_string(),
        );
        if self.has_row[id.0] {
            // Rerun of a node with a prior row: update in place, the
            // original create_date survives.
            self.db.update_job(&mut row).await?;
        } else {
            self.db.insert_job(&mut row).await?;
            self.has_row[id.0] = true;
        }
        self.rows[id.0] = Some(row);
        self.states[id.0] = NodeState::Running;
        self.outstanding += 1;

        let request = JobRequest {
            nid: self.instance_id,
            jid: spec.job_id.clone(),
            path: spec.path.clone(),
            param: spec.param.clone(),
            env: spec.env.clone(),
            workspace: spec.workspace.clone(),
            warnrc: spec.warn_rc,
            warnpattern: spec.warn_pattern.clone(),
            errrc: spec.err_rc,
            errpattern: spec.err_pattern.clone(),
            timeout: spec.timeout_sec.unwrap_or(self.config.job.timeout_sec),
        };
        let heartbeat_span = Duration::from_secs(self.config.job.heartbeat_span_sec);
        let job_timeout = Duration::from_secs(request.timeout);

        // Heartbeats take an extra hop so the client stays a plain
        // sender-of-units, like any other keepalive source.
        let (hb_tx, mut hb_rx) = mpsc::channel::<()>(4);
        let hb_completions = self.completions_tx.clone();
        tokio::spawn(async move {
            while hb_rx.recv().await.is_some() {
                if hb_completions.send(Completion::Heartbeat(id)).await.is_err() {
                    break;
                }
            }
        });

        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let outcome =
                servant::execute(&endpoint, &request, heartbeat_span, job_timeout, hb_tx).await;
            let _ = completions.send(Completion::Finished(id, outcome)).await;
        });
        Ok(())
    }

    async fn on_heartbeat(&mut self, id: NodeId) -> Result<()> {
        // A heartbeat can trail the final response; never touch a row that
        // already closed.
        if self.states[id.0] != NodeState::Running {
            return Ok(());
        }
        let spec = self
            .graph
            .job_spec(id)
            .ok_or_else(|| MasterError::Internal(format!("heartbeat for non-job node {}", id)))?;
        self.db.touch_job(self.instance_id, &spec.job_id).await?;
        Ok(())
    }

    async fn on_finished(&mut self, id: NodeId, outcome: JobOutcome) -> Result<()> {
        if self.states[id.0] != NodeState::Running {
            return Err(MasterError::Internal(format!(
                "completion event for node {} which is not running",
                id
            )));
        }
        self.outstanding -= 1;

        let mut row = self.rows[id.0]
            .take()
            .ok_or_else(|| MasterError::Internal(format!("no live row for node {}", id)))?;
        row.status = outcome.status;
        row.rc = outcome.rc;
        row.detail = outcome.detail.clone();
        row.variable = outcome.variable.clone();
        if !outcome.start_date.is_empty() {
            row.start_date = outcome.start_date.clone();
        }
        row.end_date = if outcome.end_date.is_empty() {
            clock::now_string()
        } else {
            outcome.end_date.clone()
        };
        self.db.update_job(&mut row).await?;

        self.states[id.0] = match outcome.status {
            Status::Normal => NodeState::DoneOk,
            Status::Warn => NodeState::DoneWarn,
            Status::Abnormal => NodeState::DoneAbn,
            Status::Running => {
                return Err(MasterError::Internal(format!(
                    "non-terminal outcome for node {}",
                    id
                )))
            }
        };
        self.ctx[id.0] = FlowCtx {
            rc: outcome.rc,
            variable: outcome.variable,
        };
        if outcome.status == Status::Warn {
            self.worst = Status::worse_of(self.worst, Status::Warn);
        }

        // In drain mode results are still recorded, but nothing propagates.
        if self.fatal.is_cancelled() {
            return Ok(());
        }
        self.after_done(id)
    }
}
