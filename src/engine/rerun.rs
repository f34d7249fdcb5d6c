//! Rerun state loader.
//!
//! Rebuilds the live node-state map of a prior instance from its persisted
//! JOB rows, so `Engine::run` resumes from the first non-terminal node.
//! Node identity is the stable `job_id` from the jobnet definition.

use crate::engine::{Engine, FlowCtx, NodeState};
use crate::error::Result;
use crate::store::Status;

impl Engine<'_> {
    /// Seed states from the rows of the instance this engine was built for.
    ///
    /// Terminal rows become the matching DONE_* state and are never
    /// re-dispatched; their original timestamps stay untouched. A RUNNING row
    /// means the previous master died with the job in flight: the node stays
    /// on the traversal path and is re-dispatched, updating the existing row
    /// in place. Nodes without a row are walked normally.
    pub async fn prepare_rerun(&mut self) -> Result<()> {
        let rows = self.db.list_jobs(self.instance_id).await?;
        for row in rows {
            let Some(id) = self.graph.job_node(&row.job_id) else {
                tracing::warn!(
                    instance_id = self.instance_id,
                    job_id = %row.job_id,
                    "Stored job has no node in the current definition, ignoring"
                );
                continue;
            };
            self.has_row[id.0] = true;
            self.ctx[id.0] = FlowCtx {
                rc: row.rc,
                variable: row.variable.clone(),
            };
            match row.status {
                Status::Normal => self.states[id.0] = NodeState::DoneOk,
                Status::Warn => {
                    self.states[id.0] = NodeState::DoneWarn;
                    self.worst = Status::worse_of(self.worst, Status::Warn);
                }
                Status::Abnormal => self.states[id.0] = NodeState::DoneAbn,
                Status::Running => {
                    tracing::info!(
                        instance_id = self.instance_id,
                        job_id = %row.job_id,
                        "Job was in flight when the previous master stopped; re-dispatching"
                    );
                }
            }
        }
        Ok(())
    }
}
