//! Orchestrator facade.
//!
//! One [`Jobnet`] owns a loaded graph, the master configuration and the
//! result store connection, and exposes the four operations the outer
//! program drives: flow validation, run, rerun and teardown.

use crate::clock;
use crate::config::MasterConfig;
use crate::engine::{Engine, EngineOutcome};
use crate::error::{MasterError, Result};
use crate::graph::{validate, Graph};
use crate::store::{NetworkResult, ResultDb, Status};

pub struct Jobnet {
    graph: Graph,
    config: MasterConfig,
    db: ResultDb,
    /// Instance id of the last `run`/`rerun` on this handle.
    pub instance_id: Option<i64>,
}

impl Jobnet {
    pub async fn new(graph: Graph, config: MasterConfig) -> Result<Self> {
        let db = ResultDb::open(&config.db.db_file).await?;
        Ok(Self {
            graph,
            config,
            db,
            instance_id: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.graph.name
    }

    /// Access to the result store, e.g. for inspecting rows after a run.
    pub fn store(&self) -> &ResultDb {
        &self.db
    }

    /// Static flow validation; touches no state.
    pub fn detect_flow_error(&self) -> Result<()> {
        validate::detect_flow_error(&self.graph)
    }

    /// Execute the jobnet as a fresh instance. Returns `Ok` when the
    /// instance finished NORMAL or WARN.
    pub async fn run(&mut self) -> Result<()> {
        let mut network = NetworkResult::started(&self.graph.name, clock::now_string());
        self.db.insert_network(&mut network).await?;
        self.instance_id = Some(network.id);
        tracing::info!(
            instance_id = network.id,
            jobnetwork = %self.graph.name,
            "Jobnet instance started"
        );

        let outcome = Engine::new(&self.graph, &self.db, &self.config, network.id)
            .run()
            .await;
        self.conclude(network, outcome).await
    }

    /// Resume a previously failed instance from the point of failure.
    /// Refused without mutation when the instance already finished NORMAL
    /// or WARN.
    pub async fn rerun(&mut self, instance_id: i64) -> Result<()> {
        let mut network = self
            .db
            .get_network(instance_id)
            .await?
            .ok_or(MasterError::InstanceNotFound(instance_id))?;
        if matches!(network.status, Status::Normal | Status::Warn) {
            return Err(MasterError::RerunRefused(instance_id));
        }

        network.status = Status::Running;
        network.detail.clear();
        network.end_date.clear();
        self.db.update_network(&mut network).await?;
        self.instance_id = Some(instance_id);
        tracing::info!(
            instance_id,
            jobnetwork = %self.graph.name,
            "Jobnet instance rerun started"
        );

        let mut engine = Engine::new(&self.graph, &self.db, &self.config, instance_id);
        let outcome = match engine.prepare_rerun().await {
            Ok(()) => engine.run().await,
            Err(e) => Err(e),
        };
        self.conclude(network, outcome).await
    }

    async fn conclude(
        &self,
        mut network: NetworkResult,
        outcome: Result<EngineOutcome>,
    ) -> Result<()> {
        match outcome {
            Ok(outcome) => {
                network.status = outcome.status;
                network.detail = outcome.detail.clone();
                network.end_date = clock::now_string();
                self.db.update_network(&mut network).await?;
                tracing::info!(
                    instance_id = network.id,
                    status = %network.status,
                    "Jobnet instance finished"
                );
                if outcome.status == Status::Abnormal {
                    Err(MasterError::JobAbnormal(outcome.detail))
                } else {
                    Ok(())
                }
            }
            Err(e) => {
                // Best-effort finalization; the original error wins.
                network.status = Status::Abnormal;
                network.detail = e.to_string();
                network.end_date = clock::now_string();
                if let Err(db_err) = self.db.update_network(&mut network).await {
                    tracing::error!(
                        instance_id = network.id,
                        error = %db_err,
                        "Could not finalize instance row"
                    );
                }
                Err(e)
            }
        }
    }

    /// Release the store connection. Idempotent; safe to call at any point.
    pub async fn terminate(&self) {
        self.db.close().await;
    }
}
