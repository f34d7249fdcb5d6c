use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use jobflow::config::MasterConfig;
use jobflow::error::{MasterError, Result};
use jobflow::graph::load;
use jobflow::jobnet::Jobnet;
use jobflow::store::{ResultDb, Status};

#[derive(Parser, Debug)]
#[command(name = "jobflow")]
#[command(about = "Batch jobnet master: runs a job-flow graph against remote servants")]
#[command(version)]
struct Args {
    /// Jobnet name, loaded as <network_dir>/<name>.json
    #[arg(short = 'n', long)]
    network: Option<String>,

    /// Actually start the jobnet (without this the flow is only validated)
    #[arg(short = 's', long)]
    start: bool,

    /// Rerun a previously failed instance from the point of failure
    #[arg(short = 'r', long, value_name = "INSTANCE_ID")]
    rerun: Option<i64>,

    /// Path to the master configuration file
    #[arg(short = 'c', long, default_value = "master.toml")]
    config: PathBuf,
}

const RC_OK: i32 = 0;
const RC_ERROR: i32 = 1;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    std::process::exit(run_master(args).await);
}

async fn run_master(args: Args) -> i32 {
    if args.network.is_some() && args.rerun.is_some() {
        eprintln!("jobflow: cannot use both --network and --rerun");
        return RC_ERROR;
    }
    if args.network.is_none() && args.rerun.is_none() {
        eprintln!("jobflow: either --network or --rerun is required");
        return RC_ERROR;
    }

    let config = match MasterConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("jobflow: {}", e);
            return RC_ERROR;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log.output_level.clone())),
        )
        .init();
    tracing::info!(pid = std::process::id(), "Master started");

    // A rerun recovers the jobnet name from the stored instance; it may
    // also turn out there is nothing to do.
    let (network_name, start) = match args.rerun {
        Some(instance_id) => match prior_network_name(&config, instance_id).await {
            Ok(Some(name)) => (name, true),
            Ok(None) => return RC_OK,
            Err(e) => {
                tracing::error!(instance_id, error = %e, "Cannot load prior instance");
                return RC_ERROR;
            }
        },
        None => (
            args.network.clone().unwrap_or_default(),
            args.start,
        ),
    };

    let definition = PathBuf::from(&config.dir.network_dir).join(format!("{}.json", network_name));
    let graph = match load::load_file(&definition) {
        Ok(graph) => graph,
        Err(e) => {
            tracing::error!(path = %definition.display(), error = %e, "Cannot load jobnet definition");
            return RC_ERROR;
        }
    };

    let mut jobnet = match Jobnet::new(graph, config).await {
        Ok(jobnet) => jobnet,
        Err(e) => {
            tracing::error!(error = %e, "Cannot open result store");
            return RC_ERROR;
        }
    };

    if let Err(e) = jobnet.detect_flow_error() {
        tracing::error!(network = %network_name, error = %e, "Flow validation failed");
        jobnet.terminate().await;
        return RC_ERROR;
    }

    if !start {
        tracing::info!(network = %network_name, "Flow check passed");
        jobnet.terminate().await;
        return RC_OK;
    }

    let result = match args.rerun {
        Some(instance_id) => jobnet.rerun(instance_id).await,
        None => jobnet.run().await,
    };
    let instance_id = jobnet.instance_id;
    jobnet.terminate().await;

    match result {
        Ok(()) => {
            tracing::info!(network = %network_name, instance_id = ?instance_id, "Jobnet ended normally");
            RC_OK
        }
        Err(MasterError::RerunRefused(id)) => {
            tracing::info!(instance_id = id, "Instance already finished successfully, nothing to rerun");
            RC_OK
        }
        Err(e) => {
            tracing::error!(network = %network_name, instance_id = ?instance_id, error = %e, "Jobnet ended abnormally");
            RC_ERROR
        }
    }
}

/// Load the stored NetworkResult for a rerun and return its jobnet name.
/// `Ok(None)` means the instance already finished NORMAL/WARN and there is
/// nothing to rerun.
async fn prior_network_name(config: &MasterConfig, instance_id: i64) -> Result<Option<String>> {
    let db = ResultDb::open(&config.db.db_file).await?;
    let network = db.get_network(instance_id).await;
    db.close().await;
    let network = network?.ok_or(MasterError::InstanceNotFound(instance_id))?;

    if matches!(network.status, Status::Normal | Status::Warn) {
        tracing::info!(
            instance_id,
            status = %network.status,
            "Instance already finished successfully, nothing to rerun"
        );
        return Ok(None);
    }
    Ok(Some(network.jobnetwork))
}
