//! Jobnet definition loader.
//!
//! Definitions are JSON files: a node list and a flow (edge) list, referring
//! to nodes by their stable string ids. The loader only builds the graph
//! shape; validation is a separate pass ([`super::validate`]).

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{MasterError, Result};
use crate::graph::{Condition, Graph, GatewayKind, JobSpec, NodeId, NodeKind};

#[derive(Debug, Deserialize)]
struct NetworkDef {
    name: String,
    nodes: Vec<NodeDef>,
    flows: Vec<FlowDef>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum NodeDef {
    Start {
        id: String,
    },
    End {
        id: String,
    },
    Job {
        id: String,
        #[serde(default)]
        name: String,
        path: String,
        #[serde(default)]
        param: String,
        #[serde(default)]
        env: String,
        #[serde(default)]
        workspace: String,
        /// Servant host; the master config default applies when absent.
        #[serde(default)]
        node: Option<String>,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        warn_rc: i32,
        #[serde(default)]
        warn_pattern: String,
        #[serde(default)]
        err_rc: i32,
        #[serde(default)]
        err_pattern: String,
        #[serde(default)]
        timeout_sec: Option<u64>,
    },
    ParallelSplit {
        id: String,
    },
    ParallelJoin {
        id: String,
    },
    ExclusiveSplit {
        id: String,
    },
    ExclusiveJoin {
        id: String,
    },
}

impl NodeDef {
    fn id(&self) -> &str {
        match self {
            NodeDef::Start { id }
            | NodeDef::End { id }
            | NodeDef::ParallelSplit { id }
            | NodeDef::ParallelJoin { id }
            | NodeDef::ExclusiveSplit { id }
            | NodeDef::ExclusiveJoin { id } => id,
            NodeDef::Job { id, .. } => id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FlowDef {
    from: String,
    to: String,
    #[serde(default)]
    condition: Option<String>,
}

pub fn load_file(path: impl AsRef<Path>) -> Result<Graph> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        MasterError::Flow(format!("cannot read jobnet definition {}: {}", path.display(), e))
    })?;
    parse_str(&content)
}

pub fn parse_str(content: &str) -> Result<Graph> {
    let def: NetworkDef = serde_json::from_str(content)
        .map_err(|e| MasterError::Flow(format!("invalid jobnet definition: {}", e)))?;

    let mut graph = Graph::new(&def.name);
    let mut by_id: HashMap<String, NodeId> = HashMap::new();

    for node in &def.nodes {
        if by_id.contains_key(node.id()) {
            return Err(MasterError::Flow(format!("duplicate node id {:?}", node.id())));
        }
        let kind = match node {
            NodeDef::Start { .. } => NodeKind::Start,
            NodeDef::End { .. } => NodeKind::End,
            NodeDef::ParallelSplit { .. } => NodeKind::Gateway(GatewayKind::ParallelSplit),
            NodeDef::ParallelJoin { .. } => NodeKind::Gateway(GatewayKind::ParallelJoin),
            NodeDef::ExclusiveSplit { .. } => NodeKind::Gateway(GatewayKind::ExclusiveSplit),
            NodeDef::ExclusiveJoin { .. } => NodeKind::Gateway(GatewayKind::ExclusiveJoin),
            NodeDef::Job {
                id,
                name,
                path,
                param,
                env,
                workspace,
                node,
                port,
                warn_rc,
                warn_pattern,
                err_rc,
                err_pattern,
                timeout_sec,
            } => NodeKind::Job(Box::new(JobSpec {
                job_id: id.clone(),
                job_name: if name.is_empty() { id.clone() } else { name.clone() },
                node: node.clone(),
                port: *port,
                path: path.clone(),
                param: param.clone(),
                env: env.clone(),
                workspace: workspace.clone(),
                warn_rc: *warn_rc,
                warn_pattern: warn_pattern.clone(),
                err_rc: *err_rc,
                err_pattern: err_pattern.clone(),
                timeout_sec: *timeout_sec,
            })),
        };
        let idx = graph.add_node(kind);
        by_id.insert(node.id().to_string(), idx);
    }

    for flow in &def.flows {
        let from = *by_id
            .get(&flow.from)
            .ok_or_else(|| MasterError::Flow(format!("flow from unknown node {:?}", flow.from)))?;
        let to = *by_id
            .get(&flow.to)
            .ok_or_else(|| MasterError::Flow(format!("flow to unknown node {:?}", flow.to)))?;
        match &flow.condition {
            Some(expr) => graph.connect_when(from, to, Condition::parse(expr)?),
            None => graph.connect(from, to),
        }
    }

    Ok(graph)
}
