//! In-memory jobnet graph.
//!
//! Nodes live in an arena owned by [`Graph`]; edges are index pairs. Runtime
//! state is kept out of the graph entirely (the engine holds it in parallel
//! arrays keyed by [`NodeId`]), so the graph is read-only after load.

pub mod condition;
pub mod load;
pub mod validate;

pub use condition::Condition;

/// Index of a node in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayKind {
    ParallelSplit,
    ParallelJoin,
    ExclusiveSplit,
    ExclusiveJoin,
}

impl GatewayKind {
    pub fn is_split(&self) -> bool {
        matches!(self, GatewayKind::ParallelSplit | GatewayKind::ExclusiveSplit)
    }

    pub fn is_join(&self) -> bool {
        !self.is_split()
    }

    /// The join kind that closes a split of this kind.
    pub fn matching_join(&self) -> Option<GatewayKind> {
        match self {
            GatewayKind::ParallelSplit => Some(GatewayKind::ParallelJoin),
            GatewayKind::ExclusiveSplit => Some(GatewayKind::ExclusiveJoin),
            _ => None,
        }
    }
}

impl std::fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayKind::ParallelSplit => write!(f, "parallel split"),
            GatewayKind::ParallelJoin => write!(f, "parallel join"),
            GatewayKind::ExclusiveSplit => write!(f, "exclusive split"),
            GatewayKind::ExclusiveJoin => write!(f, "exclusive join"),
        }
    }
}

/// Everything the master needs to dispatch one job, carried from the jobnet
/// definition. Endpoint and timeout fall back to the master config when
/// absent.
#[derive(Debug, Clone, Default)]
pub struct JobSpec {
    /// Stable identifier; also the `JOB.job_id` column and the rerun key.
    pub job_id: String,
    pub job_name: String,
    /// Servant host override.
    pub node: Option<String>,
    pub port: Option<u16>,
    pub path: String,
    pub param: String,
    pub env: String,
    pub workspace: String,
    pub warn_rc: i32,
    pub warn_pattern: String,
    pub err_rc: i32,
    pub err_pattern: String,
    pub timeout_sec: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Start,
    End,
    Job(Box<JobSpec>),
    Gateway(GatewayKind),
}

impl NodeKind {
    pub fn describe(&self) -> String {
        match self {
            NodeKind::Start => "start".to_string(),
            NodeKind::End => "end".to_string(),
            NodeKind::Job(spec) => format!("job {}", spec.job_id),
            NodeKind::Gateway(kind) => kind.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub preds: Vec<NodeId>,
    pub succs: Vec<NodeId>,
    /// Parallel to `succs`; only exclusive-split edges carry `Some`.
    pub conditions: Vec<Option<Condition>>,
}

#[derive(Debug, Clone)]
pub struct Graph {
    pub name: String,
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            preds: Vec::new(),
            succs: Vec::new(),
            conditions: Vec::new(),
        });
        id
    }

    pub fn connect(&mut self, from: NodeId, to: NodeId) {
        self.connect_edge(from, to, None);
    }

    pub fn connect_when(&mut self, from: NodeId, to: NodeId, condition: Condition) {
        self.connect_edge(from, to, Some(condition));
    }

    fn connect_edge(&mut self, from: NodeId, to: NodeId, condition: Option<Condition>) {
        self.nodes[from.0].succs.push(to);
        self.nodes[from.0].conditions.push(condition);
        self.nodes[to.0].preds.push(from);
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn start(&self) -> Option<NodeId> {
        self.ids()
            .find(|id| matches!(self.node(*id).kind, NodeKind::Start))
    }

    pub fn end(&self) -> Option<NodeId> {
        self.ids()
            .find(|id| matches!(self.node(*id).kind, NodeKind::End))
    }

    /// Node holding the given `job_id`, if any.
    pub fn job_node(&self, job_id: &str) -> Option<NodeId> {
        self.ids().find(|id| {
            matches!(&self.node(*id).kind, NodeKind::Job(spec) if spec.job_id == job_id)
        })
    }

    pub fn job_spec(&self, id: NodeId) -> Option<&JobSpec> {
        match &self.node(id).kind {
            NodeKind::Job(spec) => Some(spec),
            _ => None,
        }
    }
}
