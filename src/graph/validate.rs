//! Static flow validation, run before anything touches the store.

use std::collections::VecDeque;

use crate::error::{MasterError, Result};
use crate::graph::{GatewayKind, Graph, NodeId, NodeKind};

/// Validate the jobnet shape. Returns a descriptive error on the first
/// violation; never mutates anything.
///
/// Checks: exactly one Start and one End, degree rules per node kind, every
/// node reachable from Start, End reachable from every node, no cycles, each
/// split closed by a join of the matching kind, and exclusive-split edges all
/// carrying a condition.
pub fn detect_flow_error(graph: &Graph) -> Result<()> {
    if graph.is_empty() {
        return flow_err("jobnet has no nodes");
    }

    check_endpoints(graph)?;
    check_degrees(graph)?;
    check_reachability(graph)?;
    check_acyclic(graph)?;
    check_gateway_pairs(graph)?;
    Ok(())
}

fn flow_err<T>(msg: impl Into<String>) -> Result<T> {
    Err(MasterError::Flow(msg.into()))
}

fn check_endpoints(graph: &Graph) -> Result<()> {
    let starts = graph
        .ids()
        .filter(|id| matches!(graph.node(*id).kind, NodeKind::Start))
        .count();
    let ends = graph
        .ids()
        .filter(|id| matches!(graph.node(*id).kind, NodeKind::End))
        .count();
    if starts != 1 {
        return flow_err(format!("jobnet must have exactly one start, found {}", starts));
    }
    if ends != 1 {
        return flow_err(format!("jobnet must have exactly one end, found {}", ends));
    }
    Ok(())
}

fn check_degrees(graph: &Graph) -> Result<()> {
    for id in graph.ids() {
        let node = graph.node(id);
        let (preds, succs) = (node.preds.len(), node.succs.len());
        match &node.kind {
            NodeKind::Start => {
                if preds != 0 || succs != 1 {
                    return flow_err("start must have no incoming and one outgoing edge");
                }
            }
            NodeKind::End => {
                if preds == 0 || succs != 0 {
                    return flow_err("end must have an incoming edge and no outgoing edge");
                }
            }
            NodeKind::Job(spec) => {
                if preds != 1 || succs != 1 {
                    return flow_err(format!(
                        "job {} must have exactly one incoming and one outgoing edge",
                        spec.job_id
                    ));
                }
            }
            NodeKind::Gateway(kind) if kind.is_split() => {
                if preds != 1 || succs < 2 {
                    return flow_err(format!(
                        "{} {} must have one incoming and at least two outgoing edges",
                        kind, id
                    ));
                }
                if *kind == GatewayKind::ExclusiveSplit
                    && node.conditions.iter().any(|c| c.is_none())
                {
                    return flow_err(format!(
                        "exclusive split {} has an outgoing edge without a condition",
                        id
                    ));
                }
            }
            NodeKind::Gateway(kind) => {
                if preds < 2 || succs != 1 {
                    return flow_err(format!(
                        "{} {} must have at least two incoming and one outgoing edge",
                        kind, id
                    ));
                }
            }
        }
        if !matches!(&node.kind, NodeKind::Gateway(GatewayKind::ExclusiveSplit))
            && node.conditions.iter().any(|c| c.is_some())
        {
            return flow_err(format!(
                "{} {} carries an edge condition but is not an exclusive split",
                node.kind.describe(),
                id
            ));
        }
    }
    Ok(())
}

fn check_reachability(graph: &Graph) -> Result<()> {
    let start = graph.start().expect("endpoint check ran first");
    let end = graph.end().expect("endpoint check ran first");

    let forward = bfs(graph, start, |node| node.succs.clone());
    if let Some(id) = graph.ids().find(|id| !forward[id.0]) {
        return flow_err(format!(
            "{} {} is not reachable from start",
            graph.node(id).kind.describe(),
            id
        ));
    }

    let backward = bfs(graph, end, |node| node.preds.clone());
    if let Some(id) = graph.ids().find(|id| !backward[id.0]) {
        return flow_err(format!(
            "end is not reachable from {} {}",
            graph.node(id).kind.describe(),
            id
        ));
    }
    Ok(())
}

fn bfs(graph: &Graph, from: NodeId, edges: impl Fn(&crate::graph::Node) -> Vec<NodeId>) -> Vec<bool> {
    let mut seen = vec![false; graph.len()];
    let mut queue = VecDeque::from([from]);
    seen[from.0] = true;
    while let Some(id) = queue.pop_front() {
        for next in edges(graph.node(id)) {
            if !seen[next.0] {
                seen[next.0] = true;
                queue.push_back(next);
            }
        }
    }
    seen
}

fn check_acyclic(graph: &Graph) -> Result<()> {
    // Iterative DFS with an explicit on-stack marker; a back edge is a cycle.
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }
    let mut marks = vec![Mark::White; graph.len()];

    for root in graph.ids() {
        if marks[root.0] != Mark::White {
            continue;
        }
        let mut stack = vec![(root, 0usize)];
        marks[root.0] = Mark::Grey;
        while let Some(&(id, edge)) = stack.last() {
            if edge < graph.node(id).succs.len() {
                let next = graph.node(id).succs[edge];
                stack.last_mut().expect("stack is non-empty").1 += 1;
                match marks[next.0] {
                    Mark::Grey => {
                        return flow_err(format!(
                            "cycle detected through {} {}",
                            graph.node(next).kind.describe(),
                            next
                        ))
                    }
                    Mark::White => {
                        marks[next.0] = Mark::Grey;
                        stack.push((next, 0));
                    }
                    Mark::Black => {}
                }
            } else {
                marks[id.0] = Mark::Black;
                stack.pop();
            }
        }
    }
    Ok(())
}

fn check_gateway_pairs(graph: &Graph) -> Result<()> {
    for id in graph.ids() {
        if let NodeKind::Gateway(kind) = graph.node(id).kind {
            if kind.is_split() {
                matching_join(graph, id)?;
            }
        }
    }
    Ok(())
}

/// Find the join closing the given split: every branch must run into the
/// same join node, of the kind matching the split. Nested splits are skipped
/// over by first resolving their own join.
fn matching_join(graph: &Graph, split: NodeId) -> Result<NodeId> {
    let split_kind = match graph.node(split).kind {
        NodeKind::Gateway(kind) => kind,
        _ => return flow_err("matching_join called on a non-gateway"),
    };
    let want = split_kind
        .matching_join()
        .ok_or_else(|| MasterError::Flow(format!("{} is not a split", split)))?;

    let mut join = None;
    for &branch in &graph.node(split).succs {
        let found = branch_join(graph, split, branch)?;
        match join {
            None => join = Some(found),
            Some(prev) if prev != found => {
                return flow_err(format!(
                    "{} {} branches meet different joins ({} and {})",
                    split_kind, split, prev, found
                ));
            }
            Some(_) => {}
        }
    }
    let join = join.expect("splits have at least two branches");
    match graph.node(join).kind {
        NodeKind::Gateway(kind) if kind == want => Ok(join),
        _ => flow_err(format!(
            "{} {} is closed by {} {}, expected a {}",
            split_kind,
            split,
            graph.node(join).kind.describe(),
            join,
            want
        )),
    }
}

/// Walk one branch until the first join that does not belong to a nested
/// split.
fn branch_join(graph: &Graph, split: NodeId, from: NodeId) -> Result<NodeId> {
    let mut cur = from;
    let mut hops = 0;
    loop {
        hops += 1;
        if hops > graph.len() * 2 {
            // unreachable once the cycle check passed
            return flow_err(format!("runaway branch walk from {}", split));
        }
        match graph.node(cur).kind {
            NodeKind::Gateway(kind) if kind.is_join() => return Ok(cur),
            NodeKind::Gateway(kind) if kind.is_split() => {
                let inner = matching_join(graph, cur)?;
                cur = graph.node(inner).succs[0];
            }
            NodeKind::End => {
                return flow_err(format!(
                    "branch of {} {} reaches end without a matching join",
                    graph.node(split).kind.describe(),
                    split
                ))
            }
            _ => cur = graph.node(cur).succs[0],
        }
    }
}
