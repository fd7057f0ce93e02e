use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cadence_core::error::{CadenceError, Result};
use cadence_core::types::Contact;

use super::edge::Edge;
use super::node::StepNode;
use super::template::render;
use crate::delay::{DelaySpec, MAX_DELAY_DAYS};

/// A saved cadence: nodes plus the connections between them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceGraph {
    pub nodes: Vec<StepNode>,
    #[serde(default, alias = "edges")]
    pub connections: Vec<Edge>,
}

/// An email step with every field resolved, ready to be scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStep {
    pub node_id: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub delay: DelaySpec,
}

/// A reachable email node left out of the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedStep {
    pub node_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Steps in send order.
    pub steps: Vec<ResolvedStep>,
    pub skipped: Vec<SkippedStep>,
}

impl CadenceGraph {
    pub fn new(nodes: Vec<StepNode>, connections: Vec<Edge>) -> Self {
        Self { nodes, connections }
    }

    /// The single `start` node.
    pub fn start_node(&self) -> Result<&StepNode> {
        let mut starts = self.nodes.iter().filter(|n| n.is_start());
        let start = starts.next().ok_or(CadenceError::MissingStart)?;
        if starts.next().is_some() {
            return Err(CadenceError::Graph("graph has more than one start node".into()));
        }
        Ok(start)
    }

    pub fn resolve(&self, contact: Option<&Contact>) -> Result<Resolution> {
        let start = self.start_node()?;
        resolve_graph(&self.nodes, &self.connections, &start.id, contact)
    }
}

/// Walk the graph depth-first from `start`, following outgoing edges in
/// declaration order, and collect every email step that resolves.
///
/// Each node is visited at most once. Email nodes without a recipient,
/// subject or body are reported in `skipped` rather than failing the walk.
pub fn resolve_graph(
    nodes: &[StepNode],
    edges: &[Edge],
    start: &str,
    contact: Option<&Contact>,
) -> Result<Resolution> {
    let by_id: HashMap<&str, &StepNode> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    if !by_id.contains_key(start) {
        return Err(CadenceError::Graph(format!("start node '{}' not found", start)));
    }

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        if !by_id.contains_key(edge.to.as_str()) {
            warn!(from = %edge.from, to = %edge.to, "Edge points at unknown node, ignoring");
            continue;
        }
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
    }

    let mut resolution = Resolution::default();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = vec![start];

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            debug!(node_id = %id, "Node already visited, skipping");
            continue;
        }
        let Some(node) = by_id.get(id) else { continue };

        if node.is_email() {
            match resolve_step(node, contact) {
                Ok(step) => resolution.steps.push(step),
                Err(reason) => {
                    warn!(node_id = %node.id, %reason, "Skipping email step");
                    resolution.skipped.push(SkippedStep {
                        node_id: node.id.clone(),
                        reason,
                    });
                }
            }
        }

        // Reverse so the first declared edge is explored first.
        if let Some(next) = adjacency.get(id) {
            stack.extend(next.iter().rev().copied().filter(|n| !visited.contains(n)));
        }
    }

    Ok(resolution)
}

fn resolve_step(node: &StepNode, contact: Option<&Contact>) -> std::result::Result<ResolvedStep, String> {
    let cfg = &node.config;
    let recipient = match contact {
        Some(c) if !c.email.trim().is_empty() => c.email.trim().to_string(),
        _ => cfg.to.as_deref().unwrap_or_default().trim().to_string(),
    };
    let subject = render(cfg.subject.as_deref().unwrap_or_default(), contact)
        .trim()
        .to_string();
    let body = render(cfg.template.as_deref().unwrap_or_default(), contact);

    let missing: Vec<&str> = [
        ("recipient", recipient.is_empty()),
        ("subject", subject.is_empty()),
        ("body", body.trim().is_empty()),
    ]
    .into_iter()
    .filter_map(|(name, empty)| empty.then_some(name))
    .collect();
    if !missing.is_empty() {
        return Err(format!("missing {}", missing.join(", ")));
    }

    let delay = cfg.delay();
    if delay.offset(Utc::now()).is_none() {
        return Err(format!("delay out of range (over {} days)", MAX_DELAY_DAYS));
    }

    Ok(ResolvedStep {
        node_id: node.id.clone(),
        recipient,
        subject,
        body,
        delay,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> Contact {
        Contact {
            id: "c1".into(),
            email: "lee@prospect.io".into(),
            first_name: Some("Lee".into()),
            ..Default::default()
        }
    }

    fn ids(r: &Resolution) -> Vec<&str> {
        r.steps.iter().map(|s| s.node_id.as_str()).collect()
    }

    #[test]
    fn test_linear_chain_in_order() {
        let graph = CadenceGraph::new(
            vec![
                StepNode::start("s"),
                StepNode::email("a", "Hello {{firstName}}", "Body A"),
                StepNode::email("b", "Second", "Body B").with_delay(DelaySpec::Minutes(2)),
            ],
            vec![Edge::new("s", "a"), Edge::new("a", "b")],
        );
        let r = graph.resolve(Some(&contact())).unwrap();
        assert_eq!(ids(&r), vec!["a", "b"]);
        assert_eq!(r.steps[0].subject, "Hello Lee");
        assert_eq!(r.steps[0].recipient, "lee@prospect.io");
        assert_eq!(r.steps[1].delay, DelaySpec::Minutes(2));
    }

    #[test]
    fn test_cycle_visits_each_node_once() {
        let graph = CadenceGraph::new(
            vec![
                StepNode::start("s"),
                StepNode::email("a", "A", "a").with_to("x@y.io"),
                StepNode::email("b", "B", "b").with_to("x@y.io"),
            ],
            vec![Edge::new("s", "a"), Edge::new("a", "b"), Edge::new("b", "a")],
        );
        let r = graph.resolve(None).unwrap();
        assert_eq!(ids(&r), vec!["a", "b"]);
    }

    #[test]
    fn test_branches_follow_declaration_order_depth_first() {
        let graph = CadenceGraph::new(
            vec![
                StepNode::start("s"),
                StepNode::email("a", "A", "a"),
                StepNode::email("a2", "A2", "a2"),
                StepNode::email("b", "B", "b"),
            ],
            vec![Edge::new("s", "a"), Edge::new("s", "b"), Edge::new("a", "a2")],
        );
        let r = graph.resolve(Some(&contact())).unwrap();
        assert_eq!(ids(&r), vec!["a", "a2", "b"]);
    }

    #[test]
    fn test_incomplete_step_is_skipped_not_fatal() {
        let graph = CadenceGraph::new(
            vec![
                StepNode::start("s"),
                StepNode::email("a", "", "body"),
                StepNode::email("b", "B", "b"),
            ],
            vec![Edge::new("s", "a"), Edge::new("a", "b")],
        );
        let r = graph.resolve(Some(&contact())).unwrap();
        assert_eq!(ids(&r), vec!["b"]);
        assert_eq!(r.skipped.len(), 1);
        assert_eq!(r.skipped[0].reason, "missing subject");
    }

    #[test]
    fn test_missing_recipient_without_contact() {
        let graph = CadenceGraph::new(
            vec![StepNode::start("s"), StepNode::email("a", "A", "a")],
            vec![Edge::new("s", "a")],
        );
        let r = graph.resolve(None).unwrap();
        assert!(r.steps.is_empty());
        assert_eq!(r.skipped[0].reason, "missing recipient");
    }

    #[test]
    fn test_out_of_range_delay_is_skipped() {
        let graph = CadenceGraph::new(
            vec![
                StepNode::start("s"),
                StepNode::email("a", "A", "a"),
                StepNode::email("b", "B", "b").with_delay(DelaySpec::Days(1_000_000_000)),
                StepNode::email("c", "C", "c").with_delay(DelaySpec::Days(1)),
            ],
            vec![Edge::new("s", "a"), Edge::new("a", "b"), Edge::new("b", "c")],
        );
        let r = graph.resolve(Some(&contact())).unwrap();
        assert_eq!(ids(&r), vec!["a", "c"]);
        assert_eq!(r.skipped.len(), 1);
        assert_eq!(r.skipped[0].node_id, "b");
        assert!(r.skipped[0].reason.starts_with("delay out of range"));
    }

    #[test]
    fn test_start_node_rules() {
        let none = CadenceGraph::new(vec![StepNode::email("a", "A", "a")], vec![]);
        assert!(matches!(none.resolve(None), Err(CadenceError::MissingStart)));

        let two = CadenceGraph::new(vec![StepNode::start("s1"), StepNode::start("s2")], vec![]);
        assert!(matches!(two.resolve(None), Err(CadenceError::Graph(_))));
    }

    #[test]
    fn test_unreachable_nodes_are_ignored() {
        let graph = CadenceGraph::new(
            vec![
                StepNode::start("s"),
                StepNode::email("a", "A", "a"),
                StepNode::email("orphan", "O", "o"),
            ],
            vec![Edge::new("s", "a"), Edge::new("s", "ghost")],
        );
        let r = graph.resolve(Some(&contact())).unwrap();
        assert_eq!(ids(&r), vec!["a"]);
    }

    #[test]
    fn test_editor_json_roundtrip() {
        let json = cadence_test_utils::fixtures::linear_graph_json(&[
            ("e1", "S1", "immediate", 0),
            ("e2", "S2", "minutes", 2),
        ]);
        let graph: CadenceGraph = serde_json::from_value(json).unwrap();
        let r = graph.resolve(Some(&contact())).unwrap();
        assert_eq!(ids(&r), vec!["e1", "e2"]);
        assert_eq!(r.steps[0].body, "Hi Lee, note e1");
    }
}
