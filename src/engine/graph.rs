// Adjacency, cycle detection and emission order for one editor graph
use crate::engine::registry;
use crate::engine::types::OperatorSpec;
use crate::error::CompileError;
use crate::schemas::graph::{Edge, EdgeKind, Node};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

pub struct GraphProcessor<'a> {
    pub graph: DiGraph<&'a str, EdgeKind>,
    pub node_map: HashMap<&'a str, NodeIndex>,
    nodes: Vec<&'a Node>,
    by_id: HashMap<&'a str, (&'a Node, &'static OperatorSpec)>,
    incoming: HashMap<&'a str, Vec<&'a Edge>>,
    outgoing: HashMap<&'a str, Vec<&'a Edge>>,
}

/// Emission order plus the predecessor classification the synthesizer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ordering {
    pub root: String,
    /// Reachable nodes in emission order; excludes the root and loss nodes.
    pub nodes: Vec<String>,
    /// Operand sources per node: every incoming edge for merge operators,
    /// otherwise the single default predecessor.
    pub inputs: BTreeMap<String, Vec<String>>,
    pub residual_sources: BTreeMap<String, Vec<String>>,
    pub merge_sources: BTreeMap<String, Vec<String>>,
    pub loss: Option<String>,
    pub unreachable: Vec<String>,
}

impl Ordering {
    pub fn inputs_of(&self, id: &str) -> &[String] {
        self.inputs.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn last(&self) -> Option<&str> {
        self.nodes.last().map(String::as_str)
    }
}

impl<'a> GraphProcessor<'a> {
    pub fn new(nodes: &'a [Node], edges: &'a [Edge]) -> Result<Self, CompileError> {
        let mut graph = DiGraph::new();
        let mut node_map = HashMap::new();
        let mut by_id = HashMap::new();

        // Add Nodes
        for node in nodes {
            let spec = registry::lookup_node(node)?;
            if by_id.insert(node.id.as_str(), (node, spec)).is_some() {
                return Err(CompileError::Structural(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
            node_map.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
        }

        // Add Edges
        let mut incoming: HashMap<&str, Vec<&Edge>> = HashMap::new();
        let mut outgoing: HashMap<&str, Vec<&Edge>> = HashMap::new();
        for edge in edges {
            match (
                node_map.get(edge.source.as_str()),
                node_map.get(edge.target.as_str()),
            ) {
                (Some(&src), Some(&target)) => {
                    graph.add_edge(src, target, edge.kind);
                    incoming.entry(edge.target.as_str()).or_default().push(edge);
                    outgoing.entry(edge.source.as_str()).or_default().push(edge);
                }
                _ => log::warn!(
                    "Skipping edge {} ({} -> {}): unknown endpoint",
                    edge.id,
                    edge.source,
                    edge.target
                ),
            }
        }

        Ok(Self {
            graph,
            node_map,
            nodes: nodes.iter().collect(),
            by_id,
            incoming,
            outgoing,
        })
    }

    pub fn node(&self, id: &str) -> Option<&'a Node> {
        self.by_id.get(id).map(|(node, _)| *node)
    }

    pub fn spec(&self, id: &str) -> Option<&'static OperatorSpec> {
        self.by_id.get(id).map(|(_, spec)| *spec)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&'a Node, &'static OperatorSpec)> + '_ {
        self.nodes.iter().filter_map(|n| self.by_id.get(n.id.as_str()).copied())
    }

    /// Incoming edges in insertion order.
    pub fn incoming(&self, id: &str) -> &[&'a Edge] {
        self.incoming.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Outgoing edges in insertion order.
    pub fn outgoing(&self, id: &str) -> &[&'a Edge] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Dataset-category nodes in node order.
    pub fn roots(&self) -> Vec<&'a str> {
        self.nodes()
            .filter(|(_, spec)| spec.is_root())
            .map(|(node, _)| node.id.as_str())
            .collect()
    }

    pub fn root(&self) -> Result<&'a str, CompileError> {
        self.roots().first().copied().ok_or_else(|| {
            CompileError::Structural(
                "no dataset node found; add a dataset node as the graph root".to_string(),
            )
        })
    }

    pub fn operand_sources(&self, id: &str) -> Vec<&'a str> {
        let is_merge = self.spec(id).is_some_and(|spec| spec.is_merge());
        let edges = self.incoming(id).iter();
        if is_merge {
            edges.map(|e| e.source.as_str()).collect()
        } else {
            edges
                .filter(|e| e.kind == EdgeKind::Normal)
                .map(|e| e.source.as_str())
                .take(1)
                .collect()
        }
    }

    pub fn check_acyclic(&self) -> Result<(), CompileError> {
        // Topological Sort (Checks for cycles automatically)
        toposort(&self.graph, None)
            .map(|_| ())
            .map_err(|cycle| CompileError::Cycle(self.graph[cycle.node_id()].to_string()))
    }

    /// Kahn's algorithm over every node, seeded with the zero in-degree nodes
    /// in node order. Ties follow edge insertion order.
    pub fn topological(&self) -> Result<Vec<&'a str>, CompileError> {
        self.check_acyclic()?;

        let mut indegree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), self.incoming(&n.id).len()))
            .collect();
        let queue = self
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| indegree.get(id) == Some(&0))
            .collect();

        let order = self.drain(queue, &mut indegree);
        if order.len() != self.nodes.len() {
            let stuck = self
                .nodes
                .iter()
                .find(|n| !order.contains(&n.id.as_str()))
                .map(|n| n.id.clone())
                .unwrap_or_default();
            return Err(CompileError::Cycle(stuck));
        }
        Ok(order)
    }

    fn drain(
        &self,
        mut queue: VecDeque<&'a str>,
        indegree: &mut HashMap<&str, usize>,
    ) -> Vec<&'a str> {
        let mut order = Vec::new();
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for edge in self.outgoing(id) {
                if let Some(degree) = indegree.get_mut(edge.target.as_str()) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(edge.target.as_str());
                    }
                }
            }
        }
        order
    }

    /// Nodes reachable from `root` over edges of any kind, root included.
    pub fn reachable_from(&self, root: &str) -> HashSet<&'a str> {
        let mut reachable = HashSet::new();
        if let Some(&start) = self.node_map.get(root) {
            let mut bfs = Bfs::new(&self.graph, start);
            while let Some(idx) = bfs.next(&self.graph) {
                reachable.insert(self.graph[idx]);
            }
        }
        reachable
    }

    pub fn order(&self) -> Result<Ordering, CompileError> {
        let root = self.root()?;
        self.check_acyclic()?;

        let reachable = self.reachable_from(root);

        // In-degree counted over reachable sources only
        let mut indegree: HashMap<&str, usize> = reachable
            .iter()
            .map(|&id| {
                let degree = self
                    .incoming(id)
                    .iter()
                    .filter(|e| reachable.contains(e.source.as_str()))
                    .count();
                (id, degree)
            })
            .collect();
        let sorted = self.drain(VecDeque::from([root]), &mut indegree);

        let is_loss = |id: &str| self.spec(id).is_some_and(|spec| spec.is_loss());

        let nodes: Vec<String> = sorted
            .iter()
            .filter(|&&id| id != root && !is_loss(id))
            .map(|id| id.to_string())
            .collect();

        let inputs = nodes
            .iter()
            .map(|id| {
                let sources = self
                    .operand_sources(id)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                (id.clone(), sources)
            })
            .collect();

        let mut residual_sources: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut merge_sources: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (node, _) in self.nodes() {
            for edge in self.outgoing(&node.id) {
                if self.spec(&edge.target).is_some_and(|spec| spec.is_merge()) {
                    continue;
                }
                let map = match edge.kind {
                    EdgeKind::Residual => &mut residual_sources,
                    EdgeKind::Sum => &mut merge_sources,
                    EdgeKind::Normal => continue,
                };
                map.entry(edge.target.clone())
                    .or_default()
                    .push(edge.source.clone());
            }
        }

        let loss = self
            .nodes()
            .find(|(_, spec)| spec.is_loss())
            .map(|(node, _)| node.id.clone());

        let unreachable: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| !reachable.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect();

        log::debug!(
            "Built emission order from root {}: {} nodes, {} unreachable",
            root,
            nodes.len(),
            unreachable.len()
        );

        Ok(Ordering {
            root: root.to_string(),
            nodes,
            inputs,
            residual_sources,
            merge_sources,
            loss,
            unreachable,
        })
    }
}
