// Validate edges and whole graphs before they reach the synthesizer
use crate::engine::graph::GraphProcessor;
use crate::engine::registry;
use crate::engine::shape::{
    Propagation, ShapeValidator, effective_output_types, propagate, propagate_partial,
    resolved_params,
};
use crate::engine::types::{Category, Dim, OperatorSpec, ParamValue, Shape, ShapeRule};
use crate::error::{CompileError, ErrorKind};
use crate::schemas::graph::{Edge, EdgeKind, Node};
use petgraph::algo::has_path_connecting;
use petgraph::graphmap::DiGraphMap;
use serde::Serialize;
use std::fmt;

/// Outcome of validating one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeVerdict {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip)]
    pub kind: Option<ErrorKind>,
}

impl EdgeVerdict {
    pub fn accept() -> Self {
        Self {
            valid: true,
            reason: None,
            kind: None,
        }
    }

    pub fn reject(error: CompileError) -> Self {
        Self {
            valid: false,
            reason: Some(error.to_string()),
            kind: Some(error.kind()),
        }
    }
}

/// Batch report of a whole-graph validation pass.
///
/// `errors` block generation, `warnings` are surfaced but do not, and
/// `missing_components` holds actionable hints for the user.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub missing_components: Vec<String>,
    #[serde(skip)]
    failures: Vec<CompileError>,
}

impl GraphReport {
    fn error(&mut self, error: CompileError) {
        log::debug!("Validation error: {}", error);
        self.errors.push(error.to_string());
        self.failures.push(error);
    }

    fn warn(&mut self, message: String) {
        log::warn!("{}", message);
        self.warnings.push(message);
    }

    fn missing(&mut self, hint: &str) {
        self.missing_components.push(hint.to_string());
    }

    pub fn failures(&self) -> &[CompileError] {
        &self.failures
    }

    pub fn error_kinds(&self) -> Vec<ErrorKind> {
        self.failures.iter().map(CompileError::kind).collect()
    }

    /// First blocking error, or the warnings when the graph may be compiled.
    pub fn into_result(self) -> Result<Vec<String>, CompileError> {
        let GraphReport {
            failures, warnings, ..
        } = self;
        match failures.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(warnings),
        }
    }
}

struct Endpoints<'a> {
    source: &'a Node,
    target: &'a Node,
    producer: &'static OperatorSpec,
    consumer: &'static OperatorSpec,
}

fn resolve<'a>(candidate: &Edge, nodes: &'a [Node]) -> Result<Endpoints<'a>, CompileError> {
    let find = |id: &str, role: &str| {
        nodes.iter().find(|n| n.id == id).ok_or_else(|| {
            CompileError::Structural(format!("{} node '{}' does not exist", role, id))
        })
    };
    let source = find(&candidate.source, "source")?;
    let target = find(&candidate.target, "target")?;

    if source.is_pipeline != target.is_pipeline {
        return Err(CompileError::TypeMismatch(format!(
            "cannot connect {:?} node '{}' to {:?} node '{}'",
            source.mode(),
            source.id,
            target.mode(),
            target.id
        )));
    }
    if source.id == target.id {
        return Err(CompileError::Structural(format!(
            "node '{}' cannot connect to itself",
            source.id
        )));
    }

    Ok(Endpoints {
        source,
        target,
        producer: registry::lookup_node(source)?,
        consumer: registry::lookup_node(target)?,
    })
}

/// Rules that need no shape information, for both graph modes.
fn check_connection(
    candidate: &Edge,
    ends: &Endpoints<'_>,
    others: &[&Edge],
) -> Result<(), CompileError> {
    if others
        .iter()
        .any(|e| e.source == candidate.source && e.target == candidate.target)
    {
        return Err(CompileError::Connectivity(format!(
            "'{}' is already connected to '{}'",
            candidate.source, candidate.target
        )));
    }

    if ends.source.is_pipeline {
        check_workflow(ends)
    } else {
        check_architecture(candidate, ends, others)
    }
}

fn check_architecture(
    candidate: &Edge,
    ends: &Endpoints<'_>,
    others: &[&Edge],
) -> Result<(), CompileError> {
    if ends.consumer.is_root() {
        return Err(CompileError::Structural(format!(
            "dataset node '{}' is a source only and cannot receive connections",
            ends.target.id
        )));
    }

    if candidate.kind == EdgeKind::Normal
        && !ends.consumer.is_merge()
        && others
            .iter()
            .any(|e| e.target == candidate.target && e.kind == EdgeKind::Normal)
    {
        return Err(CompileError::Connectivity(format!(
            "'{}' already has a default input; combine branches with a residual or sum \
             connection or an Add/Concatenate node",
            ends.target.id
        )));
    }

    if !ends.consumer.accepts(&ends.producer.output_types) {
        return Err(CompileError::TypeMismatch(format!(
            "'{}' produces {:?} but '{}' ({}) does not accept it",
            ends.source.id, ends.producer.output_types, ends.target.id, ends.consumer.label
        )));
    }

    if candidate.kind == EdgeKind::Normal || ends.consumer.is_merge() {
        if let Some(layout) = declared_layout(ends.source, ends.producer) {
            check_reshape(layout, None, ends)?;
        }
    }

    Ok(())
}

fn check_workflow(ends: &Endpoints<'_>) -> Result<(), CompileError> {
    let (from, to) = (ends.producer.category, ends.consumer.category);

    if from == Category::Callbacks {
        return Err(CompileError::WorkflowOrder(format!(
            "callback node '{}' is terminal and cannot feed '{}'",
            ends.source.id, ends.target.id
        )));
    }
    if !from.workflow_successors().contains(&to) {
        return Err(CompileError::WorkflowOrder(format!(
            "{} node '{}' cannot feed {} node '{}'; allowed successors are {:?}",
            from,
            ends.source.id,
            to,
            ends.target.id,
            from.workflow_successors()
        )));
    }

    let produced = effective_output_types(ends.producer, ends.consumer);
    if !ends.consumer.accepts(&produced) {
        return Err(CompileError::TypeMismatch(format!(
            "'{}' produces {:?} but '{}' expects {}",
            ends.source.id,
            produced,
            ends.target.id,
            ends
                .consumer
                .input_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| "no input".to_string())
        )));
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Spatial,
    Flat,
}

impl Layout {
    fn of_shape(shape: &Shape) -> Option<Self> {
        match shape.rank() {
            2 => Some(Layout::Flat),
            rank if rank >= 3 => Some(Layout::Spatial),
            _ => None,
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Spatial => write!(f, "spatial"),
            Layout::Flat => write!(f, "flat"),
        }
    }
}

/// Layout an operator always produces, known without any upstream shapes.
/// Pass-through operators have none and are judged by their propagated rank.
fn declared_layout(node: &Node, spec: &OperatorSpec) -> Option<Layout> {
    match spec.shape_rule {
        ShapeRule::Conv { .. }
        | ShapeRule::Pool { .. }
        | ShapeRule::AdaptivePool
        | ShapeRule::Block(_) => Some(Layout::Spatial),
        ShapeRule::BatchNorm { ranks } if !ranks.contains(&2) => Some(Layout::Spatial),
        ShapeRule::Linear => Some(Layout::Flat),
        ShapeRule::Flatten => {
            let start = resolved_params(node, spec)
                .get("start_dim")
                .and_then(ParamValue::as_i64);
            (start == Some(1)).then_some(Layout::Flat)
        }
        ShapeRule::Dataset => node
            .params
            .get("dataset")
            .and_then(ParamValue::as_str)
            .and_then(registry::dataset_info)
            .and_then(|info| Layout::of_shape(&info.shape())),
        _ => None,
    }
}

/// A spatial producer may not feed a dense consumer directly, and a flat
/// producer may not feed a spatial one.
fn check_reshape(
    layout: Layout,
    produced: Option<&Shape>,
    ends: &Endpoints<'_>,
) -> Result<(), CompileError> {
    let spatial_consumer = match ends.consumer.shape_rule {
        ShapeRule::Conv { .. }
        | ShapeRule::Pool { .. }
        | ShapeRule::AdaptivePool
        | ShapeRule::Block(_) => true,
        ShapeRule::BatchNorm { ranks } => !ranks.contains(&2),
        _ => false,
    };
    let output = match produced {
        Some(shape) => format!("{} shape {}", layout, shape),
        None => format!("{} tensors", layout),
    };

    if ends.consumer.shape_rule == ShapeRule::Linear && layout == Layout::Spatial {
        return Err(CompileError::shape(
            &ends.target.id,
            format!(
                "'{}' outputs {}; insert a Flatten layer before {}",
                ends.source.id, output, ends.consumer.label
            ),
        ));
    }
    if spatial_consumer && layout == Layout::Flat {
        return Err(CompileError::shape(
            &ends.target.id,
            format!(
                "'{}' outputs {}; {} needs it reshaped to [B, C, H, W]",
                ends.source.id, output, ends.consumer.label
            ),
        ));
    }
    Ok(())
}

/// A user-set `in_features` must agree with a fixed producer width.
fn check_in_features(produced: &Shape, ends: &Endpoints<'_>) -> Result<(), CompileError> {
    let declared = ends.target.params.get("in_features").and_then(ParamValue::as_i64);
    let actual = produced.last().and_then(Dim::fixed);
    match (declared, actual) {
        (Some(declared), Some(actual)) if declared != actual => Err(CompileError::shape(
            &ends.target.id,
            format!(
                "in_features is set to {} but '{}' provides {} features",
                declared, ends.source.id, actual
            ),
        )),
        _ => Ok(()),
    }
}

/// True when `target` already reaches `source`, so the candidate would close
/// a loop.
fn closes_cycle(candidate: &Edge, others: &[&Edge]) -> bool {
    let mut graph = DiGraphMap::<&str, ()>::new();
    for edge in others {
        graph.add_edge(edge.source.as_str(), edge.target.as_str(), ());
    }
    let (from, to) = (candidate.target.as_str(), candidate.source.as_str());
    graph.contains_node(from)
        && graph.contains_node(to)
        && has_path_connecting(&graph, from, to, None)
}

/// Architecture rules that compare the producer's propagated shape with
/// what the consumer expects.
fn check_shapes(
    candidate: &Edge,
    ends: &Endpoints<'_>,
    others: &[&Edge],
    propagation: &Propagation,
) -> Result<(), CompileError> {
    let Some(produced) = propagation.shape(&ends.source.id) else {
        return Ok(());
    };

    if candidate.kind != EdgeKind::Normal && !ends.consumer.is_merge() {
        return match propagation.shape(&ends.target.id) {
            Some(output) if output != produced => Err(CompileError::shape(
                &ends.target.id,
                format!(
                    "{:?} connection from '{}' adds shape {} to output {}",
                    candidate.kind, ends.source.id, produced, output
                ),
            )),
            _ => Ok(()),
        };
    }

    if declared_layout(ends.source, ends.producer).is_none() {
        if let Some(layout) = Layout::of_shape(produced) {
            check_reshape(layout, Some(produced), ends)?;
        }
    }
    if ends.consumer.shape_rule == ShapeRule::Linear {
        check_in_features(produced, ends)?;
    }

    let mut inputs = Vec::new();
    if ends.consumer.is_merge() {
        inputs.extend(
            others
                .iter()
                .filter(|e| e.target == candidate.target)
                .filter_map(|e| propagation.shape(&e.source).cloned()),
        );
        inputs.push(produced.clone());
        if inputs.len() < 2 {
            return Ok(());
        }
    } else {
        inputs.push(produced.clone());
    }

    let params = resolved_params(ends.target, ends.consumer);
    ends.consumer
        .shape_rule
        .validate_and_propagate(&params, &inputs)
        .map(|_| ())
        .map_err(|reason| CompileError::shape(&ends.target.id, reason))
}

/// Decides whether `candidate` may be committed, given the graph it would
/// join. An edge with the same id in `edges` is treated as the candidate
/// itself, so existing edges can be re-validated.
pub fn validate_edge(candidate: &Edge, nodes: &[Node], edges: &[Edge]) -> EdgeVerdict {
    let others: Vec<&Edge> = edges.iter().filter(|e| e.id != candidate.id).collect();

    let result = resolve(candidate, nodes).and_then(|ends| {
        check_connection(candidate, &ends, &others)?;
        if closes_cycle(candidate, &others) {
            return Err(CompileError::Cycle(candidate.target.clone()));
        }
        if ends.source.is_pipeline {
            return Ok(());
        }
        let committed: Vec<Edge> = others.iter().map(|e| (*e).clone()).collect();
        // nodes that fail elsewhere only leave their own descendants unshaped
        match propagate_partial(nodes, &committed) {
            Ok((propagation, _)) => check_shapes(candidate, &ends, &others, &propagation),
            // unknown operators and cycles are reported by validate_graph
            Err(_) => Ok(()),
        }
    });

    match result {
        Ok(()) => EdgeVerdict::accept(),
        Err(error) => {
            log::debug!("Rejected edge {}: {}", candidate.id, error);
            EdgeVerdict::reject(error)
        }
    }
}

/// Pre-generation gate over both graphs.
pub fn validate_graph(
    arch_nodes: &[Node],
    arch_edges: &[Edge],
    pipe_nodes: &[Node],
    pipe_edges: &[Edge],
) -> GraphReport {
    let mut report = GraphReport::default();

    validate_architecture(arch_nodes, arch_edges, &mut report);
    if !pipe_nodes.is_empty() || !pipe_edges.is_empty() {
        validate_pipeline(pipe_nodes, pipe_edges, &mut report);
    }

    report.valid = report.failures.is_empty();
    report
}

/// Operator lookup and parameter schema checks; false if any operator is
/// unknown or sits in the wrong graph.
fn check_nodes(nodes: &[Node], pipeline: bool, report: &mut GraphReport) -> bool {
    let mut resolvable = true;
    for node in nodes {
        if node.is_pipeline != pipeline {
            report.error(CompileError::Structural(format!(
                "node '{}' belongs to the {:?} graph",
                node.id,
                node.mode()
            )));
            resolvable = false;
            continue;
        }
        match registry::lookup_node(node) {
            Ok(spec) => {
                for error in spec.validate_params(&node.id, &node.params) {
                    report.error(error);
                }
            }
            Err(error) => {
                report.error(error);
                resolvable = false;
            }
        }
    }
    resolvable
}

fn check_edges(nodes: &[Node], edges: &[Edge], report: &mut GraphReport) {
    for edge in edges {
        let others: Vec<&Edge> = edges.iter().filter(|e| e.id != edge.id).collect();
        if let Err(error) =
            resolve(edge, nodes).and_then(|ends| check_connection(edge, &ends, &others))
        {
            report.error(error);
        }
    }
}

fn validate_architecture(nodes: &[Node], edges: &[Edge], report: &mut GraphReport) {
    if !check_nodes(nodes, false, report) {
        return;
    }
    let processor = match GraphProcessor::new(nodes, edges) {
        Ok(processor) => processor,
        Err(error) => return report.error(error),
    };

    let roots = processor.roots();
    match roots.as_slice() {
        [] => {
            report.error(CompileError::Structural(
                "no dataset node found; add a dataset node as the graph root".to_string(),
            ));
            report.missing("dataset: add a Dataset node as the root of the architecture graph");
            return;
        }
        [_] => {}
        [root, ..] => report.warn(format!(
            "{} dataset nodes found; '{}' is used as the root",
            roots.len(),
            root
        )),
    }

    check_edges(nodes, edges, report);

    if let Err(error) = processor.check_acyclic() {
        return report.error(error);
    }
    let ordering = match processor.order() {
        Ok(ordering) => ordering,
        Err(error) => return report.error(error),
    };

    for id in &ordering.nodes {
        let Some(spec) = processor.spec(id) else {
            continue;
        };
        let operands = ordering.inputs_of(id);
        if spec.is_merge() && operands.len() < 2 {
            report.error(CompileError::Connectivity(format!(
                "{} node '{}' needs at least two inputs, got {}",
                spec.label,
                id,
                operands.len()
            )));
        }
        if !spec.is_merge() && operands.is_empty() {
            report.error(CompileError::Connectivity(format!(
                "'{}' has no default input; connect it with a normal edge",
                id
            )));
        }
    }

    for edge in edges {
        let target_reached = ordering.nodes.contains(&edge.target);
        if target_reached && ordering.unreachable.contains(&edge.source) {
            report.error(CompileError::Connectivity(format!(
                "'{}' feeds '{}' but is not reachable from dataset '{}'",
                edge.source, edge.target, ordering.root
            )));
        }
    }

    for id in &ordering.unreachable {
        let is_loss = processor.spec(id).is_some_and(|spec| spec.is_loss());
        if !is_loss {
            report.warn(format!(
                "'{}' is not reachable from dataset '{}' and will be skipped",
                id, ordering.root
            ));
        }
    }

    if ordering.nodes.is_empty() {
        report.error(CompileError::Connectivity(format!(
            "dataset '{}' has no downstream layers",
            ordering.root
        )));
        report.missing("layers: connect at least one layer to the dataset node");
    }

    let losses = processor.nodes().filter(|(_, spec)| spec.is_loss()).count();
    if losses == 0 {
        report.warn("no loss node found; the configured fallback criterion is used".to_string());
        report.missing("loss: add a loss node to choose the training criterion");
    } else if losses > 1 {
        report.warn(format!(
            "{} loss nodes found; '{}' is used",
            losses,
            ordering.loss.as_deref().unwrap_or_default()
        ));
    }

    if !report.failures.is_empty() {
        return;
    }

    let propagation = match propagate(nodes, edges) {
        Ok(propagation) => propagation,
        Err(error) => return report.error(error),
    };
    for edge in edges {
        let result = resolve(edge, nodes).and_then(|ends| {
            let others: Vec<&Edge> = edges.iter().filter(|e| e.id != edge.id).collect();
            check_shapes(edge, &ends, &others, &propagation)
        });
        if let Err(error) = result {
            report.error(error);
        }
    }
}

fn validate_pipeline(nodes: &[Node], edges: &[Edge], report: &mut GraphReport) {
    if !check_nodes(nodes, true, report) {
        return;
    }
    let processor = match GraphProcessor::new(nodes, edges) {
        Ok(processor) => processor,
        Err(error) => return report.error(error),
    };

    check_edges(nodes, edges, report);

    if let Err(error) = processor.check_acyclic() {
        return report.error(error);
    }

    match processor.roots().as_slice() {
        [] => {
            report.warn("pipeline has no dataset node; transforms run in graph order".to_string());
            report.missing("pipeline dataset: add a Dataset node as the root of the pipeline");
        }
        [root, rest @ ..] => {
            if !rest.is_empty() {
                report.warn(format!(
                    "{} pipeline dataset nodes found; '{}' is used as the root",
                    rest.len() + 1,
                    root
                ));
            }
            let reachable = processor.reachable_from(root);
            for (node, _) in processor.nodes() {
                if !reachable.contains(node.id.as_str()) {
                    report.warn(format!(
                        "pipeline node '{}' is not connected to dataset '{}'",
                        node.id, root
                    ));
                }
            }
        }
    }

    let count = |category: Category| {
        processor
            .nodes()
            .filter(|(_, spec)| spec.category == category)
            .count()
    };

    match count(Category::Optimization) {
        0 => {
            report.warn("no optimizer node found; Adam with default settings is used".to_string());
            report.missing("optimizer: add an optimizer node after the training configuration");
        }
        1 => {}
        n => report.warn(format!("{} optimizer nodes found; the first one is used", n)),
    }

    match count(Category::Training) {
        0 => {
            report.warn(
                "no training configuration found; default epochs and batch size are used"
                    .to_string(),
            );
            report.missing("training configuration: add a Training Configuration node");
        }
        1 => {}
        n => report.warn(format!(
            "{} training configurations found; the first one is used",
            n
        )),
    }

    if !processor.nodes().any(|(_, spec)| spec.id == "totensor") {
        report.warn("no ToTensor transform found; one is inserted first".to_string());
    }

    let callbacks: Vec<&str> = processor
        .nodes()
        .filter(|(_, spec)| spec.category == Category::Callbacks)
        .map(|(_, spec)| spec.id)
        .collect();
    for (i, id) in callbacks.iter().enumerate() {
        if callbacks[..i].contains(id) {
            report.warn(format!("duplicate '{}' callback; the first one is used", id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mnist() -> Node {
        Node::new("data", "dataset").with_param("dataset", "MNIST")
    }

    #[test]
    fn dataset_cannot_be_a_target() {
        let nodes = vec![mnist(), Node::new("act", "relu")];
        let verdict = validate_edge(&Edge::new("e", "act", "data"), &nodes, &[]);
        assert!(!verdict.valid);
        assert_eq!(verdict.kind, Some(ErrorKind::Structural));
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let nodes = vec![mnist()];
        let verdict = validate_edge(&Edge::new("e", "data", "ghost"), &nodes, &[]);
        assert!(!verdict.valid);
        assert!(verdict.reason.unwrap().contains("ghost"));
    }

    #[test]
    fn pipeline_and_architecture_nodes_do_not_mix() {
        let nodes = vec![mnist(), Node::pipeline("opt", "adam")];
        let verdict = validate_edge(&Edge::new("e", "data", "opt"), &nodes, &[]);
        assert_eq!(verdict.kind, Some(ErrorKind::TypeMismatch));
    }

    #[test]
    fn spatial_into_linear_needs_flatten() {
        let nodes = vec![mnist(), Node::new("fc", "linear")];
        let verdict = validate_edge(&Edge::new("e", "data", "fc"), &nodes, &[]);
        assert!(!verdict.valid);
        assert!(verdict.reason.unwrap().contains("Flatten"));
    }

    #[test]
    fn flat_into_conv_needs_reshape() {
        let nodes = vec![mnist(), Node::new("flat", "flatten"), Node::new("conv", "conv2d")];
        let edges = vec![Edge::new("e1", "data", "flat")];
        let verdict = validate_edge(&Edge::new("e2", "flat", "conv"), &nodes, &edges);
        assert_eq!(verdict.kind, Some(ErrorKind::ShapeMismatch));
    }

    #[test]
    fn layer_pairs_are_checked_before_reaching_the_dataset() {
        let nodes = vec![
            Node::new("conv", "conv2d"),
            Node::new("fc", "linear"),
            Node::new("flat", "flatten"),
            Node::new("pool", "maxpool2d"),
        ];
        let verdict = validate_edge(&Edge::new("e1", "conv", "fc"), &nodes, &[]);
        assert_eq!(verdict.kind, Some(ErrorKind::ShapeMismatch));
        assert!(verdict.reason.unwrap().contains("Flatten"));

        let verdict = validate_edge(&Edge::new("e2", "flat", "pool"), &nodes, &[]);
        assert_eq!(verdict.kind, Some(ErrorKind::ShapeMismatch));

        assert!(validate_edge(&Edge::new("e3", "conv", "flat"), &nodes, &[]).valid);
        assert!(validate_edge(&Edge::new("e4", "flat", "fc"), &nodes, &[]).valid);
    }

    #[test]
    fn failing_node_elsewhere_does_not_hide_shape_rules() {
        let nodes = vec![
            mnist(),
            Node::new("conv", "conv2d").with_param("kernel_size", 31),
            Node::new("act", "relu"),
            Node::new("fc", "linear"),
        ];
        let edges = vec![Edge::new("e1", "data", "conv"), Edge::new("e2", "data", "act")];

        let verdict = validate_edge(&Edge::new("e3", "act", "fc"), &nodes, &edges);
        assert_eq!(verdict.kind, Some(ErrorKind::ShapeMismatch));
        assert!(verdict.reason.unwrap().contains("insert a Flatten layer before Linear"));

        let verdict = validate_edge(&Edge::new("e4", "data", "fc"), &nodes, &edges);
        assert_eq!(verdict.kind, Some(ErrorKind::ShapeMismatch));
    }

    #[test]
    fn explicit_in_features_must_match_the_producer() {
        let nodes = vec![
            mnist(),
            Node::new("flat", "flatten"),
            Node::new("fc", "linear").with_param("in_features", 100),
            Node::new("ok", "linear").with_param("in_features", 784),
        ];
        let edges = vec![Edge::new("e1", "data", "flat")];

        let verdict = validate_edge(&Edge::new("e2", "flat", "fc"), &nodes, &edges);
        assert_eq!(verdict.kind, Some(ErrorKind::ShapeMismatch));
        assert!(verdict.reason.unwrap().contains("in_features is set to 100"));
        assert!(validate_edge(&Edge::new("e3", "flat", "ok"), &nodes, &edges).valid);

        let mut edges = edges;
        edges.push(Edge::new("e2", "flat", "fc"));
        let report = validate_graph(&nodes, &edges, &[], &[]);
        assert!(report.error_kinds().contains(&ErrorKind::ShapeMismatch));
    }

    #[test]
    fn edge_closing_a_loop_is_rejected() {
        let nodes = vec![mnist(), Node::new("a", "relu"), Node::new("b", "tanh")];
        let edges = vec![Edge::new("e1", "data", "a"), Edge::new("e2", "a", "b")];
        let back = Edge::new("e3", "b", "a").with_kind(EdgeKind::Residual);

        let verdict = validate_edge(&back, &nodes, &edges);
        assert_eq!(verdict.kind, Some(ErrorKind::Cycle));
    }

    #[test]
    fn oversized_kernel_is_a_shape_mismatch() {
        let nodes = vec![mnist(), Node::new("conv", "conv2d").with_param("kernel_size", 31)];
        let verdict = validate_edge(&Edge::new("e", "data", "conv"), &nodes, &[]);
        assert_eq!(verdict.kind, Some(ErrorKind::ShapeMismatch));
    }

    #[test]
    fn second_default_input_is_rejected() {
        let nodes = vec![
            mnist(),
            Node::new("a", "relu"),
            Node::new("b", "tanh"),
            Node::new("c", "sigmoid"),
        ];
        let edges = vec![
            Edge::new("e1", "data", "a"),
            Edge::new("e2", "data", "b"),
            Edge::new("e3", "a", "c"),
        ];
        let verdict = validate_edge(&Edge::new("e4", "b", "c"), &nodes, &edges);
        assert_eq!(verdict.kind, Some(ErrorKind::Connectivity));

        let residual = Edge::new("e4", "b", "c").with_kind(EdgeKind::Residual);
        assert!(validate_edge(&residual, &nodes, &edges).valid);
    }

    #[test]
    fn revalidating_an_existing_edge_ignores_itself() {
        let nodes = vec![mnist(), Node::new("act", "relu")];
        let edges = vec![Edge::new("e1", "data", "act")];
        assert!(validate_edge(&edges[0], &nodes, &edges).valid);
    }

    #[test]
    fn add_operand_shapes_must_agree() {
        let nodes = vec![
            Node::new("data", "dataset").with_param("dataset", "CIFAR10"),
            Node::new("a", "conv2d").with_param("out_channels", 16),
            Node::new("b", "conv2d").with_param("out_channels", 8),
            Node::new("sum", "add"),
        ];
        let edges = vec![
            Edge::new("e1", "data", "a"),
            Edge::new("e2", "data", "b"),
            Edge::new("e3", "a", "sum"),
        ];
        let verdict = validate_edge(&Edge::new("e4", "b", "sum"), &nodes, &edges);
        assert_eq!(verdict.kind, Some(ErrorKind::ShapeMismatch));
    }

    #[test]
    fn loss_cannot_feed_layers() {
        let nodes = vec![Node::new("loss", "crossentropyloss"), Node::new("act", "relu")];
        let verdict = validate_edge(&Edge::new("e", "loss", "act"), &nodes, &[]);
        assert_eq!(verdict.kind, Some(ErrorKind::TypeMismatch));
    }

    #[test]
    fn workflow_follows_category_order() {
        let nodes = vec![
            Node::pipeline("ds", "dataset"),
            Node::pipeline("flip", "randomhorizontalflip"),
            Node::pipeline("train", "trainingconfig"),
            Node::pipeline("opt", "adam"),
            Node::pipeline("acc", "accuracy"),
            Node::pipeline("stop", "earlystopping"),
        ];
        let ok = [
            ("ds", "flip"),
            ("flip", "train"),
            ("train", "opt"),
            ("train", "acc"),
            ("train", "stop"),
            ("opt", "stop"),
            ("acc", "stop"),
        ];
        for (i, (s, t)) in ok.iter().enumerate() {
            let verdict = validate_edge(&Edge::new(format!("e{}", i), *s, *t), &nodes, &[]);
            assert!(verdict.valid, "{} -> {}: {:?}", s, t, verdict.reason);
        }

        let verdict = validate_edge(&Edge::new("x", "ds", "opt"), &nodes, &[]);
        assert_eq!(verdict.kind, Some(ErrorKind::WorkflowOrder));
        let verdict = validate_edge(&Edge::new("x", "opt", "acc"), &nodes, &[]);
        assert_eq!(verdict.kind, Some(ErrorKind::WorkflowOrder));
    }

    #[test]
    fn callbacks_never_have_valid_outgoing_edges() {
        let nodes = vec![
            Node::pipeline("ckpt", "modelcheckpoint"),
            Node::pipeline("stop", "earlystopping"),
            Node::pipeline("train", "trainingconfig"),
            Node::pipeline("lr", "lrmonitor"),
        ];
        for target in ["stop", "train", "lr"] {
            let verdict = validate_edge(&Edge::new("e", "ckpt", target), &nodes, &[]);
            assert!(!verdict.valid);
            assert_eq!(verdict.kind, Some(ErrorKind::WorkflowOrder));
        }
    }

    #[test]
    fn graph_without_dataset_reports_missing_dataset() {
        let nodes = vec![Node::new("fc", "linear")];
        let report = validate_graph(&nodes, &[], &[], &[]);
        assert!(!report.valid);
        assert!(report.errors[0].contains("no dataset node"));
        assert!(report.missing_components[0].starts_with("dataset"));
    }

    #[test]
    fn unreachable_layer_is_a_warning() {
        let nodes = vec![
            mnist(),
            Node::new("flat", "flatten"),
            Node::new("fc", "linear"),
            Node::new("orphan", "relu"),
            Node::new("loss", "crossentropyloss"),
        ];
        let edges = vec![
            Edge::new("e1", "data", "flat"),
            Edge::new("e2", "flat", "fc"),
            Edge::new("e3", "fc", "loss"),
        ];
        let report = validate_graph(&nodes, &edges, &[], &[]);
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.warnings.iter().any(|w| w.contains("orphan")));
    }

    #[test]
    fn merge_with_single_operand_is_a_connectivity_error() {
        let nodes = vec![mnist(), Node::new("sum", "add")];
        let edges = vec![Edge::new("e1", "data", "sum")];
        let report = validate_graph(&nodes, &edges, &[], &[]);
        assert_eq!(report.error_kinds(), vec![ErrorKind::Connectivity]);
    }

    #[test]
    fn residual_shape_must_match_target_output() {
        let nodes = vec![
            Node::new("data", "dataset").with_param("dataset", "CIFAR10"),
            Node::new("c1", "conv2d").with_param("out_channels", 16).with_param("padding", 1),
            Node::new("c2", "conv2d").with_param("out_channels", 32).with_param("padding", 1),
        ];
        let edges = vec![
            Edge::new("e1", "data", "c1"),
            Edge::new("e2", "c1", "c2"),
            Edge::new("skip", "c1", "c2").with_kind(EdgeKind::Residual),
        ];
        let report = validate_graph(&nodes, &edges, &[], &[]);
        // duplicate pair is flagged as well as the shape
        assert!(report.error_kinds().contains(&ErrorKind::Connectivity));

        let edges = vec![
            Edge::new("e1", "data", "c1"),
            Edge::new("e2", "c1", "c2"),
            Edge::new("skip", "data", "c2").with_kind(EdgeKind::Residual),
        ];
        let report = validate_graph(&nodes, &edges, &[], &[]);
        assert_eq!(report.error_kinds(), vec![ErrorKind::ShapeMismatch]);
    }

    #[test]
    fn parameter_out_of_bounds_blocks_generation() {
        let nodes = vec![mnist(), Node::new("drop", "dropout").with_param("p", 1.5)];
        let edges = vec![Edge::new("e1", "data", "drop")];
        let report = validate_graph(&nodes, &edges, &[], &[]);
        assert_eq!(report.error_kinds(), vec![ErrorKind::Parameter]);
        assert!(report.into_result().is_err());
    }

    #[test]
    fn pipeline_gaps_become_warnings_and_hints() {
        let arch = vec![mnist(), Node::new("flat", "flatten")];
        let arch_edges = vec![Edge::new("e1", "data", "flat")];
        let pipe = vec![Node::pipeline("ds", "dataset")];
        let report = validate_graph(&arch, &arch_edges, &pipe, &[]);
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.missing_components.iter().any(|m| m.starts_with("optimizer")));
        assert!(
            report
                .missing_components
                .iter()
                .any(|m| m.starts_with("training configuration"))
        );
        assert!(report.warnings.iter().any(|w| w.contains("ToTensor")));
    }
}
