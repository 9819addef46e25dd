// Shape and semantic-type propagation
use crate::engine::graph::GraphProcessor;
use crate::engine::registry;
use crate::engine::types::{
    BlockKind, Category, Dim, OperatorSpec, ParamValue, Params, SemanticType, Shape, ShapeRule,
};
use crate::error::CompileError;
use crate::schemas::graph::{Edge, Node};
use std::collections::BTreeMap;

/// Output of one shape rule: the new shape plus parameters that should
/// mirror it.
#[derive(Debug, Clone, PartialEq)]
pub struct Inferred {
    pub shape: Shape,
    pub params: Vec<(&'static str, ParamValue)>,
}

impl Inferred {
    fn shape(shape: Shape) -> Self {
        Self {
            shape,
            params: Vec::new(),
        }
    }

    fn with(mut self, name: &'static str, dim: Dim) -> Self {
        if let Some(value) = dim.fixed() {
            self.params.push((name, ParamValue::Int(value)));
        }
        self
    }
}

pub trait ShapeValidator {
    fn validate_and_propagate(&self, params: &Params, input_shapes: &[Shape])
    -> Result<Inferred, String>;
}

fn int_param(params: &Params, name: &str) -> Result<i64, String> {
    params
        .get(name)
        .and_then(ParamValue::as_i64)
        .ok_or_else(|| format!("parameter '{}' must be an integer", name))
}

fn single(input_shapes: &[Shape]) -> Result<&Shape, String> {
    match input_shapes {
        [shape] => Ok(shape),
        _ => Err(format!(
            "expects exactly one input, got {}",
            input_shapes.len()
        )),
    }
}

fn overflow(what: &str) -> String {
    format!("{} is too large to compute an output shape", what)
}

fn expect_rank(shape: &Shape, ranks: &[usize], what: &str) -> Result<(), String> {
    if ranks.contains(&shape.rank()) {
        Ok(())
    } else {
        Err(format!(
            "{} expects an input of rank {:?} but got {} (rank {})",
            what,
            ranks,
            shape,
            shape.rank()
        ))
    }
}

/// `floor((in + 2*padding - kernel) / stride) + 1`, symbolic dims pass through.
pub fn window(dim: Dim, kernel: i64, stride: i64, padding: i64) -> Result<Dim, String> {
    match dim {
        Dim::Fixed(size) => {
            let padded = padding
                .checked_mul(2)
                .and_then(|total| size.checked_add(total))
                .ok_or_else(|| overflow(&format!("padding {}", padding)))?;
            let span = padded
                .checked_sub(kernel)
                .ok_or_else(|| overflow(&format!("kernel size {}", kernel)))?;
            if span < 0 {
                return Err(format!(
                    "kernel size {} is larger than the padded input size {}",
                    kernel, padded
                ));
            }
            if stride < 1 {
                return Err(format!("stride must be positive, got {}", stride));
            }
            Ok(Dim::Fixed(span / stride + 1))
        }
        other => Ok(other),
    }
}

fn apply_window(
    shape: &Shape,
    channels: Dim,
    kernel: i64,
    stride: i64,
    padding: i64,
) -> Result<Shape, String> {
    let mut dims = shape.0.clone();
    dims[1] = channels;
    for dim in dims.iter_mut().skip(2) {
        *dim = window(*dim, kernel, stride, padding)?;
    }
    Ok(Shape(dims))
}

impl ShapeValidator for ShapeRule {
    fn validate_and_propagate(
        &self,
        params: &Params,
        input_shapes: &[Shape],
    ) -> Result<Inferred, String> {
        match self {
            ShapeRule::Dataset => {
                let name = params
                    .get("dataset")
                    .and_then(ParamValue::as_str)
                    .ok_or("dataset node has no dataset selected")?;
                let info = registry::dataset_info(name)
                    .ok_or_else(|| format!("unknown dataset '{}'", name))?;
                Ok(Inferred::shape(info.shape()))
            }

            ShapeRule::Preserve => Ok(Inferred::shape(single(input_shapes)?.clone())),

            ShapeRule::Scalar => {
                single(input_shapes)?;
                Ok(Inferred::shape(Shape(Vec::new())))
            }

            ShapeRule::Linear => {
                let input = single(input_shapes)?;
                if input.rank() < 2 {
                    return Err(format!("Linear expects at least [B, features], got {}", input));
                }
                let last = input.last().ok_or("Input shape cannot be empty")?;
                let out_features = int_param(params, "out_features")?;

                let mut out_shape = input.0.clone();
                let last_idx = out_shape.len() - 1;
                out_shape[last_idx] = Dim::Fixed(out_features);

                Ok(Inferred::shape(Shape(out_shape)).with("in_features", last))
            }

            ShapeRule::Conv { spatial } => {
                let input = single(input_shapes)?;
                expect_rank(input, &[spatial + 2], "convolution")?;
                let out = apply_window(
                    input,
                    Dim::Fixed(int_param(params, "out_channels")?),
                    int_param(params, "kernel_size")?,
                    int_param(params, "stride")?,
                    int_param(params, "padding")?,
                )?;
                Ok(Inferred::shape(out).with("in_channels", input.0[1]))
            }

            ShapeRule::Pool { spatial } => {
                let input = single(input_shapes)?;
                expect_rank(input, &[spatial + 2], "pooling")?;
                let kernel = int_param(params, "kernel_size")?;
                let stride = params
                    .get("stride")
                    .and_then(ParamValue::as_i64)
                    .unwrap_or(kernel);
                let padding = int_param(params, "padding")?;
                if padding.checked_mul(2).is_none_or(|total| total > kernel) {
                    return Err(format!(
                        "padding {} should be at most half of kernel size {}",
                        padding, kernel
                    ));
                }
                let out = apply_window(input, input.0[1], kernel, stride, padding)?;
                Ok(Inferred::shape(out))
            }

            ShapeRule::AdaptivePool => {
                let input = single(input_shapes)?;
                expect_rank(input, &[4], "adaptive pooling")?;
                let size = Dim::Fixed(int_param(params, "output_size")?);
                Ok(Inferred::shape(Shape(vec![input.0[0], input.0[1], size, size])))
            }

            ShapeRule::Flatten => {
                let input = single(input_shapes)?;
                let start = int_param(params, "start_dim")?;
                let start = usize::try_from(start)
                    .map_err(|_| format!("start_dim must be non-negative, got {}", start))?;
                if start >= input.rank() {
                    return Err(format!(
                        "start_dim {} is out of range for {} (rank {})",
                        start,
                        input,
                        input.rank()
                    ));
                }

                let mut flat_size: i64 = 1;
                let mut has_unknown = false;
                for dim in &input.0[start..] {
                    match dim {
                        Dim::Fixed(val) => {
                            flat_size = flat_size
                                .checked_mul(*val)
                                .ok_or_else(|| overflow(&format!("flattening {}", input)))?;
                        }
                        Dim::Unknown => has_unknown = true,
                        Dim::Batch => {
                            return Err("Cannot flatten across the Batch dimension!".to_string());
                        }
                    }
                }

                let mut output_shape = input.0[..start].to_vec();
                output_shape.push(if has_unknown {
                    Dim::Unknown
                } else {
                    Dim::Fixed(flat_size)
                });
                Ok(Inferred::shape(Shape(output_shape)))
            }

            ShapeRule::BatchNorm { ranks } => {
                let input = single(input_shapes)?;
                expect_rank(input, ranks, "batch normalization")?;
                Ok(Inferred::shape(input.clone()).with("num_features", input.0[1]))
            }

            ShapeRule::LayerNorm => {
                let input = single(input_shapes)?;
                let last = input.last().ok_or("Input shape cannot be empty")?;
                Ok(Inferred::shape(input.clone()).with("normalized_shape", last))
            }

            ShapeRule::Add => {
                if input_shapes.len() < 2 {
                    return Err("Add layer requires at least two inputs".to_string());
                }

                let base_shape = &input_shapes[0];

                for (i, shape) in input_shapes.iter().enumerate().skip(1) {
                    if shape != base_shape {
                        return Err(format!(
                            "Shape mismatch in Add layer! Input 0 has shape {} but Input {} has shape {}",
                            base_shape, i, shape
                        ));
                    }
                }

                Ok(Inferred::shape(base_shape.clone()))
            }

            ShapeRule::Concat => {
                if input_shapes.len() < 2 {
                    return Err("Concat layer requires at least two inputs".to_string());
                }
                let axis = int_param(params, "dim")?;

                let base_shape = &input_shapes[0].0;
                let rank = base_shape.len() as i64;

                let actual_axis = if axis < 0 { rank + axis } else { axis };
                if actual_axis < 0 || actual_axis >= rank {
                    return Err(format!("Invalid dim {} for shape of rank {}", axis, rank));
                }
                let actual_axis = actual_axis as usize;

                let mut sum_concat_dim: i64 = 0;
                let mut has_unknown = false;

                for (i, shape) in input_shapes.iter().enumerate() {
                    let current_shape = &shape.0;

                    if current_shape.len() != base_shape.len() {
                        return Err(format!(
                            "Rank mismatch in Concat! Input 0 has {} dims, but Input {} has {} dims",
                            base_shape.len(),
                            i,
                            current_shape.len()
                        ));
                    }

                    for (dim_idx, dim) in current_shape.iter().enumerate() {
                        if dim_idx == actual_axis {
                            match dim {
                                Dim::Fixed(val) => {
                                    sum_concat_dim = sum_concat_dim
                                        .checked_add(*val)
                                        .ok_or_else(|| overflow("the concatenated dimension"))?;
                                }
                                Dim::Unknown => has_unknown = true,
                                Dim::Batch => {
                                    return Err(
                                        "Cannot concatenate along the Batch dimension!".to_string()
                                    );
                                }
                            }
                        } else if dim != &base_shape[dim_idx]
                            && *dim != Dim::Unknown
                            && base_shape[dim_idx] != Dim::Unknown
                        {
                            return Err(format!(
                                "Shape mismatch in Concat at dimension {}! Input 0 has {} but Input {} has {}",
                                dim_idx, base_shape[dim_idx], i, dim
                            ));
                        }
                    }
                }

                let mut out_shape = base_shape.clone();
                out_shape[actual_axis] = if has_unknown {
                    Dim::Unknown
                } else {
                    Dim::Fixed(sum_concat_dim)
                };

                Ok(Inferred::shape(Shape(out_shape)))
            }

            ShapeRule::Block(BlockKind::Residual) => {
                let input = single(input_shapes)?;
                expect_rank(input, &[4], "residual block")?;
                let out = apply_window(
                    input,
                    Dim::Fixed(int_param(params, "out_channels")?),
                    3,
                    int_param(params, "stride")?,
                    1,
                )?;
                Ok(Inferred::shape(out).with("in_channels", input.0[1]))
            }

            ShapeRule::Block(BlockKind::Inception) => {
                let input = single(input_shapes)?;
                expect_rank(input, &[4], "inception block")?;
                let mut channels: i64 = 0;
                for branch in ["out_1x1", "out_3x3", "out_5x5", "pool_proj"] {
                    channels = channels
                        .checked_add(int_param(params, branch)?)
                        .ok_or_else(|| overflow("the inception channel count"))?;
                }
                let mut dims = input.0.clone();
                dims[1] = Dim::Fixed(channels);
                Ok(Inferred::shape(Shape(dims)).with("in_channels", input.0[1]))
            }
        }
    }
}

/// Registry defaults overlaid with what the user set.
pub fn resolved_params(node: &Node, spec: &OperatorSpec) -> Params {
    let mut params = spec.defaults();
    params.extend(node.params.iter().map(|(k, v)| (k.clone(), v.clone())));
    params
}

/// Output types a producer presents to one specific consumer.
///
/// Training-configuration nodes are retyped by what they feed: metrics see
/// a `prediction`, optimizers see something `trainable`.
pub fn effective_output_types(
    producer: &OperatorSpec,
    consumer: &OperatorSpec,
) -> Vec<SemanticType> {
    if producer.category == Category::Training {
        match consumer.category {
            Category::Metrics => return vec![SemanticType::Prediction],
            Category::Optimization => return vec![SemanticType::Trainable],
            _ => {}
        }
    }
    producer.output_types.clone()
}

/// Overlay keyed by node id: output shapes, output types and the parameters
/// inferred from upstream shapes (`in_features`, `in_channels`, ...).
/// Nothing reaches the editable nodes until [`Propagation::apply`] is called.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Propagation {
    shapes: BTreeMap<String, Shape>,
    types: BTreeMap<String, SemanticType>,
    type_sets: BTreeMap<String, Vec<SemanticType>>,
    inferred: BTreeMap<String, Params>,
}

impl Propagation {
    pub fn shape(&self, id: &str) -> Option<&Shape> {
        self.shapes.get(id)
    }

    pub fn output_type(&self, id: &str) -> Option<SemanticType> {
        self.types.get(id).copied()
    }

    pub fn output_types(&self, id: &str) -> &[SemanticType] {
        self.type_sets.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Parameters derived from upstream shapes, separate from user input.
    pub fn inferred(&self, id: &str) -> Option<&Params> {
        self.inferred.get(id)
    }

    /// Defaults, then user params, then inferred params.
    pub fn effective_params(&self, node: &Node, spec: &OperatorSpec) -> Params {
        let mut params = resolved_params(node, spec);
        if let Some(inferred) = self.inferred.get(&node.id) {
            params.extend(inferred.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        params
    }

    /// Writes the overlay onto the nodes' derived fields and params.
    pub fn apply(&self, nodes: &mut [Node]) {
        for node in nodes.iter_mut() {
            node.propagated_output_shape = self.shapes.get(&node.id).cloned();
            node.propagated_output_type = self.types.get(&node.id).copied();
            node.propagated_output_types =
                self.type_sets.get(&node.id).cloned().unwrap_or_default();
            if let Some(inferred) = self.inferred.get(&node.id) {
                for (name, value) in inferred {
                    node.params.insert(name.clone(), value.clone());
                }
            }
        }
    }

    fn record_types(&mut self, id: &str, spec: &OperatorSpec) {
        if let Some(output) = spec.output_type {
            self.types.insert(id.to_string(), output);
        }
        if !spec.output_types.is_empty() {
            self.type_sets
                .insert(id.to_string(), spec.output_types.clone());
        }
    }
}

/// Walks the graph in topological order and computes every reachable
/// node's output shape and semantic type.
///
/// Nodes without a complete set of input shapes (detached from the root) are
/// left out of the overlay. Pipeline nodes only receive types. The first node
/// whose rule fails aborts the pass.
pub fn propagate(nodes: &[Node], edges: &[Edge]) -> Result<Propagation, CompileError> {
    let (propagation, mut failures) = propagate_partial(nodes, edges)?;
    if failures.is_empty() {
        Ok(propagation)
    } else {
        Err(failures.swap_remove(0))
    }
}

/// Same walk as [`propagate`], but a node whose rule fails is recorded and
/// left out of the overlay, so its descendants stay unshaped while the rest
/// of the graph is still computed. Only graph-level problems (unknown
/// operators, cycles) are returned as `Err`.
pub fn propagate_partial(
    nodes: &[Node],
    edges: &[Edge],
) -> Result<(Propagation, Vec<CompileError>), CompileError> {
    let processor = GraphProcessor::new(nodes, edges)?;
    let mut propagation = Propagation::default();
    let mut failures = Vec::new();

    for id in processor.topological()? {
        let (Some(node), Some(spec)) = (processor.node(id), processor.spec(id)) else {
            continue;
        };

        if node.is_pipeline {
            propagation.record_types(id, spec);
            continue;
        }

        let params = resolved_params(node, spec);
        let result = if spec.shape_rule == ShapeRule::Dataset {
            spec.shape_rule
                .validate_and_propagate(&params, &[])
                .map_err(|reason| CompileError::parameter(id, reason))
        } else {
            let sources = processor.operand_sources(id);
            // merge arity is reported by validate_graph
            if sources.is_empty() || (spec.is_merge() && sources.len() < 2) {
                continue;
            }
            let input_shapes: Option<Vec<Shape>> = sources
                .iter()
                .map(|source| propagation.shapes.get(*source).cloned())
                .collect();
            let Some(input_shapes) = input_shapes else {
                continue;
            };
            spec.shape_rule
                .validate_and_propagate(&params, &input_shapes)
                .map_err(|reason| CompileError::shape(id, reason))
        };

        let inferred = match result {
            Ok(inferred) => inferred,
            Err(error) => {
                log::debug!("Propagation stopped at {}: {}", id, error);
                failures.push(error);
                continue;
            }
        };

        if !inferred.params.is_empty() {
            propagation.inferred.insert(
                id.to_string(),
                inferred
                    .params
                    .into_iter()
                    .map(|(name, value)| (name.to_string(), value))
                    .collect(),
            );
        }
        propagation.shapes.insert(id.to_string(), inferred.shape);
        propagation.record_types(id, spec);
    }

    Ok((propagation, failures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::graph::EdgeKind;
    use pretty_assertions::assert_eq;

    fn params(pairs: &[(&str, ParamValue)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn conv_output_size_formula() {
        let p = params(&[
            ("out_channels", 32.into()),
            ("kernel_size", 3.into()),
            ("stride", 1.into()),
            ("padding", 0.into()),
        ]);
        let out = ShapeRule::Conv { spatial: 2 }
            .validate_and_propagate(&p, &[Shape::image(3, 32, 32)])
            .unwrap();
        assert_eq!(out.shape, Shape::image(32, 30, 30));
        assert_eq!(out.params, vec![("in_channels", ParamValue::Int(3))]);
    }

    #[test]
    fn strided_padded_conv() {
        assert_eq!(window(Dim::Fixed(32), 3, 2, 1).unwrap(), Dim::Fixed(16));
        assert_eq!(window(Dim::Fixed(7), 3, 2, 0).unwrap(), Dim::Fixed(3));
        assert_eq!(window(Dim::Batch, 3, 2, 0).unwrap(), Dim::Batch);
        assert!(window(Dim::Fixed(2), 5, 1, 0).is_err());
    }

    #[test]
    fn pooling_defaults_stride_to_kernel() {
        let p = params(&[("kernel_size", 2.into()), ("padding", 0.into())]);
        let out = ShapeRule::Pool { spatial: 2 }
            .validate_and_propagate(&p, &[Shape::image(32, 30, 30)])
            .unwrap();
        assert_eq!(out.shape, Shape::image(32, 15, 15));
        assert!(out.params.is_empty());
    }

    #[test]
    fn flatten_collapses_from_start_dim() {
        let p = params(&[("start_dim", 1.into())]);
        let out = ShapeRule::Flatten
            .validate_and_propagate(&p, &[Shape::image(1, 28, 28)])
            .unwrap();
        assert_eq!(out.shape, Shape(vec![Dim::Batch, Dim::Fixed(784)]));
    }

    #[test]
    fn add_requires_identical_shapes() {
        let a = Shape::image(16, 8, 8);
        let b = Shape::image(32, 8, 8);
        let err = ShapeRule::Add
            .validate_and_propagate(&Params::new(), &[a.clone(), b])
            .unwrap_err();
        assert!(err.contains("Shape mismatch in Add"));
        assert!(
            ShapeRule::Add
                .validate_and_propagate(&Params::new(), &[a])
                .is_err()
        );
    }

    #[test]
    fn concat_sums_the_concatenated_dim() {
        let p = params(&[("dim", 1.into())]);
        let out = ShapeRule::Concat
            .validate_and_propagate(
                &p,
                &[
                    Shape::image(8, 16, 16),
                    Shape::image(16, 16, 16),
                    Shape::image(4, 16, 16),
                ],
            )
            .unwrap();
        assert_eq!(out.shape, Shape::image(28, 16, 16));
    }

    #[test]
    fn concat_rejects_mismatched_spatial_dims() {
        let p = params(&[("dim", 1.into())]);
        assert!(
            ShapeRule::Concat
                .validate_and_propagate(&p, &[Shape::image(8, 16, 16), Shape::image(8, 8, 8)])
                .is_err()
        );
    }

    #[test]
    fn inception_block_channels() {
        let p = params(&[
            ("out_1x1", 64.into()),
            ("out_3x3", 128.into()),
            ("out_5x5", 32.into()),
            ("pool_proj", 32.into()),
        ]);
        let out = ShapeRule::Block(BlockKind::Inception)
            .validate_and_propagate(&p, &[Shape::image(192, 28, 28)])
            .unwrap();
        assert_eq!(out.shape, Shape::image(256, 28, 28));
    }

    #[test]
    fn mnist_flatten_linear_infers_in_features() {
        let nodes = vec![
            Node::new("data", "dataset").with_param("dataset", "MNIST"),
            Node::new("flat", "flatten"),
            Node::new("fc", "linear").with_param("out_features", 10),
        ];
        let edges = vec![Edge::new("e1", "data", "flat"), Edge::new("e2", "flat", "fc")];

        let propagation = propagate(&nodes, &edges).unwrap();
        assert_eq!(
            propagation.inferred("fc").unwrap()["in_features"],
            ParamValue::Int(784)
        );
        assert_eq!(
            propagation.shape("fc"),
            Some(&Shape(vec![Dim::Batch, Dim::Fixed(10)]))
        );
        assert_eq!(propagation.output_type("data"), Some(SemanticType::Dataset));
        assert_eq!(propagation.output_type("fc"), Some(SemanticType::Tensor));

        // the user's bag is untouched until the overlay is applied
        assert!(!nodes[2].params.contains_key("in_features"));
        let mut edited = nodes.clone();
        propagation.apply(&mut edited);
        assert_eq!(edited[2].params["in_features"], ParamValue::Int(784));
        assert_eq!(
            edited[2].propagated_output_shape,
            Some(Shape(vec![Dim::Batch, Dim::Fixed(10)]))
        );
    }

    #[test]
    fn stale_user_value_is_overridden_by_inference() {
        let nodes = vec![
            Node::new("data", "dataset").with_param("dataset", "CIFAR10"),
            Node::new("conv", "conv2d").with_param("in_channels", 1),
        ];
        let edges = vec![Edge::new("e1", "data", "conv")];
        let propagation = propagate(&nodes, &edges).unwrap();
        let spec = registry::lookup_node(&nodes[1]).unwrap();
        assert_eq!(
            propagation.effective_params(&nodes[1], spec)["in_channels"],
            ParamValue::Int(3)
        );
    }

    #[test]
    fn sum_merge_shape_conflict_is_a_hard_failure() {
        let nodes = vec![
            Node::new("data", "dataset").with_param("dataset", "CIFAR10"),
            Node::new("a", "conv2d").with_param("out_channels", 16),
            Node::new("b", "conv2d").with_param("out_channels", 32),
            Node::new("sum", "add"),
        ];
        let edges = vec![
            Edge::new("e1", "data", "a"),
            Edge::new("e2", "data", "b"),
            Edge::new("e3", "a", "sum").with_kind(EdgeKind::Sum),
            Edge::new("e4", "b", "sum").with_kind(EdgeKind::Sum),
        ];
        let err = propagate(&nodes, &edges).unwrap_err();
        assert!(matches!(err, CompileError::ShapeMismatch { ref node, .. } if node == "sum"));
    }

    #[test]
    fn training_config_is_retyped_by_its_consumer() {
        let training = registry::lookup(crate::engine::types::GraphMode::Pipeline, "trainingconfig")
            .unwrap();
        let adam = registry::lookup(crate::engine::types::GraphMode::Pipeline, "adam").unwrap();
        let accuracy =
            registry::lookup(crate::engine::types::GraphMode::Pipeline, "accuracy").unwrap();
        assert_eq!(
            effective_output_types(training, adam),
            vec![SemanticType::Trainable]
        );
        assert_eq!(
            effective_output_types(training, accuracy),
            vec![SemanticType::Prediction]
        );
    }

    #[test]
    fn huge_sizes_are_errors_not_overflows() {
        assert!(window(Dim::Fixed(28), 3, 1, i64::MAX).is_err());

        let p = params(&[("start_dim", 1.into())]);
        let wide = Shape(vec![
            Dim::Batch,
            Dim::Fixed(1 << 62),
            Dim::Fixed(26),
            Dim::Fixed(26),
        ]);
        let err = ShapeRule::Flatten.validate_and_propagate(&p, &[wide]).unwrap_err();
        assert!(err.contains("too large"));

        let p = params(&[("dim", 1.into())]);
        let half = Shape::image(i64::MAX / 2 + 1, 4, 4);
        assert!(
            ShapeRule::Concat
                .validate_and_propagate(&p, &[half.clone(), half])
                .is_err()
        );

        let p = params(&[
            ("out_1x1", i64::MAX.into()),
            ("out_3x3", 1.into()),
            ("out_5x5", 1.into()),
            ("pool_proj", 1.into()),
        ]);
        assert!(
            ShapeRule::Block(BlockKind::Inception)
                .validate_and_propagate(&p, &[Shape::image(3, 8, 8)])
                .is_err()
        );
    }

    #[test]
    fn partial_propagation_keeps_going_past_a_failing_node() {
        let nodes = vec![
            Node::new("data", "dataset").with_param("dataset", "MNIST"),
            Node::new("conv", "conv2d").with_param("kernel_size", 31),
            Node::new("act", "relu"),
            Node::new("flat", "flatten"),
        ];
        let edges = vec![
            Edge::new("e1", "data", "conv"),
            Edge::new("e2", "conv", "act"),
            Edge::new("e3", "data", "flat"),
        ];

        let (propagation, failures) = propagate_partial(&nodes, &edges).unwrap();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], CompileError::ShapeMismatch { ref node, .. } if node == "conv"));
        assert_eq!(propagation.shape("conv"), None);
        assert_eq!(propagation.shape("act"), None);
        assert_eq!(
            propagation.shape("flat"),
            Some(&Shape(vec![Dim::Batch, Dim::Fixed(784)]))
        );

        assert!(propagate(&nodes, &edges).is_err());
    }

    #[test]
    fn unknown_dataset_is_a_parameter_error() {
        let nodes = vec![Node::new("data", "dataset").with_param("dataset", "SVHN")];
        let err = propagate(&nodes, &[]).unwrap_err();
        assert!(matches!(err, CompileError::Parameter { .. }));
    }
}
