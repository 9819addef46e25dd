// Types used in the engine module
use crate::error::CompileError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which of the two editor graphs a node or registry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum GraphMode {
    Architecture,
    Pipeline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    // Architecture graph
    Input,
    Layer,
    Activation,
    Pooling,
    Normalization,
    Regularization,
    Utility,
    Merge,
    Block,
    Loss,
    // Pipeline graph
    Dataset,
    DataAugmentation,
    Training,
    Optimization,
    Metrics,
    Callbacks,
}

impl Category {
    /// Categories a pipeline node of this category may feed.
    pub fn workflow_successors(self) -> &'static [Category] {
        match self {
            Category::Dataset => &[Category::DataAugmentation, Category::Training],
            Category::DataAugmentation => &[Category::DataAugmentation, Category::Training],
            Category::Training => &[
                Category::Optimization,
                Category::Metrics,
                Category::Callbacks,
            ],
            Category::Optimization | Category::Metrics => &[Category::Callbacks],
            _ => &[],
        }
    }

    pub fn is_root(self) -> bool {
        matches!(self, Category::Input | Category::Dataset)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Abstract producer/consumer tag checked independently of tensor shapes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Dataset,
    Tensor,
    Loss,
    Prediction,
    Trainable,
    Optimizer,
    Metric,
    Callback,
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SemanticType::Dataset => "dataset",
            SemanticType::Tensor => "tensor",
            SemanticType::Loss => "loss",
            SemanticType::Prediction => "prediction",
            SemanticType::Trainable => "trainable",
            SemanticType::Optimizer => "optimizer",
            SemanticType::Metric => "metric",
            SemanticType::Callback => "callback",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Dim {
    Fixed(i64),
    Batch,
    Unknown,
}

impl Dim {
    pub fn fixed(self) -> Option<i64> {
        match self {
            Dim::Fixed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_symbolic(self) -> bool {
        !matches!(self, Dim::Fixed(_))
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(value) => write!(f, "{}", value),
            Dim::Batch => f.write_str("B"),
            Dim::Unknown => f.write_str("?"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Shape(pub Vec<Dim>);

impl Shape {
    /// `[Batch, channels, height, width]`
    pub fn image(channels: i64, height: i64, width: i64) -> Self {
        Shape(vec![
            Dim::Batch,
            Dim::Fixed(channels),
            Dim::Fixed(height),
            Dim::Fixed(width),
        ])
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[Dim] {
        &self.0
    }

    pub fn last(&self) -> Option<Dim> {
        self.0.last().copied()
    }

    pub fn get(&self, index: usize) -> Option<Dim> {
        self.0.get(index).copied()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", dim)?;
        }
        f.write_str("]")
    }
}

/// A single node parameter as it arrives from the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(value) => Some(*value as f64),
            ParamValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Python literal for this value.
    pub fn to_python(&self) -> String {
        match self {
            ParamValue::Bool(true) => "True".to_string(),
            ParamValue::Bool(false) => "False".to_string(),
            ParamValue::Int(value) => value.to_string(),
            ParamValue::Float(value) if value.is_infinite() => {
                if value.is_sign_positive() {
                    "float('inf')".to_string()
                } else {
                    "float('-inf')".to_string()
                }
            }
            ParamValue::Float(value) => format!("{:?}", value),
            ParamValue::Str(value) => python_string(value),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(i64::from(value))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

pub fn python_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

pub type Params = BTreeMap<String, ParamValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ParamKind {
    Int {
        min: Option<i64>,
        max: Option<i64>,
    },
    Float {
        min: Option<f64>,
        max: Option<f64>,
    },
    Bool,
    Enum {
        options: &'static [&'static str],
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    #[serde(flatten)]
    pub kind: ParamKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,
}

impl ParamSpec {
    pub fn int(name: &'static str, default: i64, min: Option<i64>, max: Option<i64>) -> Self {
        Self {
            name,
            kind: ParamKind::Int { min, max },
            required: true,
            default: Some(ParamValue::Int(default)),
        }
    }

    pub fn float(name: &'static str, default: f64, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            name,
            kind: ParamKind::Float { min, max },
            required: true,
            default: Some(ParamValue::Float(default)),
        }
    }

    pub fn boolean(name: &'static str, default: bool) -> Self {
        Self {
            name,
            kind: ParamKind::Bool,
            required: true,
            default: Some(ParamValue::Bool(default)),
        }
    }

    pub fn choice(
        name: &'static str,
        default: &'static str,
        options: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            kind: ParamKind::Enum { options },
            required: true,
            default: Some(ParamValue::Str(default.to_string())),
        }
    }

    /// Drops the default and the requirement: the value is either set by the
    /// user, inferred during propagation, or left out of the emitted call.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self.default = None;
        self
    }

    pub fn check(&self, value: &ParamValue) -> Result<(), String> {
        match &self.kind {
            ParamKind::Int { min, max } => {
                let v = value
                    .as_i64()
                    .ok_or_else(|| format!("'{}' expects an integer", self.name))?;
                check_bounds(self.name, v, *min, *max)
            }
            ParamKind::Float { min, max } => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| format!("'{}' expects a number", self.name))?;
                if !v.is_finite() {
                    return Err(format!("'{}' must be finite", self.name));
                }
                check_bounds(self.name, v, *min, *max)
            }
            ParamKind::Bool => value
                .as_bool()
                .map(|_| ())
                .ok_or_else(|| format!("'{}' expects a boolean", self.name)),
            ParamKind::Enum { options } => {
                let v = value
                    .as_str()
                    .ok_or_else(|| format!("'{}' expects one of {:?}", self.name, options))?;
                if options.contains(&v) {
                    Ok(())
                } else {
                    Err(format!(
                        "'{}' must be one of {:?}, got '{}'",
                        self.name, options, v
                    ))
                }
            }
        }
    }
}

fn check_bounds<T: PartialOrd + fmt::Display + Copy>(
    name: &str,
    value: T,
    min: Option<T>,
    max: Option<T>,
) -> Result<(), String> {
    if let Some(min) = min {
        if value < min {
            return Err(format!("'{}' must be >= {}, got {}", name, min, value));
        }
    }
    if let Some(max) = max {
        if value > max {
            return Err(format!("'{}' must be <= {}, got {}", name, max, value));
        }
    }
    Ok(())
}

/// Reusable architectural blocks that need a helper class in the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum BlockKind {
    Residual,
    Inception,
}

impl BlockKind {
    pub fn class_name(self) -> &'static str {
        match self {
            BlockKind::Residual => "ResidualBlock",
            BlockKind::Inception => "InceptionBlock",
        }
    }
}

/// How an operator transforms the shape of its input(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeRule {
    Dataset,
    Preserve,
    Linear,
    Conv { spatial: usize },
    Pool { spatial: usize },
    AdaptivePool,
    Flatten,
    BatchNorm { ranks: &'static [usize] },
    LayerNorm,
    Add,
    Concat,
    Block(BlockKind),
    Scalar,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorSpec {
    pub id: &'static str,
    pub category: Category,
    pub label: &'static str,
    pub description: &'static str,
    #[serde(rename = "paramSchema")]
    pub params: Vec<ParamSpec>,
    #[serde(rename = "declaredInputType")]
    pub input_type: Option<SemanticType>,
    #[serde(rename = "acceptedTypes")]
    pub accepted_types: Vec<SemanticType>,
    #[serde(rename = "declaredOutputType")]
    pub output_type: Option<SemanticType>,
    #[serde(rename = "declaredOutputTypes")]
    pub output_types: Vec<SemanticType>,
    #[serde(skip)]
    pub shape_rule: ShapeRule,
    #[serde(skip)]
    pub callee: Option<&'static str>,
}

impl OperatorSpec {
    pub fn new(
        id: &'static str,
        category: Category,
        label: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            id,
            category,
            label,
            description,
            params: Vec::new(),
            input_type: None,
            accepted_types: Vec::new(),
            output_type: None,
            output_types: Vec::new(),
            shape_rule: ShapeRule::Preserve,
            callee: None,
        }
    }

    pub fn params(mut self, params: Vec<ParamSpec>) -> Self {
        self.params = params;
        self
    }

    pub fn rule(mut self, rule: ShapeRule) -> Self {
        self.shape_rule = rule;
        self
    }

    pub fn callee(mut self, callee: &'static str) -> Self {
        self.callee = Some(callee);
        self
    }

    pub fn consumes(mut self, input: SemanticType, accepted: &[SemanticType]) -> Self {
        self.input_type = Some(input);
        self.accepted_types = accepted.to_vec();
        self
    }

    pub fn produces(mut self, output: SemanticType) -> Self {
        self.output_type = Some(output);
        self.output_types = vec![output];
        self
    }

    /// Polymorphic producer: no single declared output type.
    pub fn produces_any(mut self, outputs: &[SemanticType]) -> Self {
        self.output_type = None;
        self.output_types = outputs.to_vec();
        self
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn defaults(&self) -> Params {
        self.params
            .iter()
            .filter_map(|p| p.default.clone().map(|v| (p.name.to_string(), v)))
            .collect()
    }

    pub fn is_root(&self) -> bool {
        self.category.is_root()
    }

    pub fn is_loss(&self) -> bool {
        self.category == Category::Loss
    }

    pub fn is_merge(&self) -> bool {
        matches!(self.shape_rule, ShapeRule::Add | ShapeRule::Concat)
    }

    pub fn block(&self) -> Option<BlockKind> {
        match self.shape_rule {
            ShapeRule::Block(kind) => Some(kind),
            _ => None,
        }
    }

    /// Whether any of `produced` satisfies this operator's input declaration.
    pub fn accepts(&self, produced: &[SemanticType]) -> bool {
        produced
            .iter()
            .any(|t| self.input_type == Some(*t) || self.accepted_types.contains(t))
    }

    /// Checks a node's parameter bag against the schema.
    pub fn validate_params(&self, node_id: &str, params: &Params) -> Vec<CompileError> {
        let mut errors = Vec::new();

        for spec in &self.params {
            match params.get(spec.name) {
                Some(value) => {
                    if let Err(reason) = spec.check(value) {
                        errors.push(CompileError::parameter(node_id, reason));
                    }
                }
                None if spec.required && spec.default.is_none() => {
                    errors.push(CompileError::parameter(
                        node_id,
                        format!("missing required parameter '{}'", spec.name),
                    ));
                }
                None => {}
            }
        }

        for name in params.keys() {
            if self.param(name).is_none() {
                errors.push(CompileError::parameter(
                    node_id,
                    format!("unknown parameter '{}' for operator '{}'", name, self.id),
                ));
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_display_marks_symbolic_dims() {
        assert_eq!(Shape::image(1, 28, 28).to_string(), "[B, 1, 28, 28]");
        assert_eq!(Shape(vec![Dim::Batch, Dim::Unknown]).to_string(), "[B, ?]");
    }

    #[test]
    fn python_literals() {
        assert_eq!(ParamValue::Bool(true).to_python(), "True");
        assert_eq!(ParamValue::Float(1.0).to_python(), "1.0");
        assert_eq!(ParamValue::Float(0.001).to_python(), "0.001");
        assert_eq!(ParamValue::Int(32).to_python(), "32");
        assert_eq!(ParamValue::from("it's").to_python(), "'it\\'s'");
    }

    #[test]
    fn untagged_params_deserialize_by_json_kind() {
        let params: Params =
            serde_json::from_str(r#"{"a": 3, "b": 0.5, "c": true, "d": "max"}"#).unwrap();
        assert_eq!(params["a"], ParamValue::Int(3));
        assert_eq!(params["b"], ParamValue::Float(0.5));
        assert_eq!(params["c"], ParamValue::Bool(true));
        assert_eq!(params["d"], ParamValue::Str("max".into()));
    }

    #[test]
    fn param_bounds_and_options() {
        let kernel = ParamSpec::int("kernel_size", 3, Some(1), Some(11));
        assert!(kernel.check(&ParamValue::Int(5)).is_ok());
        assert!(kernel.check(&ParamValue::Int(0)).is_err());
        assert!(kernel.check(&ParamValue::Float(3.0)).is_err());

        let rate = ParamSpec::float("lr", 0.001, Some(0.0), None);
        assert!(rate.check(&ParamValue::Int(1)).is_ok());

        let mode = ParamSpec::choice("mode", "min", &["min", "max"]);
        assert!(mode.check(&ParamValue::from("max")).is_ok());
        assert!(mode.check(&ParamValue::from("median")).is_err());
    }

    #[test]
    fn required_param_without_default_is_reported() {
        let mut spec = OperatorSpec::new("probe", Category::Layer, "Probe", "")
            .params(vec![ParamSpec::int("units", 1, Some(1), None)]);
        spec.params[0].default = None;

        let errors = spec.validate_params("n1", &Params::new());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("missing required parameter 'units'"));
    }

    #[test]
    fn unknown_params_are_rejected() {
        let spec = OperatorSpec::new("probe", Category::Layer, "Probe", "");
        let mut params = Params::new();
        params.insert("bogus".into(), ParamValue::Int(1));
        assert_eq!(spec.validate_params("n1", &params).len(), 1);
    }

    #[test]
    fn callbacks_are_terminal() {
        assert!(Category::Callbacks.workflow_successors().is_empty());
        assert!(
            Category::Training
                .workflow_successors()
                .contains(&Category::Metrics)
        );
    }
}
