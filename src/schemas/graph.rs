// Graph definitions exchanged with the editor
use crate::engine::types::{GraphMode, ParamValue, Params, SemanticType, Shape};
use crate::error::CompileError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub operator_id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub is_pipeline: bool,

    // Written by shape propagation only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagated_output_shape: Option<Shape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagated_output_type: Option<SemanticType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub propagated_output_types: Vec<SemanticType>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub position: Value, // Position in the graph editor
}

impl Node {
    pub fn new(id: impl Into<String>, operator_id: impl Into<String>) -> Self {
        let operator_id = operator_id.into();
        Self {
            id: id.into(),
            label: operator_id.clone(),
            operator_id,
            params: Params::new(),
            is_pipeline: false,
            propagated_output_shape: None,
            propagated_output_type: None,
            propagated_output_types: Vec::new(),
            position: Value::Null,
        }
    }

    /// Same as [`Node::new`] but placed in the pipeline graph.
    pub fn pipeline(id: impl Into<String>, operator_id: impl Into<String>) -> Self {
        Self {
            is_pipeline: true,
            ..Self::new(id, operator_id)
        }
    }

    pub fn with_param(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    pub fn mode(&self) -> GraphMode {
        if self.is_pipeline {
            GraphMode::Pipeline
        } else {
            GraphMode::Architecture
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    #[default]
    Normal,
    Residual,
    Sum,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub kind: EdgeKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            kind: EdgeKind::Normal,
            source_handle: None,
            target_handle: None,
        }
    }

    pub fn with_kind(mut self, kind: EdgeKind) -> Self {
        self.kind = kind;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Both editor graphs of one project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    pub architecture: Graph,
    #[serde(default)]
    pub pipeline: Graph,
}

impl Project {
    pub fn from_json(json: &str) -> Result<Self, CompileError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, CompileError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn editor_json_round_trips() {
        let doc = json!({
            "architecture": {
                "nodes": [
                    {"id": "data", "operatorId": "dataset", "label": "Data",
                     "params": {"dataset": "MNIST"}, "position": {"x": 10, "y": 20}},
                    {"id": "fc", "operatorId": "linear", "label": "FC",
                     "params": {"out_features": 10, "bias": true}}
                ],
                "edges": [
                    {"id": "e1", "source": "data", "target": "fc"},
                    {"id": "e2", "source": "data", "target": "fc", "kind": "residual",
                     "sourceHandle": "out"}
                ]
            },
            "pipeline": {"nodes": [], "edges": []}
        });

        let project: Project = serde_json::from_value(doc.clone()).unwrap();
        assert_eq!(project.architecture.edges[0].kind, EdgeKind::Normal);
        assert_eq!(project.architecture.edges[1].kind, EdgeKind::Residual);
        assert!(!project.architecture.nodes[0].is_pipeline);

        let reparsed = Project::from_json(&project.to_json().unwrap()).unwrap();
        assert_eq!(reparsed, project);
    }

    #[test]
    fn builder_helpers() {
        let node = Node::pipeline("opt", "adam").with_param("lr", 0.01);
        assert_eq!(node.mode(), GraphMode::Pipeline);
        assert_eq!(node.params["lr"], ParamValue::Float(0.01));

        let edge = Edge::new("e", "a", "b").with_kind(EdgeKind::Sum);
        assert_eq!(edge.kind, EdgeKind::Sum);
    }
}
