use crate::config::Config;
use crate::engine::graph::{GraphProcessor, Ordering};
use crate::engine::ir::{Expr, FieldDecl, Names, Stmt};
use crate::engine::registry::{self, DatasetInfo, DatasetSplit};
use crate::engine::shape::{Propagation, propagate, resolved_params};
use crate::engine::types::{
    BlockKind, Category, GraphMode, OperatorSpec, ParamValue, Params, ShapeRule, python_string,
};
use crate::engine::validator::validate_graph;
use crate::error::CompileError;
use crate::schemas::graph::{Edge, EdgeKind, Node, Project};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use tera::Tera;

// Data handed to the program template
#[derive(Serialize)]
struct ProgramContext {
    class_name: String,
    has_metrics: bool,
    has_checkpoint: bool,
    blocks: Vec<String>,
    fields: Vec<String>,
    forward: Vec<String>,
    criterion: String,
    training: Option<TrainingContext>,
}

#[derive(Debug, Serialize)]
struct TrainingContext {
    data_root: String,
    transforms: Vec<String>,
    dataset_class: String,
    train_args: String,
    test_args: String,
    batch_size: i64,
    num_workers: i64,
    pin_memory: String,
    shuffle: String,
    device: String,
    optimizer: String,
    metrics: Vec<MetricContext>,
    epochs: i64,
    log_interval: u32,
    checkpoint: Option<CheckpointContext>,
    early_stopping: Option<EarlyStoppingContext>,
    lr_monitor: Option<LrMonitorContext>,
}

#[derive(Debug, Serialize)]
struct MetricContext {
    name: String,
    label: String,
    constructor: String,
}

#[derive(Debug, Serialize)]
struct CheckpointContext {
    monitor: String,
    save_best_only: bool,
    directory: String,
    initial: String,
    improved: String,
}

#[derive(Debug, Serialize)]
struct EarlyStoppingContext {
    monitor: String,
    patience: i64,
    initial: String,
    improved: String,
}

#[derive(Debug, Serialize)]
struct LrMonitorContext {
    every_n_epochs: i64,
}

/// `__init__` fields and `forward` body of the generated model class.
#[derive(Debug, Default, PartialEq)]
pub struct ModelClass {
    pub fields: Vec<FieldDecl>,
    pub forward: Vec<Stmt>,
    pub blocks: BTreeSet<BlockKind>,
}

/// Turns validated graphs into a PyTorch program.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    config: Config,
}

impl Compiler {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validates both graphs and emits the program text. Any validation
    /// error aborts before a single line is produced.
    pub fn generate(
        &self,
        arch_nodes: &[Node],
        arch_edges: &[Edge],
        pipe_nodes: &[Node],
        pipe_edges: &[Edge],
    ) -> Result<String, CompileError> {
        self.config.validate()?;

        let warnings =
            validate_graph(arch_nodes, arch_edges, pipe_nodes, pipe_edges).into_result()?;
        if !warnings.is_empty() {
            log::debug!("Generating with {} validation warnings", warnings.len());
        }

        let processor = GraphProcessor::new(arch_nodes, arch_edges)?;
        let ordering = processor.order()?;
        let propagation = propagate(arch_nodes, arch_edges)?;

        let model = synthesize_model(&processor, &ordering, &propagation)?;
        let dataset = root_dataset(&processor, &ordering)?;
        let criterion = self.criterion(&processor, &ordering)?;

        let training = if pipe_nodes.is_empty() {
            None
        } else {
            Some(self.synthesize_training(pipe_nodes, pipe_edges, dataset)?)
        };

        let context = ProgramContext {
            class_name: self.config.model_class_name.clone(),
            has_metrics: training.as_ref().is_some_and(|t| !t.metrics.is_empty()),
            has_checkpoint: training.as_ref().is_some_and(|t| t.checkpoint.is_some()),
            blocks: render_blocks(&model.blocks)?,
            fields: model.fields.iter().map(ToString::to_string).collect(),
            forward: model.forward.iter().map(ToString::to_string).collect(),
            criterion: criterion.to_string(),
            training,
        };

        log::debug!(
            "Emitting {} with {} fields and {} forward statements",
            context.class_name,
            context.fields.len(),
            context.forward.len()
        );
        Ok(render_program(&context)?)
    }

    pub fn generate_project(&self, project: &Project) -> Result<String, CompileError> {
        self.generate(
            &project.architecture.nodes,
            &project.architecture.edges,
            &project.pipeline.nodes,
            &project.pipeline.edges,
        )
    }

    fn criterion(
        &self,
        processor: &GraphProcessor<'_>,
        ordering: &Ordering,
    ) -> Result<Expr, CompileError> {
        if let Some(id) = &ordering.loss {
            if let (Some(node), Some(spec)) = (processor.node(id), processor.spec(id)) {
                return constructor(spec, &resolved_params(node, spec));
            }
        }

        log::warn!(
            "No loss node in the architecture graph, using {}",
            self.config.fallback_loss
        );
        let spec = registry::lookup(GraphMode::Architecture, &self.config.fallback_loss)
            .ok_or_else(|| {
                CompileError::parameter(
                    "config",
                    format!("unknown loss '{}'", self.config.fallback_loss),
                )
            })?;
        constructor(spec, &spec.defaults())
    }

    fn synthesize_training(
        &self,
        nodes: &[Node],
        edges: &[Edge],
        dataset: &DatasetInfo,
    ) -> Result<TrainingContext, CompileError> {
        let processor = GraphProcessor::new(nodes, edges)?;
        let order = processor.topological()?;
        let of_category = |category: Category| by_category(&processor, &order, category);

        // Transforms
        let mut transforms = Vec::new();
        for (node, spec) in of_category(Category::DataAugmentation) {
            transforms.push(constructor(spec, &resolved_params(node, spec))?.to_string());
        }
        if !of_category(Category::DataAugmentation)
            .iter()
            .any(|(_, spec)| spec.id == "totensor")
        {
            log::warn!("No ToTensor transform in the pipeline, inserting one");
            transforms.insert(0, "transforms.ToTensor()".to_string());
        }

        // Dataset and loaders
        let source = of_category(Category::Dataset)
            .first()
            .map(|(node, spec)| resolved_params(node, spec))
            .unwrap_or_default();
        let download = python_bool(flag(&source, "download", true));
        let (train_args, test_args) = match dataset.split {
            DatasetSplit::TrainFlag => (
                format!("train=True, download={}", download),
                format!("train=False, download={}", download),
            ),
            DatasetSplit::Named => ("split='train'".to_string(), "split='val'".to_string()),
        };

        let training = of_category(Category::Training)
            .first()
            .map(|(node, spec)| resolved_params(node, spec));
        if training.is_none() {
            log::warn!("No training configuration in the pipeline, using configured defaults");
        }
        let training = training.unwrap_or_default();
        let int = |name: &str, fallback: i64| {
            training.get(name).and_then(ParamValue::as_i64).unwrap_or(fallback)
        };
        let device = match training.get("device").and_then(ParamValue::as_str) {
            Some("cpu") => "torch.device('cpu')",
            Some("cuda") => "torch.device('cuda')",
            _ => "torch.device('cuda' if torch.cuda.is_available() else 'cpu')",
        };

        let mut names = Names::default();
        Ok(TrainingContext {
            data_root: python_string(&self.config.data_root),
            transforms,
            dataset_class: dataset.class_name.to_string(),
            train_args,
            test_args,
            batch_size: int("batch_size", i64::from(self.config.default_batch_size)),
            num_workers: int("num_workers", 2),
            pin_memory: python_bool(flag(&training, "pin_memory", true)),
            shuffle: python_bool(flag(&source, "shuffle", true)),
            device: device.to_string(),
            optimizer: optimizer(of_category(Category::Optimization).first().copied())?
                .to_string(),
            metrics: of_category(Category::Metrics)
                .into_iter()
                .map(|(node, spec)| metric(node, spec, dataset, &mut names))
                .collect::<Result<_, _>>()?,
            epochs: int("epochs", i64::from(self.config.default_epochs)),
            log_interval: self.config.log_interval,
            checkpoint: first_of(&of_category(Category::Callbacks), "modelcheckpoint")
                .map(|params| checkpoint(&params, &self.config.checkpoint_dir)),
            early_stopping: first_of(&of_category(Category::Callbacks), "earlystopping")
                .map(|params| early_stopping(&params)),
            lr_monitor: first_of(&of_category(Category::Callbacks), "lrmonitor").map(|params| {
                LrMonitorContext {
                    every_n_epochs: params
                        .get("log_every_n_epochs")
                        .and_then(ParamValue::as_i64)
                        .unwrap_or(1),
                }
            }),
        })
    }
}

// Pipeline nodes of one category in workflow order
fn by_category<'a>(
    processor: &GraphProcessor<'a>,
    order: &[&'a str],
    category: Category,
) -> Vec<(&'a Node, &'static OperatorSpec)> {
    order
        .iter()
        .filter_map(|id| Some((processor.node(id)?, processor.spec(id)?)))
        .filter(|(_, spec)| spec.category == category)
        .collect()
}

/// Compiles with [`Config::default`].
pub fn generate(
    arch_nodes: &[Node],
    arch_edges: &[Edge],
    pipe_nodes: &[Node],
    pipe_edges: &[Edge],
) -> Result<String, CompileError> {
    Compiler::default().generate(arch_nodes, arch_edges, pipe_nodes, pipe_edges)
}

/// Builds the model class from an emission order.
///
/// The root's output is the `forward` argument `x`. Each node gets one
/// assignment, followed by one accumulate statement per residual or sum
/// edge it receives; the body returns the last assigned variable.
pub fn synthesize_model(
    processor: &GraphProcessor<'_>,
    ordering: &Ordering,
    propagation: &Propagation,
) -> Result<ModelClass, CompileError> {
    let mut names = Names::default();
    let mut model = ModelClass::default();
    let mut last = Expr::var("x");

    let variable = |id: &str, names: &mut Names| -> String {
        if id == ordering.root {
            "x".to_string()
        } else {
            names.output(id)
        }
    };

    for id in &ordering.nodes {
        let (Some(node), Some(spec)) = (processor.node(id), processor.spec(id)) else {
            return Err(CompileError::Structural(format!("node {} vanished from the graph", id)));
        };
        let params = propagation.effective_params(node, spec);
        let operands: Vec<Expr> = ordering
            .inputs_of(id)
            .iter()
            .map(|source| Expr::var(variable(source.as_str(), &mut names)))
            .collect();

        let value = node_expr(id, spec, &params, operands, &mut names, &mut model)?;
        let target = names.output(id);
        model.forward.push(Stmt::Assign {
            target: target.clone(),
            value,
        });

        for (kind, sources) in [
            (EdgeKind::Residual, &ordering.residual_sources),
            (EdgeKind::Sum, &ordering.merge_sources),
        ] {
            for source in sources.get(id).into_iter().flatten() {
                model.forward.push(Stmt::Accumulate {
                    target: target.clone(),
                    operand: variable(source.as_str(), &mut names),
                    kind,
                });
            }
        }
        last = Expr::var(target);
    }

    model.forward.push(Stmt::Return(last));
    Ok(model)
}

fn node_expr(
    id: &str,
    spec: &OperatorSpec,
    params: &Params,
    operands: Vec<Expr>,
    names: &mut Names,
    model: &mut ModelClass,
) -> Result<Expr, CompileError> {
    match spec.shape_rule {
        ShapeRule::Add => return Ok(Expr::Sum(operands)),
        ShapeRule::Concat => {
            let dim = params.get("dim").and_then(ParamValue::as_i64).unwrap_or(1);
            return Ok(Expr::Concat {
                items: operands,
                dim,
            });
        }
        _ => {}
    }

    let input = operands
        .into_iter()
        .next()
        .ok_or_else(|| CompileError::Connectivity(format!("node {} has no input", id)))?;

    if spec.shape_rule == ShapeRule::Flatten {
        let start_dim = params.get("start_dim").and_then(ParamValue::as_i64).unwrap_or(1);
        return Ok(Expr::call(
            "torch.flatten",
            vec![input],
            vec![("start_dim".to_string(), start_dim.to_string())],
        ));
    }

    let field = names.ident(id);
    model.fields.push(FieldDecl {
        name: field.clone(),
        constructor: constructor(spec, params)?,
    });
    if let Some(block) = spec.block() {
        model.blocks.insert(block);
    }
    Ok(Expr::call(format!("self.{}", field), vec![input], vec![]))
}

/// `callee(name=value, ...)` with keyword arguments in schema order.
fn constructor(spec: &OperatorSpec, params: &Params) -> Result<Expr, CompileError> {
    let callee = spec.callee.ok_or_else(|| {
        CompileError::Structural(format!("operator '{}' has no constructor", spec.id))
    })?;
    Ok(Expr::call(callee, vec![], keyword_args(spec, params)))
}

fn keyword_args(spec: &OperatorSpec, params: &Params) -> Vec<(String, String)> {
    spec.params
        .iter()
        .filter_map(|p| Some((p.name.to_string(), params.get(p.name)?.to_python())))
        .collect()
}

fn optimizer(node: Option<(&Node, &'static OperatorSpec)>) -> Result<Expr, CompileError> {
    let (spec, params) = match node {
        Some((node, spec)) => (spec, resolved_params(node, spec)),
        None => {
            log::warn!("No optimizer in the pipeline, falling back to Adam");
            let spec = registry::lookup(GraphMode::Pipeline, "adam").ok_or_else(|| {
                CompileError::Structural("optimizer 'adam' missing from the registry".into())
            })?;
            (spec, spec.defaults())
        }
    };
    let callee = spec.callee.ok_or_else(|| {
        CompileError::Structural(format!("operator '{}' has no constructor", spec.id))
    })?;

    // beta1/beta2 are a single `betas` tuple in torch.optim
    let mut kwargs = Vec::new();
    for p in &spec.params {
        let Some(value) = params.get(p.name) else {
            continue;
        };
        match p.name {
            "beta1" => {
                let beta2 = params.get("beta2").map(ParamValue::to_python);
                let beta2 = beta2.unwrap_or_else(|| "0.999".to_string());
                kwargs.push(("betas".to_string(), format!("({}, {})", value.to_python(), beta2)));
            }
            "beta2" => {}
            name => kwargs.push((name.to_string(), value.to_python())),
        }
    }
    Ok(Expr::call(callee, vec![Expr::var("model.parameters()")], kwargs))
}

fn metric(
    node: &Node,
    spec: &OperatorSpec,
    dataset: &DatasetInfo,
    names: &mut Names,
) -> Result<MetricContext, CompileError> {
    let params = resolved_params(node, spec);
    let task = params
        .get("task")
        .and_then(ParamValue::as_str)
        .unwrap_or("multiclass");
    let classes = params
        .get("num_classes")
        .and_then(ParamValue::as_i64)
        .unwrap_or(dataset.num_classes);

    let mut kwargs = vec![("task".to_string(), python_string(task))];
    match task {
        "binary" => {}
        "multilabel" => kwargs.push(("num_labels".to_string(), classes.to_string())),
        _ => kwargs.push(("num_classes".to_string(), classes.to_string())),
    }
    if let Some(average) = params.get("average") {
        kwargs.push(("average".to_string(), average.to_python()));
    }

    let callee = spec.callee.ok_or_else(|| {
        CompileError::Structural(format!("operator '{}' has no constructor", spec.id))
    })?;
    Ok(MetricContext {
        name: format!("{}_metric", names.ident(&node.id)),
        label: spec.id.to_string(),
        constructor: Expr::call(callee, vec![], kwargs).to_string(),
    })
}

fn first_of(callbacks: &[(&Node, &'static OperatorSpec)], id: &str) -> Option<Params> {
    callbacks
        .iter()
        .find(|(_, spec)| spec.id == id)
        .map(|(node, spec)| resolved_params(node, spec))
}

fn monitor(params: &Params) -> String {
    params
        .get("monitor")
        .and_then(ParamValue::as_str)
        .unwrap_or("val_loss")
        .to_string()
}

// Loss improves downwards, accuracy upwards
fn minimizes(monitor: &str) -> bool {
    monitor != "val_accuracy"
}

fn checkpoint(params: &Params, directory: &str) -> CheckpointContext {
    let monitor = monitor(params);
    let (initial, op) = if minimizes(&monitor) {
        ("float('inf')", "<")
    } else {
        ("float('-inf')", ">")
    };
    CheckpointContext {
        improved: format!("{} {} best_checkpoint_score", monitor, op),
        save_best_only: flag(params, "save_best_only", true),
        directory: python_string(directory),
        initial: initial.to_string(),
        monitor,
    }
}

fn early_stopping(params: &Params) -> EarlyStoppingContext {
    let monitor = monitor(params);
    let delta = params
        .get("min_delta")
        .map(ParamValue::to_python)
        .unwrap_or_else(|| "0.0".to_string());
    let (initial, improved) = if minimizes(&monitor) {
        ("float('inf')", format!("{} < best_score - {}", monitor, delta))
    } else {
        ("float('-inf')", format!("{} > best_score + {}", monitor, delta))
    };
    EarlyStoppingContext {
        patience: params.get("patience").and_then(ParamValue::as_i64).unwrap_or(5),
        initial: initial.to_string(),
        improved,
        monitor,
    }
}

fn root_dataset(
    processor: &GraphProcessor<'_>,
    ordering: &Ordering,
) -> Result<&'static DatasetInfo, CompileError> {
    let (Some(node), Some(spec)) = (processor.node(&ordering.root), processor.spec(&ordering.root))
    else {
        return Err(CompileError::Structural("no dataset node in the graph".into()));
    };
    let params = resolved_params(node, spec);
    let name = params
        .get("dataset")
        .and_then(ParamValue::as_str)
        .unwrap_or_default();
    registry::dataset_info(name)
        .ok_or_else(|| CompileError::parameter(&node.id, format!("unknown dataset '{}'", name)))
}

fn flag(params: &Params, name: &str, fallback: bool) -> bool {
    params.get(name).and_then(ParamValue::as_bool).unwrap_or(fallback)
}

fn python_bool(value: bool) -> String {
    ParamValue::Bool(value).to_python()
}

fn render_blocks(blocks: &BTreeSet<BlockKind>) -> Result<Vec<String>> {
    let mut tera = Tera::default();
    tera.add_raw_template(
        "residual_block",
        include_str!("../../templates/residual_block.py.j2"),
    )
    .context("loading the residual block template")?;
    tera.add_raw_template(
        "inception_block",
        include_str!("../../templates/inception_block.py.j2"),
    )
    .context("loading the inception block template")?;

    blocks
        .iter()
        .map(|block| -> Result<String> {
            let name = match block {
                BlockKind::Residual => "residual_block",
                BlockKind::Inception => "inception_block",
            };
            let text = tera
                .render(name, &tera::Context::new())
                .with_context(|| format!("rendering {}", block.class_name()))?;
            Ok(text.trim_end().to_string())
        })
        .collect()
}

fn render_program(context: &ProgramContext) -> Result<String> {
    let mut tera = Tera::default();
    tera.add_raw_template("program.py", include_str!("../../templates/program.py.j2"))
        .context("loading the program template")?;
    let context = tera::Context::from_serialize(context).context("building template context")?;
    tera.render("program.py", &context)
        .context("rendering the program template")
}
