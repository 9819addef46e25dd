// Static operator catalogs, built once on first use and read-only afterwards
use crate::engine::types::{
    BlockKind, Category, GraphMode, OperatorSpec, ParamSpec, SemanticType, Shape, ShapeRule,
};
use crate::error::CompileError;
use crate::schemas::graph::Node;
use std::collections::HashMap;
use std::sync::LazyLock;

use SemanticType as T;

pub struct Registry {
    specs: Vec<OperatorSpec>,
    index: HashMap<&'static str, usize>,
}

impl Registry {
    fn from_specs(specs: Vec<OperatorSpec>) -> Self {
        let index = specs
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.id, i))
            .collect();
        Self { specs, index }
    }

    pub fn get(&self, id: &str) -> Option<&OperatorSpec> {
        self.index.get(id).map(|&i| &self.specs[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperatorSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

static ARCHITECTURE: LazyLock<Registry> =
    LazyLock::new(|| Registry::from_specs(architecture_operators()));
static PIPELINE: LazyLock<Registry> = LazyLock::new(|| Registry::from_specs(pipeline_operators()));

pub fn registry(mode: GraphMode) -> &'static Registry {
    match mode {
        GraphMode::Architecture => &ARCHITECTURE,
        GraphMode::Pipeline => &PIPELINE,
    }
}

pub fn lookup(mode: GraphMode, id: &str) -> Option<&'static OperatorSpec> {
    registry(mode).get(id)
}

/// Resolves the operator of a node in the registry matching its graph.
pub fn lookup_node(node: &Node) -> Result<&'static OperatorSpec, CompileError> {
    lookup(node.mode(), &node.operator_id).ok_or_else(|| CompileError::UnknownOperator {
        node: node.id.clone(),
        operator: node.operator_id.clone(),
    })
}

/// Operator palette for the editor.
pub fn catalog_json(mode: GraphMode) -> Result<String, CompileError> {
    let specs: Vec<&OperatorSpec> = registry(mode).iter().collect();
    Ok(serde_json::to_string_pretty(&specs)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetSplit {
    /// `train=True/False, download=True`
    TrainFlag,
    /// `split='train'/'val'`
    Named,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetInfo {
    pub name: &'static str,
    pub class_name: &'static str,
    pub channels: i64,
    pub height: i64,
    pub width: i64,
    pub num_classes: i64,
    pub split: DatasetSplit,
}

impl DatasetInfo {
    pub fn shape(&self) -> Shape {
        Shape::image(self.channels, self.height, self.width)
    }
}

pub const DATASETS: &[DatasetInfo] = &[
    DatasetInfo {
        name: "MNIST",
        class_name: "MNIST",
        channels: 1,
        height: 28,
        width: 28,
        num_classes: 10,
        split: DatasetSplit::TrainFlag,
    },
    DatasetInfo {
        name: "FashionMNIST",
        class_name: "FashionMNIST",
        channels: 1,
        height: 28,
        width: 28,
        num_classes: 10,
        split: DatasetSplit::TrainFlag,
    },
    DatasetInfo {
        name: "CIFAR10",
        class_name: "CIFAR10",
        channels: 3,
        height: 32,
        width: 32,
        num_classes: 10,
        split: DatasetSplit::TrainFlag,
    },
    DatasetInfo {
        name: "CIFAR100",
        class_name: "CIFAR100",
        channels: 3,
        height: 32,
        width: 32,
        num_classes: 100,
        split: DatasetSplit::TrainFlag,
    },
    DatasetInfo {
        name: "ImageNet",
        class_name: "ImageNet",
        channels: 3,
        height: 224,
        width: 224,
        num_classes: 1000,
        split: DatasetSplit::Named,
    },
];

const DATASET_NAMES: &[&str] = &["MNIST", "FashionMNIST", "CIFAR10", "CIFAR100", "ImageNet"];

pub fn dataset_info(name: &str) -> Option<&'static DatasetInfo> {
    DATASETS.iter().find(|d| d.name == name)
}

const REDUCTIONS: &[&str] = &["mean", "sum", "none"];
const MONITORS: &[&str] = &["val_loss", "val_accuracy"];
const METRIC_TASKS: &[&str] = &["multiclass", "binary", "multilabel"];
const AVERAGES: &[&str] = &["micro", "macro", "weighted", "none"];

// Inputs of every non-root architecture operator
const TENSOR_INPUTS: &[SemanticType] = &[T::Dataset, T::Tensor];

fn layer(
    id: &'static str,
    category: Category,
    label: &'static str,
    description: &'static str,
) -> OperatorSpec {
    OperatorSpec::new(id, category, label, description)
        .consumes(T::Tensor, TENSOR_INPUTS)
        .produces(T::Tensor)
}

fn conv(
    id: &'static str,
    label: &'static str,
    spatial: usize,
    callee: &'static str,
) -> OperatorSpec {
    layer(id, Category::Layer, label, "Convolution over the spatial dimensions")
        .params(vec![
            ParamSpec::int("in_channels", 1, Some(1), None).optional(),
            ParamSpec::int("out_channels", 32, Some(1), None),
            ParamSpec::int("kernel_size", 3, Some(1), None),
            ParamSpec::int("stride", 1, Some(1), None),
            ParamSpec::int("padding", 0, Some(0), None),
            ParamSpec::boolean("bias", true),
        ])
        .rule(ShapeRule::Conv { spatial })
        .callee(callee)
}

fn pool(id: &'static str, label: &'static str, callee: &'static str) -> OperatorSpec {
    layer(id, Category::Pooling, label, "Sliding-window pooling, channels preserved")
        .params(vec![
            ParamSpec::int("kernel_size", 2, Some(1), None),
            // PyTorch defaults the stride to the kernel size
            ParamSpec::int("stride", 2, Some(1), None).optional(),
            ParamSpec::int("padding", 0, Some(0), None),
        ])
        .rule(ShapeRule::Pool { spatial: 2 })
        .callee(callee)
}

fn activation(id: &'static str, label: &'static str, callee: &'static str) -> OperatorSpec {
    layer(id, Category::Activation, label, "Element-wise activation")
        .rule(ShapeRule::Preserve)
        .callee(callee)
}

fn loss(id: &'static str, label: &'static str, callee: &'static str) -> OperatorSpec {
    OperatorSpec::new(id, Category::Loss, label, "Training criterion")
        .consumes(T::Tensor, &[])
        .produces(T::Loss)
        .params(vec![ParamSpec::choice("reduction", "mean", REDUCTIONS)])
        .rule(ShapeRule::Scalar)
        .callee(callee)
}

fn architecture_operators() -> Vec<OperatorSpec> {
    vec![
        OperatorSpec::new(
            "dataset",
            Category::Input,
            "Dataset",
            "Graph root; its output is the batch of input images",
        )
        .produces(T::Dataset)
        .params(vec![ParamSpec::choice("dataset", "MNIST", DATASET_NAMES)])
        .rule(ShapeRule::Dataset),
        layer(
            "linear",
            Category::Layer,
            "Linear",
            "Fully connected layer over the last dimension",
        )
        .params(vec![
            ParamSpec::int("in_features", 1, Some(1), None).optional(),
            ParamSpec::int("out_features", 10, Some(1), None),
            ParamSpec::boolean("bias", true),
        ])
        .rule(ShapeRule::Linear)
        .callee("nn.Linear"),
        conv("conv1d", "Conv1d", 1, "nn.Conv1d"),
        conv("conv2d", "Conv2d", 2, "nn.Conv2d"),
        pool("maxpool2d", "MaxPool2d", "nn.MaxPool2d"),
        pool("avgpool2d", "AvgPool2d", "nn.AvgPool2d"),
        layer(
            "adaptiveavgpool2d",
            Category::Pooling,
            "AdaptiveAvgPool2d",
            "Pools to a fixed square spatial size",
        )
        .params(vec![ParamSpec::int("output_size", 1, Some(1), None)])
        .rule(ShapeRule::AdaptivePool)
        .callee("nn.AdaptiveAvgPool2d"),
        layer(
            "batchnorm1d",
            Category::Normalization,
            "BatchNorm1d",
            "Batch normalization over [B, C] or [B, C, L]",
        )
        .params(vec![
            ParamSpec::int("num_features", 1, Some(1), None).optional(),
            ParamSpec::float("eps", 1e-5, Some(0.0), None),
            ParamSpec::float("momentum", 0.1, Some(0.0), Some(1.0)),
        ])
        .rule(ShapeRule::BatchNorm { ranks: &[2, 3] })
        .callee("nn.BatchNorm1d"),
        layer(
            "batchnorm2d",
            Category::Normalization,
            "BatchNorm2d",
            "Batch normalization over [B, C, H, W]",
        )
        .params(vec![
            ParamSpec::int("num_features", 1, Some(1), None).optional(),
            ParamSpec::float("eps", 1e-5, Some(0.0), None),
            ParamSpec::float("momentum", 0.1, Some(0.0), Some(1.0)),
        ])
        .rule(ShapeRule::BatchNorm { ranks: &[4] })
        .callee("nn.BatchNorm2d"),
        layer(
            "layernorm",
            Category::Normalization,
            "LayerNorm",
            "Normalizes over the last dimension",
        )
        .params(vec![
            ParamSpec::int("normalized_shape", 1, Some(1), None).optional(),
            ParamSpec::float("eps", 1e-5, Some(0.0), None),
        ])
        .rule(ShapeRule::LayerNorm)
        .callee("nn.LayerNorm"),
        layer(
            "dropout",
            Category::Regularization,
            "Dropout",
            "Randomly zeroes activations while training",
        )
        .params(vec![ParamSpec::float("p", 0.5, Some(0.0), Some(1.0))])
        .callee("nn.Dropout"),
        activation("relu", "ReLU", "nn.ReLU"),
        activation("sigmoid", "Sigmoid", "nn.Sigmoid"),
        activation("tanh", "Tanh", "nn.Tanh"),
        activation("gelu", "GELU", "nn.GELU"),
        activation("leakyrelu", "LeakyReLU", "nn.LeakyReLU")
            .params(vec![ParamSpec::float("negative_slope", 0.01, Some(0.0), None)]),
        activation("softmax", "Softmax", "nn.Softmax")
            .params(vec![ParamSpec::int("dim", 1, None, None)]),
        layer(
            "flatten",
            Category::Utility,
            "Flatten",
            "Collapses all dimensions from start_dim onward",
        )
        .params(vec![ParamSpec::int("start_dim", 1, Some(1), None)])
        .rule(ShapeRule::Flatten)
        .callee("torch.flatten"),
        layer(
            "add",
            Category::Merge,
            "Add",
            "Element-wise sum of two or more equally shaped branches",
        )
        .rule(ShapeRule::Add),
        layer(
            "concat",
            Category::Merge,
            "Concatenate",
            "Joins two or more branches along one dimension",
        )
        .params(vec![ParamSpec::int("dim", 1, None, None)])
        .rule(ShapeRule::Concat)
        .callee("torch.cat"),
        layer(
            "residualblock",
            Category::Block,
            "Residual Block",
            "Two 3x3 convolutions with batch norm and an identity or projection shortcut",
        )
        .params(vec![
            ParamSpec::int("in_channels", 1, Some(1), None).optional(),
            ParamSpec::int("out_channels", 64, Some(1), None),
            ParamSpec::int("stride", 1, Some(1), None),
        ])
        .rule(ShapeRule::Block(BlockKind::Residual))
        .callee(BlockKind::Residual.class_name()),
        layer(
            "inceptionblock",
            Category::Block,
            "Inception Block",
            "Parallel 1x1, 3x3, 5x5 and pooling branches concatenated on channels",
        )
        .params(vec![
            ParamSpec::int("in_channels", 1, Some(1), None).optional(),
            ParamSpec::int("out_1x1", 64, Some(1), None),
            ParamSpec::int("out_3x3", 128, Some(1), None),
            ParamSpec::int("out_5x5", 32, Some(1), None),
            ParamSpec::int("pool_proj", 32, Some(1), None),
        ])
        .rule(ShapeRule::Block(BlockKind::Inception))
        .callee(BlockKind::Inception.class_name()),
        loss("crossentropyloss", "CrossEntropyLoss", "nn.CrossEntropyLoss").params(vec![
            ParamSpec::choice("reduction", "mean", REDUCTIONS),
            ParamSpec::float("label_smoothing", 0.0, Some(0.0), Some(1.0)),
        ]),
        loss("nllloss", "NLLLoss", "nn.NLLLoss"),
        loss("mseloss", "MSELoss", "nn.MSELoss"),
        loss("l1loss", "L1Loss", "nn.L1Loss"),
        loss("bceloss", "BCELoss", "nn.BCELoss"),
        loss("bcewithlogitsloss", "BCEWithLogitsLoss", "nn.BCEWithLogitsLoss"),
    ]
}

fn transform(id: &'static str, label: &'static str, callee: &'static str) -> OperatorSpec {
    OperatorSpec::new(id, Category::DataAugmentation, label, "torchvision transform")
        .consumes(T::Dataset, &[])
        .produces(T::Dataset)
        .callee(callee)
}

fn optimizer(id: &'static str, label: &'static str, callee: &'static str) -> OperatorSpec {
    OperatorSpec::new(id, Category::Optimization, label, "Updates the model parameters")
        .consumes(T::Trainable, &[])
        .produces(T::Optimizer)
        .callee(callee)
}

fn metric(
    id: &'static str,
    label: &'static str,
    callee: &'static str,
    average: &'static str,
) -> OperatorSpec {
    OperatorSpec::new(id, Category::Metrics, label, "torchmetrics classification metric")
        .consumes(T::Prediction, &[])
        .produces(T::Metric)
        .params(vec![
            ParamSpec::choice("task", "multiclass", METRIC_TASKS).optional(),
            ParamSpec::int("num_classes", 10, Some(2), None).optional(),
            ParamSpec::choice("average", average, AVERAGES),
        ])
        .callee(callee)
}

fn callback(id: &'static str, label: &'static str, description: &'static str) -> OperatorSpec {
    OperatorSpec::new(id, Category::Callbacks, label, description)
        .consumes(T::Trainable, &[T::Prediction, T::Optimizer, T::Metric])
        .produces(T::Callback)
}

fn pipeline_operators() -> Vec<OperatorSpec> {
    vec![
        OperatorSpec::new(
            "dataset",
            Category::Dataset,
            "Dataset",
            "Workflow root; the dataset itself is chosen in the architecture graph",
        )
        .produces(T::Dataset)
        .params(vec![
            ParamSpec::boolean("shuffle", true),
            ParamSpec::boolean("download", true),
        ]),
        transform("totensor", "ToTensor", "transforms.ToTensor"),
        transform("normalize", "Normalize", "transforms.Normalize").params(vec![
            ParamSpec::float("mean", 0.5, None, None),
            ParamSpec::float("std", 0.5, Some(0.0), None),
        ]),
        transform("resize", "Resize", "transforms.Resize")
            .params(vec![ParamSpec::int("size", 224, Some(1), None)]),
        transform("centercrop", "CenterCrop", "transforms.CenterCrop")
            .params(vec![ParamSpec::int("size", 224, Some(1), None)]),
        transform("randomcrop", "RandomCrop", "transforms.RandomCrop").params(vec![
            ParamSpec::int("size", 32, Some(1), None),
            ParamSpec::int("padding", 4, Some(0), None),
        ]),
        transform(
            "randomhorizontalflip",
            "RandomHorizontalFlip",
            "transforms.RandomHorizontalFlip",
        )
        .params(vec![ParamSpec::float("p", 0.5, Some(0.0), Some(1.0))]),
        transform(
            "randomverticalflip",
            "RandomVerticalFlip",
            "transforms.RandomVerticalFlip",
        )
        .params(vec![ParamSpec::float("p", 0.5, Some(0.0), Some(1.0))]),
        transform("randomrotation", "RandomRotation", "transforms.RandomRotation")
            .params(vec![ParamSpec::float("degrees", 15.0, Some(0.0), Some(360.0))]),
        transform("colorjitter", "ColorJitter", "transforms.ColorJitter").params(vec![
            ParamSpec::float("brightness", 0.2, Some(0.0), None),
            ParamSpec::float("contrast", 0.2, Some(0.0), None),
            ParamSpec::float("saturation", 0.2, Some(0.0), None),
            ParamSpec::float("hue", 0.0, Some(0.0), Some(0.5)),
        ]),
        transform("gaussianblur", "GaussianBlur", "transforms.GaussianBlur").params(vec![
            ParamSpec::int("kernel_size", 3, Some(1), None),
            ParamSpec::float("sigma", 1.0, Some(0.0), None),
        ]),
        OperatorSpec::new(
            "trainingconfig",
            Category::Training,
            "Training Configuration",
            "Epochs, batching and device placement; retyped by the node it feeds",
        )
        .consumes(T::Dataset, &[])
        .produces_any(&[T::Prediction, T::Trainable])
        .params(vec![
            ParamSpec::int("epochs", 10, Some(1), None),
            ParamSpec::int("batch_size", 64, Some(1), None),
            ParamSpec::int("num_workers", 2, Some(0), None),
            ParamSpec::boolean("pin_memory", true),
            ParamSpec::choice("device", "auto", &["auto", "cpu", "cuda"]),
        ]),
        optimizer("adam", "Adam", "optim.Adam").params(vec![
            ParamSpec::float("lr", 0.001, Some(0.0), None),
            ParamSpec::float("beta1", 0.9, Some(0.0), Some(1.0)),
            ParamSpec::float("beta2", 0.999, Some(0.0), Some(1.0)),
            ParamSpec::float("eps", 1e-8, Some(0.0), None),
            ParamSpec::float("weight_decay", 0.0, Some(0.0), None),
            ParamSpec::boolean("amsgrad", false),
        ]),
        optimizer("adamw", "AdamW", "optim.AdamW").params(vec![
            ParamSpec::float("lr", 0.001, Some(0.0), None),
            ParamSpec::float("beta1", 0.9, Some(0.0), Some(1.0)),
            ParamSpec::float("beta2", 0.999, Some(0.0), Some(1.0)),
            ParamSpec::float("eps", 1e-8, Some(0.0), None),
            ParamSpec::float("weight_decay", 0.01, Some(0.0), None),
            ParamSpec::boolean("amsgrad", false),
        ]),
        optimizer("sgd", "SGD", "optim.SGD").params(vec![
            ParamSpec::float("lr", 0.01, Some(0.0), None),
            ParamSpec::float("momentum", 0.9, Some(0.0), None),
            ParamSpec::float("dampening", 0.0, Some(0.0), None),
            ParamSpec::float("weight_decay", 0.0, Some(0.0), None),
            ParamSpec::boolean("nesterov", false),
        ]),
        optimizer("rmsprop", "RMSprop", "optim.RMSprop").params(vec![
            ParamSpec::float("lr", 0.01, Some(0.0), None),
            ParamSpec::float("alpha", 0.99, Some(0.0), Some(1.0)),
            ParamSpec::float("eps", 1e-8, Some(0.0), None),
            ParamSpec::float("momentum", 0.0, Some(0.0), None),
            ParamSpec::float("weight_decay", 0.0, Some(0.0), None),
        ]),
        metric("accuracy", "Accuracy", "torchmetrics.Accuracy", "micro"),
        metric("precision", "Precision", "torchmetrics.Precision", "macro"),
        metric("recall", "Recall", "torchmetrics.Recall", "macro"),
        metric("f1score", "F1 Score", "torchmetrics.F1Score", "macro"),
        callback(
            "modelcheckpoint",
            "Model Checkpoint",
            "Saves model weights after an epoch",
        )
        .params(vec![
            ParamSpec::choice("monitor", "val_loss", MONITORS),
            ParamSpec::boolean("save_best_only", true),
        ]),
        callback(
            "earlystopping",
            "Early Stopping",
            "Stops training when the monitored value stops improving",
        )
        .params(vec![
            ParamSpec::choice("monitor", "val_loss", MONITORS),
            ParamSpec::int("patience", 5, Some(1), None),
            ParamSpec::float("min_delta", 0.0, Some(0.0), None),
        ]),
        callback(
            "lrmonitor",
            "Learning Rate Monitor",
            "Prints the learning rate of every parameter group",
        )
        .params(vec![ParamSpec::int("log_every_n_epochs", 1, Some(1), None)]),
    ]
}
