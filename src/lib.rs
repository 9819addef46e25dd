//! Compiles node graphs drawn in a visual editor into PyTorch programs.
//!
//! Two graphs come in: an architecture graph (layers, merges, a loss) and
//! an optional pipeline graph (transforms, training configuration,
//! optimizer, metrics, callbacks). [`validate_graph`] gates generation;
//! [`Compiler::generate`] emits the program text.

pub mod config;
pub mod engine;
pub mod error;
pub mod schemas;

pub use config::Config;
pub use engine::shape::{Propagation, propagate};
pub use engine::transpiler::{Compiler, generate};
pub use engine::validator::{EdgeVerdict, GraphReport, validate_edge, validate_graph};
pub use error::{CompileError, ErrorKind};
pub use schemas::graph::{Edge, EdgeKind, Graph, Node, Project};
