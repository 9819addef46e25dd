pub mod graph;
pub mod ir;
pub mod registry;
pub mod shape;
pub mod transpiler;
pub mod types;
pub mod validator;
