// Statement-level representation of the generated model class; Display is the printer
use crate::schemas::graph::EdgeKind;
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Var(String),
    Call {
        callee: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, String)>,
    },
    /// Element-wise `a + b + ...`
    Sum(Vec<Expr>),
    Concat {
        items: Vec<Expr>,
        dim: i64,
    },
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn call(callee: impl Into<String>, args: Vec<Expr>, kwargs: Vec<(String, String)>) -> Self {
        Expr::Call {
            callee: callee.into(),
            args,
            kwargs,
        }
    }
}

fn join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(name) => f.write_str(name),
            Expr::Call {
                callee,
                args,
                kwargs,
            } => {
                write!(f, "{}(", callee)?;
                join(f, args, ", ")?;
                for (i, (name, value)) in kwargs.iter().enumerate() {
                    if i > 0 || !args.is_empty() {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}={}", name, value)?;
                }
                f.write_str(")")
            }
            Expr::Sum(items) => join(f, items, " + "),
            Expr::Concat { items, dim } => {
                f.write_str("torch.cat([")?;
                join(f, items, ", ")?;
                write!(f, "], dim={})", dim)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign { target: String, value: Expr },
    /// `target = target + operand`, tagged with the connection kind.
    Accumulate {
        target: String,
        operand: String,
        kind: EdgeKind,
    },
    Return(Expr),
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Assign { target, value } => write!(f, "{} = {}", target, value),
            Stmt::Accumulate {
                target,
                operand,
                kind,
            } => {
                let tag = match kind {
                    EdgeKind::Residual => "residual",
                    EdgeKind::Sum => "sum",
                    EdgeKind::Normal => "skip",
                };
                write!(
                    f,
                    "{0} = {0} + {1}  # {2} connection",
                    target, operand, tag
                )
            }
            Stmt::Return(value) => write!(f, "return {}", value),
        }
    }
}

/// `self.<name> = <constructor>` in `__init__`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub constructor: Expr,
}

impl fmt::Display for FieldDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "self.{} = {}", self.name, self.constructor)
    }
}

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

// nn.Module attributes a field must not shadow
const MODULE_ATTRIBUTES: &[&str] = &[
    "forward", "training", "train", "eval", "parameters", "modules", "children", "state_dict",
    "to", "cuda", "cpu", "apply", "zero_grad", "register_buffer", "float", "double", "half",
];

/// Turns an editor node id into a Python identifier.
pub fn sanitize(id: &str) -> String {
    let mut ident: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if ident.is_empty() {
        ident.push_str("node");
    }
    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert_str(0, "n_");
    }
    if PYTHON_KEYWORDS.contains(&ident.as_str()) {
        ident.push('_');
    }
    ident
}

/// Hands out one unique identifier per node id.
#[derive(Debug, Default)]
pub struct Names {
    used: HashSet<String>,
    by_node: HashMap<String, String>,
}

impl Names {
    pub fn ident(&mut self, node_id: &str) -> String {
        if let Some(existing) = self.by_node.get(node_id) {
            return existing.clone();
        }
        let mut base = sanitize(node_id);
        if MODULE_ATTRIBUTES.contains(&base.as_str()) {
            base.push_str("_layer");
        }
        let mut candidate = base.clone();
        let mut suffix = 2;
        while self.used.contains(&candidate) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        self.used.insert(candidate.clone());
        self.by_node.insert(node_id.to_string(), candidate.clone());
        candidate
    }

    /// Output variable of a node in `forward`.
    pub fn output(&mut self, node_id: &str) -> String {
        format!("{}_out", self.ident(node_id))
    }
}
