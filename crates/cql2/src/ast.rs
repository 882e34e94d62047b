//! The CQL2 predicate AST.
//!
//! The proxy never inspects this tree beyond `combine_and`/`validate`/
//! `matches`/`to_text`/`to_json` — it is treated as an opaque algebra per
//! the spec, but a real tree is needed to implement those five operations
//! faithfully across both CQL2 dialects.

#[derive(Debug, Clone, PartialEq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    #[must_use]
    pub fn as_text(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    #[must_use]
    pub fn as_json_op(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// A CQL2 predicate expression.
///
/// Dialect-neutral: the same tree round-trips through `to_text`/`to_json`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Bool(bool),
    Null,
    Number(OrdF64),
    Str(String),
    /// Dotted property reference, e.g. `properties.private` -> `["properties", "private"]`.
    Property(Vec<String>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Cmp {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    In {
        lhs: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Like {
        lhs: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    IsNull {
        lhs: Box<Expr>,
        negated: bool,
    },
}

/// `f64` wrapper with a total order so `Expr` can derive `PartialEq` (needed
/// for the idempotence check in `combine_and`).
#[derive(Debug, Clone, Copy)]
pub struct OrdF64(pub f64);

impl PartialEq for OrdF64 {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl From<f64> for OrdF64 {
    fn from(v: f64) -> Self {
        OrdF64(v)
    }
}
