use crate::ast::{CmpOp, Expr};
use crate::error::{Cql2Error, Result};
use serde_json::{Value, json};

impl Expr {
    /// Serialize to the CQL2-JSON dialect.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Expr::Bool(b) => json!(*b),
            Expr::Null => Value::Null,
            Expr::Number(n) => json!(n.0),
            Expr::Str(s) => json!(s),
            Expr::Property(parts) => json!({ "property": parts.join(".") }),
            Expr::And(terms) => json!({ "op": "and", "args": terms.iter().map(Expr::to_json).collect::<Vec<_>>() }),
            Expr::Or(terms) => json!({ "op": "or", "args": terms.iter().map(Expr::to_json).collect::<Vec<_>>() }),
            Expr::Not(inner) => json!({ "op": "not", "args": [inner.to_json()] }),
            Expr::Cmp { op, lhs, rhs } => {
                json!({ "op": op.as_json_op(), "args": [lhs.to_json(), rhs.to_json()] })
            }
            Expr::In {
                lhs,
                list,
                negated,
            } => {
                let inner = json!({
                    "op": "in",
                    "args": [lhs.to_json(), Value::Array(list.iter().map(Expr::to_json).collect())],
                });
                wrap_negated(inner, *negated)
            }
            Expr::Like {
                lhs,
                pattern,
                negated,
            } => {
                let inner = json!({ "op": "like", "args": [lhs.to_json(), pattern.to_json()] });
                wrap_negated(inner, *negated)
            }
            Expr::IsNull { lhs, negated } => {
                let inner = json!({ "op": "isNull", "args": [lhs.to_json()] });
                wrap_negated(inner, *negated)
            }
        }
    }
}

fn wrap_negated(inner: Value, negated: bool) -> Value {
    if negated {
        json!({ "op": "not", "args": [inner] })
    } else {
        inner
    }
}

pub fn parse_json(value: &Value) -> Result<Expr> {
    match value {
        Value::Bool(b) => Ok(Expr::Bool(*b)),
        Value::Null => Ok(Expr::Null),
        Value::Number(n) => n
            .as_f64()
            .map(|f| Expr::Number(f.into()))
            .ok_or_else(|| Cql2Error::Parse("non-finite number literal".into())),
        Value::String(s) => Ok(Expr::Str(s.clone())),
        Value::Array(_) => Err(Cql2Error::Parse(
            "bare JSON array is not a valid CQL2-JSON expression".into(),
        )),
        Value::Object(map) => {
            if let Some(prop) = map.get("property").and_then(Value::as_str) {
                return Ok(Expr::Property(
                    prop.split('.').map(str::to_string).collect(),
                ));
            }
            let op = map
                .get("op")
                .and_then(Value::as_str)
                .ok_or_else(|| Cql2Error::Parse("object missing \"op\" or \"property\"".into()))?;
            let args = map
                .get("args")
                .and_then(Value::as_array)
                .ok_or_else(|| Cql2Error::Parse(format!("op {op:?} missing \"args\" array")))?;
            parse_op(op, args)
        }
    }
}

fn parse_op(op: &str, args: &[Value]) -> Result<Expr> {
    match op {
        "and" => Ok(Expr::And(parse_each(args)?)),
        "or" => Ok(Expr::Or(parse_each(args)?)),
        "not" => {
            let [inner] = require_args::<1>(args, "not")?;
            let parsed = parse_json(inner)?;
            Ok(negate(parsed))
        }
        "=" | "<>" | "<" | "<=" | ">" | ">=" => {
            let [lhs, rhs] = require_args::<2>(args, op)?;
            Ok(Expr::Cmp {
                op: cmp_op_from_str(op)?,
                lhs: Box::new(parse_json(lhs)?),
                rhs: Box::new(parse_json(rhs)?),
            })
        }
        "in" => {
            let [lhs, list] = require_args::<2>(args, "in")?;
            let list = list
                .as_array()
                .ok_or_else(|| Cql2Error::Parse("\"in\" second arg must be an array".into()))?;
            Ok(Expr::In {
                lhs: Box::new(parse_json(lhs)?),
                list: parse_each(list)?,
                negated: false,
            })
        }
        "like" => {
            let [lhs, pattern] = require_args::<2>(args, "like")?;
            Ok(Expr::Like {
                lhs: Box::new(parse_json(lhs)?),
                pattern: Box::new(parse_json(pattern)?),
                negated: false,
            })
        }
        "isNull" => {
            let [lhs] = require_args::<1>(args, "isNull")?;
            Ok(Expr::IsNull {
                lhs: Box::new(parse_json(lhs)?),
                negated: false,
            })
        }
        other => Err(Cql2Error::Parse(format!("unsupported CQL2 op {other:?}"))),
    }
}

/// Fold a `not` wrapper into the negated form of `in`/`like`/`isNull` so the
/// AST has a single canonical shape regardless of dialect (needed for the
/// idempotence check in `combine_and`, which compares trees structurally).
fn negate(expr: Expr) -> Expr {
    match expr {
        Expr::In {
            lhs,
            list,
            negated,
        } => Expr::In {
            lhs,
            list,
            negated: !negated,
        },
        Expr::Like {
            lhs,
            pattern,
            negated,
        } => Expr::Like {
            lhs,
            pattern,
            negated: !negated,
        },
        Expr::IsNull { lhs, negated } => Expr::IsNull {
            lhs,
            negated: !negated,
        },
        Expr::Not(inner) => *inner,
        other => Expr::Not(Box::new(other)),
    }
}

fn cmp_op_from_str(op: &str) -> Result<CmpOp> {
    Ok(match op {
        "=" => CmpOp::Eq,
        "<>" => CmpOp::Ne,
        "<" => CmpOp::Lt,
        "<=" => CmpOp::Le,
        ">" => CmpOp::Gt,
        ">=" => CmpOp::Ge,
        other => return Err(Cql2Error::Parse(format!("unknown comparison op {other:?}"))),
    })
}

fn parse_each(values: &[Value]) -> Result<Vec<Expr>> {
    values.iter().map(parse_json).collect()
}

fn require_args<'a, const N: usize>(args: &'a [Value], op: &str) -> Result<[&'a Value; N]> {
    if args.len() != N {
        return Err(Cql2Error::Parse(format!(
            "op {op:?} expects {N} arg(s), got {}",
            args.len()
        )));
    }
    let mut iter = args.iter();
    Ok(std::array::from_fn(|_| {
        iter.next().expect("length checked above")
    }))
}
