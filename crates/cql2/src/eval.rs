use crate::ast::{CmpOp, Expr};
use serde_json::Value;

impl Expr {
    /// Evaluate this predicate against a JSON document.
    ///
    /// Property references are resolved as dotted paths into the document
    /// root. A missing property resolves to `null`, matching CQL2's
    /// three-valued-logic handling of missing attributes in comparisons
    /// (anything compared against a missing property is `false`, except
    /// `IS NULL`, which is `true`).
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Expr::Bool(b) => *b,
            Expr::Null => false,
            Expr::Number(_) | Expr::Str(_) | Expr::Property(_) => {
                // A bare scalar/property used as a top-level predicate is truthy
                // iff it resolves to JSON `true`.
                self.resolve(doc) == Some(Value::Bool(true))
            }
            Expr::And(terms) => terms.iter().all(|t| t.matches(doc)),
            Expr::Or(terms) => terms.iter().any(|t| t.matches(doc)),
            Expr::Not(inner) => !inner.matches(doc),
            Expr::Cmp { op, lhs, rhs } => compare(op, &lhs.resolve(doc), &rhs.resolve(doc)),
            Expr::In {
                lhs,
                list,
                negated,
            } => {
                let lhs_val = lhs.resolve(doc);
                let found = list.iter().any(|item| item.resolve(doc) == lhs_val);
                found != *negated
            }
            Expr::Like {
                lhs,
                pattern,
                negated,
            } => {
                let matched = match (lhs.resolve(doc), pattern.resolve(doc)) {
                    (Some(Value::String(s)), Some(Value::String(p))) => like_match(&s, &p),
                    _ => false,
                };
                matched != *negated
            }
            Expr::IsNull { lhs, negated } => {
                let is_null = matches!(lhs.resolve(doc), None | Some(Value::Null));
                is_null != *negated
            }
        }
    }

    /// Resolve this expression to a JSON value against `doc` (literals
    /// resolve to themselves; property refs walk the dotted path).
    fn resolve(&self, doc: &Value) -> Option<Value> {
        match self {
            Expr::Bool(b) => Some(Value::Bool(*b)),
            Expr::Null => Some(Value::Null),
            Expr::Number(n) => serde_json::Number::from_f64(n.0).map(Value::Number),
            Expr::Str(s) => Some(Value::String(s.clone())),
            Expr::Property(parts) => {
                let mut cur = doc;
                for part in parts {
                    cur = cur.as_object()?.get(part)?;
                }
                Some(cur.clone())
            }
            // Nested boolean/compound expressions resolve to their own truth value.
            other => Some(Value::Bool(other.matches(doc))),
        }
    }
}

fn compare(op: &CmpOp, lhs: &Option<Value>, rhs: &Option<Value>) -> bool {
    let (Some(lhs), Some(rhs)) = (lhs, rhs) else {
        return false;
    };
    match op {
        CmpOp::Eq => lhs == rhs,
        CmpOp::Ne => lhs != rhs,
        _ => {
            let (Some(l), Some(r)) = (as_f64(lhs), as_f64(rhs)) else {
                return match (lhs.as_str(), rhs.as_str()) {
                    (Some(l), Some(r)) => match op {
                        CmpOp::Lt => l < r,
                        CmpOp::Le => l <= r,
                        CmpOp::Gt => l > r,
                        CmpOp::Ge => l >= r,
                        CmpOp::Eq | CmpOp::Ne => unreachable!("handled above"),
                    },
                    _ => false,
                };
            };
            match op {
                CmpOp::Lt => l < r,
                CmpOp::Le => l <= r,
                CmpOp::Gt => l > r,
                CmpOp::Ge => l >= r,
                CmpOp::Eq | CmpOp::Ne => unreachable!("handled above"),
            }
        }
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

/// SQL-style `LIKE`: `%` matches any run of characters, `_` matches exactly one.
fn like_match(value: &str, pattern: &str) -> bool {
    fn helper(v: &[char], p: &[char]) -> bool {
        match p.first() {
            None => v.is_empty(),
            Some('%') => helper(v, &p[1..]) || (!v.is_empty() && helper(&v[1..], p)),
            Some('_') => !v.is_empty() && helper(&v[1..], &p[1..]),
            Some(c) => v.first() == Some(c) && helper(&v[1..], &p[1..]),
        }
    }
    let v: Vec<char> = value.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    helper(&v, &p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_text;
    use serde_json::json;

    #[test]
    fn equality_and_boolean_combinators() {
        let expr = parse_text("collection = 'allowed' AND properties.count > 3").unwrap();
        assert!(expr.matches(&json!({"collection": "allowed", "properties": {"count": 5}})));
        assert!(!expr.matches(&json!({"collection": "denied", "properties": {"count": 5}})));
        assert!(!expr.matches(&json!({"collection": "allowed", "properties": {"count": 1}})));
    }

    #[test]
    fn missing_property_is_not_equal() {
        let expr = parse_text("properties.private = false").unwrap();
        assert!(!expr.matches(&json!({"properties": {}})));
    }

    #[test]
    fn is_null_on_missing_property() {
        let expr = parse_text("properties.private IS NULL").unwrap();
        assert!(expr.matches(&json!({"properties": {}})));
        assert!(!expr.matches(&json!({"properties": {"private": false}})));
    }

    #[test]
    fn like_wildcards() {
        assert!(like_match("hello-world", "hello%"));
        assert!(like_match("hello-world", "h_llo-world"));
        assert!(!like_match("hello-world", "goodbye%"));
    }

    #[test]
    fn in_list() {
        let expr = parse_text("collection IN ('a', 'b', 'c')").unwrap();
        assert!(expr.matches(&json!({"collection": "b"})));
        assert!(!expr.matches(&json!({"collection": "z"})));
    }
}
