use crate::ast::Expr;
use crate::error::{Cql2Error, Result};

impl Expr {
    /// AND-combine two expressions.
    ///
    /// Combining an expression with one that is textually (structurally)
    /// identical collapses to the original rather than producing a
    /// redundant `AND` — this is the idempotence property the querystring
    /// filter-append path relies on (spec §8 property 3).
    #[must_use]
    pub fn combine_and(self, other: Expr) -> Expr {
        if self == other {
            return self;
        }
        let mut terms = Vec::new();
        match self {
            Expr::And(existing) => terms.extend(existing),
            other => terms.push(other),
        }
        match other {
            Expr::And(incoming) => {
                for term in incoming {
                    if !terms.contains(&term) {
                        terms.push(term);
                    }
                }
            }
            incoming => {
                if !terms.contains(&incoming) {
                    terms.push(incoming);
                }
            }
        }
        if terms.len() == 1 {
            terms.pop().expect("length checked")
        } else {
            Expr::And(terms)
        }
    }

    /// Structural sanity checks beyond what the parser already guarantees:
    /// every variadic node has at least one operand, and no numeric literal
    /// is non-finite. Used to reject filter-builder output before it is
    /// ever attached to a request (spec §4.3).
    pub fn validate(&self) -> Result<()> {
        match self {
            Expr::Bool(_) | Expr::Null | Expr::Str(_) | Expr::Property(_) => Ok(()),
            Expr::Number(n) => {
                if n.0.is_finite() {
                    Ok(())
                } else {
                    Err(Cql2Error::Validation("non-finite number literal".into()))
                }
            }
            Expr::And(terms) | Expr::Or(terms) => {
                if terms.is_empty() {
                    return Err(Cql2Error::Validation(
                        "AND/OR must have at least one operand".into(),
                    ));
                }
                terms.iter().try_for_each(Expr::validate)
            }
            Expr::Not(inner) => inner.validate(),
            Expr::Cmp { lhs, rhs, .. } => lhs.validate().and_then(|()| rhs.validate()),
            Expr::In { lhs, list, .. } => {
                lhs.validate()?;
                list.iter().try_for_each(Expr::validate)
            }
            Expr::Like { lhs, pattern, .. } => lhs.validate().and_then(|()| pattern.validate()),
            Expr::IsNull { lhs, .. } => lhs.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_text;

    #[test]
    fn combine_with_self_is_idempotent() {
        let a = parse_text("collection = 'allowed'").unwrap();
        let b = parse_text("collection = 'allowed'").unwrap();
        let combined = a.clone().combine_and(b);
        assert_eq!(combined, a);
    }

    #[test]
    fn combine_distinct_expressions_ands_them() {
        let a = parse_text("collection = 'allowed'").unwrap();
        let b = parse_text("properties.private = false").unwrap();
        let combined = a.combine_and(b);
        assert_eq!(
            combined.to_text(),
            "collection = 'allowed' AND properties.private = false"
        );
    }

    #[test]
    fn combine_flattens_existing_and_chains() {
        let a = parse_text("a = 1 AND b = 2").unwrap();
        let c = parse_text("c = 3").unwrap();
        let combined = a.combine_and(c);
        assert_eq!(combined.to_text(), "a = 1 AND b = 2 AND c = 3");
    }
}
