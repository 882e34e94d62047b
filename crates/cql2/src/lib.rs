//! Opaque CQL2 predicate algebra: parse, combine-by-AND, serialize, validate
//! and evaluate — the primitive the auth proxy builds filters out of without
//! ever needing to understand the STAC domain these predicates describe.

mod ast;
mod error;
mod eval;
mod json;
mod lexer;
mod ops;
mod parser;
mod printer;

pub use ast::{CmpOp, Expr, OrdF64};
pub use error::{Cql2Error, Result};
pub use json::parse_json;
pub use parser::parse_text;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_json_round_trip() {
        let expr = parse_text("collection = 'allowed' AND properties.count > 3").unwrap();
        let as_json = expr.to_json();
        let back = parse_json(&as_json).unwrap();
        assert_eq!(expr, back);
    }

    #[test]
    fn json_text_round_trip_with_negation() {
        let source = json!({
            "op": "not",
            "args": [{"op": "isNull", "args": [{"property": "properties.private"}]}]
        });
        let expr = parse_json(&source).unwrap();
        assert_eq!(expr.to_text(), "properties.private IS NOT NULL");
        assert_eq!(parse_text(&expr.to_text()).unwrap(), expr);
    }

    #[test]
    fn validate_rejects_empty_and() {
        let expr = Expr::And(vec![]);
        assert!(expr.validate().is_err());
    }

    #[test]
    fn invalid_text_is_rejected() {
        assert!(parse_text("collection = ").is_err());
        assert!(parse_text("(collection = 'a'").is_err());
    }
}
