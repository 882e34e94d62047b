use crate::ast::Expr;

impl Expr {
    /// Serialize to the CQL2-text dialect.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        self.write_text(&mut out, false);
        out
    }

    fn write_text(&self, out: &mut String, parenthesize_bool: bool) {
        match self {
            Expr::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Expr::Null => out.push_str("null"),
            Expr::Number(n) => out.push_str(&format_number(n.0)),
            Expr::Str(s) => {
                out.push('\'');
                out.push_str(&s.replace('\'', "''"));
                out.push('\'');
            }
            Expr::Property(parts) => out.push_str(&parts.join(".")),
            Expr::And(terms) => write_bool_chain(out, terms, "AND", parenthesize_bool),
            Expr::Or(terms) => write_bool_chain(out, terms, "OR", parenthesize_bool),
            Expr::Not(inner) => {
                out.push_str("NOT (");
                inner.write_text(out, false);
                out.push(')');
            }
            Expr::Cmp { op, lhs, rhs } => {
                lhs.write_text(out, false);
                out.push(' ');
                out.push_str(op.as_text());
                out.push(' ');
                rhs.write_text(out, false);
            }
            Expr::In {
                lhs,
                list,
                negated,
            } => {
                lhs.write_text(out, false);
                out.push_str(if *negated { " NOT IN (" } else { " IN (" });
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_text(out, false);
                }
                out.push(')');
            }
            Expr::Like {
                lhs,
                pattern,
                negated,
            } => {
                lhs.write_text(out, false);
                out.push_str(if *negated { " NOT LIKE " } else { " LIKE " });
                pattern.write_text(out, false);
            }
            Expr::IsNull { lhs, negated } => {
                lhs.write_text(out, false);
                out.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
        }
    }
}

fn write_bool_chain(out: &mut String, terms: &[Expr], joiner: &str, parenthesize: bool) {
    if parenthesize {
        out.push('(');
    }
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            out.push(' ');
            out.push_str(joiner);
            out.push(' ');
        }
        let needs_parens = matches!(term, Expr::And(_) | Expr::Or(_));
        if needs_parens {
            out.push('(');
            term.write_text(out, false);
            out.push(')');
        } else {
            term.write_text(out, false);
        }
    }
    if parenthesize {
        out.push(')');
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}
