use crate::compiler::ast::{Expr, Program};
use crate::values::{escape_str, Value};

/// Renders an expression back to canonical G source. Parsing the result
/// yields the same tree, which is also what lets diagnostics quote the
/// failing expression verbatim.
pub fn unparse_expr(expr: &Expr) -> String {
    match expr {
        Expr::Literal(Value::Str(s)) => format!("\"{}\"", escape_str(s)),
        Expr::Literal(v) => v.to_literal(),
        Expr::Symbol(name) => name.clone(),
        Expr::ObjRef(id) => id.to_string(),
        Expr::Attr { target, name } => format!("{}.{}", unparse_expr(target), name),
        Expr::Exec(inner) => format!("@{}", unparse_expr(inner)),
        Expr::Send { target, payload } => {
            let rendered = match payload.as_ref() {
                Expr::Literal(Value::Str(s)) => escape_str(s),
                other => unparse_expr(other),
            };
            format!("{}\"{}\"", unparse_expr(target), rendered)
        }
        Expr::List(items) => {
            let parts: Vec<String> = items.iter().map(unparse_expr).collect();
            format!("[{}]", parts.join(" "))
        }
    }
}

pub fn unparse_program(program: &Program) -> String {
    program
        .0
        .iter()
        .map(unparse_expr)
        .collect::<Vec<_>>()
        .join("\n")
}
