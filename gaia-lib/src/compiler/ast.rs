use crate::values::{v_list, v_obj, v_string, ObjId, Value};

/// A G expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Symbol(String),
    ObjRef(ObjId),
    /// `<target>.<name>`: raw attribute read through inheritance.
    Attr { target: Box<Expr>, name: String },
    /// `@<target>`: invoke `run`, an attribute, or code held in a variable.
    Exec(Box<Expr>),
    /// `<target>"<payload>"`: deliver a message.
    Send { target: Box<Expr>, payload: Box<Expr> },
    /// `[head arg ...]`, or implicit data when the head is not a callee form.
    List(Vec<Expr>),
}

/// A G source fragment: one or more expressions evaluated in order, the last
/// value winning.
#[derive(Clone, Debug, PartialEq)]
pub struct Program(pub Vec<Expr>);

impl Expr {
    /// Head-position rule: symbols, `@`- and `.`-expressions, and object
    /// references are callees; anything else makes the list implicit data.
    pub fn is_callee_form(&self) -> bool {
        matches!(
            self,
            Expr::Symbol(_) | Expr::Exec(_) | Expr::Attr { .. } | Expr::ObjRef(_)
        )
    }

    /// Structural conversion to a data value, used by `quote` and by list
    /// coercion of list-shaped strings. Symbols become their names; anything
    /// executable becomes its source text.
    pub fn to_data_value(&self) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Symbol(name) => v_string(name.clone()),
            Expr::ObjRef(id) => v_obj(id.clone()),
            Expr::List(items) => v_list(items.iter().map(|e| e.to_data_value()).collect()),
            other => v_string(crate::compiler::unparse::unparse_expr(other)),
        }
    }
}
