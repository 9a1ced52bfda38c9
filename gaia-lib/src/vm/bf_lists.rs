use std::collections::HashMap;
use std::sync::Arc;

use crate::bf_declare;
use crate::compiler::parse_expr_src;
use crate::values::{v_int, v_list, v_null, Failure, Value};
use crate::vm::builtin::{BfCallState, BuiltinFunction};

/// List coercion. A list stays a list; a *string that looks like a list*
/// (`"[1 2 3]"`) is parsed into one; null is the empty sequence; anything
/// else is a one-element list holding the value.
pub(crate) fn coerce_list(value: &Value) -> Result<Vec<Value>, Failure> {
    match value {
        Value::List(items) => Ok(items.clone()),
        Value::Null => Ok(Vec::new()),
        Value::Str(s) if s.trim_start().starts_with('[') => {
            let expr = parse_expr_src(s.trim())?;
            match expr.to_data_value() {
                Value::List(items) => Ok(items),
                other => Ok(vec![other]),
            }
        }
        other => Ok(vec![other.clone()]),
    }
}

async fn bf_list<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    Ok(v_list(bf_args.args.clone()))
}
bf_declare!(list, bf_list);

async fn bf_listlength<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 1 {
        return Err(bf_args.arity_error("one argument"));
    }
    Ok(v_int(coerce_list(&bf_args.args[0])?.len() as i64))
}
bf_declare!(listlength, bf_listlength);

/// 0-based indexed access; out of range yields null.
async fn bf_nth<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 2 {
        return Err(bf_args.arity_error("a list and an index"));
    }
    let items = coerce_list(&bf_args.args[0])?;
    let index = bf_args.args[1].coerce_num();
    if index < 0.0 {
        return Ok(v_null());
    }
    Ok(items.get(index as usize).cloned().unwrap_or_else(v_null))
}
bf_declare!(nth, bf_nth);

async fn bf_append<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() < 2 {
        return Err(bf_args.arity_error("a list and at least one value"));
    }
    let mut items = coerce_list(&bf_args.args[0])?;
    items.extend(bf_args.args[1..].iter().cloned());
    Ok(v_list(items))
}
bf_declare!(append, bf_append);

pub(crate) fn register(builtins: &mut HashMap<&'static str, Arc<dyn BuiltinFunction>>) {
    builtins.insert("list", Arc::new(BfList {}));
    builtins.insert("listlength", Arc::new(BfListlength {}));
    builtins.insert("nth", Arc::new(BfNth {}));
    builtins.insert("append", Arc::new(BfAppend {}));
}
