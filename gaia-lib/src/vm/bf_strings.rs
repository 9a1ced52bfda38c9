use std::collections::HashMap;
use std::sync::Arc;

use crate::bf_declare;
use crate::values::{v_int, v_list, v_string, Failure, Value};
use crate::vm::builtin::{BfCallState, BuiltinFunction};

async fn bf_concat<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    let mut out = String::new();
    for v in &bf_args.args {
        out.push_str(&v.coerce_str());
    }
    Ok(v_string(out))
}
bf_declare!(concat, bf_concat);

// tostr is concat under another name; both appear in world code.
bf_declare!(tostr, bf_concat);

async fn bf_strlen<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 1 {
        return Err(bf_args.arity_error("one argument"));
    }
    Ok(v_int(bf_args.args[0].coerce_str().chars().count() as i64))
}
bf_declare!(strlen, bf_strlen);

/// `substr s start end?`: 0-based, end-exclusive, clamped to the string.
async fn bf_substr<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() < 2 || bf_args.args.len() > 3 {
        return Err(bf_args.arity_error("a string, a start, and an optional end"));
    }
    let s = bf_args.args[0].coerce_str();
    let chars: Vec<char> = s.chars().collect();
    let start = (bf_args.args[1].coerce_num().max(0.0) as usize).min(chars.len());
    let end = match bf_args.args.get(2) {
        Some(v) => (v.coerce_num().max(0.0) as usize).min(chars.len()),
        None => chars.len(),
    };
    if end <= start {
        return Ok(v_string(String::new()));
    }
    Ok(v_string(chars[start..end].iter().collect()))
}
bf_declare!(substr, bf_substr);

/// `split s sep?`: whitespace split by default.
async fn bf_split<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.is_empty() || bf_args.args.len() > 2 {
        return Err(bf_args.arity_error("a string and an optional separator"));
    }
    let s = bf_args.args[0].coerce_str();
    let parts: Vec<Value> = match bf_args.args.get(1) {
        Some(sep) => {
            let sep = sep.coerce_str();
            if sep.is_empty() {
                return Err(bf_args.type_error("separator must not be empty"));
            }
            s.split(&sep).map(|p| v_string(p.to_string())).collect()
        }
        None => s
            .split_whitespace()
            .map(|p| v_string(p.to_string()))
            .collect(),
    };
    Ok(v_list(parts))
}
bf_declare!(split, bf_split);

async fn bf_join<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.is_empty() || bf_args.args.len() > 2 {
        return Err(bf_args.arity_error("a list and an optional separator"));
    }
    let items = crate::vm::bf_lists::coerce_list(&bf_args.args[0])?;
    let sep = bf_args
        .args
        .get(1)
        .map(|v| v.coerce_str())
        .unwrap_or_else(|| " ".to_string());
    let parts: Vec<String> = items.iter().map(|v| v.coerce_str()).collect();
    Ok(v_string(parts.join(&sep)))
}
bf_declare!(join, bf_join);

pub(crate) fn register(builtins: &mut HashMap<&'static str, Arc<dyn BuiltinFunction>>) {
    builtins.insert("concat", Arc::new(BfConcat {}));
    builtins.insert("tostr", Arc::new(BfTostr {}));
    builtins.insert("strlen", Arc::new(BfStrlen {}));
    builtins.insert("substr", Arc::new(BfSubstr {}));
    builtins.insert("split", Arc::new(BfSplit {}));
    builtins.insert("join", Arc::new(BfJoin {}));
}
