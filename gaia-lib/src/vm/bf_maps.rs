use std::collections::HashMap;
use std::sync::Arc;

use crate::bf_declare;
use crate::values::{v_list, v_map, v_null, v_string, Failure, Value};
use crate::vm::builtin::{BfCallState, BuiltinFunction};

async fn bf_mapget<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 2 {
        return Err(bf_args.arity_error("a map and a key"));
    }
    let Value::Map(map) = &bf_args.args[0] else {
        return Err(bf_args.type_error("mapget expects a map"));
    };
    let key = bf_args.args[1].coerce_str();
    Ok(map.get(&key).cloned().unwrap_or_else(v_null))
}
bf_declare!(mapget, bf_mapget);

async fn bf_mapset<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 3 {
        return Err(bf_args.arity_error("a map, a key, and a value"));
    }
    let mut map = match &bf_args.args[0] {
        Value::Map(map) => map.clone(),
        Value::Null => Default::default(),
        _ => return Err(bf_args.type_error("mapset expects a map")),
    };
    map.insert(bf_args.args[1].coerce_str(), bf_args.args[2].clone());
    Ok(v_map(map))
}
bf_declare!(mapset, bf_mapset);

async fn bf_keys<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 1 {
        return Err(bf_args.arity_error("a map"));
    }
    let Value::Map(map) = &bf_args.args[0] else {
        return Err(bf_args.type_error("keys expects a map"));
    };
    Ok(v_list(map.keys().map(|k| v_string(k.clone())).collect()))
}
bf_declare!(keys, bf_keys);

pub(crate) fn register(builtins: &mut HashMap<&'static str, Arc<dyn BuiltinFunction>>) {
    builtins.insert("mapget", Arc::new(BfMapget {}));
    builtins.insert("mapset", Arc::new(BfMapset {}));
    builtins.insert("keys", Arc::new(BfKeys {}));
}
