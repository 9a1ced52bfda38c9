use std::collections::HashMap;
use std::sync::Arc;

use crate::bf_declare;
use crate::values::{v_bool, v_str, Failure, Value};
use crate::vm::builtin::{BfCallState, BuiltinFunction};

/// Value-wise equality for primitives and structures, identity for object
/// handles.
async fn bf_equals<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 2 {
        return Err(bf_args.arity_error("two arguments"));
    }
    Ok(v_bool(bf_args.args[0] == bf_args.args[1]))
}
bf_declare!(equals, bf_equals);

async fn bf_not<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 1 {
        return Err(bf_args.arity_error("one argument"));
    }
    Ok(v_bool(!bf_args.args[0].is_true()))
}
bf_declare!(not, bf_not);

async fn bf_typeof<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 1 {
        return Err(bf_args.arity_error("one argument"));
    }
    Ok(v_str(bf_args.args[0].type_name()))
}
bf_declare!(typeof_, bf_typeof);

pub(crate) fn register(builtins: &mut HashMap<&'static str, Arc<dyn BuiltinFunction>>) {
    builtins.insert("equals", Arc::new(BfEquals {}));
    builtins.insert("not", Arc::new(BfNot {}));
    builtins.insert("typeof", Arc::new(BfTypeof {}));
}
