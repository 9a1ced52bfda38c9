use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;

use crate::bf_declare;
use crate::values::{v_bool, v_int, v_num, Failure, Value};
use crate::vm::builtin::{BfCallState, BuiltinFunction};

// Numeric builtins coerce every argument via "parse decimal, else 0".

async fn bf_add<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    Ok(v_num(bf_args.args.iter().map(|v| v.coerce_num()).sum()))
}
bf_declare!(add, bf_add);

async fn bf_sub<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    match bf_args.args.len() {
        0 => Err(bf_args.arity_error("at least one argument")),
        1 => Ok(v_num(-bf_args.args[0].coerce_num())),
        _ => {
            let mut acc = bf_args.args[0].coerce_num();
            for v in &bf_args.args[1..] {
                acc -= v.coerce_num();
            }
            Ok(v_num(acc))
        }
    }
}
bf_declare!(sub, bf_sub);

async fn bf_mul<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    Ok(v_num(bf_args.args.iter().map(|v| v.coerce_num()).product()))
}
bf_declare!(mul, bf_mul);

async fn bf_div<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() < 2 {
        return Err(bf_args.arity_error("at least two arguments"));
    }
    let mut acc = bf_args.args[0].coerce_num();
    for v in &bf_args.args[1..] {
        let divisor = v.coerce_num();
        if divisor == 0.0 {
            return Err(bf_args.type_error("division by zero"));
        }
        acc /= divisor;
    }
    Ok(v_num(acc))
}
bf_declare!(div, bf_div);

async fn bf_mod<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 2 {
        return Err(bf_args.arity_error("two arguments"));
    }
    let divisor = bf_args.args[1].coerce_num();
    if divisor == 0.0 {
        return Err(bf_args.type_error("modulus by zero"));
    }
    Ok(v_num(bf_args.args[0].coerce_num() % divisor))
}
bf_declare!(mod_, bf_mod);

fn compare<'a>(bf_args: &BfCallState<'a>) -> Result<(f64, f64), Failure> {
    if bf_args.args.len() != 2 {
        return Err(bf_args.arity_error("two arguments"));
    }
    Ok((bf_args.args[0].coerce_num(), bf_args.args[1].coerce_num()))
}

async fn bf_lt<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    let (a, b) = compare(bf_args)?;
    Ok(v_bool(a < b))
}
bf_declare!(lt, bf_lt);

async fn bf_gt<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    let (a, b) = compare(bf_args)?;
    Ok(v_bool(a > b))
}
bf_declare!(gt, bf_gt);

async fn bf_le<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    let (a, b) = compare(bf_args)?;
    Ok(v_bool(a <= b))
}
bf_declare!(le, bf_le);

async fn bf_ge<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    let (a, b) = compare(bf_args)?;
    Ok(v_bool(a >= b))
}
bf_declare!(ge, bf_ge);

async fn bf_random<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    let bound = bf_args
        .args
        .first()
        .map(|v| v.coerce_num())
        .unwrap_or(2.0) as i64;
    if bound <= 0 {
        return Err(bf_args.type_error("random expects a positive bound"));
    }
    Ok(v_int(rand::thread_rng().gen_range(0..bound)))
}
bf_declare!(random, bf_random);

async fn bf_time<'a>(_bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    Ok(v_int(chrono::Utc::now().timestamp()))
}
bf_declare!(time, bf_time);

pub(crate) fn register(builtins: &mut HashMap<&'static str, Arc<dyn BuiltinFunction>>) {
    builtins.insert("+", Arc::new(BfAdd {}));
    builtins.insert("-", Arc::new(BfSub {}));
    builtins.insert("*", Arc::new(BfMul {}));
    builtins.insert("/", Arc::new(BfDiv {}));
    builtins.insert("mod", Arc::new(BfMod {}));
    builtins.insert("<", Arc::new(BfLt {}));
    builtins.insert(">", Arc::new(BfGt {}));
    builtins.insert("<=", Arc::new(BfLe {}));
    builtins.insert(">=", Arc::new(BfGe {}));
    builtins.insert("random", Arc::new(BfRandom {}));
    builtins.insert("time", Arc::new(BfTime {}));
}
