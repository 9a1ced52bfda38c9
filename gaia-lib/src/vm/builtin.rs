use async_trait::async_trait;

use crate::compiler::{unparse_expr, Expr};
use crate::values::{Failure, ObjId, Value};
use crate::vm::context::Context;
use crate::vm::execute::Engine;

/// The arguments and surrounding state handed to a standard-library
/// function.
pub struct BfCallState<'a> {
    pub engine: &'a Engine,
    pub ctx: &'a mut Context,
    pub name: &'a str,
    pub args: Vec<Value>,
    pub call_expr: &'a Expr,
}

impl<'a> BfCallState<'a> {
    pub fn expr_text(&self) -> String {
        unparse_expr(self.call_expr)
    }

    pub fn arity_error(&self, expected: &str) -> Failure {
        Failure::TypeCoercion {
            reason: format!("{} expects {}", self.name, expected),
            expr: self.expr_text(),
        }
    }

    pub fn type_error(&self, reason: &str) -> Failure {
        Failure::TypeCoercion {
            reason: reason.to_string(),
            expr: self.expr_text(),
        }
    }

    /// Resolves an argument to an object handle: a handle value, a `#id`
    /// string, or one of the `@this` / `@actor` / `@executor` pseudo-refs.
    pub fn objid_arg(&self, index: usize) -> Result<ObjId, Failure> {
        let Some(value) = self.args.get(index) else {
            return Err(self.arity_error("an object reference"));
        };
        resolve_objref(self.ctx, value).ok_or_else(|| Failure::NotFound {
            what: format!("{} (argument {} of {})", value.coerce_str(), index + 1, self.name),
        })
    }
}

pub fn resolve_objref(ctx: &Context, value: &Value) -> Option<ObjId> {
    match value {
        Value::Obj(id) => Some(id.clone()),
        Value::Str(s) => match s.as_str() {
            "@this" => Some(ctx.this.clone()),
            "@actor" => Some(ctx.actor.clone()),
            "@executor" => Some(ctx.executor.clone()),
            _ => s.strip_prefix('#').map(ObjId::new),
        },
        _ => None,
    }
}

#[async_trait]
pub trait BuiltinFunction: Sync + Send {
    fn name(&self) -> &str;
    async fn call<'a>(&self, bf_args: &mut BfCallState<'a>) -> Result<Value, Failure>;
}

/// Declares a `BuiltinFunction` wrapper struct around an async fn taking a
/// `BfCallState`.
#[macro_export]
macro_rules! bf_declare {
    ( $name:ident, $action:expr ) => {
        paste::paste! {
            pub struct [<Bf $name:camel>] {}
            #[async_trait::async_trait]
            impl $crate::vm::builtin::BuiltinFunction for [<Bf $name:camel>] {
                fn name(&self) -> &str {
                    stringify!($name)
                }
                async fn call<'a>(
                    &self,
                    bf_args: &mut $crate::vm::builtin::BfCallState<'a>,
                ) -> Result<$crate::values::Value, $crate::values::Failure> {
                    $action(bf_args).await
                }
            }
        }
    };
}
