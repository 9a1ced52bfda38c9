use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::compiler::{unparse_expr, Expr, Program};
use crate::db::WorldCache;
use crate::input::registry::Registry;
use crate::model::account::RoleSet;
use crate::tasks::sessions::MessageSink;
use crate::values::{config_object, v_bool, v_list, v_null, v_obj, v_string, Failure, ObjId, Value};
use crate::vm::builtin::{resolve_objref, BfCallState, BuiltinFunction};
use crate::vm::context::{Context, Limits, Unwind};

const RESERVED_FORMS: &[&str] = &["if", "define", "return", "and", "or", "quote"];

/// The tree-walking evaluator plus everything it bridges to: the world
/// cache, message delivery, the command/dictionary registry, and the
/// standard-library table.
pub struct Engine {
    builtins: HashMap<&'static str, Arc<dyn BuiltinFunction>>,
    pub cache: Arc<WorldCache>,
    pub sink: Arc<dyn MessageSink>,
    pub registry: Arc<Registry>,
    // Serializes on_message delivery per target object.
    msg_locks: DashMap<ObjId, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(cache: Arc<WorldCache>, sink: Arc<dyn MessageSink>, registry: Arc<Registry>) -> Self {
        let mut builtins: HashMap<&'static str, Arc<dyn BuiltinFunction>> = HashMap::new();
        crate::vm::bf_num::register(&mut builtins);
        crate::vm::bf_values::register(&mut builtins);
        crate::vm::bf_strings::register(&mut builtins);
        crate::vm::bf_lists::register(&mut builtins);
        crate::vm::bf_maps::register(&mut builtins);
        crate::vm::bf_world::register(&mut builtins);
        crate::vm::bf_server::register(&mut builtins);
        Self {
            builtins,
            cache,
            sink,
            registry,
            msg_locks: DashMap::new(),
        }
    }

    pub fn builtin_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.builtins.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Interpreter bounds, read through `#config` with defaults.
    pub async fn limits(&self) -> Limits {
        let mut limits = Limits::default();
        if let Ok(Some(v)) = self
            .cache
            .get_attribute(&config_object(), "depth_limit")
            .await
        {
            let n = v.coerce_num();
            if n >= 1.0 {
                limits.depth_limit = n as usize;
            }
        }
        if let Ok(Some(v)) = self
            .cache
            .get_attribute(&config_object(), "time_budget_ms")
            .await
        {
            let n = v.coerce_num();
            if n >= 1.0 {
                limits.budget = std::time::Duration::from_millis(n as u64);
            }
        }
        limits
    }

    /// A fresh top-level context with the configured bounds.
    pub async fn context_for(
        &self,
        executor: ObjId,
        actor: ObjId,
        roles: RoleSet,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Context {
        let limits = self.limits().await;
        match cancel {
            Some(flag) => Context::with_cancel(executor, actor, roles, limits, flag),
            None => Context::new(executor, actor, roles, limits),
        }
    }

    /// Evaluates a source fragment under the given context. `return` at the
    /// top level yields its value.
    pub async fn eval_source(&self, ctx: &mut Context, src: &str) -> Result<Value, Failure> {
        let program = ctx.parse_cached(src)?;
        match self.eval_program(ctx, &program).await {
            Ok(v) => Ok(v),
            Err(Unwind::Return(v)) => Ok(v),
            Err(Unwind::Failure(f)) => Err(f),
        }
    }

    /// Invokes the G source stored at `attr` on `target`, the entry point
    /// used by the binder, the ticker, and `@`-execution.
    pub async fn run_attribute(
        &self,
        ctx: &mut Context,
        target: &ObjId,
        attr: &str,
        args: Vec<Value>,
    ) -> Result<Value, Failure> {
        match self.invoke_attr(ctx, target.clone(), attr, args).await {
            Ok(v) => Ok(v),
            Err(Unwind::Return(v)) => Ok(v),
            Err(Unwind::Failure(f)) => Err(f),
        }
    }

    async fn eval_program(&self, ctx: &mut Context, program: &Program) -> Result<Value, Unwind> {
        let mut last = v_null();
        for expr in &program.0 {
            last = self.eval(ctx, expr).await?;
        }
        Ok(last)
    }

    pub(crate) fn eval<'a>(
        &'a self,
        ctx: &'a mut Context,
        expr: &'a Expr,
    ) -> BoxFuture<'a, Result<Value, Unwind>> {
        async move {
            match expr {
                Expr::Literal(v) => Ok(v.clone()),
                // Unbound symbols self-quote to their names; `this`, `actor`
                // and `executor` resolve to the context handles unless
                // shadowed.
                Expr::Symbol(name) => Ok(match ctx.lookup(name) {
                    Some(v) => v.clone(),
                    None => match name.as_str() {
                        "this" => v_obj(ctx.this.clone()),
                        "actor" => v_obj(ctx.actor.clone()),
                        "executor" => v_obj(ctx.executor.clone()),
                        _ => v_string(name.clone()),
                    },
                }),
                Expr::ObjRef(id) => Ok(v_obj(id.clone())),
                Expr::Attr { target, name } => {
                    let tv = self.eval(ctx, target).await?;
                    let id = self.require_objref(ctx, &tv, expr)?;
                    Ok(self
                        .cache
                        .get_attribute(&id, name)
                        .await?
                        .unwrap_or_else(v_null))
                }
                Expr::Exec(inner) => self.eval_exec(ctx, expr, inner, Vec::new()).await,
                Expr::Send { target, payload } => {
                    let tv = self.eval(ctx, target).await?;
                    let id = self.require_objref(ctx, &tv, expr)?;
                    let value = match payload.as_ref() {
                        Expr::Literal(Value::Str(s)) => v_string(s.clone()),
                        exec => {
                            // Execution payloads run with `this` rebound to
                            // the message target.
                            let saved = ctx.this.clone();
                            ctx.this = id.clone();
                            let result = self.eval(ctx, exec).await;
                            ctx.this = saved;
                            result?
                        }
                    };
                    self.send_message(ctx, &id, value).await?;
                    Ok(v_null())
                }
                Expr::List(items) => self.eval_list(ctx, expr, items).await,
            }
        }
        .boxed()
    }

    async fn eval_list(
        &self,
        ctx: &mut Context,
        whole: &Expr,
        items: &[Expr],
    ) -> Result<Value, Unwind> {
        ctx.check_budget(whole)?;
        let Some(head) = items.first() else {
            return Ok(v_list(Vec::new()));
        };
        if !head.is_callee_form() {
            // Implicit data: evaluate every element.
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(self.eval(ctx, item).await?);
            }
            return Ok(v_list(out));
        }
        let rest = &items[1..];
        match head {
            Expr::Symbol(name) if RESERVED_FORMS.contains(&name.as_str()) => {
                self.eval_reserved(ctx, whole, name, rest).await
            }
            Expr::Symbol(name) => {
                let args = self.eval_args(ctx, rest).await?;
                if let Some(builtin) = self.builtins.get(name.as_str()).cloned() {
                    let mut state = BfCallState {
                        engine: self,
                        ctx,
                        name,
                        args,
                        call_expr: whole,
                    };
                    return builtin.call(&mut state).await.map_err(Unwind::from);
                }
                if let Some(bound) = ctx.lookup(name).cloned() {
                    let Value::Str(src) = bound else {
                        return Err(Failure::TypeCoercion {
                            reason: format!("`{}` is not callable", name),
                            expr: unparse_expr(whole),
                        }
                        .into());
                    };
                    return self.run_code(ctx, whole, &src, args).await;
                }
                Err(Failure::UnresolvedCallee {
                    callee: name.clone(),
                    expr: unparse_expr(whole),
                }
                .into())
            }
            Expr::Exec(inner) => {
                let args = self.eval_args(ctx, rest).await?;
                self.eval_exec(ctx, whole, inner, args).await
            }
            Expr::Attr { .. } => {
                let args = self.eval_args(ctx, rest).await?;
                let value = self.eval(ctx, head).await?;
                let Value::Str(src) = value else {
                    return Err(Failure::TypeCoercion {
                        reason: "attribute does not hold G source".to_string(),
                        expr: unparse_expr(whole),
                    }
                    .into());
                };
                self.run_code(ctx, whole, &src, args).await
            }
            Expr::ObjRef(id) => {
                let args = self.eval_args(ctx, rest).await?;
                self.invoke_attr(ctx, id.clone(), "run", args).await
            }
            _ => unreachable!("callee forms are exhaustive"),
        }
    }

    async fn eval_args(&self, ctx: &mut Context, items: &[Expr]) -> Result<Vec<Value>, Unwind> {
        let mut args = Vec::with_capacity(items.len());
        for item in items {
            args.push(self.eval(ctx, item).await?);
        }
        Ok(args)
    }

    /// The reserved forms, which control evaluation of their arguments.
    async fn eval_reserved(
        &self,
        ctx: &mut Context,
        whole: &Expr,
        name: &str,
        rest: &[Expr],
    ) -> Result<Value, Unwind> {
        match name {
            "if" => {
                if rest.len() < 2 || rest.len() > 3 {
                    return Err(Failure::TypeCoercion {
                        reason: "if expects a condition, a branch, and an optional else"
                            .to_string(),
                        expr: unparse_expr(whole),
                    }
                    .into());
                }
                let cond = self.eval(ctx, &rest[0]).await?;
                if cond.is_true() {
                    self.eval(ctx, &rest[1]).await
                } else if let Some(alternative) = rest.get(2) {
                    self.eval(ctx, alternative).await
                } else {
                    Ok(v_null())
                }
            }
            "define" => {
                let (Some(Expr::Symbol(var)), Some(value_expr)) = (rest.first(), rest.get(1))
                else {
                    return Err(Failure::TypeCoercion {
                        reason: "define expects a symbol and a value".to_string(),
                        expr: unparse_expr(whole),
                    }
                    .into());
                };
                let value = self.eval(ctx, value_expr).await?;
                ctx.define(var, value.clone());
                Ok(value)
            }
            "return" => {
                let value = match rest.first() {
                    Some(expr) => self.eval(ctx, expr).await?,
                    None => v_null(),
                };
                Err(Unwind::Return(value))
            }
            "and" => {
                let mut last = v_bool(true);
                for expr in rest {
                    last = self.eval(ctx, expr).await?;
                    if !last.is_true() {
                        return Ok(last);
                    }
                }
                Ok(last)
            }
            "or" => {
                let mut last = v_bool(false);
                for expr in rest {
                    last = self.eval(ctx, expr).await?;
                    if last.is_true() {
                        return Ok(last);
                    }
                }
                Ok(last)
            }
            "quote" => match rest {
                [expr] => Ok(v_string(unparse_expr(expr))),
                _ => Err(Failure::TypeCoercion {
                    reason: "quote expects exactly one expression".to_string(),
                    expr: unparse_expr(whole),
                }
                .into()),
            },
            _ => unreachable!("reserved forms are exhaustive"),
        }
    }

    /// The three `@` forms: `@obj` invokes `run`, `@obj.attr` invokes that
    /// attribute, `@var` executes code held in a variable. The pseudo-refs
    /// `@this` / `@actor` / `@executor` evaluate to handles.
    async fn eval_exec(
        &self,
        ctx: &mut Context,
        whole: &Expr,
        inner: &Expr,
        args: Vec<Value>,
    ) -> Result<Value, Unwind> {
        match inner {
            Expr::Symbol(name) => {
                if let Some(bound) = ctx.lookup(name).cloned() {
                    let Value::Str(src) = bound else {
                        return Err(Failure::TypeCoercion {
                            reason: format!("`{}` does not hold G source", name),
                            expr: unparse_expr(whole),
                        }
                        .into());
                    };
                    return self.run_code(ctx, whole, &src, args).await;
                }
                let pseudo = match name.as_str() {
                    "this" => Some(ctx.this.clone()),
                    "actor" => Some(ctx.actor.clone()),
                    "executor" => Some(ctx.executor.clone()),
                    _ => None,
                };
                match pseudo {
                    Some(id) if args.is_empty() => Ok(v_obj(id)),
                    Some(id) => self.invoke_attr(ctx, id, "run", args).await,
                    None => Err(Failure::UnresolvedCallee {
                        callee: format!("@{}", name),
                        expr: unparse_expr(whole),
                    }
                    .into()),
                }
            }
            Expr::ObjRef(id) => self.invoke_attr(ctx, id.clone(), "run", args).await,
            Expr::Attr { target, name } => {
                let tv = self.eval(ctx, target).await?;
                let id = self.require_objref(ctx, &tv, whole)?;
                self.invoke_attr(ctx, id, name, args).await
            }
            _ => Err(Failure::UnresolvedCallee {
                callee: unparse_expr(inner),
                expr: unparse_expr(whole),
            }
            .into()),
        }
    }

    /// Runs a code-valued string (a frame binding or `@var`) in a fresh
    /// child scope. Does not consume an invocation frame and does not catch
    /// `return`.
    async fn run_code(
        &self,
        ctx: &mut Context,
        whole: &Expr,
        src: &str,
        args: Vec<Value>,
    ) -> Result<Value, Unwind> {
        ctx.check_budget(whole)?;
        ctx.enter_code(whole)?;
        let program = match ctx.parse_cached(src) {
            Ok(p) => p,
            Err(e) => {
                ctx.exit_code();
                return Err(e.into());
            }
        };
        ctx.push_frame();
        ctx.define("args", v_list(args));
        let result = self.eval_program(ctx, &program).await;
        ctx.pop_frame();
        ctx.exit_code();
        result
    }

    /// Invokes the G source stored at `attr` on `target`. Consumes an
    /// invocation frame, rebinds executor and this, and is the unwind point
    /// for `return`.
    pub(crate) fn invoke_attr<'a>(
        &'a self,
        ctx: &'a mut Context,
        target: ObjId,
        attr: &'a str,
        args: Vec<Value>,
    ) -> BoxFuture<'a, Result<Value, Unwind>> {
        async move {
            let Some(value) = self.cache.get_attribute(&target, attr).await? else {
                return Err(Failure::NotFound {
                    what: format!("{}.{}", target, attr),
                }
                .into());
            };
            let Value::Str(src) = value else {
                return Err(Failure::TypeCoercion {
                    reason: format!("{}.{} does not hold G source", target, attr),
                    expr: format!("@{}.{}", target, attr),
                }
                .into());
            };
            ctx.enter_invocation()?;
            let program = match ctx.parse_cached(&src) {
                Ok(p) => p,
                Err(e) => {
                    ctx.exit_invocation();
                    return Err(e.into());
                }
            };
            let saved_executor = std::mem::replace(&mut ctx.executor, target.clone());
            let saved_this = std::mem::replace(&mut ctx.this, target);
            ctx.push_frame();
            ctx.define("args", v_list(args));
            let result = self.eval_program(ctx, &program).await;
            ctx.pop_frame();
            ctx.this = saved_this;
            ctx.executor = saved_executor;
            ctx.exit_invocation();
            match result {
                Err(Unwind::Return(v)) => Ok(v),
                other => other,
            }
        }
        .boxed()
    }

    /// Message delivery: a session takes the line if the target is embodied
    /// or a transient user; otherwise `on_message` (inheritance-resolved)
    /// runs, serialized per target; otherwise the message is dropped.
    pub async fn send_message(
        &self,
        ctx: &mut Context,
        target: &ObjId,
        payload: Value,
    ) -> Result<(), Failure> {
        let line = payload.coerce_str();
        if self.sink.deliver(target, &line).await? {
            return Ok(());
        }
        match self.cache.get_attribute(target, "on_message").await? {
            Some(Value::Str(_)) => {
                // Already delivering to this target somewhere up the chain:
                // run inline, the outer holder owns the lock.
                if !ctx.begin_delivery(target) {
                    self.run_attribute(ctx, target, "on_message", vec![payload])
                        .await?;
                    return Ok(());
                }
                let lock = self
                    .msg_locks
                    .entry(target.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(())))
                    .clone();
                let guard = lock.lock().await;
                let result = self
                    .run_attribute(ctx, target, "on_message", vec![payload])
                    .await;
                drop(guard);
                ctx.end_delivery(target);
                result?;
                Ok(())
            }
            _ => {
                debug!(target = %target, "message dropped: no session, no on_message");
                Ok(())
            }
        }
    }

    /// Reads G source from a file and installs it at `target.attr`,
    /// replacing prior content. Files that do not parse are rejected before
    /// anything is written. Running invocations keep their old parse; the
    /// caller arranges re-invocation.
    pub async fn load_source(&self, path: &str, target: &ObjId, attr: &str) -> Result<(), Failure> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Failure::NotFound {
                what: format!("{}: {}", path, e),
            })?;
        crate::compiler::parse_program(&source)?;
        let attr_name = attr.to_string();
        self.cache
            .update(target, move |o| {
                o.set_attribute(&attr_name, Value::Str(source))
            })
            .await?;
        debug!(target = %target, attr = %attr, path = %path, "source loaded");
        Ok(())
    }

    fn require_objref(&self, ctx: &Context, value: &Value, expr: &Expr) -> Result<ObjId, Failure> {
        resolve_objref(ctx, value).ok_or_else(|| Failure::TypeCoercion {
            reason: format!("`{}` is not an object reference", value.coerce_str()),
            expr: unparse_expr(expr),
        })
    }
}
