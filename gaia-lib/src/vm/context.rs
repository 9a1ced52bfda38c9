use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::compiler::{parse_program, unparse_expr, Expr, Program};
use crate::model::account::RoleSet;
use crate::values::{Failure, ObjId, Value};

/// Interpreter bounds for one top-level invocation. Defaults are the
/// `#config` fallbacks; the engine overrides them from `#config` attributes.
#[derive(Clone, Copy, Debug)]
pub struct Limits {
    pub depth_limit: usize,
    pub budget: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            depth_limit: 128,
            budget: Duration::from_millis(500),
        }
    }
}

// Backstop for code-valued callables, which do not consume invocation
// frames. Hitting it unwinds as a timeout.
const CODE_DEPTH_LIMIT: usize = 65_536;

/// Control flow out of an evaluation: a failure, or a `return` unwinding to
/// the innermost attribute invocation.
#[derive(Debug)]
pub enum Unwind {
    Failure(Failure),
    Return(Value),
}

impl From<Failure> for Unwind {
    fn from(f: Failure) -> Self {
        Unwind::Failure(f)
    }
}

/// Everything one evaluation runs under: the executor/actor/this triple,
/// lexically scoped variable frames, the depth counter, the wall-clock
/// deadline, the cooperative-cancellation flag, and the per-invocation parse
/// cache.
pub struct Context {
    pub executor: ObjId,
    pub actor: ObjId,
    pub this: ObjId,
    pub roles: RoleSet,
    frames: Vec<HashMap<String, Value>>,
    depth: usize,
    code_depth: usize,
    limits: Limits,
    deadline: Instant,
    cancel: Arc<AtomicBool>,
    parse_cache: HashMap<(String, usize), Arc<Program>>,
    // Targets whose on_message is running somewhere up this chain. Lets a
    // handler send to its own target without re-taking the per-target lock.
    delivering: HashSet<ObjId>,
}

impl Context {
    pub fn new(executor: ObjId, actor: ObjId, roles: RoleSet, limits: Limits) -> Self {
        Self::with_cancel(executor, actor, roles, limits, Arc::new(AtomicBool::new(false)))
    }

    pub fn with_cancel(
        executor: ObjId,
        actor: ObjId,
        roles: RoleSet,
        limits: Limits,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            this: executor.clone(),
            executor,
            actor,
            roles,
            frames: vec![HashMap::new()],
            depth: 0,
            code_depth: 0,
            limits,
            deadline: Instant::now() + limits.budget,
            cancel,
            parse_cache: HashMap::new(),
            delivering: HashSet::new(),
        }
    }

    pub fn define(&mut self, name: &str, value: Value) {
        self.frames
            .last_mut()
            .expect("context always has a frame")
            .insert(name.to_string(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    pub fn push_frame(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Cooperative bounds check, run on entry to every call form. The
    /// cancellation flag is set by session teardown; the deadline by the
    /// invocation budget.
    pub fn check_budget(&self, expr: &Expr) -> Result<(), Failure> {
        if self.cancel.load(Ordering::Relaxed) || Instant::now() >= self.deadline {
            return Err(Failure::Timeout {
                expr: unparse_expr(expr),
            });
        }
        Ok(())
    }

    pub fn enter_invocation(&mut self) -> Result<(), Failure> {
        if self.depth >= self.limits.depth_limit {
            return Err(Failure::DepthLimit {
                limit: self.limits.depth_limit,
            });
        }
        self.depth += 1;
        Ok(())
    }

    pub fn exit_invocation(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn enter_code(&mut self, expr: &Expr) -> Result<(), Failure> {
        if self.code_depth >= CODE_DEPTH_LIMIT {
            return Err(Failure::Timeout {
                expr: unparse_expr(expr),
            });
        }
        self.code_depth += 1;
        Ok(())
    }

    pub fn exit_code(&mut self) {
        self.code_depth = self.code_depth.saturating_sub(1);
    }

    /// Marks a message delivery in progress for `target`. Returns false if
    /// this chain is already delivering to it, in which case the caller
    /// must not re-take the per-target lock.
    pub fn begin_delivery(&mut self, target: &ObjId) -> bool {
        self.delivering.insert(target.clone())
    }

    pub fn end_delivery(&mut self, target: &ObjId) {
        self.delivering.remove(target);
    }

    /// Parse with memoization keyed by (source text, length), so code held
    /// in variables is not re-parsed every pass through a tight loop.
    pub fn parse_cached(&mut self, src: &str) -> Result<Arc<Program>, Failure> {
        let key = (src.to_string(), src.len());
        if let Some(cached) = self.parse_cache.get(&key) {
            return Ok(cached.clone());
        }
        let program = Arc::new(parse_program(src)?);
        self.parse_cache.insert(key, program.clone());
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::{v_int, v_str};

    fn ctx() -> Context {
        Context::new(
            ObjId::new("#x"),
            ObjId::new("#p"),
            RoleSet::new(),
            Limits::default(),
        )
    }

    #[test]
    fn test_frames_shadow_and_pop() {
        let mut c = ctx();
        c.define("x", v_int(1));
        c.push_frame();
        assert_eq!(c.lookup("x"), Some(&v_int(1)));
        c.define("x", v_str("inner"));
        assert_eq!(c.lookup("x"), Some(&v_str("inner")));
        c.pop_frame();
        assert_eq!(c.lookup("x"), Some(&v_int(1)));
    }

    #[test]
    fn test_depth_limit() {
        let mut c = ctx();
        for _ in 0..128 {
            c.enter_invocation().unwrap();
        }
        assert!(matches!(
            c.enter_invocation(),
            Err(Failure::DepthLimit { limit: 128 })
        ));
    }

    #[test]
    fn test_deadline_expiry() {
        let limits = Limits {
            budget: Duration::from_millis(0),
            ..Limits::default()
        };
        let c = Context::new(ObjId::new("#x"), ObjId::new("#p"), RoleSet::new(), limits);
        let expr = Expr::Symbol("x".to_string());
        assert!(matches!(
            c.check_budget(&expr),
            Err(Failure::Timeout { .. })
        ));
    }

    #[test]
    fn test_parse_cache_reuses_tree() {
        let mut c = ctx();
        let a = c.parse_cached("[log \"x\"]").unwrap();
        let b = c.parse_cached("[log \"x\"]").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
