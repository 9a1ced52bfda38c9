use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::bf_declare;
use crate::input::registry::WordTag;
use crate::model::account::{can_build, is_admin};
use crate::values::{v_null, Failure, Value};
use crate::vm::builtin::{BfCallState, BuiltinFunction};

/// Appends to the server log at info level.
async fn bf_log<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    let line = bf_args
        .args
        .iter()
        .map(|v| v.coerce_str())
        .collect::<Vec<_>>()
        .join(" ");
    info!(executor = %bf_args.ctx.executor, "{}", line);
    Ok(v_null())
}
bf_declare!(log, bf_log);

async fn bf_send<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 2 {
        return Err(bf_args.arity_error("a target and a payload"));
    }
    let target = bf_args.objid_arg(0)?;
    let payload = bf_args.args[1].clone();
    bf_args
        .engine
        .send_message(bf_args.ctx, &target, payload)
        .await?;
    Ok(v_null())
}
bf_declare!(send, bf_send);

/// Administrator-only: reads G source from a file and assigns it to an
/// attribute on the referenced object, replacing prior content. Not a hot
/// reload; running invocations keep their parse.
async fn bf_load<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() < 2 || bf_args.args.len() > 3 {
        return Err(bf_args.arity_error("a path, a reference, and an optional attribute"));
    }
    if !is_admin(&bf_args.ctx.roles) {
        return Err(Failure::Permission {
            reason: "load requires the admin role".to_string(),
        });
    }
    let path = bf_args.args[0].coerce_str();
    let target = bf_args.objid_arg(1)?;
    let attr = bf_args
        .args
        .get(2)
        .map(|v| v.coerce_str())
        .unwrap_or_else(|| "run".to_string());

    bf_args.engine.load_source(&path, &target, &attr).await?;
    info!(target = %target, attr = %attr, path = %path, "source loaded");
    Ok(v_null())
}
bf_declare!(load, bf_load);

/// Registers a Game-mode verb and synonyms into the dictionary snapshot.
async fn bf_register_verb<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.is_empty() {
        return Err(bf_args.arity_error("a verb and optional synonyms"));
    }
    if !can_build(&bf_args.ctx.roles) {
        return Err(Failure::Permission {
            reason: "register_verb requires the builder role".to_string(),
        });
    }
    let canonical = bf_args.args[0].coerce_str();
    let synonyms: Vec<String> = bf_args.args[1..].iter().map(|v| v.coerce_str()).collect();
    bf_args.engine.registry.register_verb(&canonical, &synonyms);
    Ok(v_null())
}
bf_declare!(register_verb, bf_register_verb);

/// Tags a dictionary word (noun, preposition, article, pronoun) from G.
async fn bf_register_word<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 2 {
        return Err(bf_args.arity_error("a tag and a word"));
    }
    if !can_build(&bf_args.ctx.roles) {
        return Err(Failure::Permission {
            reason: "register_word requires the builder role".to_string(),
        });
    }
    let tag = match bf_args.args[0].coerce_str().as_str() {
        "verb" => WordTag::Verb,
        "noun" => WordTag::Noun,
        "preposition" | "prep" => WordTag::Preposition,
        "article" => WordTag::Article,
        "pronoun" => WordTag::Pronoun,
        other => {
            return Err(bf_args.type_error(&format!("unknown word tag `{}`", other)));
        }
    };
    let word = bf_args.args[1].coerce_str();
    bf_args.engine.registry.register_word(tag, &word);
    Ok(v_null())
}
bf_declare!(register_word, bf_register_word);

pub(crate) fn register(builtins: &mut HashMap<&'static str, Arc<dyn BuiltinFunction>>) {
    builtins.insert("log", Arc::new(BfLog {}));
    builtins.insert("send", Arc::new(BfSend {}));
    builtins.insert("load", Arc::new(BfLoad {}));
    builtins.insert("register_verb", Arc::new(BfRegisterVerb {}));
    builtins.insert("register_word", Arc::new(BfRegisterWord {}));
}
