use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::input::stack::Recognition;
use crate::model::account::RoleSet;
use crate::values::{commands_object, v_null, v_obj, v_str, v_string, Failure, ObjId, Value};
use crate::vm::Engine;

/// Where a bound Game command ended up: the object holding the handler and
/// the value its invocation produced.
pub struct Bound {
    pub holder: ObjId,
    pub result: Value,
}

/// Binds a Game recognition to a `cmd_<verb>` attribute and invokes it.
///
/// Search order: the resolved direct object, the actor's location, the actor
/// itself, the session's transient user object, then the global `#commands`
/// object. First holder of the attribute (inherited definitions count) wins.
/// `None` means nothing handles the verb.
#[instrument(skip(engine, recognition, roles, cancel), fields(verb = %recognition.verb))]
pub async fn bind_and_run(
    engine: &Engine,
    recognition: &Recognition,
    actor: &ObjId,
    transient: Option<&ObjId>,
    roles: RoleSet,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<Option<Bound>, Failure> {
    let attr = format!("cmd_{}", recognition.verb);

    let location = engine
        .cache
        .get(actor)
        .await?
        .and_then(|o| o.location_id.clone());

    let mut search: Vec<ObjId> = Vec::new();
    if let Some(direct) = &recognition.resolved.direct {
        search.push(direct.clone());
    }
    if let Some(location) = location {
        search.push(location);
    }
    search.push(actor.clone());
    if let Some(transient) = transient {
        search.push(transient.clone());
    }
    search.push(commands_object());

    let mut holder = None;
    for candidate in search {
        if matches!(
            engine.cache.get_attribute(&candidate, &attr).await?,
            Some(Value::Str(_))
        ) {
            holder = Some(candidate);
            break;
        }
    }
    let Some(holder) = holder else {
        debug!(attr = %attr, "no handler found");
        return Ok(None);
    };

    let mut ctx = engine
        .context_for(holder.clone(), actor.clone(), roles, cancel)
        .await;
    ctx.define("verb", v_string(recognition.verb.clone()));
    ctx.define("raw", v_string(recognition.raw.clone()));
    ctx.define("argstr", v_string(recognition.argstr.clone()));
    ctx.define(
        "dobj",
        recognition
            .resolved
            .direct
            .clone()
            .map(v_obj)
            .unwrap_or_else(v_null),
    );
    ctx.define(
        "iobj",
        recognition
            .resolved
            .indirect
            .clone()
            .map(v_obj)
            .unwrap_or_else(v_null),
    );
    ctx.define(
        "prep",
        recognition
            .resolved
            .preposition
            .clone()
            .map(v_string)
            .unwrap_or_else(v_null),
    );

    let args: Vec<Value> = recognition.args.iter().map(|w| v_str(w)).collect();
    let result = engine.run_attribute(&mut ctx, &holder, &attr, args).await?;
    Ok(Some(Bound { holder, result }))
}
