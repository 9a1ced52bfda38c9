use std::collections::HashMap;
use std::sync::Arc;

use crate::bf_declare;
use crate::model::account::{can_build, can_wizard};
use crate::model::WorldObject;
use crate::values::{v_list, v_null, v_obj, Failure, ObjId, Value};
use crate::vm::builtin::{resolve_objref, BfCallState, BuiltinFunction};

fn attr_name<'a>(bf_args: &BfCallState<'a>, index: usize) -> Result<String, Failure> {
    let name = bf_args
        .args
        .get(index)
        .map(|v| v.coerce_str())
        .unwrap_or_default();
    if name.is_empty() {
        return Err(bf_args.arity_error("an attribute name"));
    }
    Ok(name)
}

async fn check_write_allowed<'a>(
    bf_args: &BfCallState<'a>,
    target: &ObjId,
) -> Result<(), Failure> {
    if *target == bf_args.ctx.actor || can_build(&bf_args.ctx.roles) {
        return Ok(());
    }
    let owner = bf_args
        .engine
        .cache
        .get_required(target)
        .await?
        .owner_id
        .clone();
    if owner.as_ref() == Some(&bf_args.ctx.actor) {
        return Ok(());
    }
    Err(Failure::Permission {
        reason: format!("{} may not modify {}", bf_args.ctx.actor, target),
    })
}

/// Inheritance-resolved read; absence yields null.
async fn bf_get_attr<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 2 {
        return Err(bf_args.arity_error("an object reference and an attribute name"));
    }
    let target = bf_args.objid_arg(0)?;
    let name = attr_name(bf_args, 1)?;
    Ok(bf_args
        .engine
        .cache
        .get_attribute(&target, &name)
        .await?
        .unwrap_or_else(v_null))
}
bf_declare!(get_attr, bf_get_attr);

/// Writes on the referenced object itself, never on a parent.
async fn bf_set_attr<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 3 {
        return Err(bf_args.arity_error("an object reference, a name, and a value"));
    }
    let target = bf_args.objid_arg(0)?;
    let name = attr_name(bf_args, 1)?;
    let value = bf_args.args[2].clone();
    check_write_allowed(bf_args, &target).await?;
    bf_args
        .engine
        .cache
        .update(&target, |o| o.set_attribute(&name, value))
        .await?;
    Ok(v_null())
}
bf_declare!(set_attr, bf_set_attr);

async fn bf_get_object<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 1 {
        return Err(bf_args.arity_error("a reference"));
    }
    let id = bf_args.objid_arg(0)?;
    if bf_args.engine.cache.get(&id).await?.is_none() {
        return Err(Failure::NotFound {
            what: id.to_string(),
        });
    }
    Ok(v_obj(id))
}
bf_declare!(get_object, bf_get_object);

/// `create parent name?`: mints a unique ID, owned by the actor.
async fn bf_create<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.is_empty() || bf_args.args.len() > 2 {
        return Err(bf_args.arity_error("a parent reference and an optional name"));
    }
    if !can_build(&bf_args.ctx.roles) {
        return Err(Failure::Permission {
            reason: "creating objects requires the builder role".to_string(),
        });
    }
    let parent = bf_args.objid_arg(0)?;
    if bf_args.engine.cache.get(&parent).await?.is_none() {
        return Err(Failure::NotFound {
            what: parent.to_string(),
        });
    }
    let mut obj = WorldObject::with_parent(ObjId::mint(), parent)
        .with_owner(bf_args.ctx.actor.clone());
    if let Some(name) = bf_args.args.get(1) {
        obj.name = name.coerce_str();
    }
    let id = obj.id.clone();
    bf_args.engine.cache.create(obj).await?;
    Ok(v_obj(id))
}
bf_declare!(create, bf_create);

async fn bf_destroy<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 1 {
        return Err(bf_args.arity_error("an object reference"));
    }
    let target = bf_args.objid_arg(0)?;
    let owner = bf_args
        .engine
        .cache
        .get_required(&target)
        .await?
        .owner_id
        .clone();
    if owner.as_ref() != Some(&bf_args.ctx.actor) && !can_wizard(&bf_args.ctx.roles) {
        return Err(Failure::Permission {
            reason: format!("{} may not destroy {}", bf_args.ctx.actor, target),
        });
    }
    bf_args.engine.cache.delete(&target).await?;
    Ok(v_null())
}
bf_declare!(destroy, bf_destroy);

async fn bf_move<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 2 {
        return Err(bf_args.arity_error("an object reference and a destination"));
    }
    let target = bf_args.objid_arg(0)?;
    check_write_allowed(bf_args, &target).await?;
    let dest = match &bf_args.args[1] {
        Value::Null => None,
        v => Some(resolve_objref(bf_args.ctx, v).ok_or_else(|| {
            bf_args.type_error("destination is not an object reference")
        })?),
    };
    bf_args.engine.cache.move_object(&target, dest).await?;
    Ok(v_null())
}
bf_declare!(move_, bf_move);

async fn bf_contents<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 1 {
        return Err(bf_args.arity_error("an object reference"));
    }
    let target = bf_args.objid_arg(0)?;
    let obj = bf_args.engine.cache.get_required(&target).await?;
    let mut ids: Vec<ObjId> = obj.content_ids.iter().cloned().collect();
    ids.sort();
    Ok(v_list(ids.into_iter().map(v_obj).collect()))
}
bf_declare!(contents, bf_contents);

async fn bf_location<'a>(bf_args: &mut BfCallState<'a>) -> Result<Value, Failure> {
    if bf_args.args.len() != 1 {
        return Err(bf_args.arity_error("an object reference"));
    }
    let target = bf_args.objid_arg(0)?;
    let obj = bf_args.engine.cache.get_required(&target).await?;
    Ok(obj.location_id.clone().map(v_obj).unwrap_or_else(v_null))
}
bf_declare!(location, bf_location);

pub(crate) fn register(builtins: &mut HashMap<&'static str, Arc<dyn BuiltinFunction>>) {
    builtins.insert("get_attr", Arc::new(BfGetAttr {}));
    builtins.insert("set_attr", Arc::new(BfSetAttr {}));
    builtins.insert("get_object", Arc::new(BfGetObject {}));
    builtins.insert("create", Arc::new(BfCreate {}));
    builtins.insert("destroy", Arc::new(BfDestroy {}));
    builtins.insert("move", Arc::new(BfMove {}));
    builtins.insert("contents", Arc::new(BfContents {}));
    builtins.insert("location", Arc::new(BfLocation {}));
}
