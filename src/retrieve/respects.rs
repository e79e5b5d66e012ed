use super::{Retrieve, Select, Selection};
use crate::encode::MAX_DEPTH;
use crate::node::{Registry, TypeId, TypeNode};
use crate::value::Value;

/// Whether `value` stays inside what `retrieve` selects: no truthy field that
/// the selection leaves out, at any entity level reached through relations.
///
/// Without a `select`, an entity may carry its owned fields but no relations.
/// Values nested deeper than the encoder would follow never respect a
/// retrieval.
pub fn respects(registry: &Registry, id: TypeId, retrieve: &Retrieve, value: &Value) -> bool {
    within(registry, id, retrieve.select.as_ref(), value, 0)
}

fn within(registry: &Registry, id: TypeId, select: Option<&Select>, value: &Value, depth: usize) -> bool {
    if depth > MAX_DEPTH {
        return false;
    }
    let id = registry.strip_wrappers(id);
    match (registry.node(id), value) {
        (_, Value::Null) => true,
        (TypeNode::Array(item, _), Value::Array(xs)) => xs.iter().all(|x| within(registry, *item, select, x, depth + 1)),
        (TypeNode::Entity(entity), Value::Object(map)) => map.iter().filter(|(_, v)| v.is_truthy()).all(|(key, v)| {
            let Some(field) = entity.fields.get(key) else {
                return false;
            };
            let Some(select) = select else {
                return !field.relation;
            };
            match select.get(key) {
                None | Some(Selection::Flag(false)) => false,
                Some(Selection::Flag(true)) => !field.relation || within(registry, field.ty, None, v, depth + 1),
                Some(Selection::Nested(nested)) => !field.relation || within(registry, field.ty, nested.select.as_ref(), v, depth + 1),
            }
        }),
        // Non-entity data carries no projection of its own.
        _ => true,
    }
}
