use indexmap::IndexMap;

use crate::node::{Registry, TypeId, TypeNode};

/// What a retrieval specification may contain for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grammar {
    pub entity: TypeId,
    pub fields: IndexMap<String, FieldGrammar>,
    pub paginate: bool,
    pub max_take: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldGrammar {
    pub kind: FieldKind,
    pub filter: bool,
    pub order: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Owned data; `scalar` when the unwrapped type can be compared in filters.
    Owned { ty: TypeId, scalar: bool },
    ToOne(TypeId),
    ToMany(TypeId),
}

impl FieldKind {
    pub fn target(self) -> Option<TypeId> {
        match self {
            FieldKind::Owned { .. } => None,
            FieldKind::ToOne(t) | FieldKind::ToMany(t) => Some(t),
        }
    }
}

impl Grammar {
    pub fn can_filter(&self) -> bool {
        self.fields.values().any(|f| f.filter)
    }

    pub fn can_order(&self) -> bool {
        self.fields.values().any(|f| f.order)
    }
}

/// Derive the capability grammar of the entity under `id` (wrappers and
/// arrays are looked through). `None` for anything that is not an entity.
pub fn capabilities_of(registry: &Registry, id: TypeId) -> Option<Grammar> {
    let entity_id = registry.unwrap(id);
    let TypeNode::Entity(entity) = registry.node(entity_id) else {
        return None;
    };
    let caps = &entity.capabilities;
    let fields = entity
        .fields
        .iter()
        .map(|(name, field)| {
            let kind = match (field.relation, registry.relation_target(field.ty)) {
                (true, Some((target, true))) => FieldKind::ToMany(target),
                (true, Some((target, false))) => FieldKind::ToOne(target),
                _ => FieldKind::Owned { ty: field.ty, scalar: is_comparable(registry, field.ty) },
            };
            let grammar = FieldGrammar { kind, filter: caps.filter.allows(name), order: caps.order.allows(name) };
            (name.clone(), grammar)
        })
        .collect();
    Some(Grammar {
        entity: entity_id,
        fields,
        paginate: caps.paginate.is_some(),
        max_take: caps.paginate.and_then(|p| p.max_take),
    })
}

/// Scalars and custom scalars (anything that is not a container) can appear
/// in filters and orderings.
fn is_comparable(registry: &Registry, id: TypeId) -> bool {
    match registry.node(registry.strip_wrappers(id)) {
        TypeNode::String(_) | TypeNode::Number(_) | TypeNode::Boolean | TypeNode::Enum(_) | TypeNode::Literal(_) => true,
        TypeNode::Custom(c) => c.args.is_empty(),
        TypeNode::Optional(_)
        | TypeNode::Nullable(_)
        | TypeNode::Array(..)
        | TypeNode::Object(_)
        | TypeNode::Entity(_)
        | TypeNode::Union(_)
        | TypeNode::Ref(_) => false,
    }
}
