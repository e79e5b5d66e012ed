use indexmap::IndexMap;

use super::{Registry, TypeId};
use crate::error::DefinitionError;

#[derive(Clone, Debug, Default)]
pub struct EntityNode {
    pub fields: IndexMap<String, EntityField>,
    pub capabilities: Capabilities,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityField {
    pub ty: TypeId,
    /// Virtual field resolved lazily by the function body (a relation to
    /// another entity). Never part of the required projection.
    pub relation: bool,
}

impl EntityField {
    pub fn owned(ty: TypeId) -> Self {
        Self { ty, relation: false }
    }

    pub fn relation(ty: TypeId) -> Self {
        Self { ty, relation: true }
    }
}

/// Which retrieval operations an entity permits, and on which fields.
/// Selection is always permitted on every declared field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub filter: FieldSet,
    pub order: FieldSet,
    pub paginate: Option<Pagination>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum FieldSet {
    #[default]
    None,
    All,
    Only(Vec<String>),
}

impl FieldSet {
    pub fn allows(&self, field: &str) -> bool {
        match self {
            FieldSet::None => false,
            FieldSet::All => true,
            FieldSet::Only(fields) => fields.iter().any(|f| f == field),
        }
    }

    pub fn is_none(&self) -> bool {
        match self {
            FieldSet::None => true,
            FieldSet::All => false,
            FieldSet::Only(fields) => fields.is_empty(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pagination {
    /// Upper bound for `take`. `None` leaves it to the caller's options.
    pub max_take: Option<u64>,
}

impl EntityNode {
    pub fn owned_fields(&self) -> impl Iterator<Item = (&String, &EntityField)> {
        self.fields.iter().filter(|(_, f)| !f.relation)
    }
}

pub(super) fn check_definition(registry: &Registry, entity: &EntityNode, label: &str) -> Result<(), DefinitionError> {
    for set in [&entity.capabilities.filter, &entity.capabilities.order] {
        if let FieldSet::Only(fields) = set {
            for field in fields {
                if !entity.fields.contains_key(field) {
                    return Err(DefinitionError::UnknownCapabilityField {
                        node: label.to_string(),
                        field: field.clone(),
                    });
                }
            }
        }
    }
    for (name, field) in &entity.fields {
        if field.relation && registry.relation_target(field.ty).is_none() {
            return Err(DefinitionError::RelationTarget { node: label.to_string(), field: name.clone() });
        }
    }
    Ok(())
}
