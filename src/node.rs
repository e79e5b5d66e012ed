//! Type node model.
//!
//! Nodes live in a [`Registry`] arena and point at each other through
//! [`TypeId`]s, so self-referential and mutually-recursive graphs are plain
//! data. A [`TypeNode::Ref`] is the "lazy" indirection: it resolves by looking
//! the target up in the registry, never by running code.
//!
//! Every consumer (decoder, encoder, retrieval engine, schema generator)
//! matches on [`TypeNode`] exhaustively; adding a variant is a compile error
//! at each of those sites.
pub mod custom;
pub mod entity;
pub mod scalar;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::error::DefinitionError;

pub use custom::{CustomKind, CustomNode};
pub use entity::{Capabilities, EntityField, EntityNode, FieldSet, Pagination};
pub use scalar::{ArrayOptions, NumberOptions, Pattern, StringOptions};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// Stable handle of a node inside its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub enum TypeNode {
    String(StringOptions),
    Number(NumberOptions),
    Boolean,
    /// Fixed string set, in declaration order.
    Enum(Vec<String>),
    /// Exactly this scalar JSON value.
    Literal(Json),
    Optional(TypeId),
    Nullable(TypeId),
    Array(TypeId, ArrayOptions),
    Object(ObjectNode),
    Entity(EntityNode),
    Union(UnionNode),
    Custom(CustomNode),
    /// Lazy indirection to another node.
    Ref(TypeId),
}

#[derive(Debug, Clone, Default)]
pub struct ObjectNode {
    pub fields: IndexMap<String, TypeId>,
}

#[derive(Debug, Clone)]
pub struct UnionNode {
    /// Variant name → node, tried in this order.
    pub variants: IndexMap<String, TypeId>,
    pub select: VariantSelect,
}

/// How a union picks the variant to decode with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VariantSelect {
    /// Try every variant in declaration order; first success wins.
    #[default]
    Ordered,
    /// Read this property of the (object) input; its string value names the variant.
    Discriminator(String),
    /// Pick the first variant whose outer kind accepts the input's JSON kind.
    Shape,
}

impl TypeNode {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TypeNode::String(_) => "string",
            TypeNode::Number(_) => "number",
            TypeNode::Boolean => "boolean",
            TypeNode::Enum(_) => "enum",
            TypeNode::Literal(_) => "literal",
            TypeNode::Optional(_) => "optional",
            TypeNode::Nullable(_) => "nullable",
            TypeNode::Array(..) => "array",
            TypeNode::Object(_) => "object",
            TypeNode::Entity(_) => "entity",
            TypeNode::Union(_) => "union",
            TypeNode::Custom(_) => "custom",
            TypeNode::Ref(_) => "ref",
        }
    }

    /// Child nodes this node points at, in a stable order.
    pub fn children(&self) -> Vec<TypeId> {
        match self {
            TypeNode::String(_)
            | TypeNode::Number(_)
            | TypeNode::Boolean
            | TypeNode::Enum(_)
            | TypeNode::Literal(_) => Vec::new(),
            TypeNode::Optional(id) | TypeNode::Nullable(id) | TypeNode::Array(id, _) | TypeNode::Ref(id) => vec![*id],
            TypeNode::Object(o) => o.fields.values().copied().collect(),
            TypeNode::Entity(e) => e.fields.values().map(|f| f.ty).collect(),
            TypeNode::Union(u) => u.variants.values().copied().collect(),
            TypeNode::Custom(c) => c.args.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: Option<String>,
    pub description: Option<String>,
    pub node: TypeNode,
}

// ————————————————————————————————————————————————————————————————————————————
// REGISTRY
// ————————————————————————————————————————————————————————————————————————————

/// Immutable arena of type nodes. Built once through [`RegistryBuilder`].
#[derive(Debug)]
pub struct Registry {
    defs: Vec<TypeDef>,
    names: HashMap<String, TypeId>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Ids are only meaningful in the registry whose builder issued them.
    ///
    /// # Panics
    ///
    /// On an id this registry does not contain; see [`Registry::contains`].
    pub fn get(&self, id: TypeId) -> &TypeDef {
        &self.defs[id.index()]
    }

    pub fn contains(&self, id: TypeId) -> bool {
        id.index() < self.defs.len()
    }

    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.names.get(name).copied()
    }

    pub fn name_of(&self, id: TypeId) -> Option<&str> {
        self.get(id).name.as_deref()
    }

    /// Follow at most one lazy indirection.
    pub fn resolve(&self, id: TypeId) -> TypeId {
        match self.get(id).node {
            TypeNode::Ref(target) => target,
            _ => id,
        }
    }

    /// Follow lazy indirections until a concrete node. Reference chains are
    /// checked for cycles when the registry is built, so this terminates.
    pub fn concrete(&self, mut id: TypeId) -> TypeId {
        for _ in 0..=self.defs.len() {
            let next = self.resolve(id);
            if next == id {
                return id;
            }
            id = next;
        }
        id
    }

    pub fn node(&self, id: TypeId) -> &TypeNode {
        &self.get(self.concrete(id)).node
    }

    pub fn is_scalar(&self, id: TypeId) -> bool {
        matches!(
            self.node(id),
            TypeNode::String(_) | TypeNode::Number(_) | TypeNode::Boolean | TypeNode::Enum(_) | TypeNode::Literal(_)
        )
    }

    pub fn is_optional(&self, id: TypeId) -> bool {
        matches!(self.node(id), TypeNode::Optional(_))
    }

    pub fn is_nullable(&self, id: TypeId) -> bool {
        match self.node(id) {
            TypeNode::Nullable(_) => true,
            TypeNode::Optional(inner) => self.is_nullable(*inner),
            _ => false,
        }
    }

    /// Strip every optional/nullable/array layer (and lazy indirection).
    pub fn unwrap(&self, mut id: TypeId) -> TypeId {
        loop {
            id = self.concrete(id);
            match &self.get(id).node {
                TypeNode::Optional(inner) | TypeNode::Nullable(inner) | TypeNode::Array(inner, _) => id = *inner,
                _ => return id,
            }
        }
    }

    /// Strip optional/nullable layers only.
    pub fn strip_wrappers(&self, mut id: TypeId) -> TypeId {
        loop {
            id = self.concrete(id);
            match &self.get(id).node {
                TypeNode::Optional(inner) | TypeNode::Nullable(inner) => id = *inner,
                _ => return id,
            }
        }
    }

    /// For a relation field type: the target entity and whether it is to-many.
    pub fn relation_target(&self, id: TypeId) -> Option<(TypeId, bool)> {
        let outer = self.strip_wrappers(id);
        let (inner, many) = match &self.get(outer).node {
            TypeNode::Array(item, _) => (self.strip_wrappers(*item), true),
            _ => (outer, false),
        };
        match self.get(inner).node {
            TypeNode::Entity(_) => Some((inner, many)),
            _ => None,
        }
    }

    pub fn entity(&self, id: TypeId) -> Option<&EntityNode> {
        match self.node(id) {
            TypeNode::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Human label: the declared name, else the kind.
    pub fn label(&self, id: TypeId) -> String {
        let id = self.concrete(id);
        let def = self.get(id);
        match &def.name {
            Some(name) => name.clone(),
            None => def.node.kind_name().to_string(),
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        (0..self.defs.len() as u32).map(TypeId)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// BUILDER
// ————————————————————————————————————————————————————————————————————————————

pub struct RegistryBuilder {
    defs: Vec<Slot>,
    names: HashMap<String, TypeId>,
    kinds: HashMap<String, Arc<dyn CustomKind>>,
}

struct Slot {
    name: Option<String>,
    description: Option<String>,
    node: Option<TypeNode>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// A builder with the built-in custom kinds registered.
    pub fn new() -> Self {
        let mut builder = Self { defs: Vec::new(), names: HashMap::new(), kinds: HashMap::new() };
        for kind in custom::builtin_kinds() {
            builder.kinds.insert(kind.name().to_string(), kind);
        }
        builder
    }

    pub fn register_kind(&mut self, kind: impl CustomKind + 'static) {
        self.kinds.insert(kind.name().to_string(), Arc::new(kind));
    }

    pub fn has_kind(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    /// Reserve a named node that is defined later, so other nodes can point
    /// at it before its body exists.
    pub fn declare(&mut self, name: &str) -> Result<TypeId, DefinitionError> {
        if self.names.contains_key(name) {
            return Err(DefinitionError::DuplicateName(name.to_string()));
        }
        let id = TypeId(self.defs.len() as u32);
        self.defs.push(Slot { name: Some(name.to_string()), description: None, node: None });
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Reserve an anonymous node that is defined later.
    pub fn reserve(&mut self) -> TypeId {
        let id = TypeId(self.defs.len() as u32);
        self.defs.push(Slot { name: None, description: None, node: None });
        id
    }

    pub fn define(&mut self, id: TypeId, node: TypeNode) -> Result<(), DefinitionError> {
        let slot = &mut self.defs[id.index()];
        if slot.node.is_some() {
            let label = slot.name.clone().unwrap_or_else(|| id.to_string());
            return Err(DefinitionError::DuplicateName(label));
        }
        slot.node = Some(node);
        Ok(())
    }

    pub fn named(&mut self, name: &str, node: TypeNode) -> Result<TypeId, DefinitionError> {
        let id = self.declare(name)?;
        self.define(id, node)?;
        Ok(id)
    }

    /// Add an anonymous node.
    pub fn add(&mut self, node: TypeNode) -> TypeId {
        let id = TypeId(self.defs.len() as u32);
        self.defs.push(Slot { name: None, description: None, node: Some(node) });
        id
    }

    pub fn describe(&mut self, id: TypeId, description: impl Into<String>) {
        self.defs[id.index()].description = Some(description.into());
    }

    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.names.get(name).copied()
    }

    pub fn string(&mut self) -> TypeId {
        self.add(TypeNode::String(StringOptions::default()))
    }

    pub fn number(&mut self) -> TypeId {
        self.add(TypeNode::Number(NumberOptions::default()))
    }

    pub fn boolean(&mut self) -> TypeId {
        self.add(TypeNode::Boolean)
    }

    pub fn optional(&mut self, inner: TypeId) -> TypeId {
        self.add(TypeNode::Optional(inner))
    }

    pub fn nullable(&mut self, inner: TypeId) -> TypeId {
        self.add(TypeNode::Nullable(inner))
    }

    pub fn array(&mut self, item: TypeId) -> TypeId {
        self.add(TypeNode::Array(item, ArrayOptions::default()))
    }

    pub fn object<K: Into<String>>(&mut self, fields: impl IntoIterator<Item = (K, TypeId)>) -> TypeId {
        let fields = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.add(TypeNode::Object(ObjectNode { fields }))
    }

    /// Build a custom node of a registered kind.
    pub fn custom(&self, kind: &str, options: Json, args: Vec<TypeId>) -> Result<TypeNode, DefinitionError> {
        let Some(k) = self.kinds.get(kind) else {
            return Err(DefinitionError::UnknownCustomKind { node: kind.to_string(), kind: kind.to_string() });
        };
        Ok(TypeNode::Custom(CustomNode { kind: Arc::clone(k), options, args }))
    }

    /// Validate every node and freeze the arena.
    pub fn build(self) -> Result<Registry, DefinitionError> {
        let mut defs = Vec::with_capacity(self.defs.len());
        for (ix, slot) in self.defs.into_iter().enumerate() {
            let Some(node) = slot.node else {
                let name = slot.name.unwrap_or_else(|| TypeId(ix as u32).to_string());
                return Err(DefinitionError::Undefined(name));
            };
            defs.push(TypeDef { name: slot.name, description: slot.description, node });
        }
        let registry = Registry { defs, names: self.names };
        for id in registry.ids() {
            for child in registry.get(id).node.children() {
                if child.index() >= registry.len() {
                    return Err(DefinitionError::Undefined(child.to_string()));
                }
            }
        }
        for id in registry.ids() {
            check_productive(&registry, id)?;
        }
        for id in registry.ids() {
            check_definition(&registry, id)?;
        }
        tracing::debug!(nodes = registry.len(), named = registry.names.len(), "registry built");
        Ok(registry)
    }
}

fn check_definition(registry: &Registry, id: TypeId) -> Result<(), DefinitionError> {
    let def = registry.get(id);
    let label = || def.name.clone().unwrap_or_else(|| format!("{} {id}", def.node.kind_name()));
    match &def.node {
        TypeNode::String(options) => options
            .check_definition()
            .map_err(|message| DefinitionError::Bounds { node: label(), message }),
        TypeNode::Number(options) => options
            .check_definition()
            .map_err(|message| DefinitionError::Bounds { node: label(), message }),
        TypeNode::Array(_, options) => options
            .check_definition()
            .map_err(|message| DefinitionError::Bounds { node: label(), message }),
        TypeNode::Boolean | TypeNode::Optional(_) | TypeNode::Nullable(_) | TypeNode::Object(_) => Ok(()),
        TypeNode::Enum(members) if members.is_empty() => Err(DefinitionError::EmptyEnum { node: label() }),
        TypeNode::Enum(_) => Ok(()),
        TypeNode::Literal(value) => match value {
            Json::Array(_) | Json::Object(_) => Err(DefinitionError::Options {
                node: label(),
                message: "literal must be a scalar".to_string(),
            }),
            _ => Ok(()),
        },
        TypeNode::Union(u) if u.variants.is_empty() => Err(DefinitionError::EmptyUnion { node: label() }),
        TypeNode::Union(u) => check_distinguishable(registry, u, &label()),
        TypeNode::Entity(entity) => entity::check_definition(registry, entity, &label()),
        TypeNode::Custom(custom) => custom
            .kind
            .check_definition(custom)
            .map_err(|message| DefinitionError::Options { node: label(), message }),
        TypeNode::Ref(_) => Ok(()),
    }
}

/// Variants of different custom kinds that decode to the same in-memory form
/// (a timestamp and a date-time are both instants) would encode through
/// whichever comes first.
fn check_distinguishable(registry: &Registry, union: &UnionNode, node: &str) -> Result<(), DefinitionError> {
    let mut seen: Vec<(&str, &str, &str)> = Vec::new();
    for (variant, id) in &union.variants {
        let TypeNode::Custom(custom) = registry.node(registry.strip_wrappers(*id)) else {
            continue;
        };
        let Some(representation) = custom.kind.representation(custom) else {
            continue;
        };
        let kind = custom.kind.name();
        if let Some((first, ..)) = seen.iter().find(|(_, r, k)| *r == representation && *k != kind) {
            return Err(DefinitionError::AmbiguousUnion {
                node: node.to_string(),
                first: first.to_string(),
                second: variant.clone(),
            });
        }
        seen.push((variant.as_str(), representation, kind));
    }
    Ok(())
}

/// Reject cycles that never pass through an object, entity or custom node.
/// Such a cycle (`A = Optional<A>`, `A = A | B`) has no finite value and
/// would send unwrapping and decoding into unbounded descent.
fn check_productive(registry: &Registry, id: TypeId) -> Result<(), DefinitionError> {
    fn step(node: &TypeNode) -> Vec<TypeId> {
        match node {
            TypeNode::Optional(inner) | TypeNode::Nullable(inner) | TypeNode::Array(inner, _) | TypeNode::Ref(inner) => {
                vec![*inner]
            }
            TypeNode::Union(u) => u.variants.values().copied().collect(),
            _ => Vec::new(),
        }
    }
    let mut seen = std::collections::HashSet::new();
    let mut stack = step(&registry.get(id).node);
    while let Some(next) = stack.pop() {
        if next == id {
            let def = registry.get(id);
            let node = def.name.clone().unwrap_or_else(|| format!("{} {id}", def.node.kind_name()));
            return Err(DefinitionError::RefCycle { node });
        }
        if seen.insert(next) {
            stack.extend(step(&registry.get(next).node));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_reference_through_declare() {
        let mut b = Registry::builder();
        let user = b.declare("User").unwrap();
        let name = b.string();
        let friend = b.optional(user);
        b.define(user, TypeNode::Object(ObjectNode {
            fields: [("name".to_string(), name), ("friend".to_string(), friend)].into_iter().collect(),
        }))
        .unwrap();
        let reg = b.build().unwrap();
        assert_eq!(reg.lookup("User"), Some(user));
        assert!(reg.is_optional(friend));
        assert_eq!(reg.unwrap(friend), user);
    }

    #[test]
    fn undefined_declaration_is_fatal() {
        let mut b = Registry::builder();
        b.declare("Ghost").unwrap();
        assert_eq!(b.build().unwrap_err(), DefinitionError::Undefined("Ghost".into()));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut b = Registry::builder();
        b.declare("A").unwrap();
        assert!(matches!(b.declare("A"), Err(DefinitionError::DuplicateName(_))));
    }

    #[test]
    fn resolve_follows_one_ref_at_a_time() {
        let mut b = Registry::builder();
        let s = b.string();
        let r1 = b.add(TypeNode::Ref(s));
        let r2 = b.add(TypeNode::Ref(r1));
        let reg = b.build().unwrap();
        assert_eq!(reg.resolve(r2), r1);
        assert_eq!(reg.resolve(r1), s);
        assert_eq!(reg.concrete(r2), s);
        assert!(reg.is_scalar(r2));
    }

    #[test]
    fn ref_cycles_are_fatal() {
        let mut b = Registry::builder();
        let a = b.declare("A").unwrap();
        let c = b.add(TypeNode::Ref(a));
        b.define(a, TypeNode::Ref(c)).unwrap();
        assert!(matches!(b.build(), Err(DefinitionError::RefCycle { .. })));
    }

    #[test]
    fn contradictory_bounds_are_fatal() {
        let mut b = Registry::builder();
        b.add(TypeNode::String(StringOptions { min_length: Some(5), max_length: Some(2), ..Default::default() }));
        assert!(matches!(b.build(), Err(DefinitionError::Bounds { .. })));
    }

    #[test]
    fn foreign_ids_are_detectable() {
        let mut b = Registry::builder();
        b.string();
        let reg = b.build().unwrap();
        assert!(reg.contains(TypeId(0)));
        assert!(!reg.contains(TypeId(7)));
    }

    #[test]
    fn unions_of_indistinguishable_instants_are_rejected() {
        let mut b = Registry::builder();
        let node = b.custom("timestamp", Json::Null, vec![]).unwrap();
        let ms = b.add(node);
        let node = b.custom("date-time", Json::Null, vec![]).unwrap();
        let iso = b.add(node);
        b.named("When", TypeNode::Union(UnionNode {
            variants: [("ms".to_string(), ms), ("iso".to_string(), iso)].into_iter().collect(),
            select: VariantSelect::Ordered,
        }))
        .unwrap();
        assert_eq!(
            b.build().unwrap_err(),
            DefinitionError::AmbiguousUnion { node: "When".into(), first: "ms".into(), second: "iso".into() }
        );
    }

    #[test]
    fn nullable_seen_through_optional() {
        let mut b = Registry::builder();
        let s = b.string();
        let n = b.nullable(s);
        let o = b.optional(n);
        let reg = b.build().unwrap();
        assert!(reg.is_nullable(o));
        assert!(!reg.is_nullable(s));
        assert_eq!(reg.strip_wrappers(o), s);
    }
}
