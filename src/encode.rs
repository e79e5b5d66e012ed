//! Encoder: the inverse of decoding. Assumes the value already conforms; a
//! value that does not is a programming error and comes back as
//! [`EncodeError`].
use serde_json::{Map, Value as Json};

use crate::decode::conforms;
use crate::error::{EncodeError, Path};
use crate::node::{Registry, TypeId, TypeNode};
use crate::retrieve::{Retrieve, Select, Selection};
use crate::value::Value;

pub(crate) const MAX_DEPTH: usize = 128;

pub fn encode(registry: &Registry, id: TypeId, value: &Value) -> Result<Json, EncodeError> {
    Encoder::new(registry).encode_at(id, value, &Path::root())
}

/// Encode keeping only the entity fields `retrieve` selects (through
/// relations too). Without a `select`, an entity keeps its owned fields.
pub fn encode_projected(registry: &Registry, id: TypeId, value: &Value, retrieve: &Retrieve) -> Result<Json, EncodeError> {
    let encoder = Encoder::new(registry);
    encoder.encode_node(id, value, &Path::root(), Projection::Entity(retrieve.select.as_ref()))
}

/// Field filter in effect while encoding.
#[derive(Clone, Copy)]
enum Projection<'a> {
    /// Encode every present field.
    Full,
    /// The next entity reached keeps only these fields (`None`: owned fields).
    Entity(Option<&'a Select>),
}

pub struct Encoder<'r> {
    registry: &'r Registry,
}

impl<'r> Encoder<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    pub fn encode_at(&self, id: TypeId, value: &Value, path: &Path) -> Result<Json, EncodeError> {
        self.encode_node(id, value, path, Projection::Full)
    }

    fn encode_node(&self, id: TypeId, value: &Value, path: &Path, projection: Projection<'_>) -> Result<Json, EncodeError> {
        if path.depth() > MAX_DEPTH {
            return Err(EncodeError::Depth { path: path.to_string() });
        }
        let registry = self.registry;
        let mismatch = |expected: &str| EncodeError::Mismatch {
            path: path.to_string(),
            expected: expected.to_string(),
            actual: value.kind_label().to_string(),
        };
        match &registry.node(id) {
            TypeNode::String(_) | TypeNode::Enum(_) => match value {
                Value::String(s) => Ok(Json::String(s.clone())),
                _ => Err(mismatch("string")),
            },
            TypeNode::Number(_) => match value {
                Value::Number(n) => Ok(Json::Number(n.clone())),
                _ => Err(mismatch("number")),
            },
            TypeNode::Boolean => match value {
                Value::Bool(b) => Ok(Json::Bool(*b)),
                _ => Err(mismatch("boolean")),
            },
            TypeNode::Literal(literal) => {
                if Value::from(literal) == *value {
                    Ok(literal.clone())
                } else {
                    Err(mismatch(&literal.to_string()))
                }
            }
            TypeNode::Optional(inner) => self.encode_node(*inner, value, path, projection),
            TypeNode::Nullable(inner) => match value {
                Value::Null => Ok(Json::Null),
                _ => self.encode_node(*inner, value, path, projection),
            },
            TypeNode::Array(item, _) => {
                let Value::Array(xs) = value else {
                    return Err(mismatch("array"));
                };
                xs.iter()
                    .enumerate()
                    .map(|(ix, x)| self.encode_node(*item, x, &path.index(ix), projection))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Json::Array)
            }
            TypeNode::Object(object) => {
                let Value::Object(map) = value else {
                    return Err(mismatch("object"));
                };
                let mut out = Map::with_capacity(object.fields.len());
                for (name, ty) in &object.fields {
                    match map.get(name) {
                        Some(v) => {
                            out.insert(name.clone(), self.encode_node(*ty, v, &path.key(name.as_str()), projection)?);
                        }
                        None if registry.is_optional(*ty) => {}
                        None => return Err(EncodeError::MissingField { path: path.key(name.as_str()).to_string() }),
                    }
                }
                Ok(Json::Object(out))
            }
            TypeNode::Entity(entity) => {
                let Value::Object(map) = value else {
                    return Err(mismatch("object"));
                };
                let mut out = Map::with_capacity(entity.fields.len());
                for (name, field) in &entity.fields {
                    let child = match projection {
                        Projection::Full => Some(Projection::Full),
                        Projection::Entity(select) => field_projection(select, name, field.relation),
                    };
                    let Some(child) = child else {
                        continue;
                    };
                    match map.get(name) {
                        Some(v) => {
                            out.insert(name.clone(), self.encode_node(field.ty, v, &path.key(name.as_str()), child)?);
                        }
                        None if field.relation || registry.is_optional(field.ty) => {}
                        None => return Err(EncodeError::MissingField { path: path.key(name.as_str()).to_string() }),
                    }
                }
                Ok(Json::Object(out))
            }
            TypeNode::Union(union) => {
                for variant in union.variants.values() {
                    if conforms(registry, *variant, Some(value)) {
                        return self.encode_node(*variant, value, path, projection);
                    }
                }
                Err(EncodeError::NoVariant { path: path.to_string() })
            }
            TypeNode::Custom(custom) => custom.kind.encode(custom, value, path, self),
            TypeNode::Ref(target) => self.encode_node(*target, value, path, projection),
        }
    }
}

/// Projection for one entity field, `None` when the field is not selected.
fn field_projection<'a>(select: Option<&'a Select>, name: &str, relation: bool) -> Option<Projection<'a>> {
    let Some(select) = select else {
        return (!relation).then_some(Projection::Full);
    };
    match select.get(name) {
        None | Some(Selection::Flag(false)) => None,
        Some(Selection::Flag(true)) if relation => Some(Projection::Entity(None)),
        Some(Selection::Flag(true)) => Some(Projection::Full),
        Some(Selection::Nested(nested)) if relation => Some(Projection::Entity(nested.select.as_ref())),
        Some(Selection::Nested(_)) => Some(Projection::Full),
    }
}
