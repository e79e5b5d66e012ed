//! Definition files: a JSON document naming types and functions, loaded into
//! a [`Registry`] plus the function contracts that use it.
//!
//! ```json
//! {
//!   "types": {
//!     "Post": {
//!       "kind": "entity",
//!       "fields": { "id": "string", "title": { "kind": "string", "minLength": 1 } },
//!       "relations": { "author": "User" },
//!       "capabilities": { "filter": "all", "order": ["title"], "paginate": { "maxTake": 50 } }
//!     }
//!   },
//!   "functions": {
//!     "listPosts": { "input": { "kind": "object", "fields": {} }, "output": { "kind": "array", "items": "Post" } }
//!   }
//! }
//! ```
//!
//! A type expression is either a name (a declared type, `string`, `number`,
//! `integer`, `boolean`, or a registered custom kind) or an object tagged by
//! `kind`. Every declared name is reserved before any body is read, so types
//! may refer to each other in any order.
use std::path::Path as FsPath;

use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as Json;

use crate::error::{DefinitionError, LoadError};
use crate::function::FunctionContract;
use crate::node::{
    ArrayOptions, Capabilities, EntityField, EntityNode, FieldSet, NumberOptions, ObjectNode, Pagination, Pattern, Registry,
    RegistryBuilder, StringOptions, TypeId, TypeNode, UnionNode, VariantSelect,
};
use crate::retrieve::{validate, RetrieveOptions};

// ————————————————————————————————————————————————————————————————————————————
// FILE FORMAT
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DefinitionFile {
    #[serde(default)]
    types: IndexMap<String, TypeExpr>,
    #[serde(default)]
    functions: IndexMap<String, FunctionExpr>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TypeExpr {
    Name(String),
    Node(Box<NodeExpr>),
}

#[derive(Debug, Deserialize)]
struct NodeExpr {
    #[serde(default)]
    description: Option<String>,
    #[serde(flatten)]
    shape: Shape,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
enum Shape {
    String {
        min_length: Option<usize>,
        max_length: Option<usize>,
        length: Option<usize>,
        pattern: Option<String>,
        format: Option<String>,
        #[serde(default)]
        trim: bool,
    },
    Number(NumberExpr),
    Integer(NumberExpr),
    Boolean,
    Enum {
        values: Vec<String>,
    },
    Literal {
        value: Json,
    },
    Optional {
        of: TypeExpr,
    },
    Nullable {
        of: TypeExpr,
    },
    Array {
        items: TypeExpr,
        min_items: Option<usize>,
        max_items: Option<usize>,
    },
    Object {
        #[serde(default)]
        fields: IndexMap<String, TypeExpr>,
    },
    Entity {
        #[serde(default)]
        fields: IndexMap<String, TypeExpr>,
        #[serde(default)]
        relations: IndexMap<String, TypeExpr>,
        #[serde(default)]
        capabilities: CapabilitiesExpr,
    },
    Union {
        variants: IndexMap<String, TypeExpr>,
        discriminator: Option<String>,
        #[serde(default)]
        by_shape: bool,
    },
    Custom {
        custom: String,
        #[serde(default)]
        options: Json,
        #[serde(default)]
        args: Vec<TypeExpr>,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct NumberExpr {
    minimum: Option<f64>,
    maximum: Option<f64>,
    exclusive_minimum: Option<f64>,
    exclusive_maximum: Option<f64>,
    multiple_of: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CapabilitiesExpr {
    filter: Option<FieldSetExpr>,
    order: Option<FieldSetExpr>,
    paginate: Option<PaginateExpr>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FieldSetExpr {
    Fields(Vec<String>),
    Keyword(Keyword),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Keyword {
    All,
    None,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PaginateExpr {
    Flag(bool),
    Limits(PaginateLimits),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PaginateLimits {
    max_take: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FunctionExpr {
    input: TypeExpr,
    output: TypeExpr,
    #[serde(default)]
    error: Option<TypeExpr>,
    #[serde(default)]
    description: Option<String>,
    /// Default retrieval, validated against the output once the registry is built.
    #[serde(default)]
    retrieve: Option<Json>,
}

// ————————————————————————————————————————————————————————————————————————————
// LOADING
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug)]
pub struct Definitions {
    pub registry: Registry,
    pub functions: IndexMap<String, FunctionContract>,
}

impl Definitions {
    pub fn parse(src: &str) -> Result<Self, LoadError> {
        Self::with_builder(Registry::builder(), src)
    }

    pub fn load(path: impl AsRef<FsPath>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|source| LoadError::Io { path: path.display().to_string(), source })?;
        Self::parse(&src)
    }

    /// Load on top of a builder that may carry extra custom kinds.
    pub fn with_builder(builder: RegistryBuilder, src: &str) -> Result<Self, LoadError> {
        let file: DefinitionFile = from_str_with_path(src)?;
        let mut loader = Loader { builder };
        for name in file.types.keys() {
            loader.builder.declare(name)?;
        }
        for (name, expr) in &file.types {
            loader.define(name, expr)?;
        }
        let mut pending = Vec::with_capacity(file.functions.len());
        for (name, f) in &file.functions {
            let at = format!("functions.{name}");
            let mut contract = FunctionContract::new(
                name.as_str(),
                loader.expr(&f.input, &format!("{at}.input"))?,
                loader.expr(&f.output, &format!("{at}.output"))?,
            );
            contract.error = f.error.as_ref().map(|e| loader.expr(e, &format!("{at}.error"))).transpose()?;
            contract.description = f.description.clone();
            pending.push((contract, f.retrieve.as_ref()));
        }
        let registry = loader.builder.build()?;
        let mut functions = IndexMap::with_capacity(pending.len());
        for (mut contract, retrieve) in pending {
            if let Some(raw) = retrieve {
                contract.retrieve_defaults = validate(&registry, contract.output, raw, &RetrieveOptions::default())
                    .map_err(|source| LoadError::Function { function: contract.name.clone(), source })?;
            }
            functions.insert(contract.name.clone(), contract);
        }
        tracing::debug!(types = file.types.len(), functions = functions.len(), "definitions loaded");
        Ok(Self { registry, functions })
    }

    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.registry.lookup(name)
    }
}

/// Deserialize with JSON-path context in error messages.
fn from_str_with_path<T: DeserializeOwned>(src: &str) -> Result<T, LoadError> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(|err| LoadError::Syntax {
        path: err.path().to_string(),
        message: err.into_inner().to_string(),
    })
}

struct Loader {
    builder: RegistryBuilder,
}

impl Loader {
    fn define(&mut self, name: &str, expr: &TypeExpr) -> Result<(), LoadError> {
        let Some(id) = self.builder.lookup(name) else {
            return Err(DefinitionError::Undefined(name.to_string()).into());
        };
        let at = format!("types.{name}");
        match expr {
            TypeExpr::Name(target) => {
                let target = self.named(target, &at)?;
                self.builder.define(id, TypeNode::Ref(target))?;
            }
            TypeExpr::Node(node) => {
                let built = self.node(&node.shape, &at)?;
                self.builder.define(id, built)?;
                if let Some(description) = &node.description {
                    self.builder.describe(id, description.as_str());
                }
            }
        }
        Ok(())
    }

    fn expr(&mut self, expr: &TypeExpr, at: &str) -> Result<TypeId, LoadError> {
        match expr {
            TypeExpr::Name(name) => self.named(name, at),
            TypeExpr::Node(node) => {
                let built = self.node(&node.shape, at)?;
                let id = self.builder.add(built);
                if let Some(description) = &node.description {
                    self.builder.describe(id, description.as_str());
                }
                Ok(id)
            }
        }
    }

    fn named(&mut self, name: &str, at: &str) -> Result<TypeId, LoadError> {
        if let Some(id) = self.builder.lookup(name) {
            return Ok(id);
        }
        let b = &mut self.builder;
        Ok(match name {
            "string" => b.string(),
            "number" => b.number(),
            "integer" => b.add(TypeNode::Number(NumberOptions::integer())),
            "boolean" => b.boolean(),
            kind if b.has_kind(kind) => {
                let node = b.custom(kind, Json::Null, Vec::new())?;
                b.add(node)
            }
            _ => return Err(LoadError::UnknownType { path: at.to_string(), name: name.to_string() }),
        })
    }

    fn fields(&mut self, fields: &IndexMap<String, TypeExpr>, at: &str) -> Result<IndexMap<String, TypeId>, LoadError> {
        fields.iter().map(|(name, e)| Ok((name.clone(), self.expr(e, &format!("{at}.{name}"))?))).collect()
    }

    fn node(&mut self, shape: &Shape, at: &str) -> Result<TypeNode, LoadError> {
        Ok(match shape {
            Shape::String { min_length, max_length, length, pattern, format, trim } => {
                let pattern = match pattern {
                    Some(p) => Some(Pattern::new(p).map_err(|e| DefinitionError::Pattern {
                        node: at.to_string(),
                        pattern: p.clone(),
                        message: e.to_string(),
                    })?),
                    None => None,
                };
                TypeNode::String(StringOptions {
                    min_length: *min_length,
                    max_length: *max_length,
                    length: *length,
                    pattern,
                    format: format.clone(),
                    trim: *trim,
                })
            }
            Shape::Number(n) => TypeNode::Number(number_options(n, false)),
            Shape::Integer(n) => TypeNode::Number(number_options(n, true)),
            Shape::Boolean => TypeNode::Boolean,
            Shape::Enum { values } => TypeNode::Enum(values.clone()),
            Shape::Literal { value } => TypeNode::Literal(value.clone()),
            Shape::Optional { of } => TypeNode::Optional(self.expr(of, at)?),
            Shape::Nullable { of } => TypeNode::Nullable(self.expr(of, at)?),
            Shape::Array { items, min_items, max_items } => {
                let item = self.expr(items, &format!("{at}.items"))?;
                TypeNode::Array(item, ArrayOptions { min_items: *min_items, max_items: *max_items })
            }
            Shape::Object { fields } => TypeNode::Object(ObjectNode { fields: self.fields(fields, &format!("{at}.fields"))? }),
            Shape::Entity { fields, relations, capabilities } => {
                let mut all = IndexMap::with_capacity(fields.len() + relations.len());
                for (name, ty) in self.fields(fields, &format!("{at}.fields"))? {
                    all.insert(name, EntityField::owned(ty));
                }
                for (name, ty) in self.fields(relations, &format!("{at}.relations"))? {
                    all.insert(name, EntityField::relation(ty));
                }
                TypeNode::Entity(EntityNode { fields: all, capabilities: capabilities_of_expr(capabilities) })
            }
            Shape::Union { variants, discriminator, by_shape } => {
                let select = match (discriminator, by_shape) {
                    (Some(property), _) => VariantSelect::Discriminator(property.clone()),
                    (None, true) => VariantSelect::Shape,
                    (None, false) => VariantSelect::Ordered,
                };
                TypeNode::Union(UnionNode { variants: self.fields(variants, &format!("{at}.variants"))?, select })
            }
            Shape::Custom { custom, options, args } => {
                let args = args
                    .iter()
                    .enumerate()
                    .map(|(ix, e)| self.expr(e, &format!("{at}.args[{ix}]")))
                    .collect::<Result<Vec<_>, _>>()?;
                self.builder.custom(custom, options.clone(), args)?
            }
        })
    }
}

fn number_options(n: &NumberExpr, integer: bool) -> NumberOptions {
    NumberOptions {
        min: n.minimum.map(OrderedFloat),
        max: n.maximum.map(OrderedFloat),
        exclusive_min: n.exclusive_minimum.map(OrderedFloat),
        exclusive_max: n.exclusive_maximum.map(OrderedFloat),
        integer,
        multiple_of: n.multiple_of.map(OrderedFloat),
    }
}

fn field_set(expr: &Option<FieldSetExpr>) -> FieldSet {
    match expr {
        None | Some(FieldSetExpr::Keyword(Keyword::None)) => FieldSet::None,
        Some(FieldSetExpr::Keyword(Keyword::All)) => FieldSet::All,
        Some(FieldSetExpr::Fields(fields)) => FieldSet::Only(fields.clone()),
    }
}

fn capabilities_of_expr(expr: &CapabilitiesExpr) -> Capabilities {
    Capabilities {
        filter: field_set(&expr.filter),
        order: field_set(&expr.order),
        paginate: match &expr.paginate {
            None | Some(PaginateExpr::Flag(false)) => None,
            Some(PaginateExpr::Flag(true)) => Some(Pagination::default()),
            Some(PaginateExpr::Limits(limits)) => Some(Pagination { max_take: limits.max_take }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{decode, DecodeOptions};
    use serde_json::json;

    const BLOG: &str = r#"{
        "types": {
            "User": {
                "kind": "entity",
                "description": "A registered author",
                "fields": { "id": "string", "email": "email", "age": { "kind": "optional", "of": { "kind": "integer", "minimum": 0 } } },
                "relations": { "posts": { "kind": "array", "items": "Post" } },
                "capabilities": { "filter": ["email"], "paginate": true }
            },
            "Post": {
                "kind": "entity",
                "fields": { "id": "string", "title": { "kind": "string", "minLength": 1 }, "at": "date-time" },
                "relations": { "author": "User" },
                "capabilities": { "filter": "all", "order": ["title"], "paginate": { "maxTake": 20 } }
            },
            "PostId": "string"
        },
        "functions": {
            "listPosts": {
                "input": { "kind": "object", "fields": { "author": { "kind": "optional", "of": "PostId" } } },
                "output": { "kind": "array", "items": "Post" },
                "retrieve": { "take": 10 }
            }
        }
    }"#;

    #[test]
    fn loads_mutually_recursive_types() {
        let defs = Definitions::parse(BLOG).unwrap();
        let post = defs.type_id("Post").unwrap();
        let user = defs.type_id("User").unwrap();
        assert_eq!(defs.registry.relation_target(defs.registry.entity(post).unwrap().fields["author"].ty), Some((user, false)));
        assert_eq!(defs.registry.get(user).description.as_deref(), Some("A registered author"));
        assert!(matches!(defs.registry.node(defs.type_id("PostId").unwrap()), TypeNode::String(_)));

        let f = &defs.functions["listPosts"];
        assert_eq!(f.retrieve_defaults.take, Some(10));
        let v = decode(&defs.registry, user, &json!({"id": "u", "email": "a@b.co", "age": 3}), &DecodeOptions::default());
        assert!(v.is_ok());
        let errs = decode(&defs.registry, user, &json!({"id": "u", "email": "nope", "age": -1}), &DecodeOptions::default()).unwrap_err();
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn syntax_errors_carry_the_json_path() {
        let err = Definitions::parse(r#"{"types": {"A": {"kind": "array", "items": "string", "minItems": "x"}}}"#).unwrap_err();
        assert!(matches!(err, LoadError::Syntax { .. }), "{err}");
        let err = Definitions::parse(r#"{"typos": {}}"#).unwrap_err();
        assert!(matches!(err, LoadError::Syntax { .. }));
    }

    #[test]
    fn unknown_names_and_bad_definitions() {
        let err = Definitions::parse(r#"{"types": {"A": {"kind": "object", "fields": {"b": "Nope"}}}}"#).unwrap_err();
        match err {
            LoadError::UnknownType { path, name } => {
                assert_eq!(path, "types.A.fields.b");
                assert_eq!(name, "Nope");
            }
            other => panic!("unexpected {other}"),
        }
        let err = Definitions::parse(r#"{"types": {"A": {"kind": "string", "minLength": 5, "maxLength": 2}}}"#).unwrap_err();
        assert!(matches!(err, LoadError::Definition(DefinitionError::Bounds { .. })));
        let err = Definitions::parse(r#"{"types": {"A": "B", "B": "A"}}"#).unwrap_err();
        assert!(matches!(err, LoadError::Definition(_)));
    }

    #[test]
    fn function_retrieve_defaults_are_validated() {
        let src = BLOG.replace(r#""retrieve": { "take": 10 }"#, r#""retrieve": { "take": 100 }"#);
        let err = Definitions::parse(&src).unwrap_err();
        match err {
            LoadError::Function { function, source } => {
                assert_eq!(function, "listPosts");
                assert_eq!(source.message, "take of at most 20 expected");
            }
            other => panic!("unexpected {other}"),
        }
    }
}
