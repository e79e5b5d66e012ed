//! Schema generation: type graph → OpenAPI 3.1 component schemas.
//!
//! One [`SchemaGenerator`] is scoped to one document build. Named nodes are
//! always emitted once under `components.schemas` and referenced by `$ref`;
//! the name is recorded *before* the body is built, which is what makes
//! self-referential graphs terminate. Anonymous nodes are inlined, unless the
//! walk re-enters one that is still being built; such a node gets a
//! synthetic `Anonymous{n}` component instead.
use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde_json::{json, Map, Value as Json};

use crate::function::FunctionContract;
use crate::node::{ArrayOptions, NumberOptions, Registry, StringOptions, TypeId, TypeNode, UnionNode, VariantSelect};
use crate::retrieve::{capabilities_of, FieldKind, Grammar};

const COMPONENTS: &str = "#/components/schemas/";

fn reference(name: &str) -> Json {
    json!({ "$ref": format!("{COMPONENTS}{name}") })
}

fn null_schema() -> Json {
    json!({ "type": "null" })
}

pub struct SchemaGenerator<'r> {
    registry: &'r Registry,
    /// Node → assigned component name.
    type_ref: HashMap<TypeId, String>,
    /// Component name → finished schema.
    type_map: IndexMap<String, Json>,
    /// Anonymous nodes whose body is being built.
    in_progress: HashSet<TypeId>,
    anonymous: usize,
}

impl<'r> SchemaGenerator<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            type_ref: HashMap::new(),
            type_map: IndexMap::new(),
            in_progress: HashSet::new(),
            anonymous: 0,
        }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Schema for `id`: a `$ref` for named (or recursive anonymous) nodes, the
    /// inline schema otherwise.
    pub fn schema_for(&mut self, id: TypeId) -> Json {
        if let Some(name) = self.type_ref.get(&id) {
            return reference(name);
        }
        let registry = self.registry;
        if let Some(name) = &registry.get(id).name {
            self.type_ref.insert(id, name.clone());
            let body = self.described(id);
            self.type_map.insert(name.clone(), body);
            return reference(name);
        }
        if !self.in_progress.insert(id) {
            self.anonymous += 1;
            let name = format!("Anonymous{}", self.anonymous);
            self.type_ref.insert(id, name.clone());
            return reference(&name);
        }
        let body = self.described(id);
        self.in_progress.remove(&id);
        match self.type_ref.get(&id) {
            Some(name) => {
                let name = name.clone();
                self.type_map.insert(name.clone(), body);
                reference(&name)
            }
            None => body,
        }
    }

    /// Components built so far, in the order they were finished.
    pub fn components(&self) -> &IndexMap<String, Json> {
        &self.type_map
    }

    pub fn into_components(self) -> IndexMap<String, Json> {
        self.type_map
    }

    fn described(&mut self, id: TypeId) -> Json {
        let mut body = self.body(id);
        if let (Some(description), Json::Object(map)) = (&self.registry.get(id).description, &mut body) {
            map.insert("description".into(), Json::from(description.clone()));
        }
        body
    }

    fn body(&mut self, id: TypeId) -> Json {
        let registry = self.registry;
        match &registry.get(id).node {
            TypeNode::String(opts) => string_schema(opts),
            TypeNode::Number(opts) => number_schema(opts),
            TypeNode::Boolean => json!({ "type": "boolean" }),
            TypeNode::Enum(members) => json!({ "type": "string", "enum": members }),
            TypeNode::Literal(value) => json!({ "const": value }),
            TypeNode::Optional(inner) | TypeNode::Nullable(inner) => {
                let inner = self.schema_for(*inner);
                json!({ "anyOf": [inner, null_schema()] })
            }
            TypeNode::Array(item, opts) => {
                let items = self.schema_for(*item);
                array_schema(items, opts)
            }
            TypeNode::Object(object) => {
                let fields = object.fields.iter().map(|(name, ty)| (name.clone(), *ty, false)).collect::<Vec<_>>();
                self.object_schema(&fields)
            }
            TypeNode::Entity(entity) => {
                let fields = entity.fields.iter().map(|(name, f)| (name.clone(), f.ty, f.relation)).collect::<Vec<_>>();
                self.object_schema(&fields)
            }
            TypeNode::Union(union) => self.union_schema(union),
            TypeNode::Custom(custom) => match custom.kind.schema(custom, self) {
                Some(schema) => schema,
                None => {
                    tracing::warn!(kind = custom.kind.name(), node = %registry.label(id), "custom kind has no schema; publishing an untyped schema");
                    json!({})
                }
            },
            TypeNode::Ref(target) => self.schema_for(*target),
        }
    }

    /// `(name, type, forced optional)` triples → object schema. An optional
    /// field, named or not, is left out of `required`; an anonymous optional
    /// layer is dropped from the property schema itself.
    fn object_schema(&mut self, fields: &[(String, TypeId, bool)]) -> Json {
        let mut properties = Map::with_capacity(fields.len());
        let mut required = Vec::new();
        let registry = self.registry;
        for (name, ty, forced_optional) in fields {
            let def = registry.get(registry.concrete(*ty));
            let optional = registry.is_optional(*ty);
            let schema = match (&def.name, &def.node) {
                (None, TypeNode::Optional(inner)) => self.schema_for(*inner),
                _ => self.schema_for(*ty),
            };
            if !optional && !forced_optional {
                required.push(Json::from(name.clone()));
            }
            properties.insert(name.clone(), schema);
        }
        let mut o = json!({ "type": "object", "properties": properties });
        if !required.is_empty() {
            o["required"] = Json::Array(required);
        }
        o
    }

    fn union_schema(&mut self, union: &UnionNode) -> Json {
        let arms = union.variants.values().map(|v| self.schema_for(*v)).collect::<Vec<_>>();
        let mut o = json!({ "anyOf": arms });
        if let VariantSelect::Discriminator(property) = &union.select {
            let mut mapping = Map::new();
            for (tag, arm) in union.variants.keys().zip(&arms) {
                if let Some(target) = arm.get("$ref") {
                    mapping.insert(tag.clone(), target.clone());
                }
            }
            o["discriminator"] = json!({ "propertyName": property, "mapping": mapping });
        }
        o
    }

    /// `$ref` to the component describing what callers may request from the
    /// entity under `id`: `{Name}Retrieve` where a collection is returned,
    /// the select-only `{Name}Select` for a single entity.
    pub fn retrieve_schema_for(&mut self, id: TypeId) -> Option<Json> {
        let registry = self.registry;
        let many = matches!(registry.node(registry.strip_wrappers(id)), TypeNode::Array(..));
        self.retrieve_component(id, many)
    }

    fn retrieve_component(&mut self, id: TypeId, many: bool) -> Option<Json> {
        let grammar = capabilities_of(self.registry, id)?;
        let Some(entity_name) = self.registry.name_of(grammar.entity) else {
            return Some(json!({ "type": "object" }));
        };
        let name = if many { format!("{entity_name}Retrieve") } else { format!("{entity_name}Select") };
        if !self.type_map.contains_key(&name) {
            // placeholder keeps recursive relations from re-entering
            self.type_map.insert(name.clone(), Json::Null);
            let body = self.retrieve_body(&grammar, many);
            self.type_map.insert(name.clone(), body);
        }
        Some(reference(&name))
    }

    fn retrieve_body(&mut self, grammar: &Grammar, many: bool) -> Json {
        let direction = json!({ "enum": ["asc", "desc"] });
        let mut select = Map::new();
        let mut filter = Map::new();
        let mut order = Map::new();
        for (field, fg) in &grammar.fields {
            let nested = match fg.kind {
                FieldKind::Owned { .. } => None,
                FieldKind::ToOne(target) => self.retrieve_component(target, false),
                FieldKind::ToMany(target) => self.retrieve_component(target, true),
            };
            let selection = match &nested {
                Some(nested) => json!({ "anyOf": [{ "type": "boolean" }, nested] }),
                None => json!({ "type": "boolean" }),
            };
            select.insert(field.clone(), selection);
            if !many {
                continue;
            }
            if fg.filter {
                let predicate = match fg.kind {
                    FieldKind::Owned { .. } => json!({}),
                    FieldKind::ToOne(_) | FieldKind::ToMany(_) => json!({ "type": "object" }),
                };
                filter.insert(field.clone(), predicate);
            }
            if fg.order {
                let term = match fg.kind {
                    FieldKind::ToMany(_) => json!({
                        "type": "object",
                        "properties": { "_count": direction },
                        "required": ["_count"],
                        "additionalProperties": false
                    }),
                    FieldKind::Owned { .. } | FieldKind::ToOne(_) => direction.clone(),
                };
                order.insert(field.clone(), term);
            }
        }
        let mut properties = Map::new();
        properties.insert("select".into(), json!({ "type": "object", "properties": select, "additionalProperties": false }));
        if !filter.is_empty() {
            let list = json!({ "type": "array", "items": { "type": "object" } });
            filter.insert("AND".into(), json!({ "anyOf": [{ "type": "object" }, list] }));
            filter.insert("OR".into(), list.clone());
            filter.insert("NOT".into(), json!({ "anyOf": [{ "type": "object" }, list] }));
            properties.insert("where".into(), json!({ "type": "object", "properties": filter, "additionalProperties": false }));
        }
        if !order.is_empty() {
            let term = json!({ "type": "object", "properties": order, "minProperties": 1, "maxProperties": 1 });
            properties.insert("orderBy".into(), json!({ "anyOf": [term, { "type": "array", "items": term }] }));
        }
        if many && grammar.paginate {
            properties.insert("skip".into(), json!({ "type": "integer", "minimum": 0 }));
            let mut take = json!({ "type": "integer", "minimum": 0 });
            if let Some(max) = grammar.max_take {
                take["maximum"] = Json::from(max);
            }
            properties.insert("take".into(), take);
        }
        json!({ "type": "object", "properties": properties, "additionalProperties": false })
    }
}

fn string_schema(opts: &StringOptions) -> Json {
    let mut o = json!({ "type": "string" });
    if let Some(n) = opts.length {
        o["minLength"] = Json::from(n);
        o["maxLength"] = Json::from(n);
    }
    if let Some(n) = opts.min_length {
        o["minLength"] = Json::from(n);
    }
    if let Some(n) = opts.max_length {
        o["maxLength"] = Json::from(n);
    }
    if let Some(p) = &opts.pattern {
        o["pattern"] = Json::from(p.as_str());
    }
    if let Some(f) = &opts.format {
        o["format"] = Json::from(f.as_str());
    }
    o
}

fn number_schema(opts: &NumberOptions) -> Json {
    let ty = if opts.integer { "integer" } else { "number" };
    let mut o = json!({ "type": ty });
    let bounds = [
        ("minimum", opts.min),
        ("maximum", opts.max),
        ("exclusiveMinimum", opts.exclusive_min),
        ("exclusiveMaximum", opts.exclusive_max),
        ("multipleOf", opts.multiple_of),
    ];
    for (key, bound) in bounds {
        if let Some(b) = bound {
            o[key] = Json::from(b.0);
        }
    }
    o
}

fn array_schema(items: Json, opts: &ArrayOptions) -> Json {
    let mut o = json!({ "type": "array", "items": items });
    if let Some(n) = opts.min_items {
        o["minItems"] = Json::from(n);
    }
    if let Some(n) = opts.max_items {
        o["maxItems"] = Json::from(n);
    }
    o
}

// ————————————————————————————————————————————————————————————————————————————
// DOCUMENT
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub title: String,
    pub version: String,
}

impl Default for DocumentInfo {
    fn default() -> Self {
        Self { title: "API".into(), version: "0.1.0".into() }
    }
}

/// Assembles an OpenAPI 3.1 document: one `POST /{name}` operation per
/// function plus every component reached while describing them.
pub struct DocumentBuilder<'r> {
    generator: SchemaGenerator<'r>,
    info: DocumentInfo,
    paths: Map<String, Json>,
}

impl<'r> DocumentBuilder<'r> {
    pub fn new(registry: &'r Registry, info: DocumentInfo) -> Self {
        Self { generator: SchemaGenerator::new(registry), info, paths: Map::new() }
    }

    /// Publish a type without an operation using it.
    pub fn root(&mut self, id: TypeId) -> Json {
        self.generator.schema_for(id)
    }

    pub fn function(&mut self, function: &FunctionContract) -> &mut Self {
        let input = self.generator.schema_for(function.input);
        let output = self.generator.schema_for(function.output);
        let request = match self.generator.retrieve_schema_for(function.output) {
            Some(retrieve) => json!({
                "type": "object",
                "properties": { "input": input, "retrieve": retrieve },
                "required": ["input"]
            }),
            None => input,
        };
        let errors = json!({ "type": "array", "items": reference("ErrorEntry") });
        let mut responses = json!({
            "200": { "description": "Success", "content": { "application/json": { "schema": output } } },
            "400": { "description": "Invalid input", "content": { "application/json": { "schema": errors } } }
        });
        responses["default"] = match function.error {
            Some(error) => {
                let schema = self.generator.schema_for(error);
                json!({ "description": "Function error", "content": { "application/json": { "schema": schema } } })
            }
            None => json!({ "description": "Unexpected error" }),
        };
        let mut operation = json!({
            "operationId": function.name,
            "requestBody": { "required": true, "content": { "application/json": { "schema": request } } },
            "responses": responses
        });
        if let Some(description) = &function.description {
            operation["description"] = Json::from(description.as_str());
        }
        self.paths.insert(format!("/{}", function.name), json!({ "post": operation }));
        self
    }

    pub fn build(self) -> Json {
        let mut schemas = Map::new();
        for (name, schema) in self.generator.into_components() {
            schemas.insert(name, schema);
        }
        schemas.insert(
            "ErrorEntry".into(),
            json!({
                "type": "object",
                "properties": { "path": { "type": "string" }, "error": { "type": "string" }, "value": {} },
                "required": ["path", "error", "value"]
            }),
        );
        json!({
            "openapi": "3.1.0",
            "info": { "title": self.info.title, "version": self.info.version },
            "paths": self.paths,
            "components": { "schemas": schemas }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{Decoder, Rejected};
    use crate::encode::Encoder;
    use crate::error::{EncodeError, Path};
    use crate::fixtures::blog;
    use crate::node::{CustomKind, CustomNode, EntityField, EntityNode};
    use crate::value::Value;

    #[test]
    fn self_reference_terminates_with_one_component() {
        let mut b = Registry::builder();
        let user = b.declare("User").unwrap();
        let s = b.string();
        let friend = b.optional(user);
        b.define(user, TypeNode::Entity(EntityNode {
            fields: [("name".to_string(), EntityField::owned(s)), ("friend".to_string(), EntityField::owned(friend))]
                .into_iter()
                .collect(),
            ..Default::default()
        }))
        .unwrap();
        let reg = b.build().unwrap();
        let mut generator = SchemaGenerator::new(&reg);
        assert_eq!(generator.schema_for(user), json!({"$ref": "#/components/schemas/User"}));
        let components = generator.into_components();
        assert_eq!(components.len(), 1);
        assert_eq!(
            components["User"],
            json!({
                "type": "object",
                "properties": {"name": {"type": "string"}, "friend": {"$ref": "#/components/schemas/User"}},
                "required": ["name"]
            })
        );
    }

    #[test]
    fn anonymous_recursion_gets_a_synthetic_name() {
        let mut b = Registry::builder();
        let tree = b.reserve();
        let children = b.array(tree);
        let n = b.number();
        b.define(tree, TypeNode::Object(crate::node::ObjectNode {
            fields: [("value".to_string(), n), ("children".to_string(), children)].into_iter().collect(),
        }))
        .unwrap();
        let reg = b.build().unwrap();
        let mut generator = SchemaGenerator::new(&reg);
        assert_eq!(generator.schema_for(tree), json!({"$ref": "#/components/schemas/Anonymous1"}));
        assert_eq!(generator.components()["Anonymous1"]["properties"]["children"]["items"], reference("Anonymous1"));
        // plain anonymous nodes stay inline
        let mut generator = SchemaGenerator::new(&reg);
        assert_eq!(generator.schema_for(n), json!({"type": "number"}));
        assert!(generator.components().is_empty());
    }

    #[test]
    fn constraints_and_wrappers() {
        let mut b = Registry::builder();
        let code = b.add(TypeNode::String(StringOptions {
            min_length: Some(2),
            pattern: Some(crate::node::Pattern::new("^[A-Z]+$").unwrap()),
            ..Default::default()
        }));
        b.describe(code, "upper-case code");
        let age = b.add(TypeNode::Number(NumberOptions { min: Some(0.0.into()), ..NumberOptions::integer() }));
        let maybe = b.optional(age);
        let nick = b.nullable(code);
        let root = b.object([("code", code), ("age", maybe), ("nick", nick)]);
        let reg = b.build().unwrap();
        let schema = SchemaGenerator::new(&reg).schema_for(root);
        assert_eq!(
            schema,
            json!({
                "type": "object",
                "properties": {
                    "code": {"type": "string", "minLength": 2, "pattern": "^[A-Z]+$", "description": "upper-case code"},
                    "age": {"type": "integer", "minimum": 0.0},
                    "nick": {"anyOf": [
                        {"type": "string", "minLength": 2, "pattern": "^[A-Z]+$", "description": "upper-case code"},
                        {"type": "null"}
                    ]}
                },
                "required": ["code", "nick"]
            })
        );
    }

    #[test]
    fn relations_are_never_required() {
        let b = blog();
        let mut generator = SchemaGenerator::new(&b.registry);
        generator.schema_for(b.post);
        let post = &generator.components()["Post"];
        assert_eq!(post["required"], json!(["id", "title", "content", "published"]));
        assert_eq!(post["properties"]["author"], reference("User"));
        assert_eq!(generator.components()["User"]["properties"]["email"], json!({"type": "string", "format": "email"}));
    }

    struct Opaque;

    impl CustomKind for Opaque {
        fn name(&self) -> &str {
            "opaque"
        }

        fn decode(&self, _node: &CustomNode, input: &Value, _path: &Path, _cx: &mut Decoder<'_>) -> Result<Value, Rejected> {
            Ok(input.clone())
        }

        fn encode(&self, _node: &CustomNode, value: &Value, _path: &Path, _cx: &Encoder<'_>) -> Result<Json, EncodeError> {
            Ok(value.to_json())
        }
    }

    #[test]
    fn custom_without_schema_is_untyped() {
        let mut b = Registry::builder();
        b.register_kind(Opaque);
        let node = b.custom("opaque", Json::Null, vec![]).unwrap();
        let id = b.add(node);
        let reg = b.build().unwrap();
        assert_eq!(SchemaGenerator::new(&reg).schema_for(id), json!({}));
    }

    #[test]
    fn document_is_reproducible() {
        let b = blog();
        let input = b.title;
        let list = FunctionContract::new("listPosts", input, b.posts);
        let build = || {
            let mut doc = DocumentBuilder::new(&b.registry, DocumentInfo::default());
            doc.function(&list);
            doc.build()
        };
        let doc = build();
        assert_eq!(doc, build());
        assert_eq!(serde_json::to_string(&doc).unwrap(), serde_json::to_string(&build()).unwrap());
        let op = &doc["paths"]["/listPosts"]["post"];
        assert_eq!(
            op["requestBody"]["content"]["application/json"]["schema"]["properties"]["retrieve"],
            reference("PostRetrieve")
        );
        let schemas = &doc["components"]["schemas"];
        assert!(schemas.get("UserSelect").is_some());
        assert!(schemas.get("UserRetrieve").is_none());
        assert_eq!(schemas["PostRetrieve"]["properties"]["take"]["maximum"], json!(50));
        assert_eq!(schemas["PostRetrieve"]["properties"]["select"]["properties"]["author"]["anyOf"][1], reference("UserSelect"));
        assert_eq!(schemas["UserSelect"]["properties"]["select"]["properties"]["posts"]["anyOf"][1], reference("PostRetrieve"));
        assert_eq!(op["responses"]["400"]["content"]["application/json"]["schema"]["items"], reference("ErrorEntry"));
    }

    #[test]
    fn single_entities_publish_select_only() {
        let b = blog();
        let get = FunctionContract::new("getUser", b.title, b.user);
        let mut doc = DocumentBuilder::new(&b.registry, DocumentInfo::default());
        doc.function(&get);
        let doc = doc.build();
        let request = &doc["paths"]["/getUser"]["post"]["requestBody"]["content"]["application/json"]["schema"];
        assert_eq!(request["properties"]["retrieve"], reference("UserSelect"));
        let published = doc["components"]["schemas"]["UserSelect"]["properties"].as_object().unwrap();
        assert_eq!(published.keys().collect::<Vec<_>>(), ["select"]);

        // every top-level key the document offers is one validation accepts
        let options = crate::retrieve::RetrieveOptions::default();
        assert!(crate::retrieve::validate(&b.registry, b.user, &json!({"select": {"name": true}}), &options).is_ok());
        for key in ["where", "orderBy", "skip", "take"] {
            assert!(!published.contains_key(key));
            assert!(crate::retrieve::validate(&b.registry, b.user, &json!({ key: {} }), &options).is_err());
        }
    }

    #[test]
    fn named_optional_fields_are_not_required() {
        let mut b = Registry::builder();
        let n = b.number();
        let maybe_age = b.named("MaybeAge", TypeNode::Optional(n)).unwrap();
        let s = b.string();
        let person = b.named("Person", TypeNode::Object(crate::node::ObjectNode {
            fields: [("name".to_string(), s), ("age".to_string(), maybe_age)].into_iter().collect(),
        }))
        .unwrap();
        let reg = b.build().unwrap();
        let mut generator = SchemaGenerator::new(&reg);
        generator.schema_for(person);
        let schema = &generator.components()["Person"];
        assert_eq!(schema["required"], json!(["name"]));
        assert_eq!(schema["properties"]["age"], reference("MaybeAge"));
        let decoded = crate::decode::decode(&reg, person, &json!({"name": "a"}), &crate::decode::DecodeOptions::default());
        assert!(decoded.is_ok());
    }
}
