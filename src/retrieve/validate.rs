//! Validation of raw retrieval specifications. The raw JSON and the entity
//! grammar are walked in lockstep; the first problem aborts with a
//! path-qualified error.
use serde_json::Value as Json;

use super::capability::{capabilities_of, FieldKind, Grammar};
use super::{Direction, FieldFilter, Order, OrderTerm, RelationFilter, Retrieve, RetrieveOptions, ScalarFilter, Select, Selection, Where};
use crate::decode::conforms;
use crate::error::{Path, RetrieveError};
use crate::node::{Registry, TypeId, TypeNode};
use crate::value::Value;

/// Parse and check `raw` against the entity reachable from `id`. Filtering,
/// ordering and pagination are only accepted where a collection of entities
/// is being retrieved (a to-many relation, or an array-typed root).
pub fn validate(registry: &Registry, id: TypeId, raw: &Json, options: &RetrieveOptions) -> Result<Retrieve, RetrieveError> {
    let Some(grammar) = capabilities_of(registry, id) else {
        return Err(RetrieveError::new(&Path::root(), format!("{} is not an entity", registry.label(id)), raw.clone()));
    };
    let many = matches!(registry.node(registry.strip_wrappers(id)), TypeNode::Array(..));
    let validator = Validator { registry, options };
    validator.retrieve(&grammar, raw, &Path::root(), 0, many)
}

fn fail(path: &Path, message: impl Into<String>, value: &Json) -> RetrieveError {
    RetrieveError::new(path, message, value.clone())
}

fn unexpected(path: &Path, key: &str, value: &Json) -> RetrieveError {
    fail(path, format!("\"{key}\" unexpected"), value)
}

struct Validator<'r> {
    registry: &'r Registry,
    options: &'r RetrieveOptions,
}

impl Validator<'_> {
    fn retrieve(&self, grammar: &Grammar, raw: &Json, path: &Path, level: usize, many: bool) -> Result<Retrieve, RetrieveError> {
        if level > self.options.max_depth {
            return Err(fail(path, "maximum depth exceeded", raw));
        }
        let Json::Object(map) = raw else {
            return Err(fail(path, "object expected", raw));
        };
        let mut out = Retrieve::default();
        for (key, v) in map {
            let at = path.key(key.as_str());
            match key.as_str() {
                "select" => out.select = Some(self.select(grammar, v, &at, level)?),
                "where" if many && grammar.can_filter() => out.filter = Some(self.filter(grammar, v, &at, level)?),
                "orderBy" if many && grammar.can_order() => out.order_by = Some(self.order_by(grammar, v, &at)?),
                "skip" if many && grammar.paginate => out.skip = Some(non_negative(v, &at)?),
                "take" if many && grammar.paginate => {
                    let take = non_negative(v, &at)?;
                    if let Some(max) = effective_max_take(grammar, self.options) {
                        if take > max {
                            return Err(fail(&at, format!("take of at most {max} expected"), v));
                        }
                    }
                    out.take = Some(take);
                }
                _ => return Err(unexpected(&at, key, v)),
            }
        }
        Ok(out)
    }

    fn target_grammar(&self, target: TypeId, path: &Path, raw: &Json) -> Result<Grammar, RetrieveError> {
        capabilities_of(self.registry, target).ok_or_else(|| fail(path, "entity expected", raw))
    }

    fn select(&self, grammar: &Grammar, raw: &Json, path: &Path, level: usize) -> Result<Select, RetrieveError> {
        let Json::Object(map) = raw else {
            return Err(fail(path, "object expected", raw));
        };
        let mut out = Select::with_capacity(map.len());
        for (field, v) in map {
            let at = path.key(field.as_str());
            let Some(fg) = grammar.fields.get(field) else {
                return Err(unexpected(&at, field, v));
            };
            let selection = match (v, fg.kind) {
                (Json::Bool(b), _) => Selection::Flag(*b),
                (Json::Object(_), FieldKind::ToOne(target) | FieldKind::ToMany(target)) => {
                    let nested = self.target_grammar(target, &at, v)?;
                    let many = matches!(fg.kind, FieldKind::ToMany(_));
                    Selection::Nested(Box::new(self.retrieve(&nested, v, &at, level + 1, many)?))
                }
                (_, FieldKind::ToOne(_) | FieldKind::ToMany(_)) => return Err(fail(&at, "boolean | object expected", v)),
                (_, FieldKind::Owned { .. }) => return Err(fail(&at, "boolean expected", v)),
            };
            out.insert(field.clone(), selection);
        }
        Ok(out)
    }

    fn filter(&self, grammar: &Grammar, raw: &Json, path: &Path, level: usize) -> Result<Where, RetrieveError> {
        if level > self.options.max_depth {
            return Err(fail(path, "maximum depth exceeded", raw));
        }
        let Json::Object(map) = raw else {
            return Err(fail(path, "object expected", raw));
        };
        let mut out = Where::default();
        for (key, v) in map {
            let at = path.key(key.as_str());
            match key.as_str() {
                "AND" => out.and = self.filter_list(grammar, v, &at, level, true)?,
                "NOT" => out.not = self.filter_list(grammar, v, &at, level, true)?,
                "OR" => out.or = self.filter_list(grammar, v, &at, level, false)?,
                field => {
                    let Some(fg) = grammar.fields.get(field).filter(|f| f.filter) else {
                        return Err(unexpected(&at, field, v));
                    };
                    let filter = match fg.kind {
                        FieldKind::Owned { ty, scalar: true } => FieldFilter::Scalar(self.scalar_filter(ty, v, &at)?),
                        FieldKind::Owned { scalar: false, .. } => return Err(fail(&at, "scalar field expected", v)),
                        FieldKind::ToOne(target) => FieldFilter::Relation(self.to_one(target, v, &at, level)?),
                        FieldKind::ToMany(target) => FieldFilter::Relation(self.to_many(target, v, &at, level)?),
                    };
                    out.fields.insert(field.to_string(), filter);
                }
            }
        }
        Ok(out)
    }

    /// Operands of `AND`/`OR`/`NOT`; each logical step counts as a level.
    fn filter_list(&self, grammar: &Grammar, raw: &Json, path: &Path, level: usize, single_ok: bool) -> Result<Vec<Where>, RetrieveError> {
        match raw {
            Json::Object(_) if single_ok => Ok(vec![self.filter(grammar, raw, path, level + 1)?]),
            Json::Array(xs) => xs
                .iter()
                .enumerate()
                .map(|(ix, x)| self.filter(grammar, x, &path.index(ix), level + 1))
                .collect(),
            _ if single_ok => Err(fail(path, "object | array expected", raw)),
            _ => Err(fail(path, "array expected", raw)),
        }
    }

    fn nested_filter(&self, target: TypeId, raw: &Json, path: &Path, level: usize) -> Result<Box<Where>, RetrieveError> {
        let grammar = self.target_grammar(target, path, raw)?;
        Ok(Box::new(self.filter(&grammar, raw, path, level + 1)?))
    }

    fn to_one(&self, target: TypeId, raw: &Json, path: &Path, level: usize) -> Result<RelationFilter, RetrieveError> {
        if let Json::Object(map) = raw {
            if map.len() == 1 {
                if let Some(v) = map.get("is") {
                    return Ok(RelationFilter::Is(self.nested_filter(target, v, &path.key("is"), level)?));
                }
                if let Some(v) = map.get("isNot") {
                    return Ok(RelationFilter::IsNot(self.nested_filter(target, v, &path.key("isNot"), level)?));
                }
            }
        }
        // shorthand: a bare predicate on the related entity
        Ok(RelationFilter::Is(self.nested_filter(target, raw, path, level)?))
    }

    fn to_many(&self, target: TypeId, raw: &Json, path: &Path, level: usize) -> Result<RelationFilter, RetrieveError> {
        let quantified = match raw {
            Json::Object(map) if map.len() == 1 => map.iter().next(),
            _ => None,
        };
        match quantified {
            Some((q, v)) if q == "some" => Ok(RelationFilter::Some(self.nested_filter(target, v, &path.key("some"), level)?)),
            Some((q, v)) if q == "every" => Ok(RelationFilter::Every(self.nested_filter(target, v, &path.key("every"), level)?)),
            Some((q, v)) if q == "none" => Ok(RelationFilter::None(self.nested_filter(target, v, &path.key("none"), level)?)),
            _ => Err(fail(path, "\"some\" | \"every\" | \"none\" expected", raw)),
        }
    }

    fn scalar_filter(&self, ty: TypeId, raw: &Json, path: &Path) -> Result<ScalarFilter, RetrieveError> {
        let mut out = ScalarFilter::default();
        let ops = match raw {
            Json::Object(ops) => ops,
            Json::Array(_) => return Err(fail(path, "scalar | object expected", raw)),
            scalar => {
                self.operand(ty, scalar, path)?;
                out.equals = Some(scalar.clone());
                return Ok(out);
            }
        };
        for (op, v) in ops {
            let at = path.key(op.as_str());
            match op.as_str() {
                "equals" => out.equals = Some(self.operand(ty, v, &at)?),
                "not" => out.not = Some(self.operand(ty, v, &at)?),
                "in" => out.in_ = Some(self.operands(ty, v, &at)?),
                "notIn" => out.not_in = Some(self.operands(ty, v, &at)?),
                "lt" => out.lt = Some(self.ordered_operand(ty, v, &at)?),
                "lte" => out.lte = Some(self.ordered_operand(ty, v, &at)?),
                "gt" => out.gt = Some(self.ordered_operand(ty, v, &at)?),
                "gte" => out.gte = Some(self.ordered_operand(ty, v, &at)?),
                "contains" | "startsWith" | "endsWith" => {
                    if !self.is_textual(ty) {
                        return Err(unexpected(&at, op, v));
                    }
                    let Json::String(s) = v else {
                        return Err(fail(&at, "string expected", v));
                    };
                    let s = Some(s.clone());
                    match op.as_str() {
                        "contains" => out.contains = s,
                        "startsWith" => out.starts_with = s,
                        _ => out.ends_with = s,
                    }
                }
                _ => return Err(unexpected(&at, op, v)),
            }
        }
        Ok(out)
    }

    /// An operand must decode against the field's type; `null` only where the
    /// field is nullable.
    fn operand(&self, ty: TypeId, v: &Json, path: &Path) -> Result<Json, RetrieveError> {
        let stripped = self.registry.strip_wrappers(ty);
        let ok = match v {
            Json::Null => self.registry.is_nullable(ty),
            _ => conforms(self.registry, stripped, Some(&Value::from(v))),
        };
        if ok { Ok(v.clone()) } else { Err(fail(path, format!("{} expected", operand_label(self.registry, stripped)), v)) }
    }

    fn operands(&self, ty: TypeId, v: &Json, path: &Path) -> Result<Vec<Json>, RetrieveError> {
        let Json::Array(xs) = v else {
            return Err(fail(path, "array expected", v));
        };
        xs.iter().enumerate().map(|(ix, x)| self.operand(ty, x, &path.index(ix))).collect()
    }

    fn ordered_operand(&self, ty: TypeId, v: &Json, path: &Path) -> Result<Json, RetrieveError> {
        if v.is_null() {
            return Err(fail(path, format!("{} expected", operand_label(self.registry, self.registry.strip_wrappers(ty))), v));
        }
        self.operand(ty, v, path)
    }

    fn is_textual(&self, ty: TypeId) -> bool {
        match self.registry.node(self.registry.strip_wrappers(ty)) {
            TypeNode::String(_) | TypeNode::Enum(_) => true,
            TypeNode::Custom(c) => c.kind.name() == "email",
            _ => false,
        }
    }
}

fn operand_label(registry: &Registry, id: TypeId) -> String {
    match registry.node(id) {
        TypeNode::Custom(c) => c.kind.name().to_string(),
        TypeNode::Literal(l) => l.to_string(),
        other => other.kind_name().to_string(),
    }
}

fn non_negative(v: &Json, path: &Path) -> Result<u64, RetrieveError> {
    v.as_u64().ok_or_else(|| fail(path, "non-negative integer expected", v))
}

fn direction(v: &Json, path: &Path) -> Result<Direction, RetrieveError> {
    match v.as_str() {
        Some("asc") => Ok(Direction::Asc),
        Some("desc") => Ok(Direction::Desc),
        _ => Err(fail(path, "\"asc\" | \"desc\" expected", v)),
    }
}

impl Validator<'_> {
    fn order_by(&self, grammar: &Grammar, raw: &Json, path: &Path) -> Result<Vec<OrderTerm>, RetrieveError> {
        let terms: Vec<(&Json, Path)> = match raw {
            Json::Object(_) => vec![(raw, path.clone())],
            Json::Array(xs) => xs.iter().enumerate().map(|(ix, x)| (x, path.index(ix))).collect(),
            _ => return Err(fail(path, "object | array expected", raw)),
        };
        let mut out = Vec::with_capacity(terms.len());
        for (term, at) in terms {
            let single = match term {
                Json::Object(m) if m.len() == 1 => m.iter().next(),
                _ => None,
            };
            let Some((field, v)) = single else {
                return Err(fail(&at, "object with exactly one field expected", term));
            };
            let at = at.key(field.as_str());
            let Some(fg) = grammar.fields.get(field).filter(|f| f.order) else {
                return Err(unexpected(&at, field, v));
            };
            let order = match fg.kind {
                FieldKind::Owned { scalar: true, .. } => Order::Direction(direction(v, &at)?),
                FieldKind::ToMany(_) => match v.get("_count") {
                    Some(d) if v.as_object().is_some_and(|m| m.len() == 1) => Order::Count(direction(d, &at.key("_count"))?),
                    _ => return Err(fail(&at, "{\"_count\": \"asc\" | \"desc\"} expected", v)),
                },
                FieldKind::Owned { scalar: false, .. } | FieldKind::ToOne(_) => return Err(unexpected(&at, field, v)),
            };
            out.push(OrderTerm { field: field.clone(), order });
        }
        Ok(out)
    }
}

/// The tighter of the entity's own cap and the caller's global cap.
pub(crate) fn effective_max_take(grammar: &Grammar, options: &RetrieveOptions) -> Option<u64> {
    match (grammar.max_take, options.max_take) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::blog;
    use serde_json::json;

    fn check(raw: Json) -> Result<Retrieve, RetrieveError> {
        let b = blog();
        validate(&b.registry, b.posts, &raw, &RetrieveOptions::default())
    }

    #[test]
    fn accepts_full_spec() {
        let spec = check(json!({
            "select": {"title": true, "author": {"select": {"name": true}}},
            "where": {"published": true, "title": {"contains": "rust"}, "author": {"name": "Ada"}},
            "orderBy": [{"title": "asc"}],
            "skip": 10,
            "take": 20
        }))
        .unwrap();
        assert_eq!(spec.take, Some(20));
        assert_eq!(spec.order_by.as_ref().unwrap()[0], OrderTerm { field: "title".into(), order: Order::Direction(Direction::Asc) });
        let author = &spec.filter.as_ref().unwrap().fields["author"];
        assert!(matches!(author, FieldFilter::Relation(RelationFilter::Is(_))));
    }

    #[test]
    fn unknown_select_field_is_path_qualified() {
        let err = check(json!({"select": {"author": {"select": {"nickname": true}}}})).unwrap_err();
        assert_eq!(err.path, "select.author.select.nickname");
        assert_eq!(err.message, "\"nickname\" unexpected");
    }

    #[test]
    fn owned_fields_only_take_booleans() {
        let err = check(json!({"select": {"title": {"select": {}}}})).unwrap_err();
        assert_eq!(err.message, "boolean expected");
    }

    #[test]
    fn filtering_is_limited_to_declared_fields() {
        let b = blog();
        // users only allow filtering on name and posts
        let err = validate(&b.registry, b.users, &json!({"where": {"email": "a@b.c"}}), &RetrieveOptions::default()).unwrap_err();
        assert_eq!(err.path, "where.email");
        let ok = validate(
            &b.registry,
            b.users,
            &json!({"where": {"posts": {"some": {"published": true}}}}),
            &RetrieveOptions::default(),
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn operands_are_type_checked() {
        let err = check(json!({"where": {"published": {"equals": "yes"}}})).unwrap_err();
        assert_eq!(err.path, "where.published.equals");
        assert_eq!(err.message, "boolean expected");
        let err = check(json!({"where": {"published": {"contains": "x"}}})).unwrap_err();
        assert_eq!(err.message, "\"contains\" unexpected");
    }

    #[test]
    fn to_many_needs_a_quantifier() {
        let b = blog();
        let err = validate(&b.registry, b.users, &json!({"where": {"posts": {"published": true}}}), &RetrieveOptions::default())
            .unwrap_err();
        assert_eq!(err.path, "where.posts");
    }

    #[test]
    fn take_is_capped() {
        let err = check(json!({"take": 51})).unwrap_err();
        assert_eq!(err.message, "take of at most 50 expected");
        let b = blog();
        let tight = RetrieveOptions { max_take: Some(5), ..Default::default() };
        assert!(validate(&b.registry, b.posts, &json!({"take": 6}), &tight).is_err());
        assert!(check(json!({"skip": -1})).is_err());
    }

    #[test]
    fn count_ordering_through_relations() {
        let b = blog();
        let spec = validate(&b.registry, b.users, &json!({"orderBy": {"posts": {"_count": "desc"}}}), &RetrieveOptions::default())
            .unwrap();
        assert_eq!(spec.order_by.unwrap()[0].order, Order::Count(Direction::Desc));
        let err = validate(&b.registry, b.users, &json!({"orderBy": {"posts": "desc"}}), &RetrieveOptions::default());
        assert!(err.is_err());
    }

    #[test]
    fn single_entity_root_has_no_collection_operations() {
        let b = blog();
        let err = validate(&b.registry, b.post, &json!({"take": 1}), &RetrieveOptions::default()).unwrap_err();
        assert_eq!(err.message, "\"take\" unexpected");
    }

    #[test]
    fn depth_guard_on_cyclic_graphs() {
        let b = blog();
        let mut raw = json!({"select": {"name": true}});
        for _ in 0..6 {
            raw = json!({"select": {"posts": {"select": {"author": raw}}}});
        }
        let shallow = RetrieveOptions { max_depth: 4, ..Default::default() };
        let err = validate(&b.registry, b.user, &raw, &shallow).unwrap_err();
        assert_eq!(err.message, "maximum depth exceeded");
        assert!(validate(&b.registry, b.user, &raw, &RetrieveOptions { max_depth: 16, ..Default::default() }).is_ok());
    }

    #[test]
    fn logical_nesting_counts_toward_depth() {
        let b = blog();
        let mut filter = json!({"published": true});
        for ix in 0..6 {
            filter = if ix % 2 == 0 { json!({"AND": filter}) } else { json!({"OR": [filter]}) };
        }
        let raw = json!({"where": filter});
        let shallow = RetrieveOptions { max_depth: 3, ..Default::default() };
        let err = validate(&b.registry, b.posts, &raw, &shallow).unwrap_err();
        assert_eq!(err.message, "maximum depth exceeded");
        assert!(validate(&b.registry, b.posts, &raw, &RetrieveOptions::default()).is_ok());
    }

    #[test]
    fn non_entities_are_rejected() {
        let b = blog();
        let err = validate(&b.registry, b.title, &json!({}), &RetrieveOptions::default()).unwrap_err();
        assert!(err.message.contains("not an entity"));
    }

    #[test]
    fn renders_back_to_wire_shape() {
        let raw = json!({
            "select": {"title": true},
            "where": {"title": {"startsWith": "A"}},
            "orderBy": [{"id": "desc"}],
            "take": 3
        });
        assert_eq!(check(raw.clone()).unwrap().to_json(), raw);
    }
}
