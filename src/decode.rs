//! Decoder: validate-and-cast an untyped value against a type node.
//!
//! Errors accumulate as [`ErrorEntry`] values with paths into the input. The
//! error mode chosen by the caller is applied at every depth: in
//! [`ErrorMode::FirstError`] the whole walk stops at the first entry, in
//! [`ErrorMode::Exhaustive`] every sibling field and element is visited.
//! Union variant attempts run on their own accumulator and are independent
//! of each other.
pub mod cast;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::error::{ErrorEntry, Path};
use crate::node::{Registry, TypeId, TypeNode, VariantSelect};
use crate::value::Value;

// ————————————————————————————————————————————————————————————————————————————
// OPTIONS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    FirstError,
    #[default]
    Exhaustive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Attempt per-kind coercion (numeric strings → numbers, "1"/"0" → booleans, ...).
    pub cast: bool,
    /// Reject object keys the node does not declare.
    pub strict: bool,
    pub error_mode: ErrorMode,
    /// Maximum nesting depth of the input that will be walked.
    pub max_depth: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self { cast: false, strict: false, error_mode: ErrorMode::default(), max_depth: 64 }
    }
}

impl DecodeOptions {
    pub fn cast() -> Self {
        Self { cast: true, ..Self::default() }
    }

    pub fn strict() -> Self {
        Self { strict: true, ..Self::default() }
    }

    pub fn first_error(self) -> Self {
        Self { error_mode: ErrorMode::FirstError, ..self }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// FRONT API
// ————————————————————————————————————————————————————————————————————————————

/// Decode a JSON input against `id`.
pub fn decode(registry: &Registry, id: TypeId, raw: &Json, options: &DecodeOptions) -> Result<Value, Vec<ErrorEntry>> {
    let input = Value::from(raw);
    // a present input never decodes to "absent"
    decode_value(registry, id, Some(&input), options).map(|v| v.unwrap_or(Value::Null))
}

/// Decode an internal value (or absence) against `id`. Decoding an already
/// decoded value is a no-op.
pub fn decode_value(
    registry: &Registry,
    id: TypeId,
    input: Option<&Value>,
    options: &DecodeOptions,
) -> Result<Option<Value>, Vec<ErrorEntry>> {
    let mut decoder = Decoder::new(registry, *options);
    let result = decoder.decode_at(id, input, &Path::root());
    match result {
        Ok(value) if decoder.errors.is_empty() => Ok(value),
        _ => {
            tracing::trace!(errors = decoder.errors.len(), root = %registry.label(id), "decode rejected input");
            Err(decoder.finish())
        }
    }
}

/// Cheap probe: does `input` decode against `id` without casting?
pub fn conforms(registry: &Registry, id: TypeId, input: Option<&Value>) -> bool {
    let options = DecodeOptions { error_mode: ErrorMode::FirstError, ..DecodeOptions::default() };
    let mut decoder = Decoder::new(registry, options);
    decoder.decode_at(id, input, &Path::root()).is_ok()
}

// ————————————————————————————————————————————————————————————————————————————
// DECODER
// ————————————————————————————————————————————————————————————————————————————

/// Marker for "this position failed"; the details are already recorded in
/// the decoder's error list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected;

pub struct Decoder<'r> {
    registry: &'r Registry,
    options: DecodeOptions,
    errors: Vec<ErrorEntry>,
}

impl<'r> Decoder<'r> {
    pub fn new(registry: &'r Registry, options: DecodeOptions) -> Self {
        Self { registry, options, errors: Vec::new() }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// True once the walk should not visit further siblings.
    pub fn stopped(&self) -> bool {
        self.options.error_mode == ErrorMode::FirstError && !self.errors.is_empty()
    }

    pub fn reject(&mut self, path: &Path, message: impl Into<String>, value: &Value) -> Rejected {
        self.errors.push(ErrorEntry::new(path, message, value.to_json()));
        Rejected
    }

    pub fn finish(self) -> Vec<ErrorEntry> {
        self.errors
    }

    /// Decode a possibly absent input. `Ok(None)` means "absent", which only
    /// an optional node produces.
    pub fn decode_at(&mut self, id: TypeId, input: Option<&Value>, path: &Path) -> Result<Option<Value>, Rejected> {
        let id = self.registry.concrete(id);
        match (&self.registry.get(id).node, input) {
            (TypeNode::Optional(_), None) => Ok(None),
            (_, None) => {
                let expected = self.expected(id);
                Err(self.reject(path, format!("{expected} expected"), &Value::Null))
            }
            (_, Some(v)) => self.decode_present(id, v, path).map(Some),
        }
    }

    pub fn decode_present(&mut self, id: TypeId, input: &Value, path: &Path) -> Result<Value, Rejected> {
        if path.depth() > self.options.max_depth {
            return Err(self.reject(path, "maximum depth exceeded", &Value::Null));
        }
        let registry = self.registry;
        let id = registry.concrete(id);
        let casting = self.options.cast;
        match &registry.get(id).node {
            TypeNode::String(options) => {
                let mut s = match input {
                    Value::String(s) => s.clone(),
                    other => match casting.then(|| cast::to_string(other)).flatten() {
                        Some(s) => s,
                        None => return Err(self.reject(path, "string expected", input)),
                    },
                };
                if casting && options.trim {
                    s = s.trim().to_string();
                }
                match options.check(&s) {
                    Ok(()) => Ok(Value::String(s)),
                    Err(message) => Err(self.reject(path, message, input)),
                }
            }
            TypeNode::Number(options) => {
                let value = match input {
                    Value::Number(_) => input.clone(),
                    other => match casting.then(|| cast::to_number(other)).flatten() {
                        Some(v) => v,
                        None => return Err(self.reject(path, "number expected", input)),
                    },
                };
                let n = value.as_f64().unwrap_or(f64::NAN);
                match options.check(n) {
                    Ok(()) => Ok(value),
                    Err(message) => Err(self.reject(path, message, input)),
                }
            }
            TypeNode::Boolean => match input {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                other => match casting.then(|| cast::to_boolean(other)).flatten() {
                    Some(b) => Ok(Value::Bool(b)),
                    None => Err(self.reject(path, "boolean expected", input)),
                },
            },
            TypeNode::Enum(members) => {
                let candidate = match input {
                    Value::String(s) => Some(s.clone()),
                    other if casting => cast::to_string(other),
                    _ => None,
                };
                match candidate {
                    Some(s) if members.contains(&s) => Ok(Value::String(s)),
                    _ => Err(self.reject(path, format!("{} expected", enum_label(members)), input)),
                }
            }
            TypeNode::Literal(literal) => {
                let exact = Value::from(literal);
                if *input == exact || (casting && cast::literal_matches(literal, input)) {
                    Ok(exact)
                } else {
                    Err(self.reject(path, format!("{literal} expected"), input))
                }
            }
            TypeNode::Optional(inner) => {
                let before = self.errors.len();
                let result = self.decode_present(*inner, input, path);
                if result.is_err() && self.errors.len() == before {
                    return Err(self.reject(path, "absent expected", input));
                }
                result
            }
            TypeNode::Nullable(inner) => match input {
                Value::Null => Ok(Value::Null),
                Value::String(s) if casting && s == "null" => Ok(Value::Null),
                _ => self.decode_present(*inner, input, path),
            },
            TypeNode::Array(item, options) => {
                let dense;
                let elements = match input {
                    Value::Array(xs) => xs.as_slice(),
                    Value::Object(m) if casting => match cast::dense_array(m) {
                        Some(xs) => {
                            dense = xs;
                            dense.as_slice()
                        }
                        None => return Err(self.reject(path, "array expected", input)),
                    },
                    _ => return Err(self.reject(path, "array expected", input)),
                };
                if let Err(message) = options.check(elements.len()) {
                    return Err(self.reject(path, message, input));
                }
                let mut out = Vec::with_capacity(elements.len());
                let mut failed = false;
                for (ix, element) in elements.iter().enumerate() {
                    match self.decode_present(*item, element, &path.index(ix)) {
                        Ok(v) => out.push(v),
                        Err(Rejected) => {
                            failed = true;
                            if self.stopped() {
                                break;
                            }
                        }
                    }
                }
                if failed { Err(Rejected) } else { Ok(Value::Array(out)) }
            }
            TypeNode::Object(object) => {
                let fields = object.fields.iter().map(|(k, ty)| (k.as_str(), *ty, false));
                self.decode_fields(fields, input, path)
            }
            TypeNode::Entity(entity) => {
                let fields = entity.fields.iter().map(|(k, f)| (k.as_str(), f.ty, f.relation));
                self.decode_fields(fields, input, path)
            }
            TypeNode::Union(union) => {
                let candidates: Vec<(&str, TypeId)> = match &union.select {
                    VariantSelect::Ordered => union.variants.iter().map(|(k, v)| (k.as_str(), *v)).collect(),
                    VariantSelect::Discriminator(property) => {
                        let tag = input.as_object().and_then(|m| m.get(property)).and_then(Value::as_str);
                        match tag.and_then(|t| union.variants.get_key_value(t)) {
                            Some((name, variant)) => vec![(name.as_str(), *variant)],
                            None => {
                                let found = input.as_object().and_then(|m| m.get(property)).cloned().unwrap_or(Value::Null);
                                let names: Vec<String> = union.variants.keys().cloned().collect();
                                return Err(self.reject(&path.key(property.as_str()), format!("{} expected", enum_label(&names)), &found));
                            }
                        }
                    }
                    VariantSelect::Shape => match union.variants.iter().find(|(_, v)| self.accepts_shape(**v, input)) {
                        Some((name, variant)) => vec![(name.as_str(), *variant)],
                        None => {
                            let labels: Vec<String> = union.variants.values().map(|v| self.expected(*v)).collect();
                            return Err(self.reject(path, format!("{} expected", labels.join(" | ")), input));
                        }
                    },
                };
                self.decode_union(&candidates, input, path)
            }
            TypeNode::Custom(custom) => {
                if custom.kind.matches(custom, input) {
                    return Ok(input.clone());
                }
                custom.kind.decode(custom, input, path, self)
            }
            TypeNode::Ref(target) => self.decode_present(*target, input, path),
        }
    }

    fn decode_fields<'a>(
        &mut self,
        fields: impl Iterator<Item = (&'a str, TypeId, bool)>,
        input: &Value,
        path: &Path,
    ) -> Result<Value, Rejected> {
        let Value::Object(map) = input else {
            return Err(self.reject(path, "object expected", input));
        };
        let mut out = IndexMap::with_capacity(map.len());
        let mut failed = false;
        let mut declared = Vec::new();
        for (name, ty, relation) in fields {
            declared.push(name);
            if self.stopped() {
                continue;
            }
            let raw = map.get(name);
            if raw.is_none() && relation {
                continue;
            }
            match self.decode_at(ty, raw, &path.key(name)) {
                Ok(Some(v)) => {
                    out.insert(name.to_string(), v);
                }
                Ok(None) => {}
                Err(Rejected) => failed = true,
            }
        }
        if self.options.strict {
            for (key, v) in map {
                if self.stopped() {
                    break;
                }
                if !declared.contains(&key.as_str()) {
                    failed = true;
                    self.reject(&path.key(key.as_str()), format!("\"{key}\" unexpected"), v);
                }
            }
        }
        if failed { Err(Rejected) } else { Ok(Value::Object(out)) }
    }

    fn decode_union(&mut self, candidates: &[(&str, TypeId)], input: &Value, path: &Path) -> Result<Value, Rejected> {
        let mut failures = Vec::with_capacity(candidates.len());
        for (name, variant) in candidates {
            let mut attempt = Decoder::new(self.registry, self.options);
            match attempt.decode_present(*variant, input, path) {
                Ok(v) => return Ok(v),
                Err(Rejected) => failures.push((*name, attempt.finish())),
            }
        }
        for (name, entries) in failures {
            for entry in entries {
                self.errors.push(ErrorEntry { error: format!("{name}: {}", entry.error), ..entry });
            }
        }
        Err(Rejected)
    }

    /// Whether the outer JSON kind of `input` is one `id` could accept.
    fn accepts_shape(&self, id: TypeId, input: &Value) -> bool {
        match &self.registry.node(id) {
            TypeNode::String(_) | TypeNode::Enum(_) => matches!(input, Value::String(_)),
            TypeNode::Number(_) => matches!(input, Value::Number(_)),
            TypeNode::Boolean => matches!(input, Value::Bool(_)),
            TypeNode::Literal(literal) => Value::from(literal).kind_label() == input.kind_label(),
            TypeNode::Optional(inner) => self.accepts_shape(*inner, input),
            TypeNode::Nullable(inner) => input.is_null() || self.accepts_shape(*inner, input),
            TypeNode::Array(..) => matches!(input, Value::Array(_)),
            TypeNode::Object(_) | TypeNode::Entity(_) => matches!(input, Value::Object(_)),
            TypeNode::Union(u) => u.variants.values().any(|v| self.accepts_shape(*v, input)),
            TypeNode::Custom(c) => c.kind.accepts_shape(c, input),
            TypeNode::Ref(target) => self.accepts_shape(*target, input),
        }
    }

    /// What a failing position expected, for messages about missing values.
    fn expected(&self, id: TypeId) -> String {
        let id = self.registry.concrete(id);
        match &self.registry.get(id).node {
            TypeNode::Enum(members) => enum_label(members),
            TypeNode::Literal(literal) => literal.to_string(),
            TypeNode::Nullable(inner) => format!("{} | null", self.expected(*inner)),
            TypeNode::Custom(c) => c.kind.name().to_string(),
            TypeNode::Entity(_) => "object".to_string(),
            other => other.kind_name().to_string(),
        }
    }
}

fn enum_label(members: &[String]) -> String {
    members.iter().map(|m| format!("\"{m}\"")).collect::<Vec<_>>().join(" | ")
}

// ------------------------------- Tests ------------------------------------ //
