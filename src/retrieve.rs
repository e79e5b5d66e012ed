//! Retrieval specifications: which fields of an entity graph a caller wants
//! (`select`), which rows (`where`), in what order (`orderBy`) and how many
//! (`skip`/`take`). A specification only means something relative to an
//! entity node and the capabilities that node declares.
pub mod capability;
pub mod merge;
pub mod respects;
pub mod validate;

use indexmap::IndexMap;
use serde_json::{json, Map, Value as Json};

pub use capability::{capabilities_of, FieldGrammar, FieldKind, Grammar};
pub use merge::{complete_retrieve, merge, required_projection};
pub use respects::respects;
pub use validate::validate;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retrieve {
    pub select: Option<Select>,
    pub filter: Option<Where>,
    pub order_by: Option<Vec<OrderTerm>>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
}

/// Field name → selection, in request order.
pub type Select = IndexMap<String, Selection>;

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Flag(bool),
    /// Nested retrieval through a relation field.
    Nested(Box<Retrieve>),
}

impl Selection {
    pub fn is_selected(&self) -> bool {
        !matches!(self, Selection::Flag(false))
    }
}

/// Predicate tree. All parts are ANDed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Where {
    pub fields: IndexMap<String, FieldFilter>,
    pub and: Vec<Where>,
    pub or: Vec<Where>,
    pub not: Vec<Where>,
}

impl Where {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.and.is_empty() && self.or.is_empty() && self.not.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldFilter {
    Scalar(ScalarFilter),
    Relation(RelationFilter),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalarFilter {
    pub equals: Option<Json>,
    pub not: Option<Json>,
    pub in_: Option<Vec<Json>>,
    pub not_in: Option<Vec<Json>>,
    pub lt: Option<Json>,
    pub lte: Option<Json>,
    pub gt: Option<Json>,
    pub gte: Option<Json>,
    pub contains: Option<String>,
    pub starts_with: Option<String>,
    pub ends_with: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelationFilter {
    /// To-one: the related entity matches.
    Is(Box<Where>),
    IsNot(Box<Where>),
    /// To-many quantifiers.
    Some(Box<Where>),
    Every(Box<Where>),
    None(Box<Where>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub field: String,
    pub order: Order,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Direction(Direction),
    /// Order by the number of related entities of a to-many relation.
    Count(Direction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

/// Limits applied on top of what the node declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrieveOptions {
    /// Maximum nesting of retrieval levels (relations traversed).
    pub max_depth: usize,
    /// Global cap for `take`; the tighter of this and the entity's own cap wins.
    pub max_take: Option<u64>,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self { max_depth: 8, max_take: None }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// JSON RENDERING
// ————————————————————————————————————————————————————————————————————————————

impl Retrieve {
    pub fn from_select(select: Select) -> Self {
        Self { select: Some(select), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.select.is_none() && self.filter.is_none() && self.order_by.is_none() && self.skip.is_none() && self.take.is_none()
    }

    /// Render back to the wire shape accepted by [`validate`].
    pub fn to_json(&self) -> Json {
        let mut out = Map::new();
        if let Some(select) = &self.select {
            out.insert("select".into(), select_to_json(select));
        }
        if let Some(filter) = &self.filter {
            out.insert("where".into(), filter.to_json());
        }
        if let Some(terms) = &self.order_by {
            let terms = terms.iter().map(OrderTerm::to_json).collect();
            out.insert("orderBy".into(), Json::Array(terms));
        }
        if let Some(skip) = self.skip {
            out.insert("skip".into(), Json::from(skip));
        }
        if let Some(take) = self.take {
            out.insert("take".into(), Json::from(take));
        }
        Json::Object(out)
    }
}

fn select_to_json(select: &Select) -> Json {
    let mut out = Map::with_capacity(select.len());
    for (k, s) in select {
        let v = match s {
            Selection::Flag(b) => Json::Bool(*b),
            Selection::Nested(r) => r.to_json(),
        };
        out.insert(k.clone(), v);
    }
    Json::Object(out)
}

impl Where {
    pub fn to_json(&self) -> Json {
        let mut out = Map::new();
        for (field, filter) in &self.fields {
            let v = match filter {
                FieldFilter::Scalar(s) => s.to_json(),
                FieldFilter::Relation(r) => r.to_json(),
            };
            out.insert(field.clone(), v);
        }
        let list = |ws: &[Where]| Json::Array(ws.iter().map(Where::to_json).collect());
        if !self.and.is_empty() {
            out.insert("AND".into(), list(&self.and));
        }
        if !self.or.is_empty() {
            out.insert("OR".into(), list(&self.or));
        }
        if !self.not.is_empty() {
            out.insert("NOT".into(), list(&self.not));
        }
        Json::Object(out)
    }
}

impl ScalarFilter {
    pub fn to_json(&self) -> Json {
        let mut out = Map::new();
        let mut put = |k: &str, v: Option<Json>| {
            if let Some(v) = v {
                out.insert(k.to_string(), v);
            }
        };
        put("equals", self.equals.clone());
        put("not", self.not.clone());
        put("in", self.in_.clone().map(Json::Array));
        put("notIn", self.not_in.clone().map(Json::Array));
        put("lt", self.lt.clone());
        put("lte", self.lte.clone());
        put("gt", self.gt.clone());
        put("gte", self.gte.clone());
        put("contains", self.contains.clone().map(Json::String));
        put("startsWith", self.starts_with.clone().map(Json::String));
        put("endsWith", self.ends_with.clone().map(Json::String));
        Json::Object(out)
    }
}

impl RelationFilter {
    pub fn to_json(&self) -> Json {
        match self {
            RelationFilter::Is(w) => json!({ "is": w.to_json() }),
            RelationFilter::IsNot(w) => json!({ "isNot": w.to_json() }),
            RelationFilter::Some(w) => json!({ "some": w.to_json() }),
            RelationFilter::Every(w) => json!({ "every": w.to_json() }),
            RelationFilter::None(w) => json!({ "none": w.to_json() }),
        }
    }
}

impl OrderTerm {
    pub fn to_json(&self) -> Json {
        let v = match self.order {
            Order::Direction(d) => Json::from(d.as_str()),
            Order::Count(d) => json!({ "_count": d.as_str() }),
        };
        let mut out = Map::new();
        out.insert(self.field.clone(), v);
        Json::Object(out)
    }
}
