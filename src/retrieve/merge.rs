//! Combining retrieval specifications.
//!
//! Select trees form a join-semilattice: `false` (or absence) is the
//! identity, `true` joined with a nested selection is the nested selection,
//! and two nested selections merge recursively. That keeps `merge`
//! associative for `select`, so defaults, per-function overrides and caller
//! input can be folded in any grouping.
use super::capability::{capabilities_of, FieldKind, Grammar};
use super::validate::effective_max_take;
use super::{Retrieve, RetrieveOptions, Select, Selection, Where};
use crate::error::{Path, RetrieveError};
use crate::node::{Registry, TypeId};

/// Merge `over` onto `base` for the entity under `id`.
pub fn merge(registry: &Registry, id: TypeId, base: &Retrieve, over: &Retrieve, options: &RetrieveOptions) -> Result<Retrieve, RetrieveError> {
    merge_at(registry, id, base, over, options, &Path::root())
}

fn merge_at(
    registry: &Registry,
    id: TypeId,
    base: &Retrieve,
    over: &Retrieve,
    options: &RetrieveOptions,
    path: &Path,
) -> Result<Retrieve, RetrieveError> {
    let Some(grammar) = capabilities_of(registry, id) else {
        return Err(RetrieveError::new(path, format!("{} is not an entity", registry.label(id)), base.to_json()));
    };
    let select = match (&base.select, &over.select) {
        (None, None) => None,
        (Some(s), None) | (None, Some(s)) => Some(s.clone()),
        (Some(a), Some(b)) => Some(merge_select(registry, &grammar, a, b, options, &path.key("select"))?),
    };
    let filter = match (&base.filter, &over.filter) {
        (None, None) => None,
        (Some(w), None) | (None, Some(w)) => Some(w.clone()),
        (Some(a), Some(b)) => Some(conjoin(a, b)),
    };
    let take = over.take.or(base.take).map(|take| match effective_max_take(&grammar, options) {
        Some(max) => take.min(max),
        None => take,
    });
    Ok(Retrieve {
        select,
        filter,
        order_by: over.order_by.clone().or_else(|| base.order_by.clone()),
        skip: over.skip.or(base.skip),
        take,
    })
}

fn merge_select(
    registry: &Registry,
    grammar: &Grammar,
    base: &Select,
    over: &Select,
    options: &RetrieveOptions,
    path: &Path,
) -> Result<Select, RetrieveError> {
    let mut out = base.clone();
    for (field, b) in over {
        let merged = match out.get(field) {
            None => b.clone(),
            Some(a) => join(registry, grammar, field, a, b, options, &path.key(field.as_str()))?,
        };
        out.insert(field.clone(), merged);
    }
    Ok(out)
}

fn join(
    registry: &Registry,
    grammar: &Grammar,
    field: &str,
    a: &Selection,
    b: &Selection,
    options: &RetrieveOptions,
    path: &Path,
) -> Result<Selection, RetrieveError> {
    Ok(match (a, b) {
        (Selection::Flag(false), x) | (x, Selection::Flag(false)) => x.clone(),
        (Selection::Flag(true), Selection::Flag(true)) => Selection::Flag(true),
        (Selection::Flag(true), n @ Selection::Nested(_)) | (n @ Selection::Nested(_), Selection::Flag(true)) => n.clone(),
        (Selection::Nested(x), Selection::Nested(y)) => {
            let target = grammar.fields.get(field).and_then(|f| f.kind.target()).ok_or_else(|| {
                RetrieveError::new(path, "nested selection on a non-relation field", y.to_json())
            })?;
            Selection::Nested(Box::new(merge_at(registry, target, x, y, options, path)?))
        }
    })
}

/// Logical AND of two predicates, flattening pure conjunctions so repeated
/// merges stay one level deep.
fn conjoin(a: &Where, b: &Where) -> Where {
    let mut and = conjuncts(a);
    and.extend(conjuncts(b));
    Where { and, ..Where::default() }
}

fn conjuncts(w: &Where) -> Vec<Where> {
    if w.fields.is_empty() && w.or.is_empty() && w.not.is_empty() {
        w.and.clone()
    } else {
        vec![w.clone()]
    }
}

/// Every owned field of the entity under `id`, selected.
pub fn required_projection(registry: &Registry, id: TypeId) -> Select {
    let Some(entity) = registry.entity(registry.unwrap(id)) else {
        return Select::new();
    };
    entity.owned_fields().map(|(name, _)| (name.clone(), Selection::Flag(true))).collect()
}

/// Widen `retrieve` so it selects every owned field at every level it
/// reaches. Relations stay as the caller selected them.
pub fn complete_retrieve(registry: &Registry, id: TypeId, retrieve: &Retrieve) -> Retrieve {
    let mut select = required_projection(registry, id);
    let grammar = capabilities_of(registry, id);
    for (field, selection) in retrieve.select.iter().flatten() {
        let kind = grammar.as_ref().and_then(|g| g.fields.get(field)).map(|f| f.kind);
        match (kind, selection) {
            (Some(FieldKind::Owned { .. }), _) => {}
            (Some(FieldKind::ToOne(target) | FieldKind::ToMany(target)), Selection::Nested(nested)) => {
                let nested = complete_retrieve(registry, target, nested);
                select.insert(field.clone(), Selection::Nested(Box::new(nested)));
            }
            _ => {
                select.insert(field.clone(), selection.clone());
            }
        }
    }
    Retrieve { select: Some(select), ..retrieve.clone() }
}
