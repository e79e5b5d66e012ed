//! Shared registries for unit tests.
use serde_json::Value as Json;

use crate::node::{Capabilities, EntityField, EntityNode, FieldSet, Pagination, Registry, TypeId, TypeNode};

/// A small blog graph: users author posts, posts point back at their author.
pub struct Blog {
    pub registry: Registry,
    pub user: TypeId,
    pub post: TypeId,
    pub users: TypeId,
    pub posts: TypeId,
    pub title: TypeId,
}

pub fn blog() -> Blog {
    let mut b = Registry::builder();
    let user = b.declare("User").unwrap();
    let post = b.declare("Post").unwrap();
    let s = b.string();
    let title = b.string();
    let content = b.nullable(s);
    let published = b.boolean();
    let email = b.custom("email", Json::Null, vec![]).unwrap();
    let email = b.add(email);
    let email = b.optional(email);
    let posts = b.array(post);
    let users = b.array(user);
    let only = |fields: &[&str]| FieldSet::Only(fields.iter().map(|f| f.to_string()).collect());
    b.define(user, TypeNode::Entity(EntityNode {
        fields: [
            ("id".to_string(), EntityField::owned(s)),
            ("name".to_string(), EntityField::owned(s)),
            ("email".to_string(), EntityField::owned(email)),
            ("posts".to_string(), EntityField::relation(posts)),
        ]
        .into_iter()
        .collect(),
        capabilities: Capabilities {
            filter: only(&["name", "posts"]),
            order: only(&["name", "posts"]),
            paginate: Some(Pagination { max_take: Some(100) }),
        },
    }))
    .unwrap();
    b.define(post, TypeNode::Entity(EntityNode {
        fields: [
            ("id".to_string(), EntityField::owned(s)),
            ("title".to_string(), EntityField::owned(title)),
            ("content".to_string(), EntityField::owned(content)),
            ("published".to_string(), EntityField::owned(published)),
            ("author".to_string(), EntityField::relation(user)),
        ]
        .into_iter()
        .collect(),
        capabilities: Capabilities {
            filter: FieldSet::All,
            order: only(&["title", "id"]),
            paginate: Some(Pagination { max_take: Some(50) }),
        },
    }))
    .unwrap();
    let registry = b.build().unwrap();
    Blog { registry, user, post, users, posts, title }
}
