use json_contract::retrieve::{merge, required_projection, respects, validate};
use json_contract::{
    decode, encode, DecodeOptions, Definitions, DocumentBuilder, DocumentInfo, EncodeError, ErrorMode, Retrieve, RetrieveOptions,
    Value,
};
use serde_json::json;

const BLOG: &str = include_str!("../demos/blog.json");

fn blog() -> Definitions {
    Definitions::parse(BLOG).unwrap()
}

#[test]
fn list_posts_request_cycle() {
    let defs = blog();
    let f = &defs.functions["listPosts"];
    let input = f.decode_input(&defs.registry, &json!({"tag": "rust"}), &DecodeOptions::default()).unwrap();
    assert_eq!(input.to_json(), json!({"tag": "rust"}));

    let retrieve = f
        .effective_retrieve(
            &defs.registry,
            Some(&json!({"select": {"author": {"select": {"name": true}}}, "where": {"score": {"gte": 5}}, "take": 5})),
            &RetrieveOptions::default(),
        )
        .unwrap();
    assert_eq!(retrieve.take, Some(5));
    assert_eq!(retrieve.to_json()["orderBy"], json!([{"published": "desc"}]));

    let rows = json!([{
        "id": "p1", "title": "Hello", "content": null, "tags": ["intro"], "score": 7,
        "published": 1714557600000i64,
        "author": {"id": "u1", "name": "Ada", "email": "ada@example.com", "joined": "2024-01-01T00:00:00Z"}
    }]);
    let value = decode(&defs.registry, f.output, &rows, &DecodeOptions::default()).unwrap();
    assert_eq!(f.encode_output(&defs.registry, &value, &retrieve).unwrap(), rows);

    let leaky = json!([{
        "id": "p1", "title": "Hello", "content": null, "tags": [], "score": 7,
        "published": 1714557600000i64,
        "author": {"id": "u1", "name": "Ada", "email": "ada@example.com", "joined": "2024-01-01T00:00:00Z", "posts": []}
    }]);
    let value = decode(&defs.registry, f.output, &leaky, &DecodeOptions::default()).unwrap();
    assert_eq!(f.encode_output(&defs.registry, &value, &retrieve), Err(EncodeError::Projection));
}

#[test]
fn exhaustive_errors_one_per_field() {
    let defs = blog();
    let post = defs.type_id("Post").unwrap();
    let raw = json!({"id": 1, "title": "", "content": 3, "tags": "x", "score": 11, "published": "yesterday"});
    let errors = decode(&defs.registry, post, &raw, &DecodeOptions::default()).unwrap_err();
    let paths = errors.iter().map(|e| e.path.as_str()).collect::<Vec<_>>();
    assert_eq!(paths, ["id", "title", "content", "tags", "score", "published"]);

    let first = decode(&defs.registry, post, &raw, &DecodeOptions::default().first_error()).unwrap_err();
    assert_eq!(first.len(), 1);
    assert_eq!(DecodeOptions::default().first_error().error_mode, ErrorMode::FirstError);
}

#[test]
fn discriminated_union_round_trip() {
    let defs = blog();
    let shape = defs.type_id("Shape").unwrap();
    let circle = json!({"kind": "circle", "radius": 2});
    let v = decode(&defs.registry, shape, &circle, &DecodeOptions::default()).unwrap();
    assert_eq!(encode(&defs.registry, shape, &v).unwrap(), circle);
    let errors = decode(&defs.registry, shape, &json!({"kind": "hexagon"}), &DecodeOptions::default()).unwrap_err();
    assert_eq!(errors[0].path, "kind");
}

#[test]
fn casting_fills_in_representations() {
    let defs = blog();
    let post = defs.type_id("Post").unwrap();
    let raw = json!({"id": "p", "title": "t", "content": null, "tags": {"0": "a", "1": "b"}, "score": "3", "published": "1714557600000"});
    assert!(decode(&defs.registry, post, &raw, &DecodeOptions::default()).is_err());
    let v = decode(&defs.registry, post, &raw, &DecodeOptions::cast()).unwrap();
    let encoded = encode(&defs.registry, post, &v).unwrap();
    assert_eq!(encoded["tags"], json!(["a", "b"]));
    assert_eq!(encoded["score"], json!(3));
    assert_eq!(encoded["published"], json!(1714557600000i64));
    // decoding an already-decoded value is a no-op
    assert_eq!(json_contract::decode_value(&defs.registry, post, Some(&v), &DecodeOptions::default()).unwrap(), Some(v));
}

#[test]
fn retrieval_rules_follow_capabilities() {
    let defs = blog();
    let users = defs.functions["getUser"].output;
    // single entity: only selection
    let err = validate(&defs.registry, users, &json!({"where": {"name": "x"}}), &RetrieveOptions::default()).unwrap_err();
    assert_eq!(err.message, "\"where\" unexpected");

    let posts = defs.functions["listPosts"].output;
    let spec = validate(
        &defs.registry,
        posts,
        &json!({"select": {"author": {"select": {"posts": {"where": {"title": {"startsWith": "A"}}, "take": 3}}}}}),
        &RetrieveOptions::default(),
    )
    .unwrap();
    let base = Retrieve::from_select(required_projection(&defs.registry, posts));
    let merged = merge(&defs.registry, posts, &base, &spec, &RetrieveOptions::default()).unwrap();
    let select = merged.select.as_ref().unwrap();
    assert!(select.contains_key("score") && select.contains_key("author"));

    let row = Value::from(&json!([{"id": "p", "author": {"posts": [{"title": "A"}]}}]));
    assert!(respects(&defs.registry, posts, &merged, &row));
    let row = Value::from(&json!([{"id": "p", "author": {"email": "a@b.co"}}]));
    assert!(!respects(&defs.registry, posts, &merged, &row));
    let row = Value::from(&json!([{"id": "p", "author": {"posts": [{"author": {"id": "u"}}]}}]));
    assert!(!respects(&defs.registry, posts, &merged, &row));
}

#[test]
fn document_covers_every_function() {
    let defs = blog();
    let mut doc = DocumentBuilder::new(&defs.registry, DocumentInfo { title: "Blog".into(), version: "1.0.0".into() });
    for f in defs.functions.values() {
        doc.function(f);
    }
    let doc = doc.build();
    assert_eq!(doc["openapi"], json!("3.1.0"));
    let paths = doc["paths"].as_object().unwrap();
    assert_eq!(paths.keys().collect::<Vec<_>>(), ["/listPosts", "/getUser", "/area"]);
    let schemas = doc["components"]["schemas"].as_object().unwrap();
    for name in ["User", "UserRef", "Post", "Shape", "NotFound", "PostRetrieve", "UserSelect", "ErrorEntry"] {
        assert!(schemas.contains_key(name), "missing {name}");
    }
    assert_eq!(schemas["UserRef"]["properties"]["next"], json!({"$ref": "#/components/schemas/UserRef"}));
    assert_eq!(schemas["User"]["description"], json!("A registered author"));
    assert_eq!(
        doc["paths"]["/getUser"]["post"]["responses"]["default"]["content"]["application/json"]["schema"],
        json!({"$ref": "#/components/schemas/NotFound"})
    );
    assert_eq!(
        doc["paths"]["/area"]["post"]["requestBody"]["content"]["application/json"]["schema"],
        json!({"$ref": "#/components/schemas/Shape"})
    );
}
