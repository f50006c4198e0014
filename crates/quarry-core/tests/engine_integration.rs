//! Integration tests for the engine façade over the in-memory store.

use std::sync::Arc;

use quarry_core::catalog::{
    DefaultValue, DeleteBehavior, EntityDef, FieldDef, FieldType, RelationDef, ScalarType,
    SchemaBundle, SchemaRegistry,
};
use quarry_core::{Engine, EngineConfig, Error, ErrorKind, MemoryStore};
use quarry_proto::{
    CreateInput, FieldUpdate, FieldValue, FilterExpr, Mutation, OrderSpec, PaginationArgs,
    ReadQuery, ReadShape, RelationRead, TransactionPlan, Value,
};

fn schema() -> SchemaBundle {
    let user = EntityDef::new("User", "id")
        .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64)))
        .with_field(FieldDef::new("name", FieldType::scalar(ScalarType::String)))
        .with_field(FieldDef::new("email", FieldType::scalar(ScalarType::String)))
        .with_field(
            FieldDef::new("role", FieldType::enum_type("Role", ["USER", "ADMIN"]))
                .with_default(DefaultValue::Value(Value::String("USER".into()))),
        )
        .with_relation(
            RelationDef::one_to_many("posts", "User", "id", "Post", "authorId")
                .with_on_delete(DeleteBehavior::Cascade),
        );

    let post = EntityDef::new("Post", "id")
        .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64)))
        .with_field(FieldDef::new("title", FieldType::scalar(ScalarType::String)))
        .with_field(
            FieldDef::new("published", FieldType::scalar(ScalarType::Bool))
                .with_default(DefaultValue::Value(Value::Bool(false))),
        )
        .with_field(FieldDef::new("authorId", FieldType::scalar(ScalarType::Int64)))
        .with_relation(RelationDef::many_to_one("author", "Post", "authorId", "User", "id"));

    SchemaBundle::new(vec![user, post])
}

fn engine() -> Engine<MemoryStore> {
    let registry = SchemaRegistry::from_bundle(schema()).unwrap();
    Engine::new(Arc::new(registry), MemoryStore::new()).unwrap()
}

fn user(name: &str, email: &str) -> CreateInput {
    CreateInput::new(vec![FieldValue::new("name", name), FieldValue::new("email", email)])
}

fn post(title: &str) -> CreateInput {
    CreateInput::new(vec![FieldValue::new("title", title)])
}

fn names(result: &quarry_proto::ReadResult) -> Vec<String> {
    result
        .records
        .iter()
        .filter_map(|r| match r.get("name") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

async fn seed_authors(engine: &Engine<MemoryStore>) {
    let inputs = [
        user("Alice", "alice@prisma.io").with_nested("posts", post("Hello World")),
        user("Bob", "bob@prisma.io").with_nested("posts", post("Other")),
        user("Carol", "carol@example.com"),
    ];
    for input in inputs {
        engine.mutate(&Mutation::create("User", input)).await.unwrap();
    }
}

#[tokio::test]
async fn test_relation_some_filter() {
    let engine = engine();
    seed_authors(&engine).await;

    let result = engine
        .read(
            "User",
            Some(FilterExpr::some("posts", FilterExpr::eq("title", "Hello World"))),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(names(&result), vec!["Alice"]);
}

#[tokio::test]
async fn test_relation_every_and_none_filters() {
    let engine = engine();
    seed_authors(&engine).await;

    // Carol has no posts, so `every` holds vacuously.
    let every = engine
        .read(
            "User",
            Some(FilterExpr::every("posts", FilterExpr::eq("published", false))),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(names(&every), vec!["Alice", "Bob", "Carol"]);

    let none = engine
        .read(
            "User",
            Some(FilterExpr::none("posts", FilterExpr::eq("title", "Hello World"))),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(names(&none), vec!["Bob", "Carol"]);
}

#[tokio::test]
async fn test_batch_update_by_suffix() {
    let engine = engine();
    for (name, email) in [
        ("a", "a@prisma.io"),
        ("b", "b@prisma.io"),
        ("c", "c@prisma.io"),
        ("d", "d@example.com"),
        ("e", "e@example.com"),
    ] {
        engine.mutate(&Mutation::create("User", user(name, email))).await.unwrap();
    }

    let result = engine
        .mutate(&Mutation::update_many(
            "User",
            FilterExpr::ends_with("email", "@prisma.io"),
            vec![FieldUpdate::set("role", "ADMIN")],
        ))
        .await
        .unwrap();
    assert_eq!(result.affected, 3);

    let admins = engine
        .read("User", Some(FilterExpr::eq("role", "ADMIN")), None, None)
        .await
        .unwrap();
    assert_eq!(names(&admins), vec!["a", "b", "c"]);
    let others = engine
        .read("User", Some(FilterExpr::eq("role", "USER")), None, None)
        .await
        .unwrap();
    assert_eq!(names(&others), vec!["d", "e"]);
}

#[tokio::test]
async fn test_zero_match_batch_operations() {
    let engine = engine();
    seed_authors(&engine).await;

    let updated = engine
        .mutate(&Mutation::update_many(
            "Post",
            FilterExpr::eq("title", "missing"),
            vec![FieldUpdate::set("published", true)],
        ))
        .await
        .unwrap();
    let deleted = engine
        .mutate(&Mutation::delete_many("Post", FilterExpr::eq("title", "missing")))
        .await
        .unwrap();
    assert_eq!(updated.affected, 0);
    assert_eq!(deleted.affected, 0);
}

#[tokio::test]
async fn test_nested_create_read_back() {
    let engine = engine();
    let created = engine
        .mutate(&Mutation::create(
            "User",
            user("Dana", "dana@x")
                .with_nested("posts", post("first"))
                .with_nested("posts", post("second")),
        ))
        .await
        .unwrap();
    assert_eq!(created.affected, 3);
    assert_eq!(created.generated_ids.len(), 3);

    let query = ReadQuery::new("User")
        .with_filter(FilterExpr::eq("id", created.id().cloned().unwrap()))
        .with_shape(ReadShape::fields(["name"]).with_relation(
            "posts",
            RelationRead::new(ReadShape::fields(["title", "authorId"]))
                .with_order(OrderSpec::desc("title")),
        ));
    let result = engine.read_query(&query).await.unwrap();

    assert_eq!(result.len(), 1);
    let posts = result.records[0].related("posts");
    let titles: Vec<_> = posts.iter().filter_map(|p| p.get("title")).cloned().collect();
    assert_eq!(titles, vec![Value::from("second"), Value::from("first")]);
    assert!(posts.iter().all(|p| p.get("authorId") == created.id()));
}

#[tokio::test]
async fn test_cursor_pagination_walks_pages() {
    let engine = engine();
    for i in 0..5 {
        let name = format!("u{i}");
        engine
            .mutate(&Mutation::create("User", user(&name, &format!("{name}@x"))))
            .await
            .unwrap();
    }

    let first = engine
        .read("User", None, Some(PaginationArgs::take(2)), None)
        .await
        .unwrap();
    assert_eq!(names(&first), vec!["u0", "u1"]);

    let second = engine
        .read(
            "User",
            None,
            Some(PaginationArgs::after(first.end_cursor.clone().unwrap(), 2)),
            None,
        )
        .await
        .unwrap();
    assert_eq!(names(&second), vec!["u2", "u3"]);

    let back = engine
        .read(
            "User",
            None,
            Some(PaginationArgs::before(second.start_cursor.clone().unwrap(), 1)),
            None,
        )
        .await
        .unwrap();
    assert_eq!(names(&back), vec!["u1"]);

    let offset = engine
        .read("User", None, Some(PaginationArgs::offset(4, 10)), None)
        .await
        .unwrap();
    assert_eq!(names(&offset), vec!["u4"]);
}

#[tokio::test]
async fn test_bad_requests_are_classified() {
    let engine = engine();

    let err = engine.read("Ghost", None, None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownEntity);

    let err = engine
        .read("User", Some(FilterExpr::gt("name", 3)), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFilter);

    let err = engine
        .read("User", None, Some(PaginationArgs::take(-1)), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidPagination);

    let err = engine
        .read("User", None, Some(PaginationArgs::after("garbage", 1)), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCursor);
}

#[tokio::test]
async fn test_cascade_delete_removes_posts() {
    let engine = engine();
    seed_authors(&engine).await;

    let alice = engine
        .read("User", Some(FilterExpr::eq("name", "Alice")), None, None)
        .await
        .unwrap();
    let id = alice.records[0].get("id").cloned().unwrap();

    let result = engine.mutate(&Mutation::delete("User", id)).await.unwrap();
    assert_eq!(result.affected, 1);
    assert_eq!(result.cascaded, 1);
    assert_eq!(engine.storage().row_count("Post"), 1);
}

#[tokio::test]
async fn test_transaction_is_all_or_nothing() {
    let engine = engine();

    let plan = TransactionPlan::new()
        .step("author", Mutation::create("User", user("Eve", "eve@x")))
        .step_after(
            "post",
            Mutation::create(
                "Post",
                CreateInput::new(vec![
                    FieldValue::new("title", "dangling"),
                    FieldValue::new("authorId", 99_i64),
                ]),
            ),
            ["author"],
        );
    let err = engine.run_transaction(&plan).await.unwrap_err();

    assert!(matches!(&err, Error::TransactionAborted { step, .. } if step == "post"));
    assert_eq!(err.root_cause().kind(), ErrorKind::RelationViolation);
    assert_eq!(engine.storage().row_count("User"), 0);
    assert_eq!(engine.storage().row_count("Post"), 0);

    let plan = TransactionPlan::new()
        .step("author", Mutation::create("User", user("Eve", "eve@x")))
        .step_after(
            "post",
            Mutation::create(
                "Post",
                CreateInput::new(vec![
                    FieldValue::new("title", "ok"),
                    FieldValue::new("authorId", 1_i64),
                ]),
            ),
            ["author"],
        );
    let result = engine.run_transaction(&plan).await.unwrap();
    assert_eq!(result.labels(), vec!["author", "post"]);
    assert_eq!(engine.storage().row_count("Post"), 1);
}

#[tokio::test]
async fn test_backward_cursor_under_descending_order() {
    let engine = engine();
    for i in 0..5 {
        let name = format!("u{i}");
        engine
            .mutate(&Mutation::create("User", user(&name, &format!("{name}@x"))))
            .await
            .unwrap();
    }
    let base = ReadQuery::new("User").with_order(OrderSpec::desc("name"));

    let first = engine
        .read_query(&base.clone().with_pagination(PaginationArgs::take(2)))
        .await
        .unwrap();
    assert_eq!(names(&first), vec!["u4", "u3"]);

    let second = engine
        .read_query(
            &base
                .clone()
                .with_pagination(PaginationArgs::after(first.end_cursor.clone().unwrap(), 2)),
        )
        .await
        .unwrap();
    assert_eq!(names(&second), vec!["u2", "u1"]);

    // Walking back from u2 returns the two records before it, still in descending order.
    let back = engine
        .read_query(
            &base.with_pagination(PaginationArgs::before(second.start_cursor.clone().unwrap(), 2)),
        )
        .await
        .unwrap();
    assert_eq!(names(&back), vec!["u4", "u3"]);
}

#[tokio::test]
async fn test_required_field_cannot_be_nulled() {
    let engine = engine();
    let created = engine
        .mutate(&Mutation::create("User", user("Alice", "alice@x")))
        .await
        .unwrap();
    let id = created.id().cloned().unwrap();

    let err = engine
        .mutate(&Mutation::update("User", id.clone(), vec![FieldUpdate::set("name", Value::Null)]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let stored = engine
        .read("User", Some(FilterExpr::eq("id", id)), None, None)
        .await
        .unwrap();
    assert_eq!(names(&stored), vec!["Alice"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_share_engine() {
    let engine = Arc::new(engine());
    seed_authors(&engine).await;
    assert!(engine.registry().is_sealed());

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .read(
                        "User",
                        Some(FilterExpr::some("posts", FilterExpr::eq("title", "Hello World"))),
                        None,
                        None,
                    )
                    .await
            })
        })
        .collect();

    for reader in readers {
        let result = reader.await.unwrap().unwrap();
        assert_eq!(names(&result), vec!["Alice"]);
    }
}

fn tree_engine(max_depth: usize) -> Engine<MemoryStore> {
    let node = EntityDef::new("Node", "id")
        .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64)))
        .with_field(FieldDef::optional("parent_id", FieldType::scalar(ScalarType::Int64)))
        .with_relation(
            RelationDef::many_to_one("parent", "Node", "parent_id", "Node", "id")
                .with_on_delete(DeleteBehavior::Cascade),
        );
    let registry = SchemaRegistry::from_bundle(SchemaBundle::new(vec![node])).unwrap();
    let config = EngineConfig::default().with_max_depth(max_depth);
    Engine::with_config(Arc::new(registry), MemoryStore::new(), config).unwrap()
}

#[tokio::test]
async fn test_self_referencing_cascade() {
    let engine = tree_engine(2);
    for id in 1..=4_i64 {
        let mut data = vec![FieldValue::new("id", id)];
        if id > 1 {
            data.push(FieldValue::new("parent_id", id - 1));
        }
        engine
            .mutate(&Mutation::create("Node", CreateInput::new(data)))
            .await
            .unwrap();
    }

    // Node 4 sits three levels below node 1.
    let err = engine.mutate(&Mutation::delete("Node", 1_i64)).await.unwrap_err();
    assert!(matches!(err, Error::DepthExceeded { depth: 3, max: 2 }));
    assert_eq!(engine.storage().row_count("Node"), 4);

    let result = engine.mutate(&Mutation::delete("Node", 2_i64)).await.unwrap();
    assert_eq!(result.affected, 1);
    assert_eq!(result.cascaded, 2);

    let left = engine.read("Node", None, None, None).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left.records[0].get("id"), Some(&Value::Int64(1)));
    assert_eq!(left.records[0].get("parent_id"), Some(&Value::Null));
}
