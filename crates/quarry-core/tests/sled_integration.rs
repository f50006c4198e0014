//! Integration tests for the engine over the sled store.

use std::sync::Arc;

use quarry_core::{Engine, ErrorKind, SchemaBundle, SchemaRegistry, SledStore, SledStoreConfig};
use quarry_proto::{
    CreateInput, FieldUpdate, FieldValue, FilterExpr, Mutation, ReadQuery, ReadShape, RelationRead,
    Request, Value,
};

const SCHEMA: &str = r#"{
    "entities": [
        {
            "name": "Project",
            "identity_field": "id",
            "fields": [
                { "name": "id", "field_type": { "scalar": "int64" } },
                { "name": "name", "field_type": { "scalar": "string" } }
            ],
            "relations": [{
                "name": "tasks",
                "from_entity": "Project",
                "to_entity": "Task",
                "cardinality": "many",
                "from_field": "id",
                "to_field": "project_id",
                "key_side": "target",
                "on_delete": "restrict"
            }]
        },
        {
            "name": "Task",
            "identity_field": "id",
            "fields": [
                { "name": "id", "field_type": { "scalar": "int64" } },
                { "name": "title", "field_type": { "scalar": "string" } },
                { "name": "estimate", "field_type": { "scalar": "int32" }, "nullable": true },
                { "name": "project_id", "field_type": { "scalar": "int64" } }
            ],
            "relations": []
        }
    ]
}"#;

fn open(path: &std::path::Path) -> Engine<SledStore> {
    let registry = SchemaRegistry::from_bundle(SchemaBundle::from_json(SCHEMA).unwrap()).unwrap();
    let store = SledStore::open(SledStoreConfig::new(path)).unwrap();
    Engine::new(Arc::new(registry), store).unwrap()
}

fn project_with_tasks() -> Mutation {
    Mutation::create(
        "Project",
        CreateInput::new(vec![FieldValue::new("name", "quarry")])
            .with_nested(
                "tasks",
                CreateInput::new(vec![
                    FieldValue::new("title", "plan"),
                    FieldValue::new("estimate", 3),
                ]),
            )
            .with_nested("tasks", CreateInput::new(vec![FieldValue::new("title", "build")])),
    )
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = open(dir.path());
        let created = engine.mutate(&project_with_tasks()).await.unwrap();
        assert_eq!(created.generated_ids[0], Value::Int64(1));
        engine
            .mutate(&Mutation::update_many(
                "Task",
                FilterExpr::eq("estimate", Value::Null),
                vec![FieldUpdate::set("estimate", 5)],
            ))
            .await
            .unwrap();
    }

    let engine = open(dir.path());
    assert!(engine.storage().was_recovered());

    let query = ReadQuery::new("Project").with_shape(
        ReadShape::fields(["name"]).with_relation("tasks", RelationRead::new(ReadShape::all())),
    );
    let result = engine.read_query(&query).await.unwrap();
    let tasks = result.records[0].related("tasks");
    let estimates: Vec<_> = tasks.iter().filter_map(|t| t.get("estimate")).cloned().collect();
    assert_eq!(estimates, vec![Value::Int32(3), Value::Int32(5)]);

    // Sequences continue after a reopen.
    let next = engine.mutate(&project_with_tasks()).await.unwrap();
    assert_eq!(next.generated_ids[0], Value::Int64(2));
}

#[tokio::test]
async fn test_restrict_blocks_delete() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path());
    let created = engine.mutate(&project_with_tasks()).await.unwrap();
    let project = created.id().cloned().unwrap();

    let err = engine
        .mutate(&Mutation::delete("Project", project.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RelationViolation);
    assert_eq!(engine.storage().row_count("Project"), 1);

    engine
        .mutate(&Mutation::delete_many("Task", FilterExpr::eq("project_id", project.clone())))
        .await
        .unwrap();
    let result = engine.mutate(&Mutation::delete("Project", project)).await.unwrap();
    assert_eq!(result.affected, 1);
    assert_eq!(engine.storage().row_count("Project"), 0);
}

#[tokio::test]
async fn test_json_request_runs() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path());
    engine.mutate(&project_with_tasks()).await.unwrap();

    let request = Request::from_json(
        r#"{ "read": { "entity": "Task", "filter": { "field": { "field": "title", "condition": { "starts_with": "bu" } } } } }"#,
    );
    let Ok(Request::Read(query)) = request else {
        panic!("expected a read request, got {request:?}");
    };
    let result = engine.read_query(&query).await.unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.records[0].get("title"), Some(&Value::from("build")));
}
