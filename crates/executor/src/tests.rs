use super::*;
use common::EngineConfig;
use pretty_assertions::assert_eq;
use schema::idl::{FieldDefinition, TypeDefinition};
use schema::{load_seed, SchemaCatalog};
use tempfile::{tempdir, TempDir};
use types::ScalarKind;

fn blog_idl() -> Vec<TypeDefinition> {
    vec![
        TypeDefinition::new(
            "User",
            vec![
                FieldDefinition::scalar("name", ScalarKind::String, true),
                FieldDefinition::scalar("age", ScalarKind::Int, false),
            ],
        ),
        TypeDefinition::new(
            "Post",
            vec![
                FieldDefinition::scalar("title", ScalarKind::String, true),
                FieldDefinition::scalar("views", ScalarKind::Int, false),
                FieldDefinition::object("author", "User", false),
            ],
        ),
    ]
}

fn seeded_catalog() -> (SchemaCatalog, TempDir) {
    let dir = tempdir().unwrap();
    let config = EngineConfig::builder()
        .data_dir(dir.path().to_path_buf())
        .adaptive_index_threshold(3)
        .build();
    let catalog = SchemaCatalog::bind(&blog_idl(), config).unwrap();
    let report = load_seed(
        &catalog,
        r#"{
            "User": [
                {"id": "u1", "name": "Alice", "age": 30},
                {"id": "u2", "name": "Bob", "age": 25},
                {"id": "u3", "name": "Carol", "age": 35}
            ],
            "Post": [
                {"id": "p1", "title": "Intro", "views": 10, "authorId": "u1"},
                {"id": "p2", "title": "Deep dive", "views": 50, "authorId": "u1"},
                {"id": "p3", "title": "Outro", "views": 30, "authorId": "u2"},
                {"id": "p4", "title": "Dangling", "views": 1, "authorId": "u9"}
            ]
        }"#,
    )
    .unwrap();
    assert!(report.is_clean(), "seed errors: {:?}", report.errors);
    (catalog, dir)
}

fn names_of(rows: &Json) -> Vec<String> {
    rows.as_array()
        .unwrap()
        .iter()
        .map(|row| row["name"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn leaf_selection_projects_all_columns() {
    let (catalog, _dir) = seeded_catalog();
    let executor = QueryExecutor::new(&catalog);

    let response = executor.execute(&[
        Selection::new("users").filtered(Filter::eq("id", Value::Id("u1".into())))
    ]);
    assert!(response.errors.is_empty());

    let rows = response.data["users"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], json!("u1"));
    assert_eq!(rows[0]["name"], json!("Alice"));
    assert_eq!(rows[0]["age"], json!(30));
}

#[test]
fn primary_key_miss_yields_empty_list() {
    let (catalog, _dir) = seeded_catalog();
    let executor = QueryExecutor::new(&catalog);

    let response = executor.execute(&[
        Selection::new("users").filtered(Filter::eq("id", Value::Id("nope".into())))
    ]);
    assert!(response.errors.is_empty());
    assert_eq!(response.data["users"], json!([]));
}

#[test]
fn filtered_list_with_comparison_ops() {
    let (catalog, _dir) = seeded_catalog();
    let executor = QueryExecutor::new(&catalog);

    let response = executor.execute(&[Selection::new("users")
        .filtered(Filter::cond("age", CompareOp::Gte, Value::Int(30)))
        .select(Selection::new("name"))]);
    assert!(response.errors.is_empty());
    let mut names = names_of(&response.data["users"]);
    names.sort();
    assert_eq!(names, vec!["Alice", "Carol"]);
}

#[test]
fn conjunction_applies_residual_predicates() {
    let (catalog, _dir) = seeded_catalog();
    let executor = QueryExecutor::new(&catalog);

    let response = executor.execute(&[Selection::new("posts")
        .filtered(Filter::And(vec![
            Filter::eq("authorId", Value::Text("u1".into())),
            Filter::cond("views", CompareOp::Gt, Value::Int(20)),
        ]))
        .select(Selection::new("title"))]);
    assert!(response.errors.is_empty());
    let rows = response.data["posts"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["title"], json!("Deep dive"));
}

#[test]
fn disjunction_falls_back_to_scan() {
    let (catalog, _dir) = seeded_catalog();
    let executor = QueryExecutor::new(&catalog);

    let response = executor.execute(&[Selection::new("users")
        .filtered(Filter::Or(vec![
            Filter::eq("name", Value::Text("Alice".into())),
            Filter::cond("age", CompareOp::Lt, Value::Int(26)),
        ]))
        .select(Selection::new("name"))]);
    assert!(response.errors.is_empty());
    let mut names = names_of(&response.data["users"]);
    names.sort();
    assert_eq!(names, vec!["Alice", "Bob"]);
}

#[test]
fn contains_filters_text() {
    let (catalog, _dir) = seeded_catalog();
    let executor = QueryExecutor::new(&catalog);

    let response = executor.execute(&[Selection::new("posts")
        .filtered(Filter::cond(
            "title",
            CompareOp::Contains,
            Value::Text("dive".into()),
        ))
        .select(Selection::new("title"))]);
    assert!(response.errors.is_empty());
    let rows = response.data["posts"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["title"], json!("Deep dive"));
}

#[test]
fn ordering_and_pagination() {
    let (catalog, _dir) = seeded_catalog();
    let executor = QueryExecutor::new(&catalog);

    let response = executor.execute(&[Selection::new("users")
        .ordered("age", Direction::Desc)
        .skip(1)
        .take(1)
        .select(Selection::new("name"))]);
    assert!(response.errors.is_empty());
    assert_eq!(names_of(&response.data["users"]), vec!["Alice"]);

    let response = executor.execute(&[Selection::new("users")
        .ordered("age", Direction::Asc)
        .select(Selection::new("name"))]);
    assert_eq!(
        names_of(&response.data["users"]),
        vec!["Bob", "Alice", "Carol"]
    );
}

#[test]
fn negative_pagination_is_a_query_error() {
    let (catalog, _dir) = seeded_catalog();
    let executor = QueryExecutor::new(&catalog);

    let response = executor.execute(&[Selection::new("users").take(-1)]);
    assert_eq!(response.data["users"], Json::Null);
    assert_eq!(response.errors.len(), 1);
    assert!(response.errors[0].message.contains("take"));
}

#[test]
fn unknown_root_and_unknown_field_fail_cleanly() {
    let (catalog, _dir) = seeded_catalog();
    let executor = QueryExecutor::new(&catalog);

    let response = executor.execute(&[Selection::new("comments")]);
    assert_eq!(response.data["comments"], Json::Null);
    assert!(response.errors[0].message.contains("unknown query root"));

    let response = executor
        .execute(&[Selection::new("users").select(Selection::new("salary"))]);
    assert_eq!(response.data["users"], Json::Null);
    assert!(response.errors[0].message.contains("unknown field"));
}

#[test]
fn relationships_resolve_batched() {
    let (catalog, _dir) = seeded_catalog();
    let executor = QueryExecutor::new(&catalog);

    let response = executor.execute(&[Selection::new("posts")
        .filtered(Filter::cond("views", CompareOp::Lt, Value::Int(40)))
        .ordered("views", Direction::Asc)
        .select(Selection::new("title"))
        .select(Selection::new("author").select(Selection::new("name")))]);

    let rows = response.data["posts"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    // p4 (views 1) has a dangling author; the field is null and reported.
    assert_eq!(rows[0]["title"], json!("Dangling"));
    assert_eq!(rows[0]["author"], Json::Null);
    assert_eq!(rows[1]["author"]["name"], json!("Alice"));
    assert_eq!(rows[2]["author"]["name"], json!("Bob"));

    assert_eq!(response.errors.len(), 1);
    assert_eq!(
        response.errors[0].path,
        vec!["posts".to_string(), "0".into(), "author".into()]
    );
}

#[test]
fn aliases_rename_output_keys() {
    let (catalog, _dir) = seeded_catalog();
    let executor = QueryExecutor::new(&catalog);

    let response = executor.execute(&[Selection::new("users")
        .aliased("authors")
        .filtered(Filter::eq("id", Value::Id("u1".into())))
        .select(Selection::new("name").aliased("displayName"))]);
    assert!(response.errors.is_empty());
    let rows = response.data["authors"].as_array().unwrap();
    assert_eq!(rows[0]["displayName"], json!("Alice"));
}

#[test]
fn repeated_filter_grows_an_adaptive_index_and_uses_it() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (catalog, _dir) = seeded_catalog();
    let executor = QueryExecutor::new(&catalog);

    let query = || {
        Selection::new("users")
            .filtered(Filter::cond("age", CompareOp::Gte, Value::Int(30)))
            .select(Selection::new("name"))
    };

    for _ in 0..2 {
        let response = executor.execute(&[query()]);
        assert!(response.errors.is_empty());
    }
    {
        let table = catalog.table("User").unwrap();
        assert!(!schema::write_guard(&table).unwrap().has_btree("age"));
    }

    // Third access crosses the threshold.
    let response = executor.execute(&[query()]);
    assert!(response.errors.is_empty());
    let mut names = names_of(&response.data["users"]);
    names.sort();
    assert_eq!(names, vec!["Alice", "Carol"]);

    let table = catalog.table("User").unwrap();
    assert!(schema::write_guard(&table).unwrap().has_btree("age"));
}

#[test]
fn cancellation_surfaces_and_stops() {
    let (catalog, _dir) = seeded_catalog();
    let token = CancellationToken::new();
    token.cancel();
    let executor = QueryExecutor::with_token(&catalog, token);

    let response = executor.execute(&[
        Selection::new("users").select(Selection::new("name")),
        Selection::new("posts").select(Selection::new("title")),
    ]);
    assert_eq!(response.data["users"], Json::Null);
    assert_eq!(response.errors.len(), 1);
    assert!(response.errors[0].message.contains("cancelled"));
    // The second selection never ran.
    assert!(response.data.get("posts").is_none());
}

#[test]
fn multiple_top_level_selections_are_independent() {
    let (catalog, _dir) = seeded_catalog();
    let executor = QueryExecutor::new(&catalog);

    let response = executor.execute(&[
        Selection::new("users")
            .filtered(Filter::eq("id", Value::Id("u2".into())))
            .select(Selection::new("name")),
        Selection::new("ghosts"),
    ]);
    // The bad selection nulls out; the good one still answers.
    assert_eq!(names_of(&response.data["users"]), vec!["Bob"]);
    assert_eq!(response.data["ghosts"], Json::Null);
    assert_eq!(response.errors.len(), 1);
}
