//! Integration tests for search compilation, execution and hydration.

use std::time::Duration;

use pretty_assertions::assert_eq;
use quarry_core::catalog::{
    Catalog, EntityDef, FieldType, JoinTable, RelationDef, ScalarType, SchemaBundle,
};
use quarry_core::query::SearchExecutor;
use quarry_core::{Error, ErrorKind, MemoryBackend, RequestContext, SearchConfig};
use quarry_proto::{Condition, Record, Related, RelationRequest, SearchSpec, Value};
use serde_json::json;

struct TestContext {
    catalog: Catalog,
    backend: MemoryBackend,
}

impl TestContext {
    fn new() -> Self {
        Self {
            catalog: gallery_schema(),
            backend: seed(MemoryBackend::new()),
        }
    }

    fn executor(&self) -> SearchExecutor<'_> {
        SearchExecutor::new(&self.catalog)
    }

    async fn search(&self, spec: SearchSpec) -> Result<Vec<Record>, Error> {
        self.executor()
            .search(spec, &self.backend, &RequestContext::new())
            .await
    }
}

fn gallery_schema() -> Catalog {
    let int = || FieldType::scalar(ScalarType::Int64);
    let text = || FieldType::scalar(ScalarType::String);

    let user = EntityDef::new("User", "id")
        .with_column("id", int())
        .with_column("name", text())
        .with_column("status", text())
        .with_column("mainPhotoId", FieldType::optional_scalar(ScalarType::Int64))
        .with_relation(RelationDef::many_to_one("mainPhoto", "Photo", "mainPhotoId"))
        .with_relation(RelationDef::one_to_many("images", "Photo", "owner"))
        .with_relation(RelationDef::one_to_one_inverse("profile", "Profile", "user"))
        .with_relation(RelationDef::many_to_many(
            "tags",
            "Tag",
            JoinTable::new("user_tags", "userId", "tagId"),
        ));
    let photo = EntityDef::new("Photo", "id")
        .with_column("id", int())
        .with_column("url", text())
        .with_column("ownerId", int())
        .with_column("albumId", FieldType::optional_scalar(ScalarType::Int64))
        .with_relation(RelationDef::many_to_one("owner", "User", "ownerId").with_inverse("images"))
        .with_relation(RelationDef::many_to_one("album", "Album", "albumId"));
    let album = EntityDef::new("Album", "id")
        .with_column("id", int())
        .with_column("title", text());
    let profile = EntityDef::new("Profile", "id")
        .with_column("id", int())
        .with_column("bio", text())
        .with_column("userId", int())
        .with_relation(RelationDef::one_to_one("user", "User", "userId").with_inverse("profile"));
    let tag = EntityDef::new("Tag", "id")
        .with_column("id", int())
        .with_column("name", text());

    let schema = SchemaBundle::new(1)
        .with_entity(user)
        .with_entity(photo)
        .with_entity(album)
        .with_entity(profile)
        .with_entity(tag);
    Catalog::new(schema).unwrap()
}

fn user(id: i64, name: &str, status: &str, main_photo: Option<i64>) -> Record {
    Record::new()
        .with("id", id)
        .with("name", name)
        .with("status", status)
        .with("mainPhotoId", main_photo.map_or(Value::Null, Value::Int64))
}

fn photo(id: i64, url: &str, owner: i64, album: Option<i64>) -> Record {
    Record::new()
        .with("id", id)
        .with("url", url)
        .with("ownerId", owner)
        .with("albumId", album.map_or(Value::Null, Value::Int64))
}

fn seed(backend: MemoryBackend) -> MemoryBackend {
    backend
        .with_rows(
            "User",
            vec![
                user(1, "ada", "active", Some(5)),
                user(2, "bob", "inactive", Some(7)),
                user(3, "cy", "active", Some(5)),
                user(4, "dee", "active", None),
            ],
        )
        .with_rows(
            "Photo",
            vec![
                photo(5, "a.png", 1, Some(100)),
                photo(7, "b.png", 2, None),
                photo(8, "c.png", 1, Some(100)),
                photo(9, "d.png", 3, Some(101)),
            ],
        )
        .with_rows(
            "Album",
            vec![
                Record::new().with("id", 100i64).with("title", "summer"),
                Record::new().with("id", 101i64).with("title", "winter"),
            ],
        )
        .with_rows(
            "Profile",
            vec![
                Record::new().with("id", 30i64).with("bio", "hi").with("userId", 1i64),
                Record::new().with("id", 31i64).with("bio", "yo").with("userId", 3i64),
            ],
        )
        .with_rows(
            "Tag",
            vec![
                Record::new().with("id", 40i64).with("name", "x"),
                Record::new().with("id", 41i64).with("name", "y"),
            ],
        )
        .with_rows(
            "user_tags",
            [(1i64, 40i64), (2, 41), (3, 40), (3, 41)]
                .into_iter()
                .map(|(u, t)| Record::new().with("userId", u).with("tagId", t)),
        )
}

fn ids(records: &[Record]) -> Vec<i64> {
    records
        .iter()
        .filter_map(|r| r.get("id").and_then(Value::as_i64))
        .collect()
}

fn users() -> SearchSpec {
    SearchSpec::new("User").sort("id").unwrap()
}

// ============================================================================
// Condition compilation
// ============================================================================

#[tokio::test]
async fn test_equality_filter_on_root_alias() {
    let ctx = TestContext::new();
    let condition = Condition::from_json(&json!({"status": "active"})).unwrap();

    let compiled = ctx
        .executor()
        .compile(&users().with_condition(condition.clone()))
        .unwrap();
    let predicate = compiled.query.predicate.as_ref().unwrap();
    assert_eq!(predicate.to_sql(), "model.status = :p0");
    assert_eq!(
        compiled.query.params,
        vec![("p0".to_string(), Value::String("active".into()))]
    );

    let records = ctx.search(users().with_condition(condition)).await.unwrap();
    assert_eq!(ids(&records), vec![1, 3, 4]);
}

#[test]
fn test_map_form_matches_tuple_form() {
    let ctx = TestContext::new();
    let map = Condition::from_json(&json!({"status": "active", "name": "ada"})).unwrap();
    let tuple =
        Condition::from_json(&json!(["and", ["=", "status", "active"], ["=", "name", "ada"]])).unwrap();

    let sql = |c: Condition| {
        ctx.executor()
            .compile(&users().with_condition(c))
            .unwrap()
            .query
            .to_sql()
    };
    assert_eq!(sql(map), sql(tuple));
}

#[tokio::test]
async fn test_empty_in_list() {
    let ctx = TestContext::new();
    let empty = Condition::in_list("id", Vec::<i64>::new());

    let compiled = ctx
        .executor()
        .compile(&users().with_condition(empty.clone()))
        .unwrap();
    assert_eq!(compiled.query.predicate.unwrap().to_sql(), "1 = 0");
    assert!(ctx.search(users().with_condition(empty.clone())).await.unwrap().is_empty());

    let filtered = ctx
        .executor()
        .compile(&users().with_condition(Condition::filter(empty.clone())))
        .unwrap();
    assert!(filtered.query.predicate.is_none());
    let records = ctx
        .search(users().with_condition(Condition::filter(empty)))
        .await
        .unwrap();
    assert_eq!(records.len(), 4);
}

#[test]
fn test_filter_mode_drops_empty_operands() {
    let ctx = TestContext::new();
    let condition = Condition::filter(Condition::and([
        Condition::eq("name", Value::Null),
        Condition::eq("status", "active"),
    ]));
    let compiled = ctx
        .executor()
        .compile(&users().with_condition(condition))
        .unwrap();
    assert_eq!(compiled.query.predicate.unwrap().to_sql(), "model.status = :p0");
}

#[tokio::test]
async fn test_negated_and_equals_or_of_negations() {
    let ctx = TestContext::new();
    let a = || Condition::eq("status", "active");
    let b = || Condition::like("name", "%y");

    let negated_and = ctx
        .search(users().with_condition(Condition::not(Condition::and([a(), b()]))))
        .await
        .unwrap();
    let or_of_nots = ctx
        .search(users().with_condition(Condition::or([Condition::not(a()), Condition::not(b())])))
        .await
        .unwrap();

    assert_eq!(negated_and, or_of_nots);
    assert_eq!(ids(&negated_and), vec![1, 2, 4]);
}

#[tokio::test]
async fn test_existential_quantifiers() {
    let ctx = TestContext::new();

    let compiled = ctx
        .executor()
        .compile(&users().with_condition(Condition::some("tags", Condition::eq("name", "x"))))
        .unwrap();
    let sql = compiled.query.predicate.as_ref().unwrap().to_sql();
    assert!(sql.starts_with("model.id IN (SELECT sq1_model.id FROM User sq1_model"));
    assert!(sql.ends_with("WHERE sq1_model_tags.name = :sq1_p0)"));
    assert_eq!(compiled.query.param("sq1_p0"), Some(&Value::String("x".into())));

    let some = ctx
        .search(users().with_condition(Condition::some("tags", Condition::eq("name", "x"))))
        .await
        .unwrap();
    assert_eq!(ids(&some), vec![1, 3]);

    let every = ctx
        .search(users().with_condition(Condition::every("tags", Condition::eq("name", "x"))))
        .await
        .unwrap();
    assert_eq!(ids(&every), vec![1, 4]);

    let none = ctx
        .search(users().with_condition(Condition::none("tags", Condition::eq("name", "y"))))
        .await
        .unwrap();
    assert_eq!(ids(&none), vec![1, 4]);
}

#[tokio::test]
async fn test_null_columns_under_negation() {
    let ctx = TestContext::new();

    // mainPhotoId: 5, 7, 5, NULL
    let not_greater = Condition::from_json(&json!(["not >", "mainPhotoId", 5])).unwrap();
    let records = ctx.search(users().with_condition(not_greater)).await.unwrap();
    assert_eq!(ids(&records), vec![1, 3]);

    // Album ids per owner: 1 -> [100, 100], 2 -> [NULL], 3 -> [101], 4 -> none.
    let every = Condition::from_json(&json!(["every", "images", [">=", "albumId", 101]])).unwrap();
    let records = ctx.search(users().with_condition(every)).await.unwrap();
    assert_eq!(ids(&records), vec![2, 3, 4]);
}

#[tokio::test]
async fn test_condition_on_joined_relation() {
    let ctx = TestContext::new();
    let spec = users()
        .join("mainPhoto")
        .with_condition(Condition::eq("mainPhoto.url", "a.png"));
    let records = ctx.search(spec).await.unwrap();
    assert_eq!(ids(&records), vec![1, 3]);
    assert_eq!(ctx.backend.query_count(), 1);
}

#[test]
fn test_condition_on_unjoined_relation_fails() {
    let ctx = TestContext::new();
    let err = ctx
        .executor()
        .compile(&users().with_condition(Condition::eq("mainPhoto.url", "a.png")))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);
    assert!(err.to_string().contains("mainPhoto"));
}

// ============================================================================
// Hydration
// ============================================================================

#[tokio::test]
async fn test_many_to_one_batches_distinct_keys() {
    let ctx = TestContext::new();
    let records = ctx.search(users().no_join("mainPhoto")).await.unwrap();

    assert_eq!(ctx.backend.query_count(), 2);
    let hydration = &ctx.backend.executed()[1];
    assert_eq!(
        hydration.params,
        vec![
            ("p0".to_string(), Value::Int64(5)),
            ("p1".to_string(), Value::Int64(7)),
        ]
    );

    let photo_id = |r: &Record| r.follow("mainPhoto").and_then(|p| p.get("id")).cloned();
    assert_eq!(photo_id(&records[0]), Some(Value::Int64(5)));
    assert_eq!(photo_id(&records[1]), Some(Value::Int64(7)));
    assert_eq!(photo_id(&records[2]), Some(Value::Int64(5)));
    assert_eq!(records[3].relation("mainPhoto"), Some(&Related::One(None)));
}

#[tokio::test]
async fn test_one_to_many_issues_one_query() {
    let ctx = TestContext::new();
    let records = ctx.search(users().no_join("images")).await.unwrap();

    assert_eq!(ctx.backend.query_count(), 2);
    let image_ids = |r: &Record| ids(&r.relation("images").unwrap().records().into_iter().cloned().collect::<Vec<_>>());
    assert_eq!(image_ids(&records[0]), vec![5, 8]);
    assert_eq!(image_ids(&records[1]), vec![7]);
    assert_eq!(image_ids(&records[2]), vec![9]);
    assert_eq!(records[3].relation("images"), Some(&Related::Many(Vec::new())));
}

#[tokio::test]
async fn test_nested_levels_query_once_per_level() {
    let ctx = TestContext::new();
    let records = ctx.search(users().no_join("images.album")).await.unwrap();

    assert_eq!(ctx.backend.query_count(), 3);
    let Some(Related::Many(images)) = records[0].relation("images") else {
        panic!("images not hydrated");
    };
    assert_eq!(
        images[0].follow("album").and_then(|a| a.get("title")),
        Some(&Value::String("summer".into()))
    );
    let Some(Related::Many(images)) = records[1].relation("images") else {
        panic!("images not hydrated");
    };
    assert_eq!(images[0].relation("album"), Some(&Related::One(None)));
}

#[tokio::test]
async fn test_join_and_hydration_produce_same_records() {
    let ctx = TestContext::new();
    let joined = ctx
        .search(users().join("mainPhoto").join("images"))
        .await
        .unwrap();
    assert_eq!(ctx.backend.query_count(), 1);

    let hydrated = ctx
        .search(users().no_join("mainPhoto").no_join("images"))
        .await
        .unwrap();
    assert_eq!(ctx.backend.query_count(), 4);

    assert_eq!(joined, hydrated);
}

#[tokio::test]
async fn test_deferred_children_of_joined_relation() {
    let ctx = TestContext::new();
    let records = ctx
        .search(users().join("images").no_join("images.album"))
        .await
        .unwrap();

    assert_eq!(ctx.backend.query_count(), 2);
    let Some(Related::Many(images)) = records[2].relation("images") else {
        panic!("images not joined");
    };
    assert_eq!(
        images[0].follow("album").and_then(|a| a.get("title")),
        Some(&Value::String("winter".into()))
    );
}

#[tokio::test]
async fn test_inverse_one_to_one() {
    let ctx = TestContext::new();
    let records = ctx.search(users().no_join("profile")).await.unwrap();

    assert_eq!(
        records[0].follow("profile").and_then(|p| p.get("bio")),
        Some(&Value::String("hi".into()))
    );
    assert_eq!(records[1].relation("profile"), Some(&Related::One(None)));
}

#[tokio::test]
async fn test_ids_only_relations() {
    let ctx = TestContext::new();

    let projected = ctx
        .search(users().join_with("images", RelationRequest::ids_only()))
        .await
        .unwrap();
    assert_eq!(ctx.backend.query_count(), 1);
    assert_eq!(
        projected[0].relation("images"),
        Some(&Related::Ids(vec![Value::Int64(5), Value::Int64(8)]))
    );

    let hydrated = ctx
        .search(users().no_join_with("images", RelationRequest::ids_only()))
        .await
        .unwrap();
    assert_eq!(projected, hydrated);

    let owned = ctx
        .search(users().no_join_with("mainPhoto", RelationRequest::ids_only()))
        .await
        .unwrap();
    assert_eq!(owned[3].relation("mainPhoto"), Some(&Related::Ids(Vec::new())));
    assert_eq!(ctx.backend.query_count(), 4);
}

#[tokio::test]
async fn test_field_selection_keeps_keys() {
    let ctx = TestContext::new();
    let records = ctx
        .search(
            users()
                .select(["name"])
                .no_join_with("images", RelationRequest::fields(["url"])),
        )
        .await
        .unwrap();

    let first_image = records[0].relation("images").unwrap().records()[0].clone();
    let columns: Vec<_> = first_image.fields.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(columns, vec!["id", "url", "ownerId"]);
    let root_columns: Vec<_> = records[0].fields.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(root_columns, vec!["id", "name"]);
}

#[tokio::test]
async fn test_many_to_many_join() {
    let ctx = TestContext::new();

    let records = ctx.search(users().join("tags")).await.unwrap();
    let Some(Related::Many(tags)) = records[2].relation("tags") else {
        panic!("tags not joined");
    };
    let names: Vec<_> = tags.iter().filter_map(|t| t.get("name").and_then(Value::as_str)).collect();
    assert_eq!(names, vec!["x", "y"]);
}

#[tokio::test]
async fn test_many_to_many_hydration_rejected_before_any_query() {
    let empty = TestContext {
        catalog: gallery_schema(),
        backend: MemoryBackend::new().with_rows("User", Vec::<Record>::new()),
    };
    let seeded = TestContext::new();

    for ctx in [&empty, &seeded] {
        let err = ctx.search(users().no_join("tags")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(matches!(err, Error::UnsupportedRelation { ref relation, .. } if relation == "User.tags"));

        // Below a joined relation, whatever the joined rows hold.
        let err = ctx
            .search(users().join("images").no_join("images.owner.tags"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedRelation { ref relation, .. } if relation == "User.tags"));
        assert_eq!(ctx.backend.query_count(), 0);
    }
}

#[tokio::test]
async fn test_unresolved_relation_path() {
    let ctx = TestContext::new();
    let err = ctx.search(users().no_join("images.nope")).await.unwrap_err();
    assert!(matches!(err, Error::UnresolvedRelation { ref path } if path == "images.nope"));
    assert_eq!(ctx.backend.query_count(), 0);
}

// ============================================================================
// Paging, config and execution control
// ============================================================================

#[tokio::test]
async fn test_pagination() {
    let ctx = TestContext::new();
    let records = ctx
        .search(users().paginate(Some(2), Some(2)))
        .await
        .unwrap();
    assert_eq!(ids(&records), vec![3, 4]);

    let records = ctx.search(users().sort("name!").unwrap()).await.unwrap();
    assert_eq!(ids(&records), vec![1, 2, 3, 4]);

    let records = ctx
        .search(SearchSpec::new("User").sort("name!").unwrap().limit(2))
        .await
        .unwrap();
    assert_eq!(ids(&records), vec![4, 3]);
}

#[tokio::test]
async fn test_backend_error_names_stage() {
    let ctx = TestContext::new();
    ctx.backend.fail_next("connection refused");
    let err = ctx.search(users()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Execution);
    match err {
        Error::Backend { stage, source } => {
            assert_eq!(stage, "primary query");
            assert_eq!(source.to_string(), "connection refused");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_cancelled_request_skips_backend() {
    let ctx = TestContext::new();
    let request = RequestContext::new();
    request.cancel.cancel();

    let err = ctx
        .executor()
        .search(users(), &ctx.backend, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled { .. }));
    assert_eq!(ctx.backend.query_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout() {
    let catalog = gallery_schema();
    let backend = seed(MemoryBackend::new().with_latency(Duration::from_secs(5)));
    let executor = SearchExecutor::new(&catalog)
        .with_config(SearchConfig::new().with_request_timeout(Duration::from_millis(100)));

    let err = executor
        .search(users(), &backend, &RequestContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded { ref stage } if stage == "primary query"));
}
