//! Association tests: has_many, belongs_to and eager loading

use pretty_assertions::assert_eq;
use stowage_core::{
    fields, AssociationKind, AssociationOptions, Attribute, Engine, EngineConfig, FindOptions,
    MemoryBackend, Model, OrmError, Related, StoreOptions, Value,
};

/// Helper to create `users` and `posts` with `users.posts` / `posts.author`
async fn blog() -> (Engine, Model, Model) {
    let engine = Engine::new(MemoryBackend::new(), EngineConfig::new("blog"));
    let users = engine
        .define(
            "users",
            vec![("name", Attribute::string().not_null())],
            StoreOptions::default(),
        )
        .unwrap();
    let posts = engine
        .define(
            "posts",
            vec![
                ("title", Attribute::string().not_null()),
                ("userId", Attribute::number()),
            ],
            StoreOptions::default(),
        )
        .unwrap();

    users.has_many(&posts, AssociationOptions::new().foreign_key("userId"));
    posts.belongs_to(
        &users,
        AssociationOptions::new().foreign_key("userId").alias("author"),
    );

    users.create(fields! { "name" => "Alice" }).await.unwrap();
    users.create(fields! { "name" => "Bob" }).await.unwrap();
    posts
        .bulk_create(vec![
            fields! { "title" => "one", "userId" => 1 },
            fields! { "title" => "two", "userId" => 1 },
            fields! { "title" => "three", "userId" => 2 },
            fields! { "title" => "orphan" },
        ])
        .await
        .unwrap();

    (engine, users, posts)
}

fn titles(related: &Related) -> Vec<String> {
    related
        .as_many()
        .unwrap_or_default()
        .iter()
        .filter_map(|r| r.get("title").and_then(Value::as_str).map(String::from))
        .collect()
}

#[tokio::test]
async fn test_has_many_resolves_by_alias_and_accessor() {
    let (_engine, users, _) = blog().await;
    let alice = users.find_by_pk(1).await.unwrap().unwrap();

    let by_alias = alice.related("posts").await.unwrap();
    let by_accessor = alice.related("getPosts").await.unwrap();
    assert_eq!(titles(&by_alias), vec!["one", "two"]);
    assert_eq!(titles(&by_accessor), titles(&by_alias));
}

#[tokio::test]
async fn test_belongs_to_resolves_target() {
    let (_engine, _, posts) = blog().await;
    let three = posts.find_by_pk(3).await.unwrap().unwrap();

    let author = three.related("getAuthor").await.unwrap();
    assert_eq!(
        author.as_one().and_then(|r| r.get("name")),
        Some(&Value::from("Bob"))
    );

    let orphan = posts.find_by_pk(4).await.unwrap().unwrap();
    assert!(orphan.related("author").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_include_on_find_all() {
    let (_engine, users, _) = blog().await;

    let everyone = users
        .find_all(&FindOptions::new().include("posts"))
        .await
        .unwrap();
    let counts: Vec<usize> = everyone
        .iter()
        .map(|u| u.included("posts").map_or(0, Related::len))
        .collect();
    assert_eq!(counts, vec![2, 1]);

    let json = everyone[1].to_json();
    assert_eq!(json["posts"][0]["title"], serde_json::json!("three"));
}

#[tokio::test]
async fn test_include_on_find_by_pk() {
    let (_engine, _, posts) = blog().await;

    let one = posts
        .find_by_pk_with(1, &FindOptions::new().include("author"))
        .await
        .unwrap()
        .unwrap();
    let author = one.included("author").and_then(Related::as_one).unwrap();
    assert_eq!(author.get("name"), Some(&Value::from("Alice")));
}

#[tokio::test]
async fn test_unknown_association() {
    let (_engine, users, _) = blog().await;
    let alice = users.find_by_pk(1).await.unwrap().unwrap();

    let err = alice.related("comments").await.unwrap_err();
    assert!(matches!(err, OrmError::UnknownAssociation { .. }));

    let err = users
        .find_all(&FindOptions::new().include("getComments"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::UnknownAssociation { .. }));
}

#[tokio::test]
async fn test_default_descriptor() {
    let engine = Engine::new(MemoryBackend::new(), EngineConfig::new("defaults"));
    let teams = engine
        .define("teams", Vec::<(&str, Attribute)>::new(), StoreOptions::default())
        .unwrap();
    let players = engine
        .define("players", Vec::<(&str, Attribute)>::new(), StoreOptions::default())
        .unwrap();

    let roster = teams.has_many(&players, AssociationOptions::new());
    assert_eq!(roster.kind, AssociationKind::HasMany);
    assert_eq!(roster.foreign_key, "teamsId");
    assert_eq!(roster.alias, "players");
    assert_eq!(teams.association("getPlayers").unwrap(), roster);
}
