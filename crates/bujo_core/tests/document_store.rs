use bujo_core::db::open_db_in_memory;
use bujo_core::{
    Bullet, BulletSlot, Collection, CollectionType, DocKind, DocumentStore, RepoError,
    SqliteDocumentStore,
};

fn bullet_with_id(id: &str, text: &str, collections: &[&str]) -> Bullet {
    let mut bullet = Bullet::task(text);
    bullet.id = Some(id.to_string());
    bullet.collections = collections.iter().map(|id| id.to_string()).collect();
    bullet
}

fn collection_listing(id: &str, bullet_ids: &[&str]) -> Collection {
    let mut collection = Collection::generic("Reading list");
    collection.id = id.to_string();
    collection.bullets = bullet_ids
        .iter()
        .map(|id| BulletSlot::Id(id.to_string()))
        .collect();
    collection
}

#[test]
fn save_assigns_increasing_generations() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();

    let mut bullet = bullet_with_id("b1", "draft", &[]);
    let first = store.save_bullet(&bullet).unwrap();
    assert!(first.starts_with("1-"));

    bullet.rev = Some(first);
    bullet.text = "final".to_string();
    let second = store.save_bullet(&bullet).unwrap();
    assert!(second.starts_with("2-"));

    let found = store.find(DocKind::Bullet, Some("b1")).unwrap();
    assert_eq!(found.bullets.len(), 1);
    assert_eq!(found.bullets[0].text, "final");
    assert_eq!(found.bullets[0].rev.as_deref(), Some(second.as_str()));
}

#[test]
fn stale_revision_is_rejected_as_conflict() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();

    let mut bullet = bullet_with_id("b1", "draft", &[]);
    let first = store.save_bullet(&bullet).unwrap();
    bullet.rev = Some(first.clone());
    let second = store.save_bullet(&bullet).unwrap();

    bullet.rev = Some(first.clone());
    let err = store.save_bullet(&bullet).unwrap_err();
    match err {
        RepoError::Conflict {
            kind,
            id,
            expected,
            actual,
        } => {
            assert_eq!(kind, DocKind::Bullet);
            assert_eq!(id, "b1");
            assert_eq!(expected, Some(first));
            assert_eq!(actual, Some(second));
        }
        other => panic!("unexpected error: {other}"),
    }

    bullet.rev = None;
    assert!(matches!(
        store.save_bullet(&bullet),
        Err(RepoError::Conflict { .. })
    ));
}

#[test]
fn save_requires_an_id() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();

    let err = store.save_bullet(&Bullet::note("no id")).unwrap_err();
    assert!(matches!(err, RepoError::MissingId(DocKind::Bullet)));
}

#[test]
fn save_rejects_invalid_bullet_state() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();

    let mut note = bullet_with_id("n1", "not a task", &[]);
    note.kind = bujo_core::BulletType::Note;
    note.done = true;
    assert!(matches!(
        store.save_bullet(&note),
        Err(RepoError::Validation(_))
    ));
    assert!(store
        .find(DocKind::Bullet, Some("n1"))
        .unwrap()
        .bullets
        .is_empty());
}

#[test]
fn find_collection_sideloads_member_bullets_only() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();

    store
        .save_bullet(&bullet_with_id("b1", "one", &["c1"]))
        .unwrap();
    store
        .save_bullet(&bullet_with_id("b2", "two", &["c1"]))
        .unwrap();
    store
        .save_bullet(&bullet_with_id("b3", "elsewhere", &[]))
        .unwrap();
    store
        .save_collection(&collection_listing("c1", &["b2", "b1", "ghost"]))
        .unwrap();

    let found = store.find(DocKind::Collection, Some("c1")).unwrap();
    assert_eq!(found.collections.len(), 1);
    assert_eq!(found.collections[0].bullet_ids(), vec!["b2", "b1", "ghost"]);
    assert_eq!(found.collections[0].kind, CollectionType::Generic);
    let sideloaded: Vec<_> = found
        .bullets
        .iter()
        .filter_map(|bullet| bullet.id.as_deref())
        .collect();
    assert_eq!(sideloaded, vec!["b1", "b2"]);
}

#[test]
fn find_bullet_sideloads_owning_collections() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();

    store
        .save_bullet(&bullet_with_id("b1", "one", &["c1", "c2"]))
        .unwrap();
    store
        .save_collection(&collection_listing("c1", &["b1"]))
        .unwrap();
    store
        .save_collection(&collection_listing("c2", &["b1"]))
        .unwrap();
    store
        .save_collection(&collection_listing("c3", &[]))
        .unwrap();

    let found = store.find(DocKind::Bullet, Some("b1")).unwrap();
    let ids: Vec<_> = found
        .collections
        .iter()
        .map(|collection| collection.id.as_str())
        .collect();
    assert_eq!(ids, vec!["c1", "c2"]);
}

#[test]
fn delete_leaves_tombstone_that_can_be_recreated() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();

    let bullet = bullet_with_id("b1", "short lived", &[]);
    store.save_bullet(&bullet).unwrap();
    store.delete(DocKind::Bullet, "b1").unwrap();

    assert!(store
        .find(DocKind::Bullet, Some("b1"))
        .unwrap()
        .bullets
        .is_empty());
    assert!(matches!(
        store.delete(DocKind::Bullet, "b1"),
        Err(RepoError::NotFound { .. })
    ));

    let recreated = store.save_bullet(&bullet).unwrap();
    assert!(recreated.starts_with("3-"));
}

#[test]
fn atomically_rolls_back_every_write_on_error() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();

    let result: Result<(), RepoError> = store.atomically(|store| {
        store.save_bullet(&bullet_with_id("b1", "one", &["c1"]))?;
        store.save_collection(&collection_listing("c1", &["b1"]))?;
        Err(RepoError::InvalidData("abort".to_string()))
    });

    assert!(result.is_err());
    let found = store.find(DocKind::Collection, None).unwrap();
    assert!(found.collections.is_empty());
    assert!(store
        .find(DocKind::Bullet, None)
        .unwrap()
        .bullets
        .is_empty());
}

#[test]
fn nested_atomic_sections_commit_with_the_outer_one() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();

    let result: Result<(), RepoError> = store.atomically(|outer| {
        outer.save_bullet(&bullet_with_id("b1", "one", &[]))?;
        let inner: Result<(), RepoError> = outer.atomically(|inner| {
            inner.save_bullet(&bullet_with_id("b2", "two", &[]))?;
            Err(RepoError::InvalidData("inner abort".to_string()))
        });
        assert!(inner.is_err());
        outer.save_bullet(&bullet_with_id("b3", "three", &[]))?;
        Ok(())
    });

    result.unwrap();
    let ids: Vec<_> = store
        .find(DocKind::Bullet, None)
        .unwrap()
        .bullets
        .into_iter()
        .filter_map(|bullet| bullet.id)
        .collect();
    assert_eq!(ids, vec!["b1", "b3"]);
}

#[test]
fn find_leaves_empty_calendar_collections_in_place() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();

    let mut day = Collection::new("2024-01-01T00:00:00.000Z", CollectionType::Day);
    day.id = "d1".to_string();
    let rev = store.save_collection(&day).unwrap();

    for _ in 0..2 {
        let found = store.find(DocKind::Collection, None).unwrap();
        assert_eq!(found.collections.len(), 1);
        assert_eq!(found.collections[0].id, "d1");
        assert_eq!(found.collections[0].rev.as_deref(), Some(rev.as_str()));
    }
}
