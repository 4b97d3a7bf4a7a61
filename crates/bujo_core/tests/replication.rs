use bujo_core::db::open_db_in_memory;
use bujo_core::sync::replicator::{load_checkpoint, SyncDirection};
use bujo_core::{
    Bullet, Collection, CollectionProps, JournalService, MemoryRemote, RemoteTarget, Replicator,
    SqliteDocumentStore, SyncError,
};
use rusqlite::Connection;

const ENDPOINT: &str = "http://localhost:5984/default";

fn service(conn: &Connection) -> JournalService<SqliteDocumentStore<'_>> {
    JournalService::new(SqliteDocumentStore::try_new(conn).unwrap())
}

/// Seeds one collection holding one bullet; returns `(collection_id, bullet_id)`.
fn seed(conn: &Connection) -> (String, String) {
    let service = service(conn);
    let mut list = Collection::generic("Groceries");
    let mut bullet = Bullet::task("eggs");
    service.add_bullet(&mut list, &mut bullet).unwrap();
    (list.id, bullet.id.unwrap())
}

#[test]
fn push_sends_every_local_revision_once() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);
    let remote = MemoryRemote::new(ENDPOINT);
    let replicator = Replicator::new(&conn, &remote);

    let first = replicator.push().unwrap();
    assert_eq!(first.direction, SyncDirection::Push);
    assert_eq!(first.docs_read, 2);
    assert_eq!(first.docs_written, 2);
    assert_eq!(remote.documents().len(), 2);

    let second = replicator.push().unwrap();
    assert_eq!(second.docs_read, 0);
    assert_eq!(second.last_seq, first.last_seq);
    assert_eq!(
        load_checkpoint(&conn, ENDPOINT, SyncDirection::Push).unwrap(),
        first.last_seq
    );
}

#[test]
fn small_batches_replicate_the_same_documents() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);
    seed(&conn);
    let remote = MemoryRemote::new(ENDPOINT);

    let report = Replicator::new(&conn, &remote)
        .with_batch_size(1)
        .push()
        .unwrap();

    assert_eq!(report.docs_read, 4);
    assert_eq!(remote.documents().len(), 4);
}

#[test]
fn pull_rebuilds_collections_on_another_device() {
    let laptop = open_db_in_memory().unwrap();
    let phone = open_db_in_memory().unwrap();
    let (collection_id, bullet_id) = seed(&laptop);
    let remote = MemoryRemote::new(ENDPOINT);

    Replicator::new(&laptop, &remote).push().unwrap();
    let pulled = Replicator::new(&phone, &remote).pull().unwrap();
    assert_eq!(pulled.docs_written, 2);

    let found = service(&phone)
        .find_or_return(&CollectionProps::by_id(&collection_id))
        .unwrap();
    assert!(found[0].is_saved());
    let bullets: Vec<_> = found[0].loaded_bullets().collect();
    assert_eq!(bullets.len(), 1);
    assert_eq!(bullets[0].id.as_deref(), Some(bullet_id.as_str()));
    assert_eq!(bullets[0].text, "eggs");

    let again = Replicator::new(&phone, &remote).pull().unwrap();
    assert_eq!(again.docs_read, 0);
}

#[test]
fn deletions_replicate_as_tombstones() {
    let laptop = open_db_in_memory().unwrap();
    let phone = open_db_in_memory().unwrap();
    let (collection_id, bullet_id) = seed(&laptop);
    let remote = MemoryRemote::new(ENDPOINT);
    Replicator::new(&laptop, &remote).sync().unwrap();
    Replicator::new(&phone, &remote).sync().unwrap();

    let laptop_service = service(&laptop);
    let mut list = laptop_service
        .find_or_return(&CollectionProps::by_id(&collection_id))
        .unwrap()
        .remove(0);
    let mut bullet = laptop_service.load_bullet(&bullet_id).unwrap().unwrap();
    laptop_service.remove_bullet(&mut list, &mut bullet).unwrap();

    Replicator::new(&laptop, &remote).sync().unwrap();
    Replicator::new(&phone, &remote).sync().unwrap();

    let phone_service = service(&phone);
    assert!(phone_service.load_bullet(&bullet_id).unwrap().is_none());
    let list = phone_service
        .find_or_return(&CollectionProps::by_id(&collection_id))
        .unwrap()
        .remove(0);
    assert!(list.bullets.is_empty());
}

#[test]
fn concurrent_edits_converge_on_the_winning_revision() {
    let laptop = open_db_in_memory().unwrap();
    let phone = open_db_in_memory().unwrap();
    let (_, bullet_id) = seed(&laptop);
    let remote = MemoryRemote::new(ENDPOINT);
    Replicator::new(&laptop, &remote).sync().unwrap();
    Replicator::new(&phone, &remote).sync().unwrap();

    let laptop_service = service(&laptop);
    let mut on_laptop = laptop_service.load_bullet(&bullet_id).unwrap().unwrap();
    on_laptop.text = "a dozen eggs".to_string();
    laptop_service.save_bullet(&mut on_laptop).unwrap();
    on_laptop.text = "two dozen eggs".to_string();
    laptop_service.save_bullet(&mut on_laptop).unwrap();

    let phone_service = service(&phone);
    let mut on_phone = phone_service.load_bullet(&bullet_id).unwrap().unwrap();
    on_phone.text = "six eggs".to_string();
    phone_service.save_bullet(&mut on_phone).unwrap();

    Replicator::new(&laptop, &remote).sync().unwrap();
    let phone_report = Replicator::new(&phone, &remote).sync().unwrap();
    assert_eq!(phone_report.push.docs_written, 0);
    Replicator::new(&laptop, &remote).sync().unwrap();

    let laptop_copy = laptop_service.load_bullet(&bullet_id).unwrap().unwrap();
    let phone_copy = phone_service.load_bullet(&bullet_id).unwrap().unwrap();
    assert_eq!(phone_copy.text, "two dozen eggs");
    assert_eq!(phone_copy.rev, laptop_copy.rev);
    assert_eq!(laptop_copy.rev, on_laptop.rev);
}

#[test]
fn offline_remote_fails_without_moving_checkpoints() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);
    let remote = MemoryRemote::new(ENDPOINT);
    remote.set_offline(true);
    let replicator = Replicator::new(&conn, &remote);

    match replicator.push().unwrap_err() {
        SyncError::Remote(err) => {
            assert_eq!(err.code, "remote_unreachable");
            assert!(err.retryable);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(replicator.pull(), Err(SyncError::Remote(_))));
    assert_eq!(
        load_checkpoint(&conn, remote.endpoint(), SyncDirection::Push).unwrap(),
        0
    );

    remote.set_offline(false);
    assert_eq!(replicator.push().unwrap().docs_written, 2);
}
