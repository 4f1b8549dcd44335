//! Restarting a node on the same SQLite file.

use covalent::{MembershipOwner, Role, SqliteStorage};
use covalent_testkit::TestFixture;

#[tokio::test]
async fn restart_keeps_groups_and_private_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("covalent.db");
    let fixture = TestFixture::new();

    let node = fixture.node_with(1, SqliteStorage::open(&path).unwrap());
    let mut node = node.await.unwrap();
    let account = node.account_id();
    let first_session = node.session_id().clone();
    let group = node.create_group().await.unwrap();
    let notes = node.create_map(group).await.unwrap();
    let todo = node.create_list(group).await.unwrap();
    node.set(notes, "draft", "remember the milk").await.unwrap();
    node.push(todo, "milk").await.unwrap();
    drop(node.shutdown().await.unwrap());

    let mut node = fixture
        .node_with(1, SqliteStorage::open(&path).unwrap())
        .await
        .unwrap();
    assert_eq!(node.account_id(), account);
    assert_ne!(node.session_id(), &first_session);

    node.load(notes).await.unwrap();
    node.load(todo).await.unwrap();
    assert_eq!(
        node.map(notes).unwrap().get_str("draft"),
        Some("remember the milk")
    );
    assert_eq!(node.group(group).await.unwrap().my_role(), Some(Role::Admin));

    // New writes land in a fresh session next to the old one.
    node.push(todo, "eggs").await.unwrap();
    let list = node.list(todo).unwrap();
    assert_eq!(list.get_str(0), Some("milk"));
    assert_eq!(list.get_str(1), Some("eggs"));
    assert_eq!(node.known_state(&todo).unwrap().sessions.len(), 2);
}
