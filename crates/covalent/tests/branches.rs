//! Branches edited on one node and merged where others can see.

use covalent::{MemberId, Role};
use covalent_testkit::{connect, introduce, pump, TestFixture};

#[tokio::test]
async fn merged_branch_reaches_readers() {
    let fixture = TestFixture::new();
    let mut alice = fixture.node(1).await.unwrap();
    let mut bob = fixture.node(2).await.unwrap();
    introduce(&mut alice, &mut bob).await.unwrap();
    connect(&mut alice, &mut bob).await.unwrap();

    let group = alice.create_group().await.unwrap();
    alice
        .add_member(group, MemberId::Account(bob.account_id()), Role::Reader)
        .await
        .unwrap();
    let doc = alice.create_map(group).await.unwrap();
    alice.set(doc, "status", "draft").await.unwrap();

    let branch = alice.create_branch(doc, "review").await.unwrap();
    assert_eq!(alice.create_branch(doc, "review").await.unwrap(), branch);
    alice.set(branch, "status", "approved").await.unwrap();
    alice.set(branch, "reviewer", "carol").await.unwrap();
    pump(&mut alice, &mut bob).await.unwrap();

    assert_eq!(bob.map(doc).unwrap().get_str("status"), Some("draft"));
    assert_eq!(bob.map(branch).unwrap().get_str("status"), Some("approved"));

    assert_eq!(alice.merge_branch(branch).await.unwrap(), 2);
    pump(&mut alice, &mut bob).await.unwrap();
    let merged = bob.map(doc).unwrap();
    assert_eq!(merged.get_str("status"), Some("approved"));
    assert_eq!(merged.get_str("reviewer"), Some("carol"));
}
