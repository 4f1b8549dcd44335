//! Inherited membership, revocation and key rotation across two nodes.

use covalent::{MemberId, MembershipOwner, NodeError, ParentRole, Role};
use covalent_testkit::{connect, introduce, pump, TestFixture};

#[tokio::test]
async fn parent_members_read_child_content_until_revoked() {
    let fixture = TestFixture::new();
    let mut alice = fixture.node(1).await.unwrap();
    let mut bob = fixture.node(2).await.unwrap();
    introduce(&mut alice, &mut bob).await.unwrap();
    connect(&mut alice, &mut bob).await.unwrap();
    let bob_member = MemberId::Account(bob.account_id());

    let team = alice.create_group().await.unwrap();
    let project = alice.create_group().await.unwrap();
    alice
        .extend_group(project, team, ParentRole::Extend)
        .await
        .unwrap();
    alice.add_member(team, bob_member, Role::Reader).await.unwrap();

    let doc = alice.create_map(project).await.unwrap();
    alice.set(doc, "plan", "ship it").await.unwrap();
    pump(&mut alice, &mut bob).await.unwrap();

    let seen = bob.group(project).await.unwrap();
    assert_eq!(seen.my_role(), Some(Role::Reader));
    assert_eq!(seen.parents(), vec![(team, ParentRole::Extend)]);
    assert_eq!(bob.map(doc).unwrap().get_str("plan"), Some("ship it"));

    let old_key = alice.group(project).await.unwrap().read_key_id();
    alice.remove_member(team, bob_member).await.unwrap();
    alice.set(doc, "plan", "secret pivot").await.unwrap();
    pump(&mut alice, &mut bob).await.unwrap();

    let project_now = alice.group(project).await.unwrap();
    assert_ne!(project_now.read_key_id(), old_key);
    assert!(!project_now.role_of(&bob_member).is_some_and(Role::can_read));
    assert_eq!(
        alice.group(team).await.unwrap().role_of(&bob_member),
        Some(Role::Revoked)
    );
    assert_eq!(alice.map(doc).unwrap().get_str("plan"), Some("secret pivot"));

    assert!(matches!(bob.map(doc), Err(NodeError::Unauthorized(_))));

    // Past the role check: Bob still unlocks the old key but not the new
    // one, and the pivot was written under the new one.
    let old_key = old_key.unwrap();
    let new_key = project_now.read_key_id().unwrap();
    assert!(alice.holds_key(&project, &new_key));
    assert!(alice.holds_key(&project, &old_key));
    assert!(bob.holds_key(&project, &old_key));
    assert!(!bob.holds_key(&project, &new_key));

    let pieces = bob.export(doc).await.unwrap();
    let pivot = pieces
        .iter()
        .filter(|piece| piece.id == doc)
        .flat_map(|piece| piece.new.values())
        .flat_map(|session| &session.new_transactions)
        .max_by_key(|tx| tx.made_at())
        .unwrap();
    assert_eq!(pivot.key_used(), Some(&new_key));
}

#[tokio::test]
async fn fixed_parent_role_caps_inherited_access() {
    let fixture = TestFixture::new();
    let mut alice = fixture.node(1).await.unwrap();
    let mut bob = fixture.node(2).await.unwrap();
    introduce(&mut alice, &mut bob).await.unwrap();
    connect(&mut alice, &mut bob).await.unwrap();
    let bob_member = MemberId::Account(bob.account_id());

    let org = alice.create_group().await.unwrap();
    let board = alice.create_group().await.unwrap();
    alice
        .extend_group(board, org, ParentRole::Fixed(Role::Reader))
        .await
        .unwrap();
    alice.add_member(org, bob_member, Role::Writer).await.unwrap();
    let notes = alice.create_map(board).await.unwrap();
    alice.set(notes, "agenda", "budget").await.unwrap();
    pump(&mut alice, &mut bob).await.unwrap();

    assert_eq!(bob.group(board).await.unwrap().my_role(), Some(Role::Reader));
    assert_eq!(bob.map(notes).unwrap().get_str("agenda"), Some("budget"));
    assert!(matches!(
        bob.set(notes, "agenda", "party").await,
        Err(NodeError::Unauthorized(_))
    ));
    // Bob writes freely in the parent itself.
    let shared = bob.create_map(org).await.unwrap();
    bob.set(shared, "by", "bob").await.unwrap();
    let pieces = bob.export(shared).await.unwrap();
    alice.import(&pieces).await.unwrap();
    assert_eq!(alice.map(shared).unwrap().get_str("by"), Some("bob"));
}

#[tokio::test]
async fn everyone_reader_makes_content_public() {
    let fixture = TestFixture::new();
    let mut alice = fixture.node(1).await.unwrap();
    let mut bob = fixture.node(2).await.unwrap();
    connect(&mut alice, &mut bob).await.unwrap();

    let group = alice.create_group().await.unwrap();
    alice
        .add_member(group, MemberId::Everyone, Role::Reader)
        .await
        .unwrap();
    let post = alice.create_map(group).await.unwrap();
    alice.set(post, "body", "hello world").await.unwrap();
    pump(&mut alice, &mut bob).await.unwrap();

    assert_eq!(bob.map(post).unwrap().get_str("body"), Some("hello world"));
    assert!(bob.set(post, "body", "defaced").await.is_err());

    assert!(matches!(
        alice.add_member(group, MemberId::Everyone, Role::Admin).await,
        Err(NodeError::InvalidOperation(_))
    ));
}
