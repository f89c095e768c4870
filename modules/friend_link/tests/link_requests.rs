//! Link-request protocol over the client trait and a shared in-memory remote.

mod common;

use chrono::{Duration, Utc};
use uuid::Uuid;

use common::{shared_remote, Party};
use friend_link::contract::error::{ErrorKind, FriendLinkError};
use friend_link::contract::model::{
    AccountFriend, LinkRequest, LinkRequestStatus, LinkedAccount, MemberKey,
};
use friend_link::domain::ports::RemoteStore;

#[tokio::test]
async fn request_to_own_email_is_rejected_regardless_of_case_and_whitespace() {
    let remote = shared_remote();
    let alice = Party::sign_in(&remote, "alice@example.com", "Alice").await;

    let err = alice
        .api()
        .create_link_request("  ALICE@Example.com ", MemberKey::new(), "Me")
        .await
        .unwrap_err();
    assert_eq!(err, FriendLinkError::SelfLinkNotAllowed);
}

#[tokio::test]
async fn blank_recipient_is_invalid_not_self_link() {
    let remote = shared_remote();
    let alice = Party::sign_in(&remote, "alice@example.com", "Alice").await;

    let err = alice
        .api()
        .create_link_request("   ", MemberKey::new(), "Nobody")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert_eq!(remote.call_count("insert_link_request"), 0);
}

#[tokio::test]
async fn request_expires_thirty_days_after_creation() {
    let remote = shared_remote();
    let alice = Party::sign_in(&remote, "alice@example.com", "Alice").await;

    let before = Utc::now();
    let req = alice
        .api()
        .create_link_request("bob@example.com", MemberKey::new(), " Bobby ")
        .await
        .unwrap();

    assert_eq!(req.status, LinkRequestStatus::Pending);
    assert_eq!(req.target_member_name, "Bobby");
    assert_eq!(req.recipient_email, "bob@example.com");
    let expected = before + Duration::days(30);
    assert!((req.expires_at - expected).num_milliseconds().abs() < 1_000);
}

#[tokio::test]
async fn duplicate_pending_request_is_refused_until_resolved() {
    let remote = shared_remote();
    let alice = Party::sign_in(&remote, "alice@example.com", "Alice").await;
    let bob = Party::sign_in(&remote, "bob@example.com", "Bob").await;
    let target = MemberKey::new();

    // Arrange
    let first = alice
        .api()
        .create_link_request("bob@example.com", target, "Bobby")
        .await
        .unwrap();

    // Act + Assert: same target and recipient while pending
    let err = alice
        .api()
        .create_link_request("BOB@example.com", target, "Bobby")
        .await
        .unwrap_err();
    assert_eq!(err, FriendLinkError::DuplicateRequest);

    // A declined request no longer blocks a new one.
    bob.api().decline_link_request(first.id).await.unwrap();
    let second = alice
        .api()
        .create_link_request("bob@example.com", target, "Bobby")
        .await
        .unwrap();

    // Neither does a cancelled one.
    alice.api().cancel_link_request(second.id).await.unwrap();
    alice
        .api()
        .create_link_request("bob@example.com", target, "Bobby")
        .await
        .unwrap();
}

#[tokio::test]
async fn linked_member_cannot_be_requested_again() {
    let remote = shared_remote();
    let alice = Party::sign_in(&remote, "alice@example.com", "Alice").await;
    let key = MemberKey::new();
    let linked = AccountFriend::new(key, "Bobby").linked_to(
        LinkedAccount::new(None, Some("bob@example.com".into())).unwrap(),
    );
    alice.session().upsert_friend(linked).unwrap();

    let err = alice
        .api()
        .create_link_request("carol@example.com", key, "Bobby")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyLinked);

    let err = alice
        .api()
        .create_link_request("bob@example.com", MemberKey::new(), "Robert")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyLinked);
}

#[tokio::test]
async fn incoming_and_outgoing_show_pending_requests_only() {
    let remote = shared_remote();
    let alice = Party::sign_in(&remote, "alice@example.com", "Alice").await;
    let bob = Party::sign_in(&remote, "bob@example.com", "Bob").await;

    let keep = alice
        .api()
        .create_link_request("bob@example.com", MemberKey::new(), "Bobby")
        .await
        .unwrap();
    let gone = alice
        .api()
        .create_link_request("bob@example.com", MemberKey::new(), "Rob")
        .await
        .unwrap();
    bob.api().decline_link_request(gone.id).await.unwrap();

    let incoming = bob.api().incoming_link_requests().await.unwrap();
    assert_eq!(incoming.iter().map(|r| r.id).collect::<Vec<_>>(), vec![keep.id]);
    let outgoing = alice.api().outgoing_link_requests().await.unwrap();
    assert_eq!(outgoing.iter().map(|r| r.id).collect::<Vec<_>>(), vec![keep.id]);

    let previous = bob.api().previous_link_requests().await.unwrap();
    assert_eq!(previous.len(), 1);
    assert_eq!(previous[0].status, LinkRequestStatus::Declined);
}

#[tokio::test]
async fn expired_request_cannot_be_accepted_and_is_reported_as_expired() {
    let remote = shared_remote();
    let alice = Party::sign_in(&remote, "alice@example.com", "Alice").await;
    let bob = Party::sign_in(&remote, "bob@example.com", "Bob").await;

    let req = alice
        .api()
        .create_link_request("bob@example.com", MemberKey::new(), "Bobby")
        .await
        .unwrap();
    assert!(remote.edit_link_request(req.id, |r| r.expires_at = Utc::now() - Duration::seconds(1)));

    let err = bob.api().accept_link_request(req.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Expired);

    assert!(bob.api().incoming_link_requests().await.unwrap().is_empty());
    let previous = alice.api().previous_link_requests().await.unwrap();
    assert_eq!(previous.len(), 1);
    assert_eq!(previous[0].status, LinkRequestStatus::Expired);
}

#[tokio::test]
async fn cancel_is_idempotent_but_decline_is_not() {
    let remote = shared_remote();
    let alice = Party::sign_in(&remote, "alice@example.com", "Alice").await;
    let bob = Party::sign_in(&remote, "bob@example.com", "Bob").await;

    let req = alice
        .api()
        .create_link_request("bob@example.com", MemberKey::new(), "Bobby")
        .await
        .unwrap();
    alice.api().cancel_link_request(req.id).await.unwrap();
    alice.api().cancel_link_request(req.id).await.unwrap();

    // The recipient can no longer act on it.
    let err = bob.api().decline_link_request(req.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);

    let other = alice
        .api()
        .create_link_request("bob@example.com", MemberKey::new(), "Rob")
        .await
        .unwrap();
    bob.api().decline_link_request(other.id).await.unwrap();
    let err = bob.api().decline_link_request(other.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);

    // Cancelling a declined request is an invalid transition.
    let err = alice.api().cancel_link_request(other.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

#[tokio::test]
async fn only_the_recipient_may_accept() {
    let remote = shared_remote();
    let alice = Party::sign_in(&remote, "alice@example.com", "Alice").await;
    let carol = Party::sign_in(&remote, "carol@example.com", "Carol").await;

    let req = alice
        .api()
        .create_link_request("bob@example.com", MemberKey::new(), "Bobby")
        .await
        .unwrap();
    let err = carol.api().accept_link_request(req.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);

    let err = carol.api().accept_link_request(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

#[tokio::test]
async fn accept_links_both_sides() {
    let remote = shared_remote();
    let alice = Party::sign_in(&remote, "alice@example.com", "Alice").await;
    let bob = Party::sign_in(&remote, "bob@example.com", "Bob").await;
    let target = MemberKey::new();

    // Arrange: Alice already tracks Bob as an unlinked member.
    alice
        .session()
        .upsert_friend(AccountFriend::new(target, "Bobby"))
        .unwrap();
    alice.api().reconcile().await.unwrap();
    let req = alice
        .api()
        .create_link_request("bob@example.com", target, "Bobby")
        .await
        .unwrap();

    // Act
    let result = bob.api().accept_link_request(req.id).await.unwrap();
    bob.session().flush_side_effects().await;

    // Assert: result binds the target key to Bob's account.
    assert_eq!(result.member_key, target);
    assert_eq!(result.linked_account_id, bob.account.id);
    assert_eq!(result.linked_account_email, "bob@example.com");

    // Bob now has Alice as a linked friend and owns the target key.
    let bob_friends = bob.api().friend_members().unwrap();
    let alice_entry = bob_friends
        .iter()
        .find(|f| f.link.account_id() == Some(alice.account.id))
        .expect("alice linked on bob's side");
    assert_eq!(alice_entry.name, "Alice");
    assert!(bob.session().identity().unwrap().is_me(target));

    // Alice's record for the target key points at Bob after reconciling.
    alice.api().reconcile().await.unwrap();
    let alice_friends = alice.api().friend_members().unwrap();
    let bob_entry = alice_friends
        .iter()
        .find(|f| f.answers_to(target))
        .expect("target still known");
    assert_eq!(bob_entry.link.account_id(), Some(bob.account.id));
    assert_eq!(bob_entry.name, "Bob");
    assert_eq!(bob_entry.original_name.as_deref(), Some("Bobby"));
    assert_eq!(alice.api().confirmed_friend_members().unwrap().len(), 1);

    // The request is terminal now.
    let err = bob.api().accept_link_request(req.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

#[tokio::test]
async fn request_resolving_to_requester_is_rejected_on_accept() {
    let remote = shared_remote();
    let alice = Party::sign_in(&remote, "alice@example.com", "Alice").await;

    // Written straight to the remote; the client refuses to create it.
    let now = Utc::now();
    let req = LinkRequest {
        id: Uuid::new_v4(),
        requester_id: alice.account.id,
        requester_email: "alice@example.com".into(),
        requester_name: "Alice".into(),
        recipient_email: "Alice@Example.com".into(),
        target_member_key: MemberKey::new(),
        target_member_name: "Me".into(),
        status: LinkRequestStatus::Pending,
        created_at: now,
        expires_at: now + Duration::days(30),
        rejected_at: None,
    };
    remote.insert_link_request(&req).await.unwrap();

    let err = alice.api().accept_link_request(req.id).await.unwrap_err();
    assert_eq!(err, FriendLinkError::SelfLinkNotAllowed);

    let stored = remote.get_link_request(req.id).await.unwrap().unwrap();
    assert_eq!(stored.status, LinkRequestStatus::Rejected);
    assert!(stored.rejected_at.is_some());
}

#[tokio::test]
async fn signed_out_session_reports_missing_auth() {
    let remote = shared_remote();
    let alice = Party::sign_in(&remote, "alice@example.com", "Alice").await;
    alice.session().sign_out().await;

    let err = alice
        .api()
        .create_link_request("bob@example.com", MemberKey::new(), "Bobby")
        .await
        .unwrap_err();
    assert_eq!(err, FriendLinkError::AuthSessionMissing);
    assert_eq!(
        alice.api().friend_members().unwrap_err(),
        FriendLinkError::AuthSessionMissing
    );
}
