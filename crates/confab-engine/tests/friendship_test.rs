//! Integration tests: two client sessions against one shared store, driving
//! the friend-request lifecycle and presence end to end.

use std::sync::Arc;
use std::time::Duration;

use confab_engine::{ChatClient, ChatError, ClientConfig, Identity, RequestDecision};
use confab_store::MemoryStore;
use confab_types::{Profile, RequestStatus};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(1);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "confab_engine=debug,confab_store=debug".into()),
        )
        .try_init();
}

async fn session(store: &MemoryStore, profile: &Profile) -> ChatClient {
    ChatClient::sign_on(
        Arc::new(store.clone()),
        Identity {
            user_id: profile.id,
            username: profile.username.clone(),
        },
        ClientConfig::default(),
    )
    .await
    .expect("sign-on failed")
}

#[tokio::test]
async fn request_accept_roundtrip_across_sessions() {
    init_tracing();
    let store = MemoryStore::new();
    let ana_profile = store.seed_profile("ana", "Ana");
    let bo_profile = store.seed_profile("bo", "Bo");

    let ana = session(&store, &ana_profile).await;
    let bo = session(&store, &bo_profile).await;

    let sent = ana.send_friend_request("bo").await.unwrap();
    assert_eq!(sent.status, RequestStatus::Pending);

    // Bo's pending list carries the request joined with Ana's profile.
    let pending = bo.pending_requests().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].request.id, sent.id);
    assert_eq!(pending[0].sender.username, "ana");

    bo.respond_to_request(sent.id, RequestDecision::Accept)
        .await
        .unwrap();

    // Friendship is derived on both sides from the same accepted row.
    let ana_friends = ana.list_friends().await.unwrap();
    let bo_friends = bo.list_friends().await.unwrap();
    assert_eq!(ana_friends.len(), 1);
    assert_eq!(ana_friends[0].id, bo_profile.id);
    assert_eq!(bo_friends.len(), 1);
    assert_eq!(bo_friends[0].id, ana_profile.id);

    // And the pair is now closed to further requests, from either side.
    assert!(matches!(
        ana.send_friend_request("bo").await,
        Err(ChatError::DuplicateRequest)
    ));
    assert!(matches!(
        bo.send_friend_request("ana").await,
        Err(ChatError::DuplicateRequest)
    ));
}

#[tokio::test]
async fn receiver_is_notified_of_request_and_its_answer_live() {
    init_tracing();
    let store = MemoryStore::new();
    let ana_profile = store.seed_profile("ana", "Ana");
    let bo_profile = store.seed_profile("bo", "Bo");

    let ana = session(&store, &ana_profile).await;
    let bo = session(&store, &bo_profile).await;

    let mut requests = bo.watch_requests();

    let sent = ana.send_friend_request("bo").await.unwrap();
    let arrival = timeout(WAIT, requests.next_change()).await.unwrap().unwrap();
    assert_eq!(arrival.id, sent.id);
    assert_eq!(arrival.status, RequestStatus::Pending);
    assert_eq!(arrival.sender_id, ana_profile.id);

    // Bo answers from this same session; the watch echoes the transition.
    bo.respond_to_request(sent.id, RequestDecision::Accept)
        .await
        .unwrap();
    let transition = timeout(WAIT, requests.next_change()).await.unwrap().unwrap();
    assert_eq!(transition.id, sent.id);
    assert_eq!(transition.status, RequestStatus::Accepted);
}

#[tokio::test]
async fn rejected_requests_never_become_friendships() {
    init_tracing();
    let store = MemoryStore::new();
    let ana_profile = store.seed_profile("ana", "Ana");
    let bo_profile = store.seed_profile("bo", "Bo");

    let ana = session(&store, &ana_profile).await;
    let bo = session(&store, &bo_profile).await;

    let sent = ana.send_friend_request("bo").await.unwrap();
    bo.respond_to_request(sent.id, RequestDecision::Reject)
        .await
        .unwrap();

    assert!(ana.list_friends().await.unwrap().is_empty());
    assert!(bo.list_friends().await.unwrap().is_empty());
    assert!(bo.pending_requests().await.unwrap().is_empty());

    // Answering again in any direction is refused outright.
    assert!(matches!(
        bo.respond_to_request(sent.id, RequestDecision::Accept).await,
        Err(ChatError::InvalidState)
    ));
}

#[tokio::test]
async fn presence_follows_session_lifecycle() {
    init_tracing();
    let store = MemoryStore::new();
    let ana_profile = store.seed_profile("ana", "Ana");
    let bo_profile = store.seed_profile("bo", "Bo");

    let ana = session(&store, &ana_profile).await;
    let mut presence = ana.watch_presence(&[bo_profile.id]);

    let bo = session(&store, &bo_profile).await;
    let online = timeout(WAIT, presence.next_change()).await.unwrap().unwrap();
    assert_eq!(online.id, bo_profile.id);
    assert!(online.is_online);

    bo.sign_off().await.unwrap();
    let offline = timeout(WAIT, presence.next_change()).await.unwrap().unwrap();
    assert!(!offline.is_online);
    assert!(offline.last_seen >= online.last_seen);
}

#[tokio::test]
async fn sign_off_closes_live_watches() {
    init_tracing();
    let store = MemoryStore::new();
    let bo_profile = store.seed_profile("bo", "Bo");

    let bo = session(&store, &bo_profile).await;
    let mut requests = bo.watch_requests();

    bo.sign_off().await.unwrap();

    // The dispatcher dropped every subscription, so the stream ends
    // rather than hanging.
    assert!(
        timeout(WAIT, requests.next_change())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn own_profile_reflects_committed_state() {
    init_tracing();
    let store = MemoryStore::new();
    let ana_profile = store.seed_profile("ana", "Ana");

    let ana = session(&store, &ana_profile).await;
    let me = ana.profile().await.unwrap();
    assert_eq!(me.id, ana_profile.id);
    assert!(me.is_online, "sign-on marks the account online");
}
