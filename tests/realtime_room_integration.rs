//! Realtime room integration tests
//!
//! Several `RoomChannel`s share one in-process `LocalHub` and exchange
//! presence and chat messages the way separate clients would.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use notestream::realtime::channel::JoinState;
use notestream::realtime::{LocalHub, PresenceRoster, RoomChannel};
use notestream::transcript::{MessageOrigin, TranscriptHandle};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(1);

async fn join(hub: &Arc<LocalHub>, who: &str) -> RoomChannel {
    let mut channel = RoomChannel::join(hub.clone(), "room_one", who)
        .await
        .expect("join");
    channel
        .track(json!({ "id": who, "user_name": who }))
        .await
        .expect("track");
    channel.wait_subscribed(WAIT).await.expect("subscribed");
    channel
}

async fn settle(channel: &mut RoomChannel, until: impl Fn(&RoomChannel) -> bool) {
    tokio::time::timeout(WAIT, async {
        while !until(&*channel) {
            channel.next_event().await.expect("event");
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_roster_follows_joins_and_leaves() {
    let hub = Arc::new(LocalHub::new());
    let mut ada = join(&hub, "ada").await;
    let bob = join(&hub, "bob").await;

    let seen: Arc<Mutex<Vec<PresenceRoster>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    ada.on_presence_sync(move |roster| sink.lock().unwrap().push(roster.clone()));

    settle(&mut ada, |c| c.roster().len() == 2).await;
    assert_eq!(ada.roster().to_vec(), vec!["ada", "bob"]);

    bob.leave().await.unwrap();
    settle(&mut ada, |c| c.roster().len() == 1).await;
    assert_eq!(ada.roster().to_vec(), vec!["ada"]);
    assert!(!seen.lock().unwrap().is_empty());
    assert_eq!(hub.member_count("room_one"), 1);
}

#[tokio::test]
async fn test_chat_messages_reach_peers_only_once() {
    let hub = Arc::new(LocalHub::new());
    let mut ada = join(&hub, "ada").await;
    let mut bob = join(&hub, "bob").await;

    let ada_view = TranscriptHandle::new();
    let bob_view = TranscriptHandle::new();
    ada.attach_transcript(ada_view.clone());
    bob.attach_transcript(bob_view.clone());

    ada.send_message("has anyone read chapter 4?", "ada", Some("https://img/ada.png"))
        .await
        .unwrap();
    bob.send_message("yes, the enzyme part", "bob", None)
        .await
        .unwrap();

    tokio::time::timeout(WAIT, async {
        while bob_view.snapshot().len() < 2 {
            bob.next_event().await.unwrap();
        }
        while ada_view.snapshot().len() < 2 {
            ada.next_event().await.unwrap();
        }
    })
    .await
    .expect("messages delivered");

    for view in [&ada_view, &bob_view] {
        let snapshot = view.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot
            .messages()
            .iter()
            .all(|m| m.id.as_str().starts_with("peer:room_one:")));
    }

    let received = bob_view.snapshot();
    let first = received
        .messages()
        .iter()
        .find(|m| m.content == "has anyone read chapter 4?")
        .expect("ada's message");
    assert!(matches!(
        &first.origin,
        MessageOrigin::Peer { user_name, avatar, .. }
            if user_name == "ada" && avatar.as_deref() == Some("https://img/ada.png")
    ));
}

#[tokio::test]
async fn test_presence_waits_for_acknowledgement() {
    let hub = Arc::new(LocalHub::new());
    let mut bob = join(&hub, "bob").await;

    let mut ada = RoomChannel::join(hub.clone(), "room_one", "ada").await.unwrap();
    ada.track(json!({ "id": "ada" })).await.unwrap();
    assert_eq!(ada.state(), JoinState::Joining);
    assert!(ada.has_pending_track());
    assert!(!hub.presence_state("room_one").contains_key("ada"));

    ada.wait_subscribed(WAIT).await.unwrap();
    assert!(!ada.has_pending_track());
    settle(&mut bob, |c| c.roster().contains("ada")).await;

    ada.leave().await.unwrap();
    settle(&mut bob, |c| !c.roster().contains("ada")).await;
    assert_eq!(bob.roster().to_vec(), vec!["bob"]);
}
