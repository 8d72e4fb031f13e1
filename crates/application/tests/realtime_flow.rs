//! 基于内存仓储的端到端流程：频道管理、消息扇出、私聊、表情节流

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use application::realtime::Outbound;
use application::{
    ChannelManager, Hub, MessageManager, NotificationDependencies, NotificationService,
    SseStreamer, StampThrottler, Streamer, SystemClock, ViewerManager, WebRtcManager,
};
use config::RealtimeConfig;
use domain::{
    ChannelEventType, ChannelId, DomainError, GroupId, HubEvent, StampId, SubscriptionLevel,
    Topic, UpdateChannelArgs, User, UserGroup, UserId, UserStatus,
};
use infrastructure::MemoryRepository;
use serde_json::Value;
use tokio::sync::mpsc;

struct Fixture {
    repo: Arc<MemoryRepository>,
    hub: Arc<Hub>,
    channels: Arc<ChannelManager>,
    messages: Arc<MessageManager>,
    ws: Arc<Streamer>,
    service: NotificationService,
}

async fn fixture() -> Fixture {
    fixture_with(RealtimeConfig::default()).await
}

async fn fixture_with(config: RealtimeConfig) -> Fixture {
    let repo = Arc::new(MemoryRepository::new());
    let hub = Arc::new(Hub::new());
    let channels = Arc::new(
        ChannelManager::new(repo.clone(), hub.clone(), config.max_channel_depth)
            .await
            .unwrap(),
    );
    let messages = Arc::new(
        MessageManager::new(
            repo.clone(),
            repo.clone(),
            repo.clone(),
            channels.clone(),
            hub.clone(),
            &config,
        )
        .unwrap(),
    );
    let viewers = Arc::new(ViewerManager::new(hub.clone(), Arc::new(SystemClock)));
    let webrtc = Arc::new(WebRtcManager::new(hub.clone()));
    let ws = Arc::new(Streamer::new(
        hub.clone(),
        viewers.clone(),
        webrtc,
        config.ws_buffer_size,
    ));
    let service = NotificationService::new(NotificationDependencies {
        hub: hub.clone(),
        channels: channels.clone(),
        messages: messages.clone(),
        users: repo.clone(),
        unreads: repo.clone(),
        files: repo.clone(),
        viewers,
        ws: ws.clone(),
        sse: SseStreamer::new(hub.clone(), config.sse_buffer_size),
        push: None,
        origin: config.origin.clone(),
    });
    Fixture {
        repo,
        hub,
        channels,
        messages,
        ws,
        service,
    }
}

fn add_user(repo: &MemoryRepository, name: &str, bot: bool) -> UserId {
    let mut user = User::new(name);
    user.bot = bot;
    let id = user.id;
    repo.add_user(user);
    id
}

/// 仅保留 MESSAGE_CREATED 帧的 is_citing
fn created_flags(rx: &mut mpsc::Receiver<Outbound>) -> Vec<bool> {
    drain(rx)
        .iter()
        .filter(|frame| frame["type"] == "MESSAGE_CREATED")
        .map(|frame| frame["body"]["is_citing"].as_bool().unwrap())
        .collect()
}

/// 取出队列中全部文本帧并解析
fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(outbound) = rx.try_recv() {
        if let Outbound::Text(text) = outbound {
            frames.push(serde_json::from_str(&text).unwrap());
        }
    }
    frames
}

#[tokio::test]
async fn sibling_names_conflict_case_insensitively() {
    let f = fixture().await;
    let creator = add_user(&f.repo, "alice", false);

    f.channels
        .create_public_channel("general", ChannelId::nil(), creator)
        .await
        .unwrap();
    let err = f
        .channels
        .create_public_channel("GENERAL", ChannelId::nil(), creator)
        .await
        .unwrap_err();
    assert_eq!(err, DomainError::ChannelNameConflicts);
}

#[tokio::test]
async fn archiving_cascades_to_descendants() {
    let f = fixture().await;
    let creator = add_user(&f.repo, "alice", false);
    let a = f
        .channels
        .create_public_channel("a", ChannelId::nil(), creator)
        .await
        .unwrap();
    let b = f.channels.create_public_channel("b", a.id, creator).await.unwrap();
    let c = f.channels.create_public_channel("c", b.id, creator).await.unwrap();

    let mut sub = f.hub.subscribe(16, &[Topic::ChannelUpdated]);
    f.channels.archive_channel(a.id, creator).await.unwrap();

    let mut updated = Vec::new();
    while let Some(HubEvent::ChannelUpdated { channel_id, .. }) = sub.try_recv() {
        updated.push(channel_id);
    }
    updated.sort();
    let mut expected = vec![a.id, b.id, c.id];
    expected.sort();
    assert_eq!(updated, expected);

    assert_eq!(
        f.messages.create(c.id, creator, "hello").await.unwrap_err(),
        DomainError::ChannelArchived
    );
    assert_eq!(
        f.channels.unarchive_channel(b.id, creator).await.unwrap_err(),
        DomainError::InvalidParentChannel
    );
}

#[tokio::test]
async fn forced_channel_marks_everyone_except_viewers_and_poster() {
    let f = fixture().await;
    let poster = add_user(&f.repo, "poster", false);
    let away = add_user(&f.repo, "away", false);
    let watching = add_user(&f.repo, "watching", false);
    add_user(&f.repo, "bot", true);

    let channel = f
        .channels
        .create_public_channel("announce", ChannelId::nil(), poster)
        .await
        .unwrap();
    let mut args = UpdateChannelArgs::new(poster);
    args.force_notification = Some(true);
    f.channels.update_channel(channel.id, args).await.unwrap();

    let (away_session, mut away_rx) = f.ws.open_session(away).unwrap();
    let (watch_session, mut watch_rx) = f.ws.open_session(watching).unwrap();
    f.ws.handle_command(&watch_session, &format!("viewstate:{}:monitoring", channel.id));

    let mut created = f.hub.subscribe(4, &[Topic::MessageCreated]);
    let mut unread = f.hub.subscribe(16, &[Topic::MessageUnread]);
    let message = f.messages.create(channel.id, poster, "all hands").await.unwrap();
    let event = created.recv().await.unwrap();
    f.service.handle(event).await.unwrap();

    let unreads = f.repo.unreads();
    assert_eq!(unreads.len(), 1);
    assert_eq!(unreads[0].user_id, away);
    assert!(unreads[0].noticeable);
    match unread.try_recv() {
        Some(HubEvent::MessageUnread {
            user_id,
            message_id,
            noticeable,
            ..
        }) => {
            assert_eq!(user_id, away);
            assert_eq!(message_id, message.id);
            assert!(noticeable);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    for frames in [drain(&mut away_rx), drain(&mut watch_rx)] {
        let created: Vec<_> = frames
            .iter()
            .filter(|f| f["type"] == "MESSAGE_CREATED")
            .collect();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0]["body"]["id"], message.id.to_string());
        assert_eq!(created[0]["body"]["is_citing"], false);
    }
    f.ws.close_session(&away_session);
    f.ws.close_session(&watch_session);
}

#[tokio::test]
async fn archiving_records_audit_rows_and_spares_sibling_branch() {
    let f = fixture().await;
    let creator = add_user(&f.repo, "alice", false);
    let root = f
        .channels
        .create_public_channel("root", ChannelId::nil(), creator)
        .await
        .unwrap();
    let a = f.channels.create_public_channel("a", root.id, creator).await.unwrap();
    let b = f.channels.create_public_channel("b", a.id, creator).await.unwrap();
    let sibling = f.channels.create_public_channel("s", root.id, creator).await.unwrap();

    f.channels.archive_channel(a.id, creator).await.unwrap();
    f.channels.wait().await;

    let mut archived: Vec<ChannelId> = f
        .repo
        .channel_events()
        .into_iter()
        .filter(|e| e.event_type == ChannelEventType::VisibilityChanged)
        .map(|e| {
            assert_eq!(e.detail["visibility"], false);
            assert_eq!(e.detail["userId"], creator.to_string());
            e.channel_id
        })
        .collect();
    archived.sort();
    let mut expected = vec![a.id, b.id];
    expected.sort();
    assert_eq!(archived, expected);

    for id in [a.id, b.id] {
        assert!(f.channels.get_channel(id).await.unwrap().is_archived());
    }
    for id in [root.id, sibling.id] {
        assert!(!f.channels.get_channel(id).await.unwrap().is_archived());
    }
    f.messages.create(sibling.id, creator, "still open").await.unwrap();
}

#[tokio::test]
async fn rename_and_move_enforce_names_depth_and_archive() {
    let f = fixture().await;
    let creator = add_user(&f.repo, "alice", false);

    // d1/d2/d3/d4/d5 占满默认的 5 层
    let mut chain = Vec::new();
    let mut parent = ChannelId::nil();
    for name in ["d1", "d2", "d3", "d4", "d5"] {
        let channel = f
            .channels
            .create_public_channel(name, parent, creator)
            .await
            .unwrap();
        parent = channel.id;
        chain.push(channel.id);
    }
    assert_eq!(
        f.channels
            .create_public_channel("d6", chain[4], creator)
            .await
            .unwrap_err(),
        DomainError::TooDeepChannel
    );

    let mover = f
        .channels
        .create_public_channel("mover", ChannelId::nil(), creator)
        .await
        .unwrap();
    f.channels
        .create_public_channel("leaf", mover.id, creator)
        .await
        .unwrap();

    let mut rename = UpdateChannelArgs::new(creator);
    rename.name = Some("D1".to_string());
    assert_eq!(
        f.channels.update_channel(mover.id, rename).await.unwrap_err(),
        DomainError::ChannelNameConflicts
    );
    let mut case_only = UpdateChannelArgs::new(creator);
    case_only.name = Some("Mover".to_string());
    f.channels.update_channel(mover.id, case_only).await.unwrap();

    // mover 子树高 2，挂到 d4 下会到第 6 层
    let mut too_deep = UpdateChannelArgs::new(creator);
    too_deep.parent = Some(chain[3]);
    assert_eq!(
        f.channels.update_channel(mover.id, too_deep).await.unwrap_err(),
        DomainError::TooDeepChannel
    );

    let mut into_descendant = UpdateChannelArgs::new(creator);
    into_descendant.parent = Some(chain[2]);
    assert_eq!(
        f.channels
            .update_channel(chain[0], into_descendant)
            .await
            .unwrap_err(),
        DomainError::TooDeepChannel
    );

    let attic = f
        .channels
        .create_public_channel("attic", ChannelId::nil(), creator)
        .await
        .unwrap();
    f.channels.archive_channel(attic.id, creator).await.unwrap();
    let mut into_archived = UpdateChannelArgs::new(creator);
    into_archived.parent = Some(attic.id);
    assert_eq!(
        f.channels.update_channel(mover.id, into_archived).await.unwrap_err(),
        DomainError::InvalidParentChannel
    );

    let mut fits = UpdateChannelArgs::new(creator);
    fits.parent = Some(chain[2]);
    f.channels.update_channel(mover.id, fits).await.unwrap();
    assert_eq!(
        f.channels.get_channel_path_from_id(mover.id),
        "d1/d2/d3/Mover"
    );
}

#[tokio::test]
async fn subscription_changes_reject_dm_and_forced_channels() {
    let f = fixture().await;
    let alice = add_user(&f.repo, "alice", false);
    let bob = add_user(&f.repo, "bob", false);
    let levels = HashMap::from([(bob, SubscriptionLevel::MarkAndNotify)]);

    let dm = f.messages.create_dm(alice, bob, "hi").await.unwrap();
    assert_eq!(
        f.channels
            .change_channel_subscriptions(dm.channel_id, levels.clone(), false, alice)
            .await
            .unwrap_err(),
        DomainError::InvalidChannel
    );

    let channel = f
        .channels
        .create_public_channel("announce", ChannelId::nil(), alice)
        .await
        .unwrap();
    let mut args = UpdateChannelArgs::new(alice);
    args.force_notification = Some(true);
    f.channels.update_channel(channel.id, args).await.unwrap();
    assert_eq!(
        f.channels
            .change_channel_subscriptions(channel.id, levels, false, alice)
            .await
            .unwrap_err(),
        DomainError::ForcedNotification
    );
    assert!(f
        .channels
        .get_channel_subscriptions(channel.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn pins_and_archived_channels_guard_message_operations() {
    let f = fixture_with(RealtimeConfig {
        pin_limit: 2,
        ..RealtimeConfig::default()
    })
    .await;
    let user = add_user(&f.repo, "alice", false);
    let channel = f
        .channels
        .create_public_channel("pins", ChannelId::nil(), user)
        .await
        .unwrap();
    let first = f.messages.create(channel.id, user, "one").await.unwrap();
    let second = f.messages.create(channel.id, user, "two").await.unwrap();
    let third = f.messages.create(channel.id, user, "three").await.unwrap();

    f.messages.pin(first.id, user).await.unwrap();
    assert_eq!(
        f.messages.pin(first.id, user).await.unwrap_err(),
        DomainError::AlreadyExists
    );
    f.messages.pin(second.id, user).await.unwrap();
    assert_eq!(
        f.messages.pin(third.id, user).await.unwrap_err(),
        DomainError::PinLimitExceeded
    );
    assert_eq!(
        f.messages.unpin(third.id, user).await.unwrap_err(),
        DomainError::NotFound
    );
    assert!(matches!(
        f.messages.add_stamps(third.id, StampId::generate(), user, 0).await,
        Err(DomainError::InvalidArgument { .. })
    ));

    f.channels.archive_channel(channel.id, user).await.unwrap();
    assert_eq!(
        f.messages.edit(third.id, "edited").await.unwrap_err(),
        DomainError::ChannelArchived
    );
    assert_eq!(
        f.messages.delete(third.id).await.unwrap_err(),
        DomainError::ChannelArchived
    );
    assert_eq!(
        f.messages.pin(third.id, user).await.unwrap_err(),
        DomainError::ChannelArchived
    );
    assert_eq!(
        f.messages.unpin(first.id, user).await.unwrap_err(),
        DomainError::ChannelArchived
    );
    assert_eq!(
        f.messages
            .add_stamps(third.id, StampId::generate(), user, 1)
            .await
            .unwrap_err(),
        DomainError::ChannelArchived
    );
}

#[tokio::test]
async fn public_message_reaches_subscribers_mentions_groups_and_citations() {
    let f = fixture().await;
    let poster = add_user(&f.repo, "poster", false);
    let sub = add_user(&f.repo, "sub", false);
    let watcher = add_user(&f.repo, "watcher", false);
    let mentioned = add_user(&f.repo, "mentioned", false);
    let gmember = add_user(&f.repo, "gmember", false);
    let outsider = add_user(&f.repo, "outsider", false);
    let bot = add_user(&f.repo, "helper", true);
    let mut gone = User::new("gone");
    gone.status = UserStatus::Deactivated;
    let gone_id = gone.id;
    f.repo.add_user(gone);
    let mut citee = User::new("citee");
    citee.notify_citation = true;
    let citee_id = citee.id;
    f.repo.add_user(citee);

    let group = GroupId::generate();
    f.repo.add_group(UserGroup {
        id: group,
        name: "team".to_string(),
        members: vec![gmember, poster],
    });

    let channel = f
        .channels
        .create_public_channel("general", ChannelId::nil(), poster)
        .await
        .unwrap();
    f.channels
        .change_channel_subscriptions(
            channel.id,
            HashMap::from([
                (sub, SubscriptionLevel::MarkAndNotify),
                (watcher, SubscriptionLevel::MarkAndNotify),
            ]),
            false,
            poster,
        )
        .await
        .unwrap();
    let cited = f
        .messages
        .create(channel.id, citee_id, "original")
        .await
        .unwrap();

    let mut sessions = Vec::new();
    let mut receivers = HashMap::new();
    for user in [poster, sub, watcher, mentioned, gmember, citee_id, outsider] {
        let (session, rx) = f.ws.open_session(user).unwrap();
        if user == watcher {
            f.ws.handle_command(&session, &format!("viewstate:{}:monitoring", channel.id));
        }
        sessions.push(session);
        receivers.insert(user, rx);
    }

    let content = format!(
        r#"!{{"type":"user","raw":"@mentioned","id":"{mentioned}"}} !{{"type":"user","raw":"@helper","id":"{bot}"}} !{{"type":"user","raw":"@gone","id":"{gone_id}"}} !{{"type":"group","raw":"@team","id":"{group}"}} http://localhost:3000/messages/{}"#,
        cited.id
    );
    let mut created = f.hub.subscribe(4, &[Topic::MessageCreated]);
    f.messages.create(channel.id, poster, &content).await.unwrap();
    let event = created.recv().await.unwrap();
    f.service.handle(event).await.unwrap();

    let mut unreads: Vec<(UserId, bool)> = f
        .repo
        .unreads()
        .into_iter()
        .map(|u| (u.user_id, u.noticeable))
        .collect();
    unreads.sort();
    let mut expected = vec![
        (citee_id, true),
        (gmember, true),
        (mentioned, true),
        (sub, false),
    ];
    expected.sort();
    assert_eq!(unreads, expected);

    for user in [sub, watcher, mentioned, gmember] {
        let rx = receivers.get_mut(&user).unwrap();
        assert_eq!(created_flags(rx), vec![false]);
    }
    assert_eq!(created_flags(receivers.get_mut(&citee_id).unwrap()), vec![true]);
    for user in [poster, outsider] {
        assert!(created_flags(receivers.get_mut(&user).unwrap()).is_empty());
    }

    for session in &sessions {
        f.ws.close_session(session);
    }
}

#[tokio::test]
async fn first_dm_creates_channel_and_notifies_both_sides() {
    let f = fixture().await;
    let alice = add_user(&f.repo, "alice", false);
    let bob = add_user(&f.repo, "bob", false);
    let carol = add_user(&f.repo, "carol", false);

    let (_a, mut alice_rx) = f.ws.open_session(alice).unwrap();
    let (_b, mut bob_rx) = f.ws.open_session(bob).unwrap();
    let (_c, mut carol_rx) = f.ws.open_session(carol).unwrap();

    let mut sub = f
        .hub
        .subscribe(8, &[Topic::ChannelCreated, Topic::MessageCreated]);
    let message = f.messages.create_dm(alice, bob, "hi").await.unwrap();

    match sub.recv().await {
        Some(event @ HubEvent::ChannelCreated { private: true, .. }) => {
            f.service.handle(event).await.unwrap()
        }
        other => panic!("unexpected event: {other:?}"),
    }
    let event = sub.recv().await.unwrap();
    f.service.handle(event).await.unwrap();

    let alice_frames = drain(&mut alice_rx);
    let bob_frames = drain(&mut bob_rx);
    assert_eq!(alice_frames[0]["type"], "CHANNEL_CREATED");
    assert_eq!(alice_frames[0]["body"]["dm_user_id"], bob.to_string());
    assert_eq!(bob_frames[0]["body"]["dm_user_id"], alice.to_string());
    assert_eq!(alice_frames[1]["type"], "MESSAGE_CREATED");
    assert_eq!(bob_frames[1]["body"]["id"], message.id.to_string());
    assert!(drain(&mut carol_rx).is_empty());

    let unreads = f.repo.unreads();
    assert_eq!(unreads.len(), 1);
    assert_eq!(unreads[0].user_id, bob);
    assert!(!unreads[0].noticeable);

    // 第二条消息复用同一个频道
    let again = f.messages.create_dm(bob, alice, "hey").await.unwrap();
    assert_eq!(again.channel_id, message.channel_id);
}

#[tokio::test(start_paused = true)]
async fn stamp_burst_collapses_into_one_update() {
    let f = fixture().await;
    let user = add_user(&f.repo, "alice", false);
    let channel = f
        .channels
        .create_public_channel("random", ChannelId::nil(), user)
        .await
        .unwrap();
    let message = f.messages.create(channel.id, user, "nice").await.unwrap();

    let throttler = Arc::new(StampThrottler::for_messages(
        f.messages.clone(),
        f.hub.clone(),
        Duration::from_secs(1),
        Duration::from_secs(5),
    ));
    let mut updates = f.hub.subscribe(8, &[Topic::MessageStampsUpdated]);
    let runner = throttler.clone().run(&f.hub, 64);

    let stamp = StampId::generate();
    for _ in 0..5 {
        f.messages.add_stamps(message.id, stamp, user, 1).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(1100)).await;

    match updates.try_recv() {
        Some(HubEvent::MessageStampsUpdated { message_id, stamps }) => {
            assert_eq!(message_id, message.id);
            assert_eq!(stamps.len(), 1);
            assert_eq!(stamps[0].count, 5);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(updates.try_recv().is_none());
    runner.abort();
}
